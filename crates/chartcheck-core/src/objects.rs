//! Rendered Kubernetes objects and their per-file grouping

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;

use crate::extract::{PathError, Segment, parse_path, resolve};

/// Key of the [`ObjectSetMap`] entry that holds every rendered object
pub const ALL_FILES: &str = "";

/// Group, version and kind of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Split an `apiVersion` (`apps/v1` or `v1`) and pair it with a kind
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.rsplit_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        Self::new(group, version, kind)
    }

    /// `apiVersion` as written in manifests
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// A rendered object kept as a JSON map
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unstructured(Map<String, JsonValue>);

impl Unstructured {
    pub fn new(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }

    /// Wrap a JSON value; only objects qualify
    pub fn from_value(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn api_version(&self) -> &str {
        self.str_at(&["apiVersion"]).unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.str_at(&["kind"]).unwrap_or_default()
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version(self.api_version(), self.kind())
    }

    pub fn name(&self) -> Option<&str> {
        self.str_at(&["metadata", "name"])
    }

    pub fn namespace(&self) -> Option<&str> {
        self.str_at(&["metadata", "namespace"])
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map_at("labels")
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map_at("annotations")
    }

    /// Resolve a dotted/bracketed path inside the object
    pub fn get(&self, path: &str) -> Result<Option<&JsonValue>, PathError> {
        let segments = parse_path(path)?;
        let Some((Segment::Key(first), tail)) = segments.split_first() else {
            return Ok(None);
        };
        Ok(self.0.get(first).and_then(|value| resolve(value, tail)))
    }

    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    pub fn to_value(&self) -> JsonValue {
        JsonValue::Object(self.0.clone())
    }

    pub fn into_value(self) -> JsonValue {
        JsonValue::Object(self.0)
    }

    /// Human-readable identity, e.g. `ConfigMap default/settings`
    pub fn describe(&self) -> String {
        match (self.namespace(), self.name()) {
            (Some(ns), Some(name)) => format!("{} {}/{}", self.kind(), ns, name),
            (None, Some(name)) => format!("{} {}", self.kind(), name),
            _ => self.kind().to_string(),
        }
    }

    fn str_at(&self, path: &[&str]) -> Option<&str> {
        let (first, rest) = path.split_first()?;
        let mut current = self.0.get(*first)?;
        for key in rest {
            current = current.get(*key)?;
        }
        current.as_str()
    }

    fn string_map_at(&self, key: &str) -> BTreeMap<String, String> {
        self.0
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(|m| m.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn identity(&self) -> Option<(String, String, String, String)> {
        Some((
            self.api_version().to_string(),
            self.kind().to_string(),
            self.namespace().unwrap_or_default().to_string(),
            self.name()?.to_string(),
        ))
    }
}

impl From<Unstructured> for JsonValue {
    fn from(obj: Unstructured) -> Self {
        obj.into_value()
    }
}

/// Ordered set of objects, unique by (apiVersion, kind, namespace, name)
///
/// Inserting an object whose identity is already present replaces the earlier
/// one in place. Unnamed objects are never merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectSet {
    objects: Vec<Unstructured>,
    index: IndexMap<(String, String, String, String), usize>,
}

impl ObjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object: Unstructured) {
        match object.identity() {
            Some(identity) => match self.index.get(&identity) {
                Some(&pos) => self.objects[pos] = object,
                None => {
                    self.index.insert(identity, self.objects.len());
                    self.objects.push(object);
                }
            },
            None => self.objects.push(object),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Unstructured> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn as_slice(&self) -> &[Unstructured] {
        &self.objects
    }

    pub fn into_vec(self) -> Vec<Unstructured> {
        self.objects
    }
}

impl FromIterator<Unstructured> for ObjectSet {
    fn from_iter<I: IntoIterator<Item = Unstructured>>(iter: I) -> Self {
        let mut set = ObjectSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<Unstructured> for ObjectSet {
    fn extend<I: IntoIterator<Item = Unstructured>>(&mut self, iter: I) {
        for object in iter {
            self.insert(object);
        }
    }
}

impl<'a> IntoIterator for &'a ObjectSet {
    type Item = &'a Unstructured;
    type IntoIter = std::slice::Iter<'a, Unstructured>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.iter()
    }
}

/// Rendered objects per template file, plus the [`ALL_FILES`] union
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectSetMap {
    sets: BTreeMap<String, ObjectSet>,
}

impl ObjectSetMap {
    pub fn new() -> Self {
        let mut sets = BTreeMap::new();
        sets.insert(ALL_FILES.to_string(), ObjectSet::new());
        Self { sets }
    }

    /// Record an object rendered from `file` (also added to the union)
    pub fn insert(&mut self, file: &str, object: Unstructured) {
        self.sets
            .entry(ALL_FILES.to_string())
            .or_default()
            .insert(object.clone());
        self.sets.entry(file.to_string()).or_default().insert(object);
    }

    /// Every rendered object across files
    pub fn all(&self) -> &ObjectSet {
        static EMPTY: std::sync::OnceLock<ObjectSet> = std::sync::OnceLock::new();
        self.sets
            .get(ALL_FILES)
            .unwrap_or_else(|| EMPTY.get_or_init(ObjectSet::new))
    }

    pub fn get(&self, file: &str) -> Option<&ObjectSet> {
        self.sets.get(file)
    }

    /// Template files that produced at least one object
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.sets
            .keys()
            .filter(|k| k.as_str() != ALL_FILES)
            .map(String::as_str)
    }

    /// Union of the sets whose file satisfies `filter`, in file order
    pub fn select(&self, mut filter: impl FnMut(&str) -> bool) -> ObjectSet {
        self.sets
            .iter()
            .filter(|(file, _)| file.as_str() != ALL_FILES && filter(file))
            .flat_map(|(_, set)| set.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(kind: &str, name: &str, data: &str) -> Unstructured {
        Unstructured::from_value(json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": {"name": name, "namespace": "default", "labels": {"app": "demo"}},
            "data": {"key": data}
        }))
        .unwrap()
    }

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = GroupVersionKind::from_api_version("apps/v1", "Deployment");
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "apps/v1");
        assert_eq!(gvk.to_string(), "apps/v1, Kind=Deployment");

        let core = GroupVersionKind::from_api_version("v1", "ConfigMap");
        assert_eq!(core.group, "");
        assert_eq!(core.api_version(), "v1");
    }

    #[test]
    fn test_unstructured_accessors() {
        let obj = object("ConfigMap", "settings", "a");
        assert_eq!(obj.kind(), "ConfigMap");
        assert_eq!(obj.name(), Some("settings"));
        assert_eq!(obj.namespace(), Some("default"));
        assert_eq!(obj.labels()["app"], "demo");
        assert!(obj.annotations().is_empty());
        assert_eq!(obj.get("data.key").unwrap(), Some(&json!("a")));
        assert_eq!(obj.get("metadata.missing").unwrap(), None);
        assert_eq!(obj.describe(), "ConfigMap default/settings");
        assert!(Unstructured::from_value(json!([1])).is_none());
    }

    #[test]
    fn test_object_set_dedup_replaces_in_place() {
        let mut set = ObjectSet::new();
        set.insert(object("ConfigMap", "a", "first"));
        set.insert(object("Secret", "a", "x"));
        set.insert(object("ConfigMap", "a", "second"));

        assert_eq!(set.len(), 2);
        assert_eq!(set.as_slice()[0].get("data.key").unwrap(), Some(&json!("second")));
        assert_eq!(set.as_slice()[1].kind(), "Secret");
    }

    #[test]
    fn test_object_set_map_union() {
        let mut map = ObjectSetMap::new();
        map.insert("templates/a.yaml", object("ConfigMap", "a", "1"));
        map.insert("templates/b.yaml", object("ConfigMap", "b", "2"));

        assert_eq!(map.all().len(), 2);
        assert_eq!(map.files().collect::<Vec<_>>(), vec!["templates/a.yaml", "templates/b.yaml"]);
        assert_eq!(map.get("templates/b.yaml").unwrap().len(), 1);

        let selected = map.select(|f| f.ends_with("b.yaml"));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected.as_slice()[0].name(), Some("b"));
    }
}
