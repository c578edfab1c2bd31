//! State shared by the steps of one check chain

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;

use chartcheck_core::{PathError, extract, lookup};

use crate::handle::{Failure, TestHandle};

/// Context threaded through a check chain
///
/// Holds the test handle, a typed key/value store the steps use to pass data
/// along, and the rendered values of the case. Reads with the wrong type
/// return `None`.
///
/// ```ignore
/// chain.once(|ctx| ctx.store("replicas", 3u32))
///      .once(|ctx| assert_eq!(ctx.get::<u32>("replicas"), Some(&3)));
/// ```
#[derive(Default)]
pub struct TestContext {
    handle: TestHandle,
    store: HashMap<String, Box<dyn Any + Send>>,
    values: Option<JsonValue>,
    continue_execution: bool,
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.store.keys().collect();
        keys.sort();
        f.debug_struct("TestContext")
            .field("handle", &self.handle)
            .field("keys", &keys)
            .field("continue_execution", &self.continue_execution)
            .finish()
    }
}

impl TestContext {
    pub fn new(handle: TestHandle) -> Self {
        Self {
            handle,
            ..Self::default()
        }
    }

    /// Attach the rendered values root
    pub fn with_values(mut self, values: JsonValue) -> Self {
        self.values = Some(values);
        self
    }

    // ========================================================================
    // Handle
    // ========================================================================

    pub fn handle(&self) -> &TestHandle {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut TestHandle {
        &mut self.handle
    }

    pub fn into_handle(self) -> TestHandle {
        self.handle
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.handle.fail(message);
    }

    pub fn record(&mut self, failure: Failure) {
        self.handle.record(failure);
    }

    pub fn failed(&self) -> bool {
        self.handle.failed()
    }

    /// Let the next step run even though the test has failed
    pub fn continue_execution(&mut self) {
        self.continue_execution = true;
    }

    /// Read and clear the continue flag
    pub(crate) fn take_continue(&mut self) -> bool {
        std::mem::take(&mut self.continue_execution)
    }

    // ========================================================================
    // Store
    // ========================================================================

    pub fn store<V: Any + Send>(&mut self, key: impl Into<String>, value: V) {
        self.store.insert(key.into(), Box::new(value));
    }

    /// Stored value, `None` when absent or of another type
    pub fn get<V: Any>(&self, key: &str) -> Option<&V> {
        self.store.get(key)?.downcast_ref()
    }

    pub fn get_mut<V: Any>(&mut self, key: &str) -> Option<&mut V> {
        self.store.get_mut(key)?.downcast_mut()
    }

    /// Stored value or `V::default()`
    pub fn get_or_default<V: Any + Clone + Default>(&self, key: &str) -> V {
        self.get::<V>(key).cloned().unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    /// Set `map_key` in the map stored under `key`
    ///
    /// A value of another type under `key` is replaced by a fresh map.
    pub fn map_set<K, V>(&mut self, key: &str, map_key: K, value: V)
    where
        K: Hash + Eq + Send + 'static,
        V: Send + 'static,
    {
        if let Some(map) = self.get_mut::<IndexMap<K, V>>(key) {
            map.insert(map_key, value);
            return;
        }
        let mut map = IndexMap::new();
        map.insert(map_key, value);
        self.store(key, map);
    }

    pub fn map_get<K, V>(&self, key: &str, map_key: &K) -> Option<&V>
    where
        K: Hash + Eq + 'static,
        V: 'static,
    {
        self.get::<IndexMap<K, V>>(key)?.get(map_key)
    }

    /// Visit the entries of the map under `key` in insertion order
    pub fn map_for<K, V>(&self, key: &str, mut f: impl FnMut(&K, &V))
    where
        K: Hash + Eq + 'static,
        V: 'static,
    {
        if let Some(map) = self.get::<IndexMap<K, V>>(key) {
            for (k, v) in map {
                f(k, v);
            }
        }
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Values the chart was rendered with
    pub fn values(&self) -> Option<&JsonValue> {
        self.values.as_ref()
    }

    /// Raw value at `path` (e.g. `image.tag` or `ports[0].name`)
    pub fn value(&self, path: &str) -> Result<Option<&JsonValue>, PathError> {
        match &self.values {
            Some(values) => lookup(values, path),
            None => Ok(None),
        }
    }

    /// Typed value at `path`
    pub fn extract<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, PathError> {
        match &self.values {
            Some(values) => extract(values, path),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_and_get() {
        let mut ctx = TestContext::default();
        ctx.store("count", 3u32);
        assert_eq!(ctx.get::<u32>("count"), Some(&3));
        assert_eq!(ctx.get::<String>("count"), None);
        assert_eq!(ctx.get::<u32>("missing"), None);
        assert_eq!(ctx.get_or_default::<String>("count"), "");

        *ctx.get_mut::<u32>("count").unwrap() += 1;
        assert_eq!(ctx.get_or_default::<u32>("count"), 4);
        assert!(ctx.remove("count"));
        assert!(!ctx.contains("count"));
    }

    #[test]
    fn test_map_helpers() {
        let mut ctx = TestContext::default();
        ctx.map_set("images", "web".to_string(), "nginx".to_string());
        ctx.map_set("images", "db".to_string(), "postgres".to_string());
        ctx.map_set("images", "web".to_string(), "nginx:1.27".to_string());

        assert_eq!(
            ctx.map_get::<String, String>("images", &"web".to_string()),
            Some(&"nginx:1.27".to_string())
        );
        assert_eq!(ctx.map_get::<String, u32>("images", &"web".to_string()), None);

        let mut seen = Vec::new();
        ctx.map_for::<String, String>("images", |k, v| seen.push(format!("{k}={v}")));
        assert_eq!(seen, vec!["web=nginx:1.27", "db=postgres"]);
    }

    #[test]
    fn test_map_set_replaces_other_types() {
        let mut ctx = TestContext::default();
        ctx.store("ports", "not a map");
        ctx.map_set("ports", 80u16, true);
        assert_eq!(ctx.map_get::<u16, bool>("ports", &80), Some(&true));
    }

    #[test]
    fn test_continue_flag_is_single_use() {
        let mut ctx = TestContext::default();
        ctx.continue_execution();
        assert!(ctx.take_continue());
        assert!(!ctx.take_continue());
    }

    #[test]
    fn test_values() {
        let ctx = TestContext::new(TestHandle::new("t"))
            .with_values(json!({"image": {"tag": "v1"}, "ports": [80, 443]}));
        assert_eq!(ctx.value("image.tag").unwrap(), Some(&json!("v1")));
        assert_eq!(ctx.extract::<u16>("ports[1]").unwrap(), Some(443));
        assert_eq!(ctx.extract::<u16>("ports[5]").unwrap(), None);
        assert!(ctx.extract::<u16>("ports[01]").is_err());
        assert_eq!(TestContext::default().value("image").unwrap(), None);
    }
}
