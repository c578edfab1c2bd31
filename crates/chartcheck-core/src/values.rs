//! Values handling: deep merge, `--set` style overrides and set-key flattening

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from a YAML string; an empty document yields empty values
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        if value.is_null() {
            return Ok(Self::new());
        }
        Ok(Self(value))
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Set a value by dotted path (e.g., "image.tag")
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let parts: Vec<PathPart> = path
            .split('.')
            .map(|key| PathPart::Key(key.to_string()))
            .collect();
        set_nested(&mut self.0, &parts, value);
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        path.split('.').try_fold(&self.0, |value, key| match value {
            JsonValue::Object(map) => map.get(key),
            _ => None,
        })
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Apply `key=value[,key=value]` overrides with typed values
    ///
    /// `true`/`false` become booleans, `null` becomes null, integers become
    /// numbers and `{a,b}` becomes a list. Everything else stays a string.
    pub fn apply_set(&mut self, input: &str) -> Result<()> {
        for (path, raw) in split_assignments(input)? {
            let value = parse_list_or(&raw, typed_value);
            set_nested(&mut self.0, &path, value);
        }
        Ok(())
    }

    /// Apply `key=value` overrides, keeping every value a string
    pub fn apply_set_string(&mut self, input: &str) -> Result<()> {
        for (path, raw) in split_assignments(input)? {
            let value = parse_list_or(&raw, |s| JsonValue::String(s.to_string()));
            set_nested(&mut self.0, &path, value);
        }
        Ok(())
    }

    /// Apply `key=path` overrides; the value is the file content
    ///
    /// Relative paths resolve against `base_dir`.
    pub fn apply_set_file(&mut self, input: &str, base_dir: &Path) -> Result<()> {
        for (path, raw) in split_assignments(input)? {
            let file = base_dir.join(&raw);
            let content = std::fs::read_to_string(&file).map_err(|e| {
                CoreError::override_parse(input, format!("cannot read {}: {}", file.display(), e))
            })?;
            set_nested(&mut self.0, &path, JsonValue::String(content));
        }
        Ok(())
    }

    /// Apply a `key=<json literal>` override
    pub fn apply_set_json(&mut self, input: &str) -> Result<()> {
        let (key, raw) = input
            .split_once('=')
            .ok_or_else(|| CoreError::override_parse(input, "expected key=value"))?;
        let path = parse_key_path(input, key)?;
        let value: JsonValue = serde_json::from_str(raw)
            .map_err(|e| CoreError::override_parse(input, format!("invalid JSON: {}", e)))?;
        set_nested(&mut self.0, &path, value);
        Ok(())
    }

    // =========================================================================
    // Subchart value scoping
    // =========================================================================

    /// Values a subchart sees: its own section of the parent plus `global`
    pub fn scope_for_subchart(parent: &JsonValue, subchart_name: &str) -> Values {
        let mut scoped = serde_json::Map::new();

        if let JsonValue::Object(parent_obj) = parent {
            if let Some(JsonValue::Object(subchart_obj)) = parent_obj.get(subchart_name) {
                for (k, v) in subchart_obj {
                    scoped.insert(k.clone(), v.clone());
                }
            }
            if let Some(global) = parent_obj.get("global") {
                scoped.insert("global".to_string(), global.clone());
            }
        }

        Values(JsonValue::Object(scoped))
    }

    /// Subchart defaults overlaid with the parent's scoped values
    pub fn for_subchart(defaults: Values, parent: &JsonValue, subchart_name: &str) -> Values {
        let mut result = defaults;
        result.merge(&Self::scope_for_subchart(parent, subchart_name));
        result
    }
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathPart {
    Key(String),
    Index(usize),
}

/// Set a nested value, creating intermediate maps and lists as needed
fn set_nested(value: &mut JsonValue, path: &[PathPart], new_value: JsonValue) {
    let Some((head, rest)) = path.split_first() else {
        *value = new_value;
        return;
    };

    match head {
        PathPart::Key(key) => {
            if !value.is_object() {
                *value = JsonValue::Object(serde_json::Map::new());
            }
            if let JsonValue::Object(map) = value {
                let entry = map.entry(key.clone()).or_insert(JsonValue::Null);
                set_nested(entry, rest, new_value);
            }
        }
        PathPart::Index(index) => {
            if !value.is_array() {
                *value = JsonValue::Array(Vec::new());
            }
            if let JsonValue::Array(items) = value {
                if items.len() <= *index {
                    items.resize(*index + 1, JsonValue::Null);
                }
                set_nested(&mut items[*index], rest, new_value);
            }
        }
    }
}

/// Split `a=1,b.c={x,y}` into key paths and raw values
fn split_assignments(input: &str) -> Result<Vec<(Vec<PathPart>, String)>> {
    let mut assignments = Vec::new();

    for item in split_top_level(input, ',') {
        if item.is_empty() {
            continue;
        }
        let (key, raw) = split_unescaped_eq(&item)
            .ok_or_else(|| CoreError::override_parse(input, format!("'{}' is not key=value", item)))?;
        assignments.push((parse_key_path(input, &key)?, raw));
    }

    if assignments.is_empty() {
        return Err(CoreError::override_parse(input, "no assignments found"));
    }

    Ok(assignments)
}

/// Split on `sep` outside of `{...}` and not preceded by a backslash
fn split_top_level(input: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c == sep && depth == 0 => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);

    parts
}

fn split_unescaped_eq(item: &str) -> Option<(String, String)> {
    let mut escaped = false;
    for (i, c) in item.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '=' if !escaped => return Some((item[..i].to_string(), unescape(&item[i + 1..]))),
            _ => escaped = false,
        }
    }
    None
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse `a.b\.c[0].d` into path parts
fn parse_key_path(input: &str, key: &str) -> Result<Vec<PathPart>> {
    let mut parts = Vec::new();
    let mut name = String::new();
    let mut chars = key.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => name.push(next),
                None => return Err(CoreError::override_parse(input, "dangling escape in key")),
            },
            '.' => {
                if name.is_empty() && !matches!(parts.last(), Some(PathPart::Index(_))) {
                    return Err(CoreError::override_parse(input, format!("empty key segment in '{}'", key)));
                }
                if !name.is_empty() {
                    parts.push(PathPart::Key(std::mem::take(&mut name)));
                }
            }
            '[' => {
                if !name.is_empty() {
                    parts.push(PathPart::Key(std::mem::take(&mut name)));
                }
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        _ => {
                            return Err(CoreError::override_parse(
                                input,
                                format!("invalid list index in '{}'", key),
                            ));
                        }
                    }
                }
                let index = digits.parse::<usize>().map_err(|_| {
                    CoreError::override_parse(input, format!("invalid list index in '{}'", key))
                })?;
                parts.push(PathPart::Index(index));
            }
            c => name.push(c),
        }
    }

    if !name.is_empty() {
        parts.push(PathPart::Key(name));
    }
    if parts.is_empty() {
        return Err(CoreError::override_parse(input, "empty key"));
    }

    Ok(parts)
}

fn parse_list_or(raw: &str, scalar: impl Fn(&str) -> JsonValue) -> JsonValue {
    match raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        Some(inner) if inner.is_empty() => JsonValue::Array(Vec::new()),
        Some(inner) => JsonValue::Array(
            split_top_level(inner, ',')
                .iter()
                .map(|item| scalar(&unescape(item)))
                .collect(),
        ),
        None => scalar(raw),
    }
}

/// Helm-compatible typing: booleans, null and integers; everything else is a string
fn typed_value(raw: &str) -> JsonValue {
    match raw {
        "true" => JsonValue::Bool(true),
        "false" => JsonValue::Bool(false),
        "null" => JsonValue::Null,
        _ => {
            let digits = raw.strip_prefix('-').unwrap_or(raw);
            let leading_zero = digits.len() > 1 && digits.starts_with('0');
            match raw.parse::<i64>() {
                Ok(n) if !leading_zero => JsonValue::Number(n.into()),
                _ => JsonValue::String(raw.to_string()),
            }
        }
    }
}

/// Flatten a values map into the set of field paths it sets
///
/// - every mapping key yields `prefix.key`
/// - under a non-empty prefix the mapping is also walked as if it were keyed
///   by `[]`, so a mapping of records covers `prefix[].field`
/// - every sequence yields `prefix[]`
/// - a non-null scalar yields its prefix with trailing `[]` removed
///
/// Paths are relative to the values root and start with a dot.
pub fn set_keys(values: &JsonValue) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    collect_set_keys("", values, &mut keys);
    keys
}

fn collect_set_keys(prefix: &str, value: &JsonValue, keys: &mut BTreeSet<String>) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map {
                let path = format!("{}.{}", prefix, key);
                keys.insert(path.clone());
                collect_set_keys(&path, child, keys);

                if !prefix.is_empty() {
                    let generic = format!("{}[]", prefix);
                    keys.insert(generic.clone());
                    collect_set_keys(&generic, child, keys);
                }
            }
        }
        JsonValue::Array(items) => {
            let path = format!("{}[]", prefix);
            keys.insert(path.clone());
            for item in items {
                collect_set_keys(&path, item, keys);
            }
        }
        JsonValue::Null => {}
        _ => {
            let cleaned = strip_list_suffix(prefix);
            if !cleaned.is_empty() {
                keys.insert(cleaned.to_string());
            }
        }
    }
}

/// Remove every trailing `[]` from a path
pub fn strip_list_suffix(path: &str) -> &str {
    let mut cleaned = path;
    while let Some(stripped) = cleaned.strip_suffix("[]") {
        cleaned = stripped;
    }
    cleaned
}
