//! Path-based value extraction
//!
//! Resolves paths such as `a.b`, `a["b"]` or `a[0].b["c"][1]` against nested
//! data. Records are looked up through their serde representation, so a
//! field skipped by serde is simply absent.
//!
//! Grammar:
//!
//! ```text
//! path    = segment ( "." segment )*
//! segment = name? ( "[" index "]" )*
//! index   = decimal | '"' chars '"' | "'" chars "'"
//! ```
//!
//! Empty segments (`.`, `..`, `a..b`) keep the current value. Missing data
//! is `Ok(None)`; only malformed paths produce a [`PathError`].

use miette::Diagnostic;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Syntax error in an extraction path
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum PathError {
    #[error("unbalanced bracket at position {position} in path '{path}'")]
    #[diagnostic(code(chartcheck::extract::unbalanced_bracket))]
    UnbalancedBracket { path: String, position: usize },

    #[error("unterminated string starting at position {position} in path '{path}'")]
    #[diagnostic(code(chartcheck::extract::unterminated_string))]
    UnterminatedString { path: String, position: usize },

    #[error("invalid index '{index}' in path '{path}'")]
    #[diagnostic(code(chartcheck::extract::invalid_index))]
    InvalidIndex { path: String, index: String },

    #[error("index '{index}' has a leading zero in path '{path}'")]
    #[diagnostic(code(chartcheck::extract::leading_zero))]
    LeadingZero { path: String, index: String },

    #[error("unexpected character '{character}' at position {position} in path '{path}'")]
    #[diagnostic(code(chartcheck::extract::unexpected_character))]
    UnexpectedCharacter {
        path: String,
        position: usize,
        character: char,
    },
}

/// One step of a parsed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Mapping key, from `name` or a quoted index
    Key(String),
    /// Sequence position
    Index(usize),
    /// Bare identifier inside brackets (`a[b]`); accepted but never resolves
    Bare(String),
}

/// Parse a path into segments
pub fn parse_path(path: &str) -> Result<Vec<Segment>, PathError> {
    let chars: Vec<char> = path.chars().collect();
    let mut segments = Vec::new();
    let mut name = String::new();
    let mut after_bracket = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '.' => {
                flush_name(&mut name, &mut segments);
                after_bracket = false;
                i += 1;
            }
            '[' => {
                flush_name(&mut name, &mut segments);
                let (segment, next) = parse_index(path, &chars, i)?;
                segments.push(segment);
                after_bracket = true;
                i = next;
            }
            ']' => {
                return Err(PathError::UnbalancedBracket {
                    path: path.to_string(),
                    position: i,
                });
            }
            '"' | '\'' => {
                return Err(PathError::UnexpectedCharacter {
                    path: path.to_string(),
                    position: i,
                    character: c,
                });
            }
            _ if after_bracket => {
                return Err(PathError::UnexpectedCharacter {
                    path: path.to_string(),
                    position: i,
                    character: c,
                });
            }
            _ => {
                name.push(c);
                i += 1;
            }
        }
    }
    flush_name(&mut name, &mut segments);

    Ok(segments)
}

fn flush_name(name: &mut String, segments: &mut Vec<Segment>) {
    if !name.is_empty() {
        segments.push(Segment::Key(std::mem::take(name)));
    }
}

/// Parse `[ ... ]` starting at `open`; returns the segment and the position after `]`
fn parse_index(path: &str, chars: &[char], open: usize) -> Result<(Segment, usize), PathError> {
    let mut i = open + 1;

    match chars.get(i) {
        None => Err(PathError::UnbalancedBracket {
            path: path.to_string(),
            position: open,
        }),
        Some(&quote) if quote == '"' || quote == '\'' => {
            let start = i;
            i += 1;
            let mut key = String::new();
            loop {
                match chars.get(i) {
                    None => {
                        return Err(PathError::UnterminatedString {
                            path: path.to_string(),
                            position: start,
                        });
                    }
                    Some('\\') => {
                        match chars.get(i + 1) {
                            Some(&escaped) => key.push(escaped),
                            None => {
                                return Err(PathError::UnterminatedString {
                                    path: path.to_string(),
                                    position: start,
                                });
                            }
                        }
                        i += 2;
                    }
                    Some(&c) if c == quote => {
                        i += 1;
                        break;
                    }
                    Some(&c) => {
                        key.push(c);
                        i += 1;
                    }
                }
            }
            match chars.get(i) {
                Some(']') => Ok((Segment::Key(key), i + 1)),
                Some(&c) => Err(PathError::UnexpectedCharacter {
                    path: path.to_string(),
                    position: i,
                    character: c,
                }),
                None => Err(PathError::UnbalancedBracket {
                    path: path.to_string(),
                    position: open,
                }),
            }
        }
        Some(_) => {
            let start = i;
            while i < chars.len() && chars[i] != ']' {
                if chars[i] == '[' {
                    return Err(PathError::UnbalancedBracket {
                        path: path.to_string(),
                        position: i,
                    });
                }
                i += 1;
            }
            if i >= chars.len() {
                return Err(PathError::UnbalancedBracket {
                    path: path.to_string(),
                    position: open,
                });
            }
            let index: String = chars[start..i].iter().collect();
            Ok((classify_index(path, index)?, i + 1))
        }
    }
}

fn classify_index(path: &str, index: String) -> Result<Segment, PathError> {
    if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
        if index.len() > 1 && index.starts_with('0') {
            return Err(PathError::LeadingZero {
                path: path.to_string(),
                index,
            });
        }
        return index
            .parse::<usize>()
            .map(Segment::Index)
            .map_err(|_| PathError::InvalidIndex {
                path: path.to_string(),
                index,
            });
    }

    let mut chars = index.chars();
    let is_identifier = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-');

    if is_identifier {
        Ok(Segment::Bare(index))
    } else {
        Err(PathError::InvalidIndex {
            path: path.to_string(),
            index,
        })
    }
}

/// Resolve a path against a JSON value
///
/// Returns `Ok(None)` when nothing (or `null`) lives at the path.
pub fn lookup<'a>(root: &'a JsonValue, path: &str) -> Result<Option<&'a JsonValue>, PathError> {
    let segments = parse_path(path)?;
    Ok(resolve(root, &segments))
}

pub(crate) fn resolve<'a>(root: &'a JsonValue, segments: &[Segment]) -> Option<&'a JsonValue> {
    let mut current = root;
    if current.is_null() {
        return None;
    }

    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(key), JsonValue::Object(map)) => map.get(key)?,
            (Segment::Index(index), JsonValue::Array(items)) => items.get(*index)?,
            _ => return None,
        };
        if current.is_null() {
            return None;
        }
    }

    Some(current)
}

/// Resolve a path and convert the value into `T`
///
/// A value that does not have the shape of `T` is absent; strings are not
/// coerced, so `"8080"` is not a `u32`.
pub fn extract<T: DeserializeOwned>(root: &JsonValue, path: &str) -> Result<Option<T>, PathError> {
    let Some(value) = lookup(root, path)? else {
        return Ok(None);
    };

    match T::deserialize(value) {
        Ok(converted) => Ok(Some(converted)),
        Err(err) => {
            tracing::debug!(path, error = %err, "value does not match the requested type");
            Ok(None)
        }
    }
}

/// Resolve a path against any serializable record
pub fn extract_from<S: Serialize, T: DeserializeOwned>(
    root: &S,
    path: &str,
) -> Result<Option<T>, PathError> {
    // Validate the path even if the root cannot be serialized
    parse_path(path)?;

    match serde_json::to_value(root) {
        Ok(value) => extract(&value, path),
        Err(err) => {
            tracing::debug!(path, error = %err, "root is not serializable");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn composite() -> JsonValue {
        json!({
            "hello": {
                "world": [
                    0,
                    "one",
                    {
                        "rancher": {
                            "world": [
                                null,
                                {},
                                {
                                    "cattle": [
                                        {
                                            "hull": [1, 9001]
                                        }
                                    ]
                                }
                            ]
                        }
                    }
                ]
            }
        })
    }

    #[test]
    fn test_parse_path_mixed() {
        let segments = parse_path(r#"a[0].b["c"][1]"#).unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Key("a".into()),
                Segment::Index(0),
                Segment::Key("b".into()),
                Segment::Key("c".into()),
                Segment::Index(1),
            ]
        );
    }

    #[test]
    fn test_parse_path_empty_segments() {
        assert!(parse_path(".").unwrap().is_empty());
        assert!(parse_path("..").unwrap().is_empty());
        assert_eq!(
            parse_path("a..b").unwrap(),
            vec![Segment::Key("a".into()), Segment::Key("b".into())]
        );
    }

    #[test]
    fn test_deep_composite_path() {
        let root = composite();
        let value: Option<i64> = extract(
            &root,
            r#"hello.world[2].rancher["world"][2]["cattle"][0].hull[1]"#,
        )
        .unwrap();
        assert_eq!(value, Some(9001));
    }

    #[test]
    fn test_unquoted_identifier_index_is_absent() {
        let root = composite();
        assert_eq!(lookup(&root, "hello[world]").unwrap(), None);
    }

    #[test]
    fn test_quoted_index_resolves() {
        let root = composite();
        let inner = lookup(&root, r#"hello["world"]"#).unwrap().unwrap();
        assert!(inner.is_array());
        assert_eq!(lookup(&root, "hello['world'][1]").unwrap(), Some(&json!("one")));
    }

    #[test]
    fn test_leading_zero_is_error() {
        let err = parse_path("hello[023]").unwrap_err();
        assert!(matches!(err, PathError::LeadingZero { .. }));
        assert!(lookup(&composite(), "hello[023]").is_err());
    }

    #[test]
    fn test_malformed_paths() {
        assert!(matches!(
            parse_path("a[0"),
            Err(PathError::UnbalancedBracket { .. })
        ));
        assert!(matches!(
            parse_path("a]"),
            Err(PathError::UnbalancedBracket { .. })
        ));
        assert!(matches!(
            parse_path(r#"a["b]"#),
            Err(PathError::UnterminatedString { .. })
        ));
        assert!(matches!(
            parse_path("a[1x]"),
            Err(PathError::InvalidIndex { .. })
        ));
        assert!(matches!(
            parse_path("a[]"),
            Err(PathError::InvalidIndex { .. })
        ));
        assert!(matches!(
            parse_path("a[0]b"),
            Err(PathError::UnexpectedCharacter { .. })
        ));
    }

    #[test]
    fn test_type_mismatches_are_absent() {
        let root = json!({"list": [1, 2], "map": {"0": "zero"}});
        assert_eq!(lookup(&root, "list.a").unwrap(), None);
        assert_eq!(lookup(&root, "map[0]").unwrap(), None);
        assert_eq!(lookup(&root, r#"map["0"]"#).unwrap(), Some(&json!("zero")));
        assert_eq!(lookup(&root, "list[5]").unwrap(), None);
    }

    #[test]
    fn test_null_is_absent() {
        let root = json!({"a": null, "b": {"c": null}});
        assert_eq!(lookup(&root, "a").unwrap(), None);
        assert_eq!(lookup(&root, "b.c").unwrap(), None);
        assert!(lookup(&root, "b").unwrap().is_some());
        assert_eq!(lookup(&JsonValue::Null, ".").unwrap(), None);
    }

    #[test]
    fn test_root_path_returns_root() {
        let root = json!({"a": 1});
        assert_eq!(lookup(&root, ".").unwrap(), Some(&root));
        assert_eq!(lookup(&root, "").unwrap(), Some(&root));
    }

    #[test]
    fn test_extract_does_not_coerce_strings() {
        let root = json!({
            "port": "8080",
            "enabled": "true",
            "list": "- x",
            "data": {"config": "hello: rancher"},
        });
        assert_eq!(extract::<u32>(&root, "port").unwrap(), None);
        assert_eq!(extract::<bool>(&root, "enabled").unwrap(), None);
        assert_eq!(extract::<Vec<String>>(&root, "list").unwrap(), None);

        let parsed: Option<std::collections::BTreeMap<String, String>> =
            extract(&root, "data.config").unwrap();
        assert!(parsed.is_none());

        assert_eq!(extract::<String>(&root, "port").unwrap().as_deref(), Some("8080"));
        let wrong: Option<Vec<u32>> = extract(&root, "data").unwrap();
        assert!(wrong.is_none());
    }

    #[test]
    fn test_extract_matching_shape() {
        let root = json!({"port": 8080, "data": {"hello": "rancher"}});
        assert_eq!(extract::<u32>(&root, "port").unwrap(), Some(8080));
        let data: Option<std::collections::BTreeMap<String, String>> =
            extract(&root, "data").unwrap();
        assert_eq!(data.unwrap().get("hello").map(String::as_str), Some("rancher"));
    }

    #[test]
    fn test_extract_from_record() {
        #[derive(Serialize)]
        struct Inner {
            #[serde(rename = "imageTag")]
            image_tag: String,
            #[serde(skip)]
            #[allow(dead_code)]
            secret: String,
        }

        let record = Inner {
            image_tag: "v1".into(),
            secret: "hidden".into(),
        };

        let tag: Option<String> = extract_from(&record, "imageTag").unwrap();
        assert_eq!(tag.as_deref(), Some("v1"));
        let hidden: Option<String> = extract_from(&record, "secret").unwrap();
        assert!(hidden.is_none());
    }
}
