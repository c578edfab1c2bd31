//! Value-schema coverage
//!
//! A values type describes its layout through [`ValuesShape`]. The leaves of
//! that layout are compared with what a case's overrides set, and with what
//! the chart's `values.schema.json` allows.
//!
//! The macro also derives `Deserialize` with the same key names, so a values
//! document reads into the record through the names coverage reports.
//!
//! ```ignore
//! chartcheck::values_shape! {
//!     #[derive(Debug)]
//!     pub struct Values {
//!         pub replica_count: u32 => "replicaCount",
//!         pub image: Image,
//!         #[flatten]
//!         pub common: Common,
//!     }
//! }
//! ```

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chartcheck_core::{Chart, set_keys, strip_list_suffix};

use crate::coverage::VALUES_ROOT;
use crate::error::SchemaMismatchError;

/// Layout of a values type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// A value that is set as a whole
    Scalar,
    /// Elements addressed as `path[]`
    Sequence(Box<Shape>),
    /// String-keyed entries addressed as `path[]`
    Mapping(Box<Shape>),
    Record(Vec<ShapeField>),
}

/// One field of a record shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeField {
    pub name: &'static str,
    /// Inline the field's leaves into the parent
    pub flatten: bool,
    pub shape: Shape,
}

impl ShapeField {
    pub fn named(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            flatten: false,
            shape,
        }
    }

    pub fn flattened(shape: Shape) -> Self {
        Self {
            name: "",
            flatten: true,
            shape,
        }
    }
}

/// Types that can describe the values they hold
pub trait ValuesShape {
    fn shape() -> Shape;
}

macro_rules! scalar_shapes {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ValuesShape for $ty {
                fn shape() -> Shape {
                    Shape::Scalar
                }
            }
        )+
    };
}

scalar_shapes!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, String,
    JsonValue,
);

impl<T: ValuesShape> ValuesShape for Option<T> {
    fn shape() -> Shape {
        T::shape()
    }
}

impl<T: ValuesShape> ValuesShape for Box<T> {
    fn shape() -> Shape {
        T::shape()
    }
}

impl<T: ValuesShape> ValuesShape for Vec<T> {
    fn shape() -> Shape {
        Shape::Sequence(Box::new(T::shape()))
    }
}

impl<T: ValuesShape> ValuesShape for BTreeMap<String, T> {
    fn shape() -> Shape {
        Shape::Mapping(Box::new(T::shape()))
    }
}

impl<T: ValuesShape, S> ValuesShape for HashMap<String, T, S> {
    fn shape() -> Shape {
        Shape::Mapping(Box::new(T::shape()))
    }
}

impl<T: ValuesShape, S> ValuesShape for IndexMap<String, T, S> {
    fn shape() -> Shape {
        Shape::Mapping(Box::new(T::shape()))
    }
}

/// Declare a values record and implement [`ValuesShape`] for it
///
/// Fields are `name: Type`, optionally renamed with `=> "key"` (the key used
/// in values files). A field preceded by `#[flatten]` inlines its leaves into
/// the parent. Other attributes are kept on the generated struct; `#[flatten]`
/// must come before them.
///
/// `Deserialize` is derived with matching `rename`/`flatten` attributes; do
/// not derive it again.
#[macro_export]
macro_rules! values_shape {
    ($(#[$meta:meta])* $vis:vis struct $name:ident { $($body:tt)* }) => {
        $crate::__values_shape_fields! {
            @head [
                #[derive($crate::__private::serde::Deserialize)]
                #[serde(crate = "chartcheck::__private::serde")]
                $(#[$meta])* $vis struct $name
            ]
            @name $name
            @fields []
            @shape []
            $($body)*
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __values_shape_fields {
    (
        @head [$($head:tt)*]
        @name $name:ident
        @fields [$($fields:tt)*]
        @shape [$($shape:tt)*]
    ) => {
        $($head)* {
            $($fields)*
        }

        impl $crate::shape::ValuesShape for $name {
            fn shape() -> $crate::shape::Shape {
                $crate::shape::Shape::Record(::std::vec![$($shape)*])
            }
        }
    };

    (
        @head $head:tt
        @name $name:ident
        @fields [$($fields:tt)*]
        @shape [$($shape:tt)*]
        #[flatten]
        $(#[$fmeta:meta])*
        $fvis:vis $field:ident : $ty:ty
        $(, $($rest:tt)*)?
    ) => {
        $crate::__values_shape_fields! {
            @head $head
            @name $name
            @fields [$($fields)* #[serde(flatten)] $(#[$fmeta])* $fvis $field: $ty,]
            @shape [$($shape)* $crate::shape::ShapeField::flattened(
                <$ty as $crate::shape::ValuesShape>::shape()
            ),]
            $($($rest)*)?
        }
    };

    (
        @head $head:tt
        @name $name:ident
        @fields [$($fields:tt)*]
        @shape [$($shape:tt)*]
        $(#[$fmeta:meta])*
        $fvis:vis $field:ident : $ty:ty => $rename:literal
        $(, $($rest:tt)*)?
    ) => {
        $crate::__values_shape_fields! {
            @head $head
            @name $name
            @fields [$($fields)* #[serde(rename = $rename)] $(#[$fmeta])* $fvis $field: $ty,]
            @shape [$($shape)* $crate::shape::ShapeField::named(
                $rename,
                <$ty as $crate::shape::ValuesShape>::shape()
            ),]
            $($($rest)*)?
        }
    };

    (
        @head $head:tt
        @name $name:ident
        @fields [$($fields:tt)*]
        @shape [$($shape:tt)*]
        $(#[$fmeta:meta])*
        $fvis:vis $field:ident : $ty:ty
        $(, $($rest:tt)*)?
    ) => {
        $crate::__values_shape_fields! {
            @head $head
            @name $name
            @fields [$($fields)* $(#[$fmeta])* $fvis $field: $ty,]
            @shape [$($shape)* $crate::shape::ShapeField::named(
                stringify!($field),
                <$ty as $crate::shape::ValuesShape>::shape()
            ),]
            $($($rest)*)?
        }
    };
}

/// Leaf paths of a values type, rooted at `.Values`
pub fn declared_leaves<T: ValuesShape>() -> BTreeSet<String> {
    let mut leaves = BTreeSet::new();
    collect_leaves(&T::shape(), VALUES_ROOT, &mut leaves);
    leaves
}

fn collect_leaves(shape: &Shape, prefix: &str, leaves: &mut BTreeSet<String>) {
    match shape {
        Shape::Scalar => {
            leaves.insert(strip_list_suffix(prefix).to_string());
        }
        Shape::Sequence(inner) | Shape::Mapping(inner) => {
            collect_leaves(inner, &format!("{}[]", prefix), leaves);
        }
        Shape::Record(fields) => {
            for field in fields {
                if field.flatten {
                    collect_leaves(&field.shape, prefix, leaves);
                } else {
                    collect_leaves(&field.shape, &format!("{}.{}", prefix, field.name), leaves);
                }
            }
        }
    }
}

/// How much of a values type an override map sets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeCoverage {
    pub fraction: f64,
    pub set: Vec<String>,
    pub unset: Vec<String>,
    pub report: String,
}

/// Fraction of the declared leaves of `T` that `overrides` sets
pub fn shape_coverage<T: ValuesShape>(overrides: &JsonValue) -> ShapeCoverage {
    let set_paths: BTreeSet<String> = set_keys(overrides)
        .into_iter()
        .map(|key| format!("{}{}", VALUES_ROOT, key))
        .collect();
    shape_coverage_of::<T>(&set_paths)
}

/// Fraction of the declared leaves of `T` found in `set_paths` (rooted at `.Values`)
pub fn shape_coverage_of<T: ValuesShape>(set_paths: &BTreeSet<String>) -> ShapeCoverage {
    let declared = declared_leaves::<T>();
    let (set, unset): (Vec<String>, Vec<String>) =
        declared.into_iter().partition(|leaf| set_paths.contains(leaf));

    let total = set.len() + unset.len();
    let fraction = if total == 0 {
        1.0
    } else {
        set.len() as f64 / total as f64
    };

    let mut report = String::new();
    if !set.is_empty() {
        report.push_str("The following keys are set:");
        for key in &set {
            report.push_str("\n- ");
            report.push_str(key);
        }
    }
    if !unset.is_empty() {
        if !report.is_empty() {
            report.push_str("\n\n");
        }
        report.push_str("The following keys are not set:");
        for key in &unset {
            report.push_str("\n- ");
            report.push_str(key);
        }
    }

    ShapeCoverage {
        fraction,
        set,
        unset,
        report,
    }
}

/// Leaf paths of a JSON schema, rooted at `.Values`
///
/// `properties` become named children; `items` and `additionalProperties`
/// schemas become `[]` children.
pub fn schema_leaves(schema: &JsonValue) -> BTreeSet<String> {
    let mut leaves = BTreeSet::new();
    collect_schema_leaves(schema, VALUES_ROOT, &mut leaves);
    leaves
}

fn collect_schema_leaves(schema: &JsonValue, prefix: &str, leaves: &mut BTreeSet<String>) {
    let mut descended = false;

    if let Some(properties) = schema.get("properties").and_then(JsonValue::as_object) {
        for (name, child) in properties {
            collect_schema_leaves(child, &format!("{}.{}", prefix, name), leaves);
        }
        descended = !properties.is_empty();
    }

    let element = format!("{}[]", prefix);
    if let Some(items) = schema.get("items").filter(|i| i.is_object()) {
        collect_schema_leaves(items, &element, leaves);
        descended = true;
    }
    if let Some(additional) = schema.get("additionalProperties").filter(|a| a.is_object()) {
        collect_schema_leaves(additional, &element, leaves);
        descended = true;
    }

    if !descended {
        leaves.insert(strip_list_suffix(prefix).to_string());
    }
}

/// Fail unless `T` has a place for every leaf of the chart's values schema
///
/// A declared leaf accepts its own path and anything below it. Charts without
/// a schema are accepted.
pub fn ensure_accepts_schema<T: ValuesShape>(chart: &Chart) -> Result<(), SchemaMismatchError> {
    let Some(schema) = &chart.schema else {
        return Ok(());
    };

    let declared = declared_leaves::<T>();
    let missing: Vec<String> = schema_leaves(schema)
        .into_iter()
        .filter(|leaf| !declared.iter().any(|d| accepts(d, leaf)))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SchemaMismatchError {
            type_name: std::any::type_name::<T>(),
            missing,
        })
    }
}

fn accepts(declared: &str, leaf: &str) -> bool {
    leaf.strip_prefix(declared)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('['))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    crate::values_shape! {
        #[derive(Debug, Default)]
        pub struct Image {
            pub repository: String,
            pub tag: Option<String>,
        }
    }

    crate::values_shape! {
        #[derive(Debug, Default)]
        struct Common {
            labels: BTreeMap<String, String>,
        }
    }

    crate::values_shape! {
        #[derive(Debug, Default)]
        struct Env {
            name: String,
            value: String,
        }
    }

    crate::values_shape! {
        #[derive(Debug, Default)]
        struct ChartValues {
            replica_count: u32 => "replicaCount",
            image: Image,
            #[flatten]
            common: Common,
            env: Vec<Env>,
            extra: Option<Box<JsonValue>>,
        }
    }

    #[test]
    fn test_declared_leaves() {
        let leaves: Vec<String> = declared_leaves::<ChartValues>().into_iter().collect();
        assert_eq!(
            leaves,
            vec![
                ".Values.env[].name",
                ".Values.env[].value",
                ".Values.extra",
                ".Values.image.repository",
                ".Values.image.tag",
                ".Values.labels",
                ".Values.replicaCount",
            ]
        );
    }

    #[test]
    fn test_generated_struct_is_usable() {
        let values = ChartValues {
            replica_count: 2,
            ..Default::default()
        };
        assert_eq!(values.replica_count, 2);
        assert!(values.image.tag.is_none());
    }

    #[test]
    fn test_deserializes_through_reported_keys() {
        let document = json!({
            "replicaCount": 3,
            "image": {"repository": "nginx"},
            "labels": {"team": "platform"},
            "env": [{"name": "A", "value": "1"}],
        });
        let values: ChartValues = serde_json::from_value(document.clone()).unwrap();
        assert_eq!(values.replica_count, 3);
        assert_eq!(values.image.repository, "nginx");
        assert_eq!(values.common.labels.get("team").map(String::as_str), Some("platform"));
        assert_eq!(values.env[0].name, "A");
        assert!(values.extra.is_none());

        let coverage = shape_coverage::<ChartValues>(&document);
        assert!(coverage.set.contains(&".Values.replicaCount".to_string()));

        let snake: Result<ChartValues, _> = serde_json::from_value(json!({
            "replica_count": 3,
            "image": {"repository": "nginx"},
            "labels": {},
            "env": [],
        }));
        assert!(snake.is_err());
    }

    #[test]
    fn test_full_overrides_cover_everything() {
        let overrides = json!({
            "replicaCount": 3,
            "image": {"repository": "nginx", "tag": "1.27"},
            "labels": {"team": "platform"},
            "env": [{"name": "A", "value": "1"}],
            "extra": {"anything": true},
        });
        let coverage = shape_coverage::<ChartValues>(&overrides);
        assert_eq!(coverage.fraction, 1.0);
        assert!(coverage.unset.is_empty());
    }

    #[test]
    fn test_partial_overrides() {
        let overrides = json!({"replicaCount": 3, "image": null});
        let coverage = shape_coverage::<ChartValues>(&overrides);
        assert_eq!(coverage.set, vec![".Values.replicaCount"]);
        assert_eq!(coverage.unset.len(), 6);
        assert!((coverage.fraction - 1.0 / 7.0).abs() < f64::EPSILON);
        assert!(coverage.report.starts_with("The following keys are set:\n- .Values.replicaCount"));
    }

    #[test]
    fn test_schema_leaves() {
        let schema = json!({
            "type": "object",
            "properties": {
                "image": {
                    "type": "object",
                    "properties": {"repository": {"type": "string"}}
                },
                "env": {
                    "type": "array",
                    "items": {"type": "object", "properties": {"name": {"type": "string"}}}
                },
                "labels": {"type": "object", "additionalProperties": {"type": "string"}},
                "ports": {"type": "array", "items": {"type": "integer"}}
            }
        });
        let leaves: Vec<String> = schema_leaves(&schema).into_iter().collect();
        assert_eq!(
            leaves,
            vec![
                ".Values.env[].name",
                ".Values.image.repository",
                ".Values.labels",
                ".Values.ports",
            ]
        );
    }

    #[test]
    fn test_accepts() {
        assert!(accepts(".Values.extra", ".Values.extra"));
        assert!(accepts(".Values.extra", ".Values.extra.nested[].x"));
        assert!(!accepts(".Values.extra", ".Values.extras"));
    }
}
