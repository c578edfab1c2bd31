//! chartcheck Core - shared types for the chart test harness
//!
//! This crate provides the foundational types used throughout chartcheck:
//! - `Chart`: a loaded Helm chart (metadata, default values, schema, templates)
//! - `Values`: configuration values with deep merge and `--set` style overrides
//! - `TemplateOptions`: release, capabilities and value overrides for one render
//! - `Unstructured` / `ObjectSet`: rendered Kubernetes objects
//! - `extract`: dotted/bracketed path lookup over nested data

pub mod chart;
pub mod error;
pub mod extract;
pub mod objects;
pub mod options;
pub mod values;

pub use chart::{Chart, ChartMetadata, SUBCHART_PREFIX};
pub use error::{CoreError, Result};
pub use extract::{PathError, Segment, extract, extract_from, lookup, parse_path};
pub use objects::{ALL_FILES, GroupVersionKind, ObjectSet, ObjectSetMap, Unstructured};
pub use options::{
    Capabilities, KubeVersion, Release, ResolvedOptions, TemplateOptions, ValuesOptions,
};
pub use values::{Values, set_keys, strip_list_suffix};
