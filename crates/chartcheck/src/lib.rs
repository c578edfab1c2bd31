//! Declarative test harness for Helm charts
//!
//! A [`Suite`] loads a chart, renders it once per [`Case`], lints the output
//! and runs each [`Check`]'s [`Chain`] against the rendered objects. Every case
//! records the values it overrides in a shared [`FieldTracker`], so the suite
//! can report which `.Values` fields the cases never exercised.
//!
//! Checks receive rendered objects already converted into typed buckets: declare
//! a struct with [`dispatch_target!`] and each field collects one resource kind.
//!
//! ```ignore
//! use chartcheck::{Case, Chain, Check, Suite, dispatch_target};
//! use k8s_openapi::api::core::v1::{ConfigMap, Service};
//!
//! dispatch_target! {
//!     pub struct Resources {
//!         pub config_maps: Vec<ConfigMap>,
//!         pub services: Vec<Service>,
//!     }
//! }
//!
//! let check = Check::new(
//!     "services",
//!     Chain::new().chained_check(|ctx, resources: &Resources| {
//!         if resources.services.is_empty() {
//!             ctx.fail("no service rendered");
//!         }
//!     }),
//! );
//! ```

// lets `values_shape!` name serde through `chartcheck::` inside this crate too
extern crate self as chartcheck;

pub mod chain;
pub mod check;
pub mod context;
pub mod coverage;
pub mod error;
pub mod handle;
pub mod lint;
pub mod shape;
pub mod suite;
pub mod writer;

pub use chain::Chain;
pub use check::{Check, CheckOptions};
pub use context::TestContext;
pub use coverage::{
    CHAIN_SEPARATOR, Coverage, FULLY_COVERED, FieldTracker, TemplateTracker, VALUES_ROOT,
    override_paths,
};
pub use error::{Result, SchemaMismatchError, SuiteError};
pub use handle::{CommandOutput, Failure, RawSource, TestHandle};
pub use lint::{CommandLinter, HelmLinter, LintFinding, Linter, YamlLinter, default_linters};
pub use shape::{
    Shape, ShapeCoverage, ShapeField, ValuesShape, declared_leaves, ensure_accepts_schema,
    schema_leaves, shape_coverage, shape_coverage_of,
};
pub use suite::{Case, CaseReport, FailureCase, ReportedFailure, Suite, SuiteReport};
pub use writer::{DiagnosticWriter, OUTPUT_DIR_ENV, begin_process};

pub use chartcheck_core::{
    Chart, ObjectSet, ObjectSetMap, TemplateOptions, Unstructured, Values, ValuesOptions, extract,
    lookup,
};
pub use chartcheck_kube::{
    DispatchTarget, Only, Scheme, Workload, WorkloadKind, dispatch_target, routable,
};
pub use chartcheck_template::{GoTemplateRenderer, RenderOutput, Renderer, TemplateUsage};

pub use k8s_openapi;

#[doc(hidden)]
pub mod __private {
    pub use serde;
}
