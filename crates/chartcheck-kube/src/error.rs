//! Error types for chartcheck-kube

use miette::Diagnostic;
use thiserror::Error;

use chartcheck_core::GroupVersionKind;

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// A dispatch target is declared in a way that cannot route objects
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum SignatureError {
    #[error("resource type {type_name} is routed to both `{first}` and `{second}`")]
    #[diagnostic(
        code(chartcheck::dispatch::ambiguous_route),
        help("each resource type may back a single field of the dispatch target")
    )]
    AmbiguousRoute {
        type_name: &'static str,
        first: String,
        second: String,
    },

    #[error("only one catch-all field is allowed, found `{first}` and `{second}`")]
    #[diagnostic(code(chartcheck::dispatch::multiple_catch_all))]
    MultipleCatchAll { first: String, second: String },
}

/// Strict dispatch met an object no field accepts
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("no field of {target} accepts {object} ({gvk})")]
#[diagnostic(
    code(chartcheck::dispatch::unknown_resource),
    help("add a field for this resource type or a Vec<Unstructured> catch-all")
)]
pub struct UnknownResourceError {
    pub target: &'static str,
    pub object: String,
    pub gvk: GroupVersionKind,
}

/// Errors raised while routing objects into a dispatch target
#[derive(Debug, Error, Diagnostic)]
pub enum DispatchError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    UnknownResource(#[from] UnknownResourceError),

    #[error("cannot convert {object} into {type_name}: {source}")]
    #[diagnostic(code(chartcheck::dispatch::conversion))]
    Conversion {
        object: String,
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
