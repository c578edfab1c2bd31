//! Harness error types

use miette::Diagnostic;
use thiserror::Error;

use chartcheck_core::CoreError;
use chartcheck_kube::{DispatchError, SignatureError};
use chartcheck_template::TemplateError;

/// The declared values type cannot hold everything the chart's schema allows
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
#[error(
    "{type_name} does not accept every key of the chart's values schema:\n{}",
    missing.iter().map(|k| format!("- {k}")).collect::<Vec<_>>().join("\n")
)]
#[diagnostic(
    code(chartcheck::shape::schema_mismatch),
    help("add fields for these keys to the values type")
)]
pub struct SchemaMismatchError {
    pub type_name: &'static str,
    pub missing: Vec<String>,
}

/// Errors raised while setting up or running a suite
#[derive(Error, Debug, Diagnostic)]
pub enum SuiteError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    SchemaMismatch(#[from] SchemaMismatchError),

    #[error("invalid template glob '{pattern}': {source}")]
    #[diagnostic(code(chartcheck::suite::glob))]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("IO error: {0}")]
    #[diagnostic(code(chartcheck::suite::io))]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SuiteError>;
