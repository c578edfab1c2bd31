//! Template error types

use miette::Diagnostic;
use thiserror::Error;

use chartcheck_core::CoreError;

/// Main template error type
#[derive(Error, Debug, Diagnostic)]
pub enum TemplateError {
    #[error("parse error in {file}: {message}")]
    #[diagnostic(code(chartcheck::template::parse))]
    Parse { file: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Render(#[from] RenderError),

    #[error(
        "values don't meet the specifications of the schema(s) in the following chart(s):\n{chart}:\n{}",
        errors.join("\n")
    )]
    #[diagnostic(
        code(chartcheck::template::schema),
        help("check the chart's values.schema.json against the supplied values")
    )]
    Schema { chart: String, errors: Vec<String> },

    #[error("YAML parse error on {file}: {message}")]
    #[diagnostic(code(chartcheck::template::manifest))]
    Manifest { file: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] CoreError),
}

/// Template execution failed; the message is what Helm would print
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(chartcheck::template::render))]
pub struct RenderError {
    pub message: String,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TemplateError>;
