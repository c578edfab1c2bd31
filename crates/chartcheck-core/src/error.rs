//! Core error types

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    #[error("Chart not found: {path}")]
    #[diagnostic(code(chartcheck::core::chart_not_found))]
    ChartNotFound { path: String },

    #[error("Invalid Chart.yaml: {message}")]
    #[diagnostic(code(chartcheck::core::invalid_chart))]
    InvalidChart { message: String },

    #[error("Failed to parse YAML: {0}")]
    #[diagnostic(code(chartcheck::core::yaml))]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    #[diagnostic(code(chartcheck::core::json))]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(chartcheck::core::io))]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    #[diagnostic(code(chartcheck::core::version))]
    InvalidVersion(#[from] semver::Error),

    #[error("Failed to parse override '{input}': {message}")]
    #[diagnostic(
        code(chartcheck::core::override_parse),
        help("overrides use the key=value form, e.g. image.tag=v2 or list={{a,b}}")
    )]
    OverrideParse { input: String, message: String },

    #[error("Invalid kube version '{value}'")]
    #[diagnostic(
        code(chartcheck::core::kube_version),
        help("use a version like v1.31.0 or 1.31")
    )]
    InvalidKubeVersion { value: String },
}

impl CoreError {
    pub(crate) fn override_parse(input: &str, message: impl Into<String>) -> Self {
        Self::OverrideParse {
            input: input.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
