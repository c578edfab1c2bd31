//! chartcheck Template - Go templates for Helm charts
//!
//! This crate provides:
//! - A pest-based parser producing Go's `text/template` node taxonomy
//! - The field-usage walker that feeds coverage (`TemplateUsage`)
//! - An in-process renderer with the Helm/Sprig functions charts rely on

pub mod ast;
pub mod error;
pub mod exec;
pub mod functions;
pub mod parser;
pub mod render;
pub mod usage;

pub use ast::{Node, Template};
pub use error::{RenderError, Result, TemplateError};
pub use parser::{ParseError, parse};
pub use render::{DEFAULT_API_VERSIONS, GoTemplateRenderer, RenderOutput, Renderer};
pub use usage::{ParseResult, TemplateUsage, is_partial};
