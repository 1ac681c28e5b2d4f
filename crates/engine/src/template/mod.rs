//! Template rendering module.
//!
//! Provides Jinja2-style expressions and templates for task inputs,
//! publish blocks, guards and workflow outputs.

pub mod jinja;

pub use jinja::{contains_template_syntax, TemplateRenderer};
