//! Prompt templates
//!
//! Jinja2-compatible rendering (minijinja) of the prompts sent to the
//! completion backend. Built-in templates can be replaced per project by
//! dropping `<name>.j2` files into the configured prompts directory.
//!
//! # Filters
//!
//! - `json`: pretty-printed JSON
//! - `headline`: first line of a commit message
//! - `clip(n)`: cut to `n` characters
//! - `bullets`: one `- item` line per element
//!
//! # Example
//!
//! ```ignore
//! use dayflow::template::{TemplateEngine, prompts};
//!
//! let engine = TemplateEngine::new();
//! let prompt = engine.render(prompts::COMMIT_ANALYSIS, &serde_json::json!({
//!     "commit": commit,
//!     "max_chars": 4000,
//! }))?;
//! ```

mod engine;
mod errors;
mod filters;
pub mod prompts;

pub use engine::TemplateEngine;
pub use errors::TemplateError;
