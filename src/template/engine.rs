//! Prompt rendering

use super::errors::TemplateError;
use super::filters;
use super::prompts;
use minijinja::Environment;
use serde::Serialize;
use std::path::Path;

/// Renders built-in or user-supplied prompt templates
///
/// Wraps minijinja with the prompt filters and strict undefined handling.
/// Named templates resolve through a loader: `<dir>/<name>.j2` when an
/// override directory is set, otherwise the built-in source.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Self::base_env();
        env.set_loader(|name| Ok(prompts::builtin(name).map(str::to_string)));
        Self { env }
    }

    /// Engine whose named templates may be overridden from `dir`
    pub fn with_overrides(dir: &Path) -> Self {
        let mut env = Self::base_env();
        let files = minijinja::path_loader(dir.to_path_buf());
        env.set_loader(move |name| match files(&format!("{}.j2", name))? {
            Some(source) => Ok(Some(source)),
            None => Ok(prompts::builtin(name).map(str::to_string)),
        });
        Self { env }
    }

    fn base_env() -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        filters::register_filters(&mut env);
        env
    }

    /// Render a named template
    pub fn render<S: Serialize>(&self, name: &str, ctx: &S) -> Result<String, TemplateError> {
        let tmpl = self.env.get_template(name).map_err(|e| match e.kind() {
            minijinja::ErrorKind::TemplateNotFound => {
                TemplateError::unknown_template(name, prompts::BUILTIN_NAMES)
            }
            _ => convert_minijinja_error(e, name, &[]),
        })?;

        let value = minijinja::Value::from_serialize(ctx);
        let known = top_level_keys(ctx);
        let known: Vec<&str> = known.iter().map(String::as_str).collect();
        tmpl.render(value)
            .map(|s| s.trim().to_string())
            .map_err(|e| convert_minijinja_error(e, name, &known))
    }

    /// Render an ad-hoc template source
    pub fn render_str<S: Serialize>(&self, source: &str, ctx: &S) -> Result<String, TemplateError> {
        let value = minijinja::Value::from_serialize(ctx);
        self.env
            .render_str(source, value)
            .map_err(|e| convert_minijinja_error(e, "<string>", &[]))
    }

    /// Check that every named template parses
    pub fn validate(&self) -> Result<(), TemplateError> {
        for name in prompts::BUILTIN_NAMES {
            self.env
                .get_template(name)
                .map_err(|e| convert_minijinja_error(e, name, &[]))?;
        }
        Ok(())
    }
}

fn top_level_keys<S: Serialize>(ctx: &S) -> Vec<String> {
    match serde_json::to_value(ctx) {
        Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

fn convert_minijinja_error(err: minijinja::Error, template: &str, known: &[&str]) -> TemplateError {
    match err.kind() {
        minijinja::ErrorKind::UndefinedError => undefined(&err, template, known),
        // Strict mode reports an undefined value passed to a filter or test
        // as an invalid operation
        minijinja::ErrorKind::InvalidOperation
            if err.detail().is_some_and(|d| d.contains("undefined")) =>
        {
            undefined(&err, template, known)
        }
        minijinja::ErrorKind::SyntaxError => TemplateError::Syntax {
            template: template.to_string(),
            line: err.line().unwrap_or(0),
            message: err.detail().unwrap_or_default().to_string(),
        },
        _ => TemplateError::Render {
            template: template.to_string(),
            source: err,
        },
    }
}

fn undefined(err: &minijinja::Error, template: &str, known: &[&str]) -> TemplateError {
    let name = extract_var_from_error(err).unwrap_or_else(|| "unknown".to_string());
    TemplateError::undefined_variable(name, template, known)
}

/// Name of the undefined variable from the failing source span
fn extract_var_from_error(err: &minijinja::Error) -> Option<String> {
    let source = err.template_source()?;
    let range = err.range()?;
    leading_identifier(source.get(range)?)
}

/// First identifier of an expression such as `{{ commit.sha }}` or `items | length`
fn leading_identifier(expr: &str) -> Option<String> {
    let expr = expr.trim_start_matches(|c: char| c == '{' || c == '-' || c.is_whitespace());
    let name: String = expr
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}
