//! Filters used by the prompt templates

use minijinja::value::Value;
use minijinja::{Error, ErrorKind, State};

pub fn register_filters(env: &mut minijinja::Environment) {
    env.add_filter("json", filter_json);
    env.add_filter("headline", filter_headline);
    env.add_filter("clip", filter_clip);
    env.add_filter("bullets", filter_bullets);
}

/// Pretty JSON
fn filter_json(_state: &State, value: Value) -> Result<Value, Error> {
    let json = serde_json::to_string_pretty(&value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("JSON serialization failed: {}", e),
        )
    })?;
    Ok(Value::from(json))
}

/// First line of a commit message
fn filter_headline(_state: &State, value: Value) -> Result<Value, Error> {
    let s = value.to_string();
    Ok(Value::from(s.lines().next().unwrap_or_default().trim().to_string()))
}

/// Cut to at most `limit` characters, marking the cut with `...`
fn filter_clip(_state: &State, value: Value, limit: Option<usize>) -> Result<Value, Error> {
    let s = value.to_string();
    let Some(limit) = limit else {
        return Ok(Value::from(s));
    };
    if s.chars().count() <= limit {
        return Ok(Value::from(s));
    }

    let clipped: String = s.chars().take(limit).collect();
    Ok(Value::from(format!("{}...", clipped.trim_end())))
}

/// `- item` per element of a sequence
fn filter_bullets(_state: &State, value: Value) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() {
        return Ok(Value::from(""));
    }

    let items = value.try_iter().map_err(|_| {
        Error::new(
            ErrorKind::InvalidOperation,
            "bullets filter requires a sequence",
        )
    })?;
    let lines: Vec<String> = items.map(|item| format!("- {}", item)).collect();
    Ok(Value::from(lines.join("\n")))
}
