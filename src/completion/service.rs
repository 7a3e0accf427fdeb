//! Typed front door over a backend

use super::output_parser::extract_json;
use super::types::{BackendError, BackendExecutor, BackendRequest};
use crate::workflow::Schema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// What a completion produced
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// JSON found in the output and checked against the expected schema
    Structured(Value),
    Text(String),
}

impl Completion {
    pub fn into_text(self) -> String {
        match self {
            Completion::Structured(value) => value.to_string(),
            Completion::Text(text) => text,
        }
    }
}

/// Sends prompts to one backend and interprets the answer
#[derive(Clone)]
pub struct CompletionService {
    executor: Arc<dyn BackendExecutor>,
}

impl CompletionService {
    pub fn new(executor: Arc<dyn BackendExecutor>) -> Self {
        Self { executor }
    }

    pub fn backend_name(&self) -> &str {
        self.executor.name()
    }

    pub async fn is_available(&self) -> bool {
        self.executor.is_available().await
    }

    /// Run `request`; with `expected`, the answer must contain JSON matching it
    pub async fn complete(
        &self,
        request: &BackendRequest,
        expected: Option<&Schema>,
    ) -> Result<Completion, BackendError> {
        let response = self.executor.execute(request).await?;
        tracing::debug!(
            backend = %response.backend,
            duration_ms = response.duration.as_millis() as u64,
            chars = response.text.len(),
            "Completion received"
        );

        let Some(schema) = expected else {
            return Ok(Completion::Text(response.text));
        };

        let value = extract_json(&response.text)
            .ok_or_else(|| BackendError::parse("no JSON found in model output"))?;
        schema
            .validate(&value)
            .map_err(|violation| BackendError::parse(format!("model output {}", violation)))?;

        Ok(Completion::Structured(value))
    }

    /// Structured completion decoded into `T`
    pub async fn complete_as<T: DeserializeOwned>(
        &self,
        request: &BackendRequest,
        expected: &Schema,
    ) -> Result<T, BackendError> {
        match self.complete(request, Some(expected)).await? {
            Completion::Structured(value) => serde_json::from_value(value)
                .map_err(|e| BackendError::parse(format!("unexpected model output: {}", e))),
            Completion::Text(_) => Err(BackendError::parse("expected structured output")),
        }
    }
}
