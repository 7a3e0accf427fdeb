//! What a step sees while it executes

use super::error::EngineError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only view of a run, shared by every node invocation
///
/// `results` is a snapshot taken before the node starts; later nodes never
/// mutate what an earlier snapshot holds.
#[derive(Debug, Clone)]
pub(crate) struct RunScope {
    pub run_id: Arc<str>,
    pub init_data: Arc<Value>,
    pub results: Arc<HashMap<String, Arc<Value>>>,
    pub span: tracing::Span,
}

impl RunScope {
    pub fn new(run_id: Arc<str>, init_data: Value, span: tracing::Span) -> Self {
        Self {
            run_id,
            init_data: Arc::new(init_data),
            results: Arc::new(HashMap::new()),
            span,
        }
    }

    /// Same run, fresh result namespace; used for nested workflow runs
    pub fn nested(&self, init_data: Value, span: tracing::Span) -> Self {
        Self {
            run_id: self.run_id.clone(),
            init_data: Arc::new(init_data),
            results: Arc::new(HashMap::new()),
            span,
        }
    }

    pub fn with_span(&self, span: tracing::Span) -> Self {
        Self {
            span,
            ..self.clone()
        }
    }
}

/// Context handed to step executors, map functions and branch predicates
#[derive(Debug)]
pub struct StepContext<I> {
    input: I,
    scope: RunScope,
}

impl<I> StepContext<I> {
    pub(crate) fn new(input: I, scope: RunScope) -> Self {
        Self { input, scope }
    }

    /// Validated input of this node
    pub fn input(&self) -> &I {
        &self.input
    }

    pub fn into_input(self) -> I {
        self.input
    }

    /// The input the whole run (or nested run) was started with
    pub fn init_data<T: DeserializeOwned>(&self) -> Result<T, EngineError> {
        T::deserialize(self.scope.init_data.as_ref())
            .map_err(|e| EngineError::decode("init data", e))
    }

    pub fn init_value(&self) -> &Value {
        &self.scope.init_data
    }

    /// Output of a node that already ran in this run
    pub fn step_result<T: DeserializeOwned>(&self, id: &str) -> Result<T, EngineError> {
        let value = self
            .step_result_value(id)
            .ok_or_else(|| EngineError::MissingResult { id: id.to_string() })?;
        T::deserialize(value).map_err(|e| EngineError::decode(id, e))
    }

    pub fn step_result_value(&self, id: &str) -> Option<&Value> {
        self.scope.results.get(id).map(|v| v.as_ref())
    }

    /// Span of the running node; events recorded inside the executor are
    /// already attributed to it.
    pub fn logger(&self) -> &tracing::Span {
        &self.scope.span
    }

    pub fn run_id(&self) -> &str {
        &self.scope.run_id
    }
}
