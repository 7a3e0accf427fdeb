//! Steps - the smallest unit of composition

use super::context::{RunScope, StepContext};
use super::error::{EngineError, panic_message};
use super::schema::{Schema, Shape};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use tracing::Instrument;

/// A named unit of work with typed, validated input and output
///
/// Return `Err` only for conditions that should abort the enclosing run
/// (inside `foreach` the error is confined to the item). Expected degraded
/// situations belong in the output type.
#[async_trait]
pub trait Step: Send + Sync + 'static {
    type Input: Shape;
    type Output: Shape;

    /// Unique id within a workflow
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn input_schema(&self) -> Schema {
        Self::Input::schema()
    }

    fn output_schema(&self) -> Schema {
        Self::Output::schema()
    }

    async fn execute(&self, ctx: StepContext<Self::Input>) -> anyhow::Result<Self::Output>;
}

/// Step backed by an async closure, see [`create_step`]
pub struct FnStep<I, O, F, Fut> {
    id: String,
    description: String,
    f: F,
    _marker: PhantomData<fn(I) -> (O, Fut)>,
}

/// Build a step from an async closure
///
/// ```ignore
/// let double = create_step("double", |ctx: StepContext<u64>| async move {
///     Ok(*ctx.input() * 2)
/// });
/// ```
pub fn create_step<I, O, F, Fut>(id: impl Into<String>, f: F) -> FnStep<I, O, F, Fut>
where
    I: Shape,
    O: Shape,
    F: Fn(StepContext<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
{
    FnStep {
        id: id.into(),
        description: String::new(),
        f,
        _marker: PhantomData,
    }
}

impl<I, O, F, Fut> FnStep<I, O, F, Fut> {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl<I, O, F, Fut> Step for FnStep<I, O, F, Fut>
where
    I: Shape,
    O: Shape,
    F: Fn(StepContext<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
{
    type Input = I;
    type Output = O;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, ctx: StepContext<I>) -> anyhow::Result<O> {
        (self.f)(ctx).await
    }
}

/// Type-erased step as stored in the graph
#[async_trait]
pub(crate) trait ErasedStep: Send + Sync {
    fn id(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Schema;
    fn output_schema(&self) -> Schema;

    /// Decode, execute and encode. Panics are reported as step failures.
    async fn call(&self, input: Value, scope: RunScope) -> Result<Value, EngineError>;
}

pub(crate) struct StepAdapter<S>(pub S);

#[async_trait]
impl<S: Step> ErasedStep for StepAdapter<S> {
    fn id(&self) -> &str {
        self.0.id()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn input_schema(&self) -> Schema {
        self.0.input_schema()
    }

    fn output_schema(&self) -> Schema {
        self.0.output_schema()
    }

    async fn call(&self, input: Value, scope: RunScope) -> Result<Value, EngineError> {
        let id = self.0.id();
        let input: S::Input =
            serde_json::from_value(input).map_err(|e| EngineError::decode(id, e))?;
        let span = scope.span.clone();
        let ctx = StepContext::new(input, scope);

        let outcome = AssertUnwindSafe(self.0.execute(ctx).instrument(span))
            .catch_unwind()
            .await;

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(EngineError::step(id, &e)),
            Err(payload) => {
                return Err(EngineError::StepExecution {
                    step: id.to_string(),
                    message: panic_message(payload.as_ref()),
                });
            }
        };

        serde_json::to_value(&output).map_err(|e| EngineError::encode(id, e))
    }
}
