//! Bounded fan-out over a collection with order-preserving fan-in

use super::context::RunScope;
use super::error::{Boundary, EngineError};
use super::schema::{SchemaViolation, value_kind};
use super::step::ErasedStep;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::Instrument;

/// One slot of a foreach output
pub type ItemResult<T> = Result<T, ForeachItemError>;

/// Why a single item did not produce an output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("item {index} failed in step '{step}': {message}")]
pub struct ForeachItemError {
    pub index: usize,
    pub step: String,
    pub message: String,
}

/// Split foreach slots into successful outputs and failures, keeping order
pub fn partition<T>(results: Vec<ItemResult<T>>) -> (Vec<T>, Vec<ForeachItemError>) {
    let mut ok = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for result in results {
        match result {
            Ok(value) => ok.push(value),
            Err(e) => failed.push(e),
        }
    }
    (ok, failed)
}

pub(crate) struct ForeachNode {
    pub step: Arc<dyn ErasedStep>,
    pub concurrency: usize,
}

impl ForeachNode {
    pub fn id(&self) -> &str {
        self.step.id()
    }

    /// Run the item step over every element of `input`
    ///
    /// At most `concurrency` items are in flight. Item failures are stored in
    /// their slot; only a non-array input fails the node.
    pub async fn run(&self, input: Value, scope: RunScope) -> Result<Value, EngineError> {
        let node_id = self.id().to_string();
        let items = match input {
            Value::Array(items) => items,
            other => {
                let violation = SchemaViolation {
                    path: "$".to_string(),
                    expected: "array".to_string(),
                    found: value_kind(&other).to_string(),
                };
                return Err(EngineError::schema(&node_id, Boundary::Input, violation));
            }
        };

        let total = items.len();
        let workers = self.concurrency.max(1).min(total);
        tracing::debug!(node = %node_id, items = total, workers, "Starting foreach");

        let queue = Arc::new(Mutex::new(items.into_iter().enumerate()));
        let mut pool = JoinSet::new();

        for _ in 0..workers {
            let queue = queue.clone();
            let step = self.step.clone();
            let scope = scope.clone();
            pool.spawn(async move {
                let mut done = Vec::new();
                loop {
                    let next = queue.lock().await.next();
                    let Some((index, item)) = next else { break };
                    let result = run_item(step.as_ref(), index, item, &scope).await;
                    done.push((index, result));
                }
                done
            });
        }

        let mut slots: Vec<Option<ItemResult<Value>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(done) => {
                    for (index, result) in done {
                        slots[index] = Some(result);
                    }
                }
                Err(e) => {
                    tracing::error!(node = %node_id, error = %e, "Foreach worker terminated");
                }
            }
        }

        let results: Vec<ItemResult<Value>> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    Err(ForeachItemError {
                        index,
                        step: node_id.clone(),
                        message: "worker terminated before completing item".to_string(),
                    })
                })
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        tracing::info!(node = %node_id, items = total, failed, "Foreach complete");

        serde_json::to_value(&results).map_err(|e| EngineError::encode(&node_id, e))
    }
}

async fn run_item(
    step: &dyn ErasedStep,
    index: usize,
    item: Value,
    scope: &RunScope,
) -> ItemResult<Value> {
    let span = tracing::info_span!(parent: &scope.span, "foreach_item", node = %step.id(), index);
    let fail = |message: String| {
        tracing::warn!(parent: &span, node = %step.id(), index, error = %message, "Item failed");
        ForeachItemError {
            index,
            step: step.id().to_string(),
            message,
        }
    };

    if let Err(violation) = step.input_schema().validate(&item) {
        return Err(fail(format!("invalid input {}", violation)));
    }

    let output = match step
        .call(item, scope.with_span(span.clone()))
        .instrument(span.clone())
        .await
    {
        Ok(output) => output,
        Err(EngineError::StepExecution { message, .. }) => return Err(fail(message)),
        Err(e) => return Err(fail(e.to_string())),
    };

    if let Err(violation) = step.output_schema().validate(&output) {
        return Err(fail(format!("invalid output {}", violation)));
    }

    Ok(output)
}
