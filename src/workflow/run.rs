//! Execution of committed workflows
//!
//! A run walks the graph in order. Every node boundary is validated, every
//! completed node is appended to the run's trail, and the first node error
//! stops the run with the failing node named.

use super::branch::Target;
use super::builder::{MapNode, Node, Workflow, WorkflowGraph};
use super::context::RunScope;
use super::error::{Boundary, EngineError, panic_message};
use super::schema::Shape;
use super::state::{NodeKind, NodeRecord, RunFailure, RunReport, RunStatus, WorkflowRun};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

impl<I: Shape, O: Shape> Workflow<I, O> {
    /// Execute one run with a typed input
    pub async fn run(&self, input: I) -> Result<RunReport<O>, RunFailure> {
        match serde_json::to_value(&input) {
            Ok(value) => self.run_value(value).await,
            Err(e) => {
                let mut run = WorkflowRun::new(self.id(), Value::Null);
                let error = EngineError::encode(self.id(), e);
                run.mark_failed(None, &error);
                Err(RunFailure {
                    run: Box::new(run),
                    node_id: None,
                    error,
                })
            }
        }
    }

    /// Execute one run with input that has not been checked yet
    pub async fn run_value(&self, input: Value) -> Result<RunReport<O>, RunFailure> {
        let graph = self.graph();
        let mut run = WorkflowRun::new(&graph.id, input.clone());
        let span = tracing::info_span!("workflow_run", workflow = %graph.id, run_id = %run.run_id);
        let started = Instant::now();

        run.status = RunStatus::Running;
        span.in_scope(|| tracing::info!(nodes = graph.nodes.len(), "Workflow run started"));

        let outcome = match graph.input_schema.validate(&input) {
            Err(violation) => Err(NodeFailure {
                node_id: None,
                error: EngineError::schema(&graph.id, Boundary::Input, violation),
            }),
            Ok(()) => {
                let scope = RunScope::new(Arc::from(run.run_id.as_str()), input.clone(), span.clone());
                let mut ledger = Ledger::default();
                let result = execute_graph(&graph, input, scope, &mut ledger)
                    .instrument(span.clone())
                    .await;
                run.records = ledger.records;
                result.and_then(|value| finish::<O>(&graph, value))
            }
        };
        run.duration_ms = elapsed_ms(started);

        match outcome {
            Ok(output) => {
                run.status = RunStatus::Succeeded;
                span.in_scope(|| {
                    tracing::info!(
                        duration_ms = run.duration_ms,
                        completed = run.records.len(),
                        "Workflow run succeeded"
                    )
                });
                Ok(RunReport { output, run })
            }
            Err(failure) => {
                run.mark_failed(failure.node_id.clone(), &failure.error);
                span.in_scope(|| {
                    tracing::error!(
                        node = failure.node_id.as_deref().unwrap_or("-"),
                        error = %failure.error,
                        "Workflow run failed"
                    )
                });
                Err(RunFailure {
                    run: Box::new(run),
                    node_id: failure.node_id,
                    error: failure.error,
                })
            }
        }
    }
}

/// Error plus the (possibly qualified) id of the node it happened in
struct NodeFailure {
    node_id: Option<String>,
    error: EngineError,
}

impl NodeFailure {
    fn at(node_id: &str, error: EngineError) -> Self {
        Self {
            node_id: Some(node_id.to_string()),
            error,
        }
    }

    fn qualify(self, prefix: &str) -> Self {
        let node_id = match self.node_id {
            Some(id) => format!("{}.{}", prefix, id),
            None => prefix.to_string(),
        };
        Self {
            node_id: Some(node_id),
            error: self.error,
        }
    }
}

/// Results produced so far in one namespace
#[derive(Default)]
struct Ledger {
    records: Vec<NodeRecord>,
    visible: HashMap<String, Arc<Value>>,
}

impl Ledger {
    fn snapshot(&self) -> Arc<HashMap<String, Arc<Value>>> {
        Arc::new(self.visible.clone())
    }

    fn record(&mut self, node_id: &str, kind: NodeKind, output: Value, duration_ms: u64) {
        self.visible
            .insert(node_id.to_string(), Arc::new(output.clone()));
        self.records.push(NodeRecord {
            node_id: node_id.to_string(),
            kind,
            output,
            duration_ms,
        });
    }

    /// Merge a nested run's trail under `<prefix>.<node>`
    fn absorb(&mut self, prefix: &str, child: Ledger) {
        for mut record in child.records {
            record.node_id = format!("{}.{}", prefix, record.node_id);
            self.visible
                .insert(record.node_id.clone(), Arc::new(record.output.clone()));
            self.records.push(record);
        }
    }
}

fn execute_graph<'a>(
    graph: &'a WorkflowGraph,
    input: Value,
    scope: RunScope,
    ledger: &'a mut Ledger,
) -> BoxFuture<'a, Result<Value, NodeFailure>> {
    async move {
        let mut current = input;

        for node in &graph.nodes {
            let id = node.id();
            let kind = node.kind();
            let span = tracing::info_span!(parent: &scope.span, "node", node = %id, kind = %kind);

            if let Err(violation) = node.input_schema().validate(&current) {
                return Err(NodeFailure::at(
                    id,
                    EngineError::schema(id, Boundary::Input, violation),
                ));
            }

            let node_scope = RunScope {
                results: ledger.snapshot(),
                span: span.clone(),
                ..scope.clone()
            };
            let started = Instant::now();

            let output = execute_node(node, current, node_scope, ledger)
                .instrument(span.clone())
                .await?;

            if let Err(violation) = node.output_schema().validate(&output) {
                return Err(NodeFailure::at(
                    id,
                    EngineError::schema(id, Boundary::Output, violation),
                ));
            }

            let duration_ms = elapsed_ms(started);
            span.in_scope(|| tracing::info!(duration_ms, "Node completed"));
            ledger.record(id, kind, output.clone(), duration_ms);
            current = output;
        }

        Ok(current)
    }
    .boxed()
}

async fn execute_node(
    node: &Node,
    input: Value,
    scope: RunScope,
    ledger: &mut Ledger,
) -> Result<Value, NodeFailure> {
    let id = node.id();
    match node {
        Node::Step(step) => step
            .call(input, scope)
            .await
            .map_err(|e| NodeFailure::at(id, e)),
        Node::Map(map) => run_map(map, input, &scope).map_err(|e| NodeFailure::at(id, e)),
        Node::Foreach(foreach) => foreach
            .run(input, scope)
            .await
            .map_err(|e| NodeFailure::at(id, e)),
        Node::Workflow(graph) => run_nested(graph, input, &scope, ledger).await,
        Node::Branch(branch) => {
            let target = branch
                .select(&input, &scope)
                .await
                .map_err(|e| NodeFailure::at(id, e))?;
            tracing::info!(branch = %id, target = %target.id(), "Branch selected");
            run_target(&target, input, &scope, ledger).await
        }
    }
}

/// Run the target chosen by a branch; a step target is recorded under its own id
async fn run_target(
    target: &Target,
    input: Value,
    scope: &RunScope,
    ledger: &mut Ledger,
) -> Result<Value, NodeFailure> {
    let target_id = target.id();
    if let Err(violation) = target.input_schema().validate(&input) {
        return Err(NodeFailure::at(
            target_id,
            EngineError::schema(target_id, Boundary::Input, violation),
        ));
    }

    let output = match target {
        Target::Step(step) => {
            let started = Instant::now();
            let output = step
                .call(input, scope.clone())
                .await
                .map_err(|e| NodeFailure::at(target_id, e))?;
            validate_output(target, &output)?;
            ledger.record(target_id, NodeKind::Step, output.clone(), elapsed_ms(started));
            output
        }
        Target::Workflow(graph) => {
            let output = run_nested(graph, input, scope, ledger).await?;
            validate_output(target, &output)?;
            output
        }
    };

    Ok(output)
}

fn validate_output(target: &Target, output: &Value) -> Result<(), NodeFailure> {
    target.output_schema().validate(output).map_err(|violation| {
        NodeFailure::at(
            target.id(),
            EngineError::schema(target.id(), Boundary::Output, violation),
        )
    })
}

/// Run a committed workflow with its own namespace and init data
async fn run_nested(
    graph: &WorkflowGraph,
    input: Value,
    scope: &RunScope,
    ledger: &mut Ledger,
) -> Result<Value, NodeFailure> {
    let span = tracing::info_span!(parent: &scope.span, "workflow_run", workflow = %graph.id, run_id = %scope.run_id);
    let nested = scope.nested(input.clone(), span.clone());
    let mut child = Ledger::default();

    let result = execute_graph(graph, input, nested, &mut child)
        .instrument(span)
        .await;
    ledger.absorb(&graph.id, child);

    result.map_err(|failure| failure.qualify(&graph.id))
}

fn run_map(map: &MapNode, input: Value, scope: &RunScope) -> Result<Value, EngineError> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| (map.f)(input, scope))) {
        Ok(result) => result,
        Err(payload) => Err(EngineError::StepExecution {
            step: map.id.clone(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Check the final value against the workflow's own output contract
///
/// Every node has completed by now, so failures are not attributed to one.
fn finish<O: Shape>(graph: &WorkflowGraph, value: Value) -> Result<O, NodeFailure> {
    let boundary = |error| NodeFailure {
        node_id: None,
        error,
    };

    if let Err(violation) = graph.output_schema.validate(&value) {
        return Err(boundary(EngineError::schema(&graph.id, Boundary::Output, violation)));
    }

    serde_json::from_value(value).map_err(|e| boundary(EngineError::decode(&graph.id, e)))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
