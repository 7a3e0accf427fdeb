//! Conditional routing between alternative steps or sub-workflows

use super::builder::{Workflow, WorkflowGraph};
use super::context::{RunScope, StepContext};
use super::error::{EngineError, panic_message};
use super::schema::{Schema, Shape};
use super::step::{ErasedStep, Step, StepAdapter};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

type Predicate =
    Arc<dyn Fn(Value, RunScope) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

/// What a matching case runs
#[derive(Clone)]
pub(crate) enum Target {
    Step(Arc<dyn ErasedStep>),
    Workflow(Arc<WorkflowGraph>),
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Step(step) => f.debug_tuple("Step").field(&step.id()).finish(),
            Target::Workflow(graph) => f.debug_tuple("Workflow").field(&graph.id).finish(),
        }
    }
}

impl Target {
    pub fn id(&self) -> &str {
        match self {
            Target::Step(step) => step.id(),
            Target::Workflow(graph) => &graph.id,
        }
    }

    pub fn input_schema(&self) -> Schema {
        match self {
            Target::Step(step) => step.input_schema(),
            Target::Workflow(graph) => graph.input_schema.clone(),
        }
    }

    pub fn output_schema(&self) -> Schema {
        match self {
            Target::Step(step) => step.output_schema(),
            Target::Workflow(graph) => graph.output_schema.clone(),
        }
    }
}

pub(crate) struct Case {
    predicate: Predicate,
    pub target: Target,
}

/// Ordered `(predicate, target)` cases; the first predicate that holds wins
///
/// ```ignore
/// let route = Branch::new("route")
///     .when(|ctx: StepContext<SkipCheck>| async move { Ok(!ctx.input().proceed) }, early_exit)
///     .otherwise_workflow(pipeline);
/// ```
pub struct Branch<I, O> {
    id: String,
    cases: Vec<Case>,
    default: Option<Target>,
    exhaustive: bool,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I: Shape, O: Shape> Branch<I, O> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cases: Vec::new(),
            default: None,
            exhaustive: false,
            _marker: PhantomData,
        }
    }

    /// Run `step` when `predicate` holds and no earlier case matched
    pub fn when<F, Fut, S>(self, predicate: F, step: S) -> Self
    where
        F: Fn(StepContext<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
        S: Step<Input = I, Output = O>,
    {
        self.push_case(predicate, Target::Step(Arc::new(StepAdapter(step))))
    }

    /// Run a committed workflow as a nested run when `predicate` holds
    pub fn when_workflow<F, Fut>(self, predicate: F, workflow: Workflow<I, O>) -> Self
    where
        F: Fn(StepContext<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.push_case(predicate, Target::Workflow(workflow.graph()))
    }

    pub fn otherwise<S>(mut self, step: S) -> Self
    where
        S: Step<Input = I, Output = O>,
    {
        self.default = Some(Target::Step(Arc::new(StepAdapter(step))));
        self
    }

    pub fn otherwise_workflow(mut self, workflow: Workflow<I, O>) -> Self {
        self.default = Some(Target::Workflow(workflow.graph()));
        self
    }

    /// Declare that the cases cover every input, so no default is needed.
    /// A run that still matches nothing fails with `BranchNoMatch`.
    pub fn assume_exhaustive(mut self) -> Self {
        self.exhaustive = true;
        self
    }

    fn push_case<F, Fut>(mut self, predicate: F, target: Target) -> Self
    where
        F: Fn(StepContext<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let predicate: Predicate = Arc::new(move |input: Value, scope: RunScope| {
            match serde_json::from_value::<I>(input) {
                Ok(input) => predicate(StepContext::new(input, scope)).boxed(),
                Err(e) => futures::future::ready(Err(anyhow::Error::new(e))).boxed(),
            }
        });
        self.cases.push(Case { predicate, target });
        self
    }

    pub(crate) fn into_node(self) -> BranchNode {
        BranchNode {
            id: self.id,
            input_schema: I::schema(),
            output_schema: O::schema(),
            cases: self.cases,
            default: self.default,
            exhaustive: self.exhaustive,
        }
    }
}

pub(crate) struct BranchNode {
    pub id: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub cases: Vec<Case>,
    pub default: Option<Target>,
    pub exhaustive: bool,
}

impl BranchNode {
    /// Every target, cases first, then the default
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.cases
            .iter()
            .map(|c| &c.target)
            .chain(self.default.iter())
    }

    /// Evaluate predicates in order and pick the target to run
    ///
    /// Stops at the first predicate that returns `true`; later predicates are
    /// never invoked.
    pub async fn select(&self, input: &Value, scope: &RunScope) -> Result<Target, EngineError> {
        for (case_index, case) in self.cases.iter().enumerate() {
            let outcome = AssertUnwindSafe((case.predicate)(input.clone(), scope.clone()))
                .catch_unwind()
                .await;

            let matched = match outcome {
                Ok(Ok(matched)) => matched,
                Ok(Err(e)) => {
                    return Err(EngineError::Predicate {
                        branch: self.id.clone(),
                        case: case_index,
                        message: format!("{:#}", e),
                    });
                }
                Err(payload) => {
                    return Err(EngineError::Predicate {
                        branch: self.id.clone(),
                        case: case_index,
                        message: panic_message(payload.as_ref()),
                    });
                }
            };

            tracing::debug!(branch = %self.id, case = case_index, matched, "Evaluated predicate");
            if matched {
                return Ok(case.target.clone());
            }
        }

        match &self.default {
            Some(target) => Ok(target.clone()),
            None => Err(EngineError::BranchNoMatch {
                branch: self.id.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step::create_step;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scope() -> RunScope {
        RunScope::new(Arc::from("run-branch"), json!(null), tracing::Span::none())
    }

    fn label(id: &'static str) -> impl Step<Input = u64, Output = String> {
        create_step(id, move |_ctx: StepContext<u64>| async move { Ok(id.to_string()) })
    }

    #[tokio::test]
    async fn test_first_match_wins_and_short_circuits() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = later_calls.clone();

        let node = Branch::<u64, String>::new("route")
            .when(|ctx: StepContext<u64>| async move { Ok(*ctx.input() > 10) }, label("big"))
            .when(|ctx: StepContext<u64>| async move { Ok(*ctx.input() > 5) }, label("medium"))
            .when(
                move |_ctx: StepContext<u64>| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(true)
                    }
                },
                label("small"),
            )
            .into_node();

        let target = node.select(&json!(7), &scope()).await.unwrap();
        assert_eq!(target.id(), "medium");
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);

        let target = node.select(&json!(1), &scope()).await.unwrap();
        assert_eq!(target.id(), "small");
        assert_eq!(later_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_and_no_match() {
        let with_default = Branch::<u64, String>::new("route")
            .when(|ctx: StepContext<u64>| async move { Ok(*ctx.input() == 0) }, label("zero"))
            .otherwise(label("other"))
            .into_node();
        let target = with_default.select(&json!(3), &scope()).await.unwrap();
        assert_eq!(target.id(), "other");

        let exhaustive = Branch::<u64, String>::new("route")
            .when(|ctx: StepContext<u64>| async move { Ok(*ctx.input() == 0) }, label("zero"))
            .assume_exhaustive()
            .into_node();
        let err = exhaustive.select(&json!(3), &scope()).await.unwrap_err();
        assert!(matches!(err, EngineError::BranchNoMatch { ref branch } if branch == "route"));
    }

    #[tokio::test]
    async fn test_failing_predicate() {
        let node = Branch::<u64, String>::new("route")
            .when(
                |_ctx: StepContext<u64>| async move { Err(anyhow::anyhow!("lookup failed")) },
                label("never"),
            )
            .otherwise(label("other"))
            .into_node();

        let err = node.select(&json!(1), &scope()).await.unwrap_err();
        match err {
            EngineError::Predicate {
                branch,
                case,
                message,
            } => {
                assert_eq!(branch, "route");
                assert_eq!(case, 0);
                assert!(message.contains("lookup failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_selected_target_debug() {
        let node = Branch::<u64, String>::new("route")
            .when(|_ctx: StepContext<u64>| async move { Ok(true) }, label("only"))
            .otherwise(label("fallback"))
            .into_node();
        let target = node.select(&json!(1), &scope()).await.unwrap();
        assert_eq!(format!("{:?}", target), r#"Step("only")"#);
    }

    #[test]
    fn test_targets_lists_default_last() {
        let node = Branch::<u64, String>::new("route")
            .when(|_ctx: StepContext<u64>| async move { Ok(true) }, label("a"))
            .otherwise(label("b"))
            .into_node();
        let ids: Vec<&str> = node.targets().map(|t| t.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
