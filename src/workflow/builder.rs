//! Fluent workflow construction and structural validation
//!
//! The builder is consumed by every call and `commit()` turns it into an
//! immutable [`Workflow`], so a committed graph cannot be extended.

use super::branch::{Branch, BranchNode};
use super::context::{RunScope, StepContext};
use super::error::{BuildError, DefinitionIssue, EngineError};
use super::foreach::{ForeachNode, ItemResult};
use super::schema::{Schema, Shape};
use super::state::NodeKind;
use super::step::{ErasedStep, Step, StepAdapter};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub(crate) type MapFn = Arc<dyn Fn(Value, &RunScope) -> Result<Value, EngineError> + Send + Sync>;

pub(crate) struct MapNode {
    pub id: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub f: MapFn,
}

pub(crate) enum Node {
    Step(Arc<dyn ErasedStep>),
    Map(MapNode),
    Branch(BranchNode),
    Foreach(ForeachNode),
    Workflow(Arc<WorkflowGraph>),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Step(step) => step.id(),
            Node::Map(map) => &map.id,
            Node::Branch(branch) => &branch.id,
            Node::Foreach(foreach) => foreach.id(),
            Node::Workflow(graph) => &graph.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Step(_) => NodeKind::Step,
            Node::Map(_) => NodeKind::Map,
            Node::Branch(_) => NodeKind::Branch,
            Node::Foreach(_) => NodeKind::Foreach,
            Node::Workflow(_) => NodeKind::Workflow,
        }
    }

    /// Contract checked on the value entering the node
    ///
    /// Foreach only requires an array here; items are checked one by one so
    /// that a bad item fails its own slot.
    pub fn input_schema(&self) -> Schema {
        match self {
            Node::Step(step) => step.input_schema(),
            Node::Map(map) => map.input_schema.clone(),
            Node::Branch(branch) => branch.input_schema.clone(),
            Node::Foreach(_) => Schema::array(Schema::Any),
            Node::Workflow(graph) => graph.input_schema.clone(),
        }
    }

    pub fn output_schema(&self) -> Schema {
        match self {
            Node::Step(step) => step.output_schema(),
            Node::Map(map) => map.output_schema.clone(),
            Node::Branch(branch) => branch.output_schema.clone(),
            Node::Foreach(_) => Schema::array(Schema::Any),
            Node::Workflow(graph) => graph.output_schema.clone(),
        }
    }

    fn description(&self) -> &str {
        match self {
            Node::Step(step) => step.description(),
            Node::Foreach(foreach) => foreach.step.description(),
            Node::Workflow(graph) => &graph.description,
            Node::Map(_) | Node::Branch(_) => "",
        }
    }
}

/// Diagnostic view of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub id: String,
    pub kind: NodeKind,
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
}

pub(crate) struct WorkflowGraph {
    pub id: String,
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub nodes: Vec<Node>,
}

/// A committed, immutable workflow taking `I` and producing `O`
///
/// Cloning is cheap; clones share the same graph.
pub struct Workflow<I, O> {
    graph: Arc<WorkflowGraph>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Workflow<I, O> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, O> fmt::Debug for Workflow<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.graph.id)
            .field("nodes", &self.graph.nodes.len())
            .finish()
    }
}

impl<I, O> Workflow<I, O> {
    pub fn id(&self) -> &str {
        &self.graph.id
    }

    pub fn description(&self) -> &str {
        &self.graph.description
    }

    pub fn input_schema(&self) -> &Schema {
        &self.graph.input_schema
    }

    pub fn output_schema(&self) -> &Schema {
        &self.graph.output_schema
    }

    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.graph
            .nodes
            .iter()
            .map(|node| NodeInfo {
                id: node.id().to_string(),
                kind: node.kind(),
                description: node.description().to_string(),
                input_schema: node.input_schema(),
                output_schema: node.output_schema(),
            })
            .collect()
    }

    pub(crate) fn graph(&self) -> Arc<WorkflowGraph> {
        self.graph.clone()
    }
}

/// Start building a workflow whose input is `I`
pub fn create_workflow<I: Shape>(id: impl Into<String>) -> WorkflowBuilder<I, I> {
    WorkflowBuilder {
        id: id.into(),
        description: String::new(),
        input_schema: I::schema(),
        output_schema: None,
        nodes: Vec::new(),
        _marker: PhantomData,
    }
}

/// Workflow under construction; `C` is the output type of the last node
pub struct WorkflowBuilder<I, C> {
    id: String,
    description: String,
    input_schema: Schema,
    output_schema: Option<Schema>,
    nodes: Vec<Node>,
    _marker: PhantomData<fn(I) -> C>,
}

impl<I: Shape, C: Shape> WorkflowBuilder<I, C> {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Replace the input contract derived from `I`
    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    /// Replace the output contract derived from the final type
    pub fn output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Append a step consuming the current output
    pub fn then<S>(self, step: S) -> WorkflowBuilder<I, S::Output>
    where
        S: Step<Input = C>,
    {
        self.push(Node::Step(Arc::new(StepAdapter(step))))
    }

    /// Reshape the current value without a full step
    ///
    /// The function sees the same context a step would; it should only
    /// derive data from it.
    pub fn map<T, F>(self, f: F) -> WorkflowBuilder<I, T>
    where
        T: Shape,
        F: Fn(&StepContext<C>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let n = self
            .nodes
            .iter()
            .filter(|node| matches!(node, Node::Map(_)))
            .count()
            + 1;
        self.map_as(format!("map-{}", n), f)
    }

    /// Like [`map`](Self::map) with an explicit node id
    pub fn map_as<T, F>(self, id: impl Into<String>, f: F) -> WorkflowBuilder<I, T>
    where
        T: Shape,
        F: Fn(&StepContext<C>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let id = id.into();
        let node_id = id.clone();
        let f: MapFn = Arc::new(move |input: Value, scope: &RunScope| {
            let input: C =
                serde_json::from_value(input).map_err(|e| EngineError::decode(&node_id, e))?;
            let ctx = StepContext::new(input, scope.clone());
            let output = f(&ctx).map_err(|e| EngineError::step(&node_id, &e))?;
            serde_json::to_value(&output).map_err(|e| EngineError::encode(&node_id, e))
        });

        self.push(Node::Map(MapNode {
            id,
            input_schema: C::schema(),
            output_schema: T::schema(),
            f,
        }))
    }

    pub fn branch<O: Shape>(self, branch: Branch<C, O>) -> WorkflowBuilder<I, O> {
        self.push(Node::Branch(branch.into_node()))
    }

    /// Run a committed workflow as a nested run
    pub fn then_workflow<O: Shape>(self, workflow: Workflow<C, O>) -> WorkflowBuilder<I, O> {
        self.push(Node::Workflow(workflow.graph()))
    }

    /// Validate the graph and seal it
    pub fn commit(self) -> Result<Workflow<I, C>, BuildError> {
        let graph = WorkflowGraph {
            output_schema: self.output_schema.unwrap_or_else(C::schema),
            id: self.id,
            description: self.description,
            input_schema: self.input_schema,
            nodes: self.nodes,
        };

        let issues = check_graph(&graph);
        if !issues.is_empty() {
            return Err(BuildError {
                workflow: graph.id,
                issues,
            });
        }

        tracing::debug!(workflow = %graph.id, nodes = graph.nodes.len(), "Committed workflow");
        Ok(Workflow {
            graph: Arc::new(graph),
            _marker: PhantomData,
        })
    }

    fn push<N>(mut self, node: Node) -> WorkflowBuilder<I, N> {
        self.nodes.push(node);
        WorkflowBuilder {
            id: self.id,
            description: self.description,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
            nodes: self.nodes,
            _marker: PhantomData,
        }
    }
}

impl<I: Shape, T: Shape> WorkflowBuilder<I, Vec<T>> {
    /// Run `step` once per element with at most `concurrency` in flight
    ///
    /// The output has one slot per input element, in input order.
    pub fn foreach<S>(
        self,
        step: S,
        concurrency: usize,
    ) -> WorkflowBuilder<I, Vec<ItemResult<S::Output>>>
    where
        S: Step<Input = T>,
    {
        self.push(Node::Foreach(ForeachNode {
            step: Arc::new(StepAdapter(step)),
            concurrency,
        }))
    }
}

fn check_graph(graph: &WorkflowGraph) -> Vec<DefinitionIssue> {
    let mut issues = Vec::new();

    if graph.nodes.is_empty() {
        issues.push(DefinitionIssue::Empty);
        return issues;
    }

    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut check_id = |id: &str, issues: &mut Vec<DefinitionIssue>| {
        if !seen.insert(id.to_string()) && reported.insert(id.to_string()) {
            issues.push(DefinitionIssue::DuplicateId { id: id.to_string() });
        }
    };
    for node in &graph.nodes {
        check_id(node.id(), &mut issues);
        if let Node::Branch(branch) = node {
            for target in branch.targets() {
                check_id(target.id(), &mut issues);
            }
        }
    }

    let mut upstream = graph.input_schema.clone();
    let mut upstream_id = format!("{} input", graph.id);

    for node in &graph.nodes {
        let id = node.id();
        match node {
            Node::Foreach(foreach) => {
                if foreach.concurrency == 0 {
                    issues.push(DefinitionIssue::ZeroConcurrency { node: id.to_string() });
                }
                match &upstream {
                    Schema::Array { items } => {
                        contract(&mut issues, &upstream_id, id, &foreach.step.input_schema(), items)
                    }
                    Schema::Any => {}
                    other => issues.push(DefinitionIssue::ForeachNotArray {
                        node: id.to_string(),
                        found: other.to_string(),
                    }),
                }
            }
            Node::Branch(branch) => {
                if branch.cases.is_empty() {
                    issues.push(DefinitionIssue::BranchWithoutCases {
                        branch: id.to_string(),
                    });
                }
                if branch.default.is_none() && !branch.exhaustive {
                    issues.push(DefinitionIssue::BranchNotExhaustive {
                        branch: id.to_string(),
                    });
                }
                contract(&mut issues, &upstream_id, id, &branch.input_schema, &upstream);
                for target in branch.targets() {
                    let (target_id, input, output) =
                        (target.id(), target.input_schema(), target.output_schema());
                    contract(&mut issues, id, target_id, &input, &branch.input_schema);
                    contract(&mut issues, target_id, id, &branch.output_schema, &output);
                }
            }
            _ => contract(&mut issues, &upstream_id, id, &node.input_schema(), &upstream),
        }

        upstream = node.output_schema();
        upstream_id = id.to_string();
    }

    let output_id = format!("{} output", graph.id);
    contract(&mut issues, &upstream_id, &output_id, &graph.output_schema, &upstream);

    issues
}

fn contract(
    issues: &mut Vec<DefinitionIssue>,
    from: &str,
    to: &str,
    downstream: &Schema,
    upstream: &Schema,
) {
    if let Err(violation) = downstream.accepts(upstream) {
        issues.push(DefinitionIssue::IncompatibleContract {
            from: from.to_string(),
            to: to.to_string(),
            violation,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step::create_step;
    use async_trait::async_trait;

    fn double() -> impl Step<Input = u64, Output = u64> {
        create_step("double", |ctx: StepContext<u64>| async move { Ok(*ctx.input() * 2) })
    }

    /// Declares a wider output contract than its Rust type
    struct Loose;

    #[async_trait]
    impl Step for Loose {
        type Input = u64;
        type Output = u64;

        fn id(&self) -> &str {
            "loose"
        }

        fn output_schema(&self) -> Schema {
            Schema::nullable(Schema::Integer)
        }

        async fn execute(&self, ctx: StepContext<u64>) -> anyhow::Result<u64> {
            Ok(*ctx.input())
        }
    }

    #[test]
    fn test_commit_linear_workflow() {
        let workflow = create_workflow::<Vec<u64>>("sum-doubles")
            .description("Double then sum")
            .foreach(double(), 2)
            .map(|ctx| Ok(ctx.input().len() as u64))
            .commit()
            .unwrap();

        assert_eq!(workflow.id(), "sum-doubles");
        assert_eq!(workflow.description(), "Double then sum");
        assert_eq!(workflow.input_schema(), &Schema::array(Schema::Integer));
        assert_eq!(workflow.output_schema(), &Schema::Integer);

        let nodes = workflow.nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "double");
        assert_eq!(nodes[0].kind, NodeKind::Foreach);
        assert_eq!(nodes[1].id, "map-1");
        assert_eq!(nodes[1].kind, NodeKind::Map);
    }

    #[test]
    fn test_workflow_debug_shows_id_and_nodes() {
        let workflow = create_workflow::<u64>("twice")
            .then(double())
            .map(|ctx| Ok(*ctx.input() + 1))
            .commit()
            .unwrap();
        assert_eq!(format!("{:?}", workflow), r#"Workflow { id: "twice", nodes: 2 }"#);
    }

    #[test]
    fn test_commit_rejects_empty() {
        let err = create_workflow::<u64>("empty").commit().unwrap_err();
        assert_eq!(err.issues, vec![DefinitionIssue::Empty]);
    }

    #[test]
    fn test_commit_rejects_duplicate_ids() {
        let err = create_workflow::<u64>("dup")
            .then(double())
            .then(double())
            .commit()
            .unwrap_err();
        assert_eq!(
            err.issues,
            vec![DefinitionIssue::DuplicateId { id: "double".into() }]
        );
    }

    #[test]
    fn test_commit_rejects_branch_target_id_clash() {
        let branch = Branch::<u64, u64>::new("route")
            .when(|_ctx: StepContext<u64>| async move { Ok(true) }, double())
            .assume_exhaustive();
        let err = create_workflow::<u64>("clash")
            .then(double())
            .branch(branch)
            .commit()
            .unwrap_err();
        assert!(
            err.issues
                .contains(&DefinitionIssue::DuplicateId { id: "double".into() })
        );
    }

    #[test]
    fn test_commit_rejects_non_exhaustive_branch() {
        let branch = Branch::<u64, u64>::new("route")
            .when(|_ctx: StepContext<u64>| async move { Ok(true) }, double());
        let err = create_workflow::<u64>("partial")
            .branch(branch)
            .commit()
            .unwrap_err();
        assert_eq!(
            err.issues,
            vec![DefinitionIssue::BranchNotExhaustive {
                branch: "route".into()
            }]
        );

        let empty = Branch::<u64, u64>::new("nothing").otherwise(double());
        let err = create_workflow::<u64>("no-cases")
            .branch(empty)
            .commit()
            .unwrap_err();
        assert_eq!(
            err.issues,
            vec![DefinitionIssue::BranchWithoutCases {
                branch: "nothing".into()
            }]
        );
    }

    #[test]
    fn test_commit_rejects_zero_concurrency() {
        let err = create_workflow::<Vec<u64>>("zero")
            .foreach(double(), 0)
            .commit()
            .unwrap_err();
        assert_eq!(
            err.issues,
            vec![DefinitionIssue::ZeroConcurrency {
                node: "double".into()
            }]
        );
    }

    #[test]
    fn test_commit_rejects_foreach_over_non_array() {
        let err = create_workflow::<Vec<u64>>("not-array")
            .input_schema(Schema::object([("items", Schema::array(Schema::Integer))]))
            .foreach(double(), 2)
            .commit()
            .unwrap_err();
        assert!(matches!(
            err.issues.as_slice(),
            [DefinitionIssue::ForeachNotArray { node, .. }] if node == "double"
        ));
    }

    #[test]
    fn test_commit_rejects_incompatible_contracts() {
        let err = create_workflow::<u64>("nullable")
            .then(Loose)
            .then(double())
            .commit()
            .unwrap_err();
        assert!(matches!(
            err.issues.as_slice(),
            [DefinitionIssue::IncompatibleContract { from, to, .. }] if from == "loose" && to == "double"
        ));

        let err = create_workflow::<u64>("output")
            .then(double())
            .output_schema(Schema::String)
            .commit()
            .unwrap_err();
        assert!(matches!(
            err.issues.as_slice(),
            [DefinitionIssue::IncompatibleContract { to, .. }] if to == "output output"
        ));
    }

    #[test]
    fn test_commit_collects_every_issue() {
        let branch = Branch::<Vec<ItemResult<u64>>, u64>::new("route");
        let err = create_workflow::<Vec<u64>>("broken")
            .foreach(double(), 0)
            .branch(branch)
            .commit()
            .unwrap_err();
        assert_eq!(err.workflow, "broken");
        assert_eq!(err.issues.len(), 3);
    }

    #[test]
    fn test_map_ids() {
        let workflow = create_workflow::<u64>("maps")
            .map(|ctx| Ok(*ctx.input() + 1))
            .map_as("to-text", |ctx| Ok(ctx.input().to_string()))
            .map(|ctx| Ok(ctx.input().len() as u64))
            .commit()
            .unwrap();
        let ids: Vec<String> = workflow.nodes().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["map-1", "to-text", "map-3"]);
    }
}
