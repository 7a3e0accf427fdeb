//! Error types for workflow construction and execution

use super::schema::SchemaViolation;
use std::fmt;
use thiserror::Error;

/// Which side of a node a value was checked on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Input,
    Output,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Input => f.write_str("input"),
            Boundary::Output => f.write_str("output"),
        }
    }
}

/// Errors that abort a run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{boundary} of '{node}' violates its contract {violation}")]
    Schema {
        node: String,
        boundary: Boundary,
        violation: SchemaViolation,
    },

    #[error("step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    #[error("predicate {case} of branch '{branch}' failed: {message}")]
    Predicate {
        branch: String,
        case: usize,
        message: String,
    },

    #[error("no branch matched in '{branch}'")]
    BranchNoMatch { branch: String },

    #[error("failed to decode data for '{node}': {source}")]
    Decode {
        node: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode data for '{node}': {source}")]
    Encode {
        node: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no result recorded for step '{id}'")]
    MissingResult { id: String },
}

impl EngineError {
    pub(crate) fn schema(node: &str, boundary: Boundary, violation: SchemaViolation) -> Self {
        Self::Schema {
            node: node.to_string(),
            boundary,
            violation,
        }
    }

    pub(crate) fn step(step: &str, err: &anyhow::Error) -> Self {
        Self::StepExecution {
            step: step.to_string(),
            message: format!("{:#}", err),
        }
    }

    pub(crate) fn decode(node: &str, source: serde_json::Error) -> Self {
        Self::Decode {
            node: node.to_string(),
            source,
        }
    }

    pub(crate) fn encode(node: &str, source: serde_json::Error) -> Self {
        Self::Encode {
            node: node.to_string(),
            source,
        }
    }
}

/// A structural problem found by `commit()`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionIssue {
    #[error("workflow has no nodes")]
    Empty,

    #[error("duplicate node id '{id}'")]
    DuplicateId { id: String },

    #[error("'{to}' cannot accept the output of '{from}': {violation}")]
    IncompatibleContract {
        from: String,
        to: String,
        violation: SchemaViolation,
    },

    #[error("foreach '{node}' needs an array input, got {found}")]
    ForeachNotArray { node: String, found: String },

    #[error("foreach '{node}' concurrency must be at least 1")]
    ZeroConcurrency { node: String },

    #[error("branch '{branch}' has no cases")]
    BranchWithoutCases { branch: String },

    #[error(
        "branch '{branch}' has no default case; add `otherwise` or mark it `assume_exhaustive`"
    )]
    BranchNotExhaustive { branch: String },
}

/// `commit()` rejected the workflow
#[derive(Debug, Clone, PartialEq, Error)]
#[error("workflow '{workflow}' failed validation:\n  {}", .issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("\n  "))]
pub struct BuildError {
    pub workflow: String,
    pub issues: Vec<DefinitionIssue>,
}

/// Pull a readable message out of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
