//! Evaluation error types.
//!
//! Only structural and resource failures are represented here. Expected
//! per-node failures (missing keys, crashing programs, wrong answers) are
//! recorded on the node's [`NodeResult`](crate::result::NodeResult) instead and
//! never abort a run.

use std::path::PathBuf;

use thiserror::Error;

use crate::node::NodeId;

/// Errors that abort graph construction or a whole evaluation run.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The node (transitively) depends on itself.
    #[error("test graph contains a cycle through node {node}")]
    Cycle { node: String },

    /// A reserved slot was never given a definition.
    #[error("node {node} was reserved but never defined")]
    UndefinedNode { node: String },

    /// A slot was defined twice.
    #[error("node {node} is already defined")]
    AlreadyDefined { node: String },

    /// The id does not belong to this graph.
    #[error("node id {0} does not belong to this graph")]
    UnknownNode(NodeId),

    /// A reduction was built without operands.
    #[error("`{op}` needs at least one operand")]
    EmptyOperands { op: String },

    /// An operator received the wrong number of operands.
    #[error("`{op}` takes {expected} operand(s), got {actual}")]
    Arity {
        op: String,
        expected: usize,
        actual: usize,
    },

    /// Arithmetic fault while combining operand scores.
    #[error("arithmetic error in node {node}: {message}")]
    Arithmetic { node: String, message: String },

    /// A fixed artifact was given as a relative path.
    #[error("artifact path must be absolute: {}", .0.display())]
    RelativeArtifact(PathBuf),

    /// A fixed artifact does not exist.
    #[error("artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    /// Sandbox creation, staging or cleanup failed.
    #[error("sandbox error: {context}")]
    Sandbox {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The checker itself failed (as opposed to rejecting the output).
    #[error("checker failed: {0:#}")]
    Checker(anyhow::Error),
}

impl EvalError {
    /// Returns `true` for malformed-graph errors, as opposed to environment
    /// (resource) failures.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EvalError::Cycle { .. }
                | EvalError::UndefinedNode { .. }
                | EvalError::AlreadyDefined { .. }
                | EvalError::UnknownNode(_)
                | EvalError::EmptyOperands { .. }
                | EvalError::Arity { .. }
                | EvalError::Arithmetic { .. }
        )
    }

    /// Wrap an I/O failure from sandbox handling.
    pub fn sandbox(context: impl Into<String>, source: std::io::Error) -> Self {
        EvalError::Sandbox {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_structural_errors() {
        assert!(EvalError::Cycle { node: "a".into() }.is_structural());
        assert!(EvalError::EmptyOperands { op: "sum".into() }.is_structural());
        assert!(!EvalError::ArtifactNotFound(PathBuf::from("/nope")).is_structural());
        assert!(!EvalError::Checker(anyhow::anyhow!("boom")).is_structural());
    }

    #[test]
    fn messages_name_the_node() {
        let err = EvalError::Cycle {
            node: "#3 (part-b)".into(),
        };
        assert_eq!(
            err.to_string(),
            "test graph contains a cycle through node #3 (part-b)"
        );
    }
}
