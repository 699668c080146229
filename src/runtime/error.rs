/// Execution error types
///
/// `NodeError` is what a single node reports; `RunError` pins it to the node and
/// workflow that aborted the run.

use crate::expression::ExpressionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("expression '{expression}' failed: {source}")]
    Expression {
        expression: String,
        #[source]
        source: ExpressionError,
    },

    #[error("condition expression is empty")]
    EmptyCondition,

    #[error("variable name is empty")]
    EmptyVariableName,

    #[error("{0}")]
    Type(String),

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{method} {url} failed: {message}")]
    Http {
        method: String,
        url: String,
        message: String,
    },

    #[error("sub-workflow '{0}' not found")]
    SubProcessNotFound(String),

    #[error("sub-workflow nesting deeper than {0} levels")]
    SubProcessDepth(usize),

    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("{0} nodes are dispatched by the execution engine")]
    NotExecutable(String),
}

impl NodeError {
    pub(crate) fn expression(expression: &str, source: ExpressionError) -> Self {
        NodeError::Expression {
            expression: expression.to_string(),
            source,
        }
    }
}

/// A failed run: the node that aborted it and why
#[derive(Debug, Error)]
#[error("node '{node_id}' of workflow '{workflow_id}' failed: {source}")]
pub struct RunError {
    pub workflow_id: String,
    pub node_id: String,
    #[source]
    pub source: NodeError,
}
