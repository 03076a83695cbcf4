//! Engine-level error types.

use std::fmt;

use nodes::FilterType;
use thiserror::Error;

/// One structural or configuration problem in a DAG submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A link references a node ID that doesn't exist in the DAG.
    #[error("link {from} -> {to} references unknown node '{node_id}' ({side} side)")]
    DanglingReference {
        from: String,
        to: String,
        node_id: String,
        side: &'static str,
    },

    /// More than one link for the same (source, target) pair.
    #[error("duplicate link {from} -> {to}")]
    DuplicateLink { from: String, to: String },

    /// The graph still has a cycle after loop links are removed.
    #[error("graph contains a cycle through: {}", .nodes.join(", "))]
    Cycle { nodes: Vec<String> },

    /// A loop link whose target cannot reach its condition.
    #[error("loop link {condition} -> {entry}: '{entry}' does not lead to '{condition}'")]
    InvalidLoop { condition: String, entry: String },

    /// Write indices that can only be honoured by running a node before its own predecessor.
    #[error("write order into '{sink}' contradicts the graph around: {}", .nodes.join(", "))]
    WriteOrderConflict { sink: String, nodes: Vec<String> },

    /// No item factory registered for the node's kind.
    #[error("node '{node_id}' has unknown kind '{kind}'")]
    UnknownKind { node_id: String, kind: String },

    /// The item factory rejected the node's configuration.
    #[error("node '{node_id}': {message}")]
    ItemConfig { node_id: String, message: String },

    /// A run setting is out of range.
    #[error("invalid setting '{setting}': {message}")]
    InvalidSetting {
        setting: &'static str,
        message: String,
    },
}

/// Every problem found in a submission, in detection order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// A link's filter left the target nothing to work on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("link {from} -> {to} selects no {filter_type}s but filter validation is on")]
    EmptyFilter {
        from: String,
        to: String,
        filter_type: FilterType,
    },
}

/// Errors produced by the workflow engine.
///
/// Node failures are not errors at this level: they are part of a run's
/// outcome and event stream.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The submission was rejected before any node ran.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// The run coordinator could not continue.
    #[error("run coordinator failed: {0}")]
    Internal(String),
}
