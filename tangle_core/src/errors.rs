//! Error types and the engine-level diagnostics list.

use crate::NodeId;

/// The error type used across the engine.
#[derive(Debug, thiserror::Error)]
pub enum TangleError {
    /// A property tree descriptor is invalid.
    #[error("schema error: {0}")]
    Schema(String),

    /// A link or unlink request was rejected.
    #[error("link error: {0}")]
    Link(String),

    /// A property read or write was rejected.
    #[error("value error: {0}")]
    Value(String),

    /// A node's update failed.
    #[error("node '{node_name}' failed to update: {message}")]
    Runtime { node_name: String, message: String },

    /// The node graph contains a dependency cycle.
    #[error("failed to sort nodes topologically: graph contains a cycle")]
    CycleDetected,

    /// A referenced object does not exist in this engine.
    #[error("{0}")]
    NotFound(String),

    /// An object cannot be destroyed while something references it.
    #[error("{0}")]
    InUse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupted or incompatible serialized data.
    #[error("format error: {0}")]
    Format(String),

    /// A binding could not be reconnected to its host scene object.
    #[error("attachment error: {0}")]
    Attachment(String),
}

/// One entry of the engine's diagnostics list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub message: String,
    /// The offending node, where one is known.
    pub node: Option<NodeId>,
}

/// Accumulates diagnostics during a public engine call.
///
/// The list is cleared at the start of every public mutating call, so after
/// a failed call it holds exactly the diagnostics of that call.
#[derive(Debug, Default)]
pub struct ErrorReporting {
    errors: Vec<ErrorRecord>,
}

impl ErrorReporting {
    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn add(&mut self, message: impl Into<String>, node: Option<NodeId>) {
        let record = ErrorRecord {
            message: message.into(),
            node,
        };
        log::debug!("error reported: {}", record.message);
        self.errors.push(record);
    }

    pub fn add_error(&mut self, error: &TangleError, node: Option<NodeId>) {
        self.add(error.to_string(), node);
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporting_accumulates_and_clears() {
        let mut reporting = ErrorReporting::default();
        assert!(reporting.is_empty());
        reporting.add("first", None);
        reporting.add_error(&TangleError::CycleDetected, Some(NodeId(3)));
        assert_eq!(reporting.errors().len(), 2);
        assert_eq!(reporting.errors()[1].node, Some(NodeId(3)));
        reporting.clear();
        assert!(reporting.is_empty());
    }
}
