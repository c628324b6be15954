//! Error types for the activation engine

use thiserror::Error;

use crate::types::NodeId;

/// Result type alias using ActivationError
pub type Result<T> = std::result::Result<T, ActivationError>;

/// Errors that can occur in the activation engine
///
/// Propagation never returns these to its caller; they are routed to the
/// injected [`ErrorHandler`](crate::observer::ErrorHandler).
#[derive(Debug, Error)]
pub enum ActivationError {
    /// The node snapshot contains the same ID twice
    #[error("Duplicate node ID in snapshot: {0}")]
    DuplicateNode(NodeId),

    /// An operation targeted a node that is not in the graph
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// A well-known data field holds a value of the wrong type
    #[error("Invalid field '{field}' on node '{node_id}': expected {expected}")]
    InvalidField {
        node_id: NodeId,
        field: String,
        expected: String,
    },

    /// The visual feedback observer failed
    #[error("Observer failed for node '{node_id}': {message}")]
    Observer { node_id: NodeId, message: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ActivationError {
    /// Create an invalid field error
    pub fn invalid_field(
        node_id: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            node_id: node_id.into(),
            field: field.into(),
            expected: expected.into(),
        }
    }

    /// The node this error is attributed to, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::InvalidField { node_id, .. } | Self::Observer { node_id, .. } => Some(node_id),
            Self::DuplicateNode(id) | Self::UnknownNode(id) => Some(id),
            Self::Config(_) | Self::Serialization(_) => None,
        }
    }
}
