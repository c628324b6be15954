//! Core types for activation graphs
//!
//! These are the snapshot types handed to the engine by the node/connection
//! source on every structural rebuild.

use serde::{Deserialize, Serialize};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for a connection
pub type ConnectionId = String;

/// Unique identifier for a port (handle)
pub type PortId = String;

/// The opaque data bag carried by every node
///
/// Owned by the surrounding node factory. The engine only reads a handful
/// of well-known fields from it (see [`crate::rules::fields`]).
pub type NodeData = serde_json::Map<String, serde_json::Value>;

/// A node instance in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Kind tag, resolved to an activation policy through the kind catalog
    pub kind: String,
    /// Node data
    #[serde(default)]
    pub data: NodeData,
}

impl GraphNode {
    /// Create a node with an empty data bag
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            data: NodeData::new(),
        }
    }

    /// Replace the node's data
    ///
    /// Non-object values are ignored, leaving the data bag empty.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = data {
            self.data = map;
        }
        self
    }
}

/// A directed connection between two ports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Identifier assigned by the editor (not part of the structural signature)
    #[serde(default)]
    pub id: ConnectionId,
    /// Source node ID
    pub source: NodeId,
    /// Target node ID
    pub target: NodeId,
    /// Source port ID
    pub source_handle: PortId,
    /// Target port ID
    pub target_handle: PortId,
}

impl Connection {
    /// Create a connection, deriving its ID from the endpoints
    pub fn new(
        source: impl Into<String>,
        source_handle: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        let source = source.into();
        let source_handle = source_handle.into();
        let target = target.into();
        let target_handle = target_handle.into();
        Self {
            id: format!("{}:{}->{}:{}", source, source_handle, target, target_handle),
            source,
            target,
            source_handle,
            target_handle,
        }
    }

    /// Structural key: everything except the editor-assigned ID
    pub fn key(&self) -> (&str, &str, &str, &str) {
        (
            &self.source,
            &self.target,
            &self.source_handle,
            &self.target_handle,
        )
    }
}
