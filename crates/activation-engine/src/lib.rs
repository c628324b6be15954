//! Activation Engine - Activation propagation for node-graph editors
//!
//! This crate decides which nodes of a dataflow graph are "active" and keeps
//! that answer consistent as the graph changes. It supports:
//!
//! - A precomputed traversal index, rebuilt only when the structure changes
//! - Per-kind activation rules, resolved once per node from a kind catalog
//! - One state machine per node, driven through a fixed transition table
//! - Depth-first, cycle-safe propagation with no-op short-circuiting
//! - Per-tick batching of activation patches to an external store
//!
//! # Architecture
//!
//! - `GraphIndex`: forward/reverse adjacency plus depth-ordered closures
//! - `ActivationRules`: pure decisions from node data and input activity
//! - `StateMachineLayer`: exclusive owner of every node's state
//! - `PropagationOrchestrator`: serializes transitions and fans them out
//! - `BatchedSink` / `FrameDriver`: coalesce patches and flush once per tick
//!
//! # Example
//!
//! ```ignore
//! use activation_engine::{GraphNode, Connection, PropagationOrchestrator};
//!
//! let mut engine = PropagationOrchestrator::with_defaults();
//! engine.rebuild(
//!     vec![GraphNode::new("in", "text-input"), GraphNode::new("out", "text-display")],
//!     vec![Connection::new("in", "text", "out", "input")],
//! );
//! engine.update_node_data("in", patch);
//! engine.flush();
//! ```

pub mod catalog;
pub mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod graph_index;
pub mod kinds;
pub mod observer;
pub mod orchestrator;
pub mod rules;
pub mod sink;
pub mod state_machine;
pub mod types;

// Re-export key types
pub use catalog::{HandleRole, KindCatalog, KindInfo, NodeCategory, PolicyKind};
pub use config::EngineConfig;
pub use driver::{FrameDriver, SharedOrchestrator};
pub use error::{ActivationError, Result};
pub use graph_index::{BuildOutcome, GraphIndex, IndexSnapshot};
pub use observer::{ErrorHandler, LogErrorHandler, NullObserver, Observer, ObserverError};
pub use orchestrator::{PropagationOrchestrator, PropagationStats};
pub use rules::{ActivationRules, NodeLookup};
pub use sink::{ActivationPatch, BatchedSink, PatchBatch, StateStore};
pub use state_machine::{
    ActivationState, NodeStateMachine, StateMachineLayer, TransitionEvent, TransitionRecord,
};
pub use types::{Connection, ConnectionId, GraphNode, NodeData, NodeId, PortId};
