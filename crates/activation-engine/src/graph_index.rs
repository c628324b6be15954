//! Precomputed traversal index over the node graph
//!
//! The index holds forward/reverse adjacency plus, for every node, its
//! depth-ordered downstream closure and its upstream closure. It is rebuilt
//! wholesale when the structural signature (node-id set + connection set)
//! changes and is never patched in place: each build produces a fresh
//! [`IndexSnapshot`] that replaces the previous one behind an `Arc`, so a
//! traversal holding a snapshot always sees a consistent graph.
//!
//! # Key Concepts
//!
//! - **Signature**: order-independent hash of node ids and connection keys;
//!   an identical signature makes `build` a no-op
//! - **Silent degrade**: connections whose endpoints are missing are left
//!   out of the adjacency maps rather than reported
//! - **Depth order**: `downstream(n)` is sorted by ascending DFS depth from `n`
//! - **Iterative DFS**: walks use an explicit stack, so path length is only
//!   bounded by the graph itself

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{ActivationError, Result};
use crate::types::{Connection, GraphNode, NodeId};

/// Per-node traversal data
#[derive(Debug, Clone, Default)]
pub struct IndexEntry {
    /// Every node reachable downstream, ascending by DFS depth
    pub downstream: Vec<NodeId>,
    /// Every node that can reach this one
    pub upstream: HashSet<NodeId>,
    /// DFS depth of each downstream node
    pub depth: HashMap<NodeId, usize>,
}

/// Immutable result of one index build
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    /// Node ids in snapshot order
    nodes: Vec<NodeId>,
    /// Direct targets per node, deduplicated, in connection order
    forward: HashMap<NodeId, Vec<NodeId>>,
    /// Direct sources per node, deduplicated, in connection order
    reverse: HashMap<NodeId, Vec<NodeId>>,
    /// Incoming connections per node
    incoming: HashMap<NodeId, Vec<Connection>>,
    /// Closure data per node
    entries: HashMap<NodeId, IndexEntry>,
}

impl IndexSnapshot {
    /// Node ids in the order they were supplied
    pub fn node_ids(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Whether the node is part of this snapshot
    pub fn contains(&self, node_id: &str) -> bool {
        self.entries.contains_key(node_id)
    }

    /// Full downstream closure, ascending by depth
    pub fn downstream(&self, node_id: &str) -> &[NodeId] {
        self.entries
            .get(node_id)
            .map(|e| e.downstream.as_slice())
            .unwrap_or(&[])
    }

    /// Full upstream closure
    pub fn upstream(&self, node_id: &str) -> Option<&HashSet<NodeId>> {
        self.entries.get(node_id).map(|e| &e.upstream)
    }

    /// DFS depth of `to` below `from`
    pub fn depth(&self, from: &str, to: &str) -> Option<usize> {
        self.entries.get(from)?.depth.get(to).copied()
    }

    /// Direct (one hop) downstream neighbours
    pub fn direct_downstream(&self, node_id: &str) -> &[NodeId] {
        self.forward
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Direct (one hop) upstream neighbours
    pub fn direct_upstream(&self, node_id: &str) -> &[NodeId] {
        self.reverse
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Connections whose target is this node
    pub fn incoming(&self, node_id: &str) -> &[Connection] {
        self.incoming
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Full entry for a node
    pub fn entry(&self, node_id: &str) -> Option<&IndexEntry> {
        self.entries.get(node_id)
    }
}

/// Result of a [`GraphIndex::build`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Signature matched the previous build; nothing was traversed
    Unchanged,
    /// A new snapshot was built and swapped in
    Rebuilt,
}

/// Traversal index with signature-based rebuild skipping
#[derive(Debug, Default)]
pub struct GraphIndex {
    current: Arc<IndexSnapshot>,
    signature: Option<u64>,
    /// DFS visits performed across all builds
    traversals: usize,
    /// Builds that produced a new snapshot
    rebuilds: usize,
}

impl GraphIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index if the structure changed
    ///
    /// On error the previous snapshot and signature stay in place.
    pub fn build(&mut self, nodes: &[GraphNode], connections: &[Connection]) -> Result<BuildOutcome> {
        let signature = structural_signature(nodes, connections)?;
        if self.signature == Some(signature) {
            log::trace!("Graph index signature unchanged, skipping rebuild");
            return Ok(BuildOutcome::Unchanged);
        }

        let mut visits = 0;
        let snapshot = build_snapshot(nodes, connections, &mut visits);
        self.traversals += visits;

        log::debug!(
            "Graph index rebuilt: {} nodes, {} connections, {} DFS visits",
            nodes.len(),
            connections.len(),
            visits
        );

        self.current = Arc::new(snapshot);
        self.signature = Some(signature);
        self.rebuilds += 1;
        Ok(BuildOutcome::Rebuilt)
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.current)
    }

    /// Full downstream closure of a node, ascending by depth
    pub fn downstream(&self, node_id: &str) -> &[NodeId] {
        self.current.downstream(node_id)
    }

    /// Full upstream closure of a node
    pub fn upstream(&self, node_id: &str) -> Option<&HashSet<NodeId>> {
        self.current.upstream(node_id)
    }

    /// Number of DFS visits performed so far
    pub fn traversal_count(&self) -> usize {
        self.traversals
    }

    /// Number of builds that produced a new snapshot
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }
}

/// Order-independent hash of the node-id set and connection set
fn structural_signature(nodes: &[GraphNode], connections: &[Connection]) -> Result<u64> {
    let mut ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    ids.sort_unstable();
    if let Some(dup) = ids.windows(2).find(|w| w[0] == w[1]) {
        return Err(ActivationError::DuplicateNode(dup[0].to_string()));
    }

    let mut keys: Vec<_> = connections.iter().map(|c| c.key()).collect();
    keys.sort_unstable();
    keys.dedup();

    let mut hasher = DefaultHasher::new();
    ids.hash(&mut hasher);
    keys.hash(&mut hasher);
    Ok(hasher.finish())
}

fn build_snapshot(
    nodes: &[GraphNode],
    connections: &[Connection],
    visits: &mut usize,
) -> IndexSnapshot {
    let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut snapshot = IndexSnapshot {
        nodes: nodes.iter().map(|n| n.id.clone()).collect(),
        ..Default::default()
    };

    let mut seen_keys = HashSet::new();
    for conn in connections {
        if !known.contains(conn.source.as_str()) || !known.contains(conn.target.as_str()) {
            log::debug!(
                "Dropping dangling connection '{}' ({} -> {})",
                conn.id,
                conn.source,
                conn.target
            );
            continue;
        }
        if !seen_keys.insert(conn.key()) {
            continue;
        }

        let targets = snapshot.forward.entry(conn.source.clone()).or_default();
        if !targets.contains(&conn.target) {
            targets.push(conn.target.clone());
        }
        let sources = snapshot.reverse.entry(conn.target.clone()).or_default();
        if !sources.contains(&conn.source) {
            sources.push(conn.source.clone());
        }
        snapshot
            .incoming
            .entry(conn.target.clone())
            .or_default()
            .push(conn.clone());
    }

    for node in nodes {
        let forward = walk(&snapshot.forward, &node.id, visits);
        let reverse = walk(&snapshot.reverse, &node.id, visits);

        let mut downstream = forward.order;
        // Stable sort keeps discovery order among equal depths
        downstream.sort_by_key(|id| forward.depth[id]);

        let mut depth = forward.depth;
        depth.remove(&node.id);

        let mut upstream: HashSet<NodeId> = reverse.depth.into_keys().collect();
        upstream.remove(&node.id);

        snapshot.entries.insert(
            node.id.clone(),
            IndexEntry {
                downstream,
                upstream,
                depth,
            },
        );
    }

    snapshot
}

/// Nodes reached by one DFS, excluding the root from `order`
struct Walk {
    order: Vec<NodeId>,
    depth: HashMap<NodeId, usize>,
}

/// Depth-first walk from `root`
///
/// Pops in the same order a recursive walk would visit: each node's
/// neighbours are pushed in reverse, and a node keeps the depth of the path
/// that reached it first.
fn walk(adjacency: &HashMap<NodeId, Vec<NodeId>>, root: &str, visits: &mut usize) -> Walk {
    let mut walk = Walk {
        order: Vec::new(),
        depth: HashMap::new(),
    };
    let mut stack: Vec<(&str, usize)> = vec![(root, 0)];

    while let Some((node, depth)) = stack.pop() {
        if walk.depth.contains_key(node) {
            continue;
        }
        *visits += 1;
        walk.depth.insert(node.to_string(), depth);
        if depth > 0 {
            walk.order.push(node.to_string());
        }
        if let Some(next) = adjacency.get(node) {
            stack.extend(next.iter().rev().map(|id| (id.as_str(), depth + 1)));
        }
    }
    walk
}
