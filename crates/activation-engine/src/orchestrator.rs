//! Propagation orchestrator
//!
//! Drives every state-machine transition in the graph. An event arrives for
//! a node (from the operator, from an upstream neighbour, or from a data
//! change); the orchestrator asks the activation rules what the node's state
//! should be, applies the transition if it differs, reports the change to the
//! observer and the batched sink, and re-evaluates the node's
//! direct downstream neighbours.
//!
//! # Key Concepts
//!
//! - **No-op short-circuit**: an event that does not change a node's state
//!   is dropped before any notification or fan-out. This is what makes
//!   propagation terminate on cyclic graphs.
//! - **Operator events** (`ButtonActivate`, `ButtonDeactivate`,
//!   `ForceDeactivate`) bypass the rules and go straight through the table.
//! - **Containment**: observer failures, rule failures and build failures are
//!   reported to the [`ErrorHandler`] and contained to the node or build that
//!   caused them.
//!
//! # Example
//!
//! ```ignore
//! let mut engine = PropagationOrchestrator::new(EngineConfig::default(), Arc::new(KindCatalog::builtin()))
//!     .with_observer(renderer)
//!     .with_store(store);
//!
//! engine.rebuild(nodes, connections);
//! engine.update_node_data("input-1", patch);
//! engine.flush(); // once per frame
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use crate::catalog::{KindCatalog, PolicyKind};
use crate::config::EngineConfig;
use crate::error::{ActivationError, Result};
use crate::graph_index::{BuildOutcome, GraphIndex, IndexSnapshot};
use crate::observer::{ErrorHandler, LogErrorHandler, NullObserver, Observer};
use crate::rules::{ActivationRules, NodeLookup};
use crate::sink::{BatchedSink, NullStateStore, StateStore};
use crate::state_machine::{
    ActivationState, NodeStateMachine, StateMachineLayer, TransitionEvent, TransitionRecord,
};
use crate::types::{Connection, GraphNode, NodeData, NodeId};

/// Counters describing the work the orchestrator has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationStats {
    /// Events delivered to a node, including no-ops
    pub events_processed: usize,
    /// State changes applied
    pub transitions_applied: usize,
    /// Events discarded because they changed nothing
    pub noop_events: usize,
    /// Errors reported to the handler
    pub errors: usize,
    /// Index builds that produced a new snapshot
    pub rebuilds: usize,
    /// Non-empty batches delivered to the store
    pub flushes: usize,
}

/// A node together with its once-resolved policy
#[derive(Debug, Clone)]
struct NodeRecord {
    node: GraphNode,
    policy: PolicyKind,
}

/// An event waiting to be delivered during propagation
#[derive(Debug)]
struct PendingEvent {
    target: NodeId,
    event: TransitionEvent,
    source: Option<NodeId>,
}

/// Read-only view handed to the rules
struct GraphView<'a> {
    nodes: &'a HashMap<NodeId, NodeRecord>,
    machines: &'a StateMachineLayer,
}

impl NodeLookup for GraphView<'_> {
    fn node_data(&self, node_id: &str) -> Option<&NodeData> {
        self.nodes.get(node_id).map(|r| &r.node.data)
    }

    fn is_active(&self, node_id: &str) -> bool {
        self.machines.is_active(node_id)
    }
}

/// Serializes transitions and fans them out through the graph
pub struct PropagationOrchestrator {
    config: EngineConfig,
    rules: ActivationRules,
    index: GraphIndex,
    nodes: HashMap<NodeId, NodeRecord>,
    /// Node IDs in snapshot order
    node_order: Vec<NodeId>,
    connections: Vec<Connection>,
    machines: StateMachineLayer,
    sink: BatchedSink,
    observer: Arc<dyn Observer>,
    store: Arc<dyn StateStore>,
    errors: Arc<dyn ErrorHandler>,
    stats: PropagationStats,
    /// Closure of an in-progress `force_deactivate`
    forced: HashSet<NodeId>,
}

impl PropagationOrchestrator {
    /// Create an orchestrator with null observer/store and a logging error handler
    pub fn new(config: EngineConfig, catalog: Arc<KindCatalog>) -> Self {
        let rules = ActivationRules::new(catalog, &config);
        let index = GraphIndex::new();
        Self {
            config,
            rules,
            index,
            nodes: HashMap::new(),
            node_order: Vec::new(),
            connections: Vec::new(),
            machines: StateMachineLayer::new(),
            sink: BatchedSink::new(),
            observer: Arc::new(NullObserver),
            store: Arc::new(NullStateStore),
            errors: Arc::new(LogErrorHandler),
            stats: PropagationStats::default(),
            forced: HashSet::new(),
        }
    }

    /// Create an orchestrator with default config and the built-in catalog
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default(), Arc::new(KindCatalog::builtin()))
    }

    /// Set the visual feedback observer
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Set the external state store
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    /// Set the error handler
    pub fn with_error_handler(mut self, errors: Arc<dyn ErrorHandler>) -> Self {
        self.errors = errors;
        self
    }

    // =========================================================================
    // Structure
    // =========================================================================

    /// Install a new node/connection snapshot
    ///
    /// Returns `None` if the index build failed; in that case the previous
    /// index, nodes and states are left untouched.
    pub fn rebuild(
        &mut self,
        nodes: Vec<GraphNode>,
        connections: Vec<Connection>,
    ) -> Option<BuildOutcome> {
        let outcome = match self.index.build(&nodes, &connections) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Graph rebuild rejected, keeping previous index: {}", e);
                self.report(e);
                return None;
            }
        };
        if outcome == BuildOutcome::Rebuilt {
            self.stats.rebuilds += 1;
        }

        self.connections = connections;
        self.node_order = nodes.iter().map(|n| n.id.clone()).collect();

        let mut previous = std::mem::take(&mut self.nodes);
        let mut fresh = Vec::new();
        let mut changed = Vec::new();
        for node in nodes {
            let id = node.id.clone();
            let record = match previous.remove(&id) {
                Some(prev) if prev.node.kind == node.kind => {
                    if prev.node.data != node.data {
                        changed.push(id.clone());
                    }
                    NodeRecord {
                        policy: prev.policy,
                        node,
                    }
                }
                Some(_) => {
                    changed.push(id.clone());
                    NodeRecord {
                        policy: self.rules.resolve_policy(&node.kind),
                        node,
                    }
                }
                None => {
                    fresh.push(id.clone());
                    NodeRecord {
                        policy: self.rules.resolve_policy(&node.kind),
                        node,
                    }
                }
            };
            self.nodes.insert(id, record);
        }

        let keep: HashSet<&str> = self.nodes.keys().map(|id| id.as_str()).collect();
        for id in self.machines.retain_nodes(&keep) {
            self.sink.discard(&id);
        }

        self.initialize_nodes(&fresh);

        let to_evaluate: Vec<NodeId> = match outcome {
            BuildOutcome::Rebuilt => {
                let fresh: HashSet<&NodeId> = fresh.iter().collect();
                evaluation_order(&self.index.snapshot())
                    .into_iter()
                    .filter(|id| !fresh.contains(id))
                    .collect()
            }
            BuildOutcome::Unchanged => changed,
        };
        for id in &to_evaluate {
            self.reevaluate(id);
        }

        self.sync_active_inputs();

        log::debug!(
            "Graph {:?}: {} nodes ({} new), {} connections, {} re-evaluated",
            outcome,
            self.nodes.len(),
            fresh.len(),
            self.connections.len(),
            to_evaluate.len()
        );
        Some(outcome)
    }

    /// Add a node and rebuild
    pub fn add_node(&mut self, node: GraphNode) -> Option<BuildOutcome> {
        let mut nodes = self.current_nodes();
        nodes.push(node);
        self.rebuild(nodes, self.connections.clone())
    }

    /// Remove a node and every connection touching it, then rebuild
    pub fn remove_node(&mut self, node_id: &str) -> Option<BuildOutcome> {
        if !self.nodes.contains_key(node_id) {
            self.report(ActivationError::UnknownNode(node_id.to_string()));
            return None;
        }
        let nodes = self
            .current_nodes()
            .into_iter()
            .filter(|n| n.id != node_id)
            .collect();
        let connections = self
            .connections
            .iter()
            .filter(|c| c.source != node_id && c.target != node_id)
            .cloned()
            .collect();
        self.rebuild(nodes, connections)
    }

    /// Add a connection and rebuild
    pub fn add_connection(&mut self, connection: Connection) -> Option<BuildOutcome> {
        let mut connections = self.connections.clone();
        connections.push(connection);
        self.rebuild(self.current_nodes(), connections)
    }

    /// Remove a connection by ID and rebuild
    ///
    /// Returns `false` if no connection had that ID.
    pub fn remove_connection(&mut self, connection_id: &str) -> bool {
        let before = self.connections.len();
        let connections: Vec<Connection> = self
            .connections
            .iter()
            .filter(|c| c.id != connection_id)
            .cloned()
            .collect();
        if connections.len() == before {
            return false;
        }
        self.rebuild(self.current_nodes(), connections).is_some()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Deliver an event to a node
    ///
    /// Returns `true` if the node's state actually changed. Propagation to
    /// downstream nodes completes before this returns.
    pub fn transition(
        &mut self,
        node_id: &str,
        event: TransitionEvent,
        source: Option<&str>,
    ) -> bool {
        let mut work = Vec::new();
        let changed = self.step(node_id, event, source, &mut work);
        self.drain(&mut work);
        changed
    }

    /// Operator switched a node on
    pub fn button_activate(&mut self, node_id: &str) -> bool {
        self.transition(node_id, TransitionEvent::ButtonActivate, None)
    }

    /// Operator switched a node off
    pub fn button_deactivate(&mut self, node_id: &str) -> bool {
        self.transition(node_id, TransitionEvent::ButtonDeactivate, None)
    }

    /// Force a node and everything downstream of it to `Inactive`
    ///
    /// The whole downstream closure is forced in depth order. No rule is
    /// re-run on a closure member during the walk, so a node whose input
    /// still holds output cannot switch back on. Returns the number of
    /// nodes whose state changed.
    pub fn force_deactivate(&mut self, node_id: &str) -> usize {
        if !self.machines.contains(node_id) {
            self.report(ActivationError::UnknownNode(node_id.to_string()));
            return 0;
        }

        let snapshot = self.index.snapshot();
        let closure: Vec<NodeId> = std::iter::once(node_id.to_string())
            .chain(snapshot.downstream(node_id).iter().cloned())
            .collect();
        self.forced = closure.iter().cloned().collect();

        let mut work = Vec::new();
        let mut changed = 0;
        for id in &closure {
            if self.step(id, TransitionEvent::ForceDeactivate, None, &mut work) {
                changed += 1;
            }
        }
        self.drain(&mut work);
        self.forced.clear();

        log::debug!(
            "Force-deactivated '{}': {} of {} nodes changed",
            node_id,
            changed,
            closure.len()
        );
        changed
    }

    /// Merge a patch into a node's data and re-evaluate it
    ///
    /// Returns `true` if the node's state changed.
    pub fn update_node_data(&mut self, node_id: &str, patch: NodeData) -> bool {
        let Some(record) = self.nodes.get_mut(node_id) else {
            self.report(ActivationError::UnknownNode(node_id.to_string()));
            return false;
        };
        record.node.data.extend(patch);
        self.reevaluate(node_id)
    }

    // =========================================================================
    // Tick boundary
    // =========================================================================

    /// Deliver the coalesced patches to the store
    ///
    /// Call once per tick. Returns the number of nodes in the batch.
    pub fn flush(&mut self) -> usize {
        let delivered = self.sink.flush(self.store.as_ref());
        if delivered > 0 {
            self.stats.flushes += 1;
        }
        delivered
    }

    /// Whether the next flush would deliver anything
    pub fn has_pending_patches(&self) -> bool {
        self.sink.has_pending()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current state of a node
    pub fn state(&self, node_id: &str) -> Option<ActivationState> {
        self.machines.state(node_id)
    }

    /// Whether a node is in an active-equivalent state
    pub fn is_active(&self, node_id: &str) -> bool {
        self.machines.is_active(node_id)
    }

    /// Upstream nodes currently asserting activation on a node
    pub fn active_inputs(&self, node_id: &str) -> Option<&HashSet<NodeId>> {
        self.machines.get(node_id).map(|m| m.active_inputs())
    }

    /// Most recent transition applied to a node
    pub fn last_transition(&self, node_id: &str) -> Option<&TransitionRecord> {
        self.machines.get(node_id).and_then(|m| m.last_transition())
    }

    /// IDs of all active-equivalent nodes, sorted
    pub fn active_nodes(&self) -> Vec<NodeId> {
        self.machines.active_nodes()
    }

    /// A node as currently known to the engine
    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.get(node_id).map(|r| &r.node)
    }

    /// Policy resolved for a node when it entered the graph
    pub fn policy(&self, node_id: &str) -> Option<PolicyKind> {
        self.nodes.get(node_id).map(|r| r.policy)
    }

    /// Number of nodes in the graph
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The traversal index
    pub fn index(&self) -> &GraphIndex {
        &self.index
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Work counters
    pub fn stats(&self) -> PropagationStats {
        self.stats
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Process queued events until propagation settles
    ///
    /// The queue is a stack, so events are handled in depth-first order.
    fn drain(&mut self, work: &mut Vec<PendingEvent>) {
        while let Some(next) = work.pop() {
            self.step(&next.target, next.event, next.source.as_deref(), work);
        }
    }

    /// Deliver one event to one node, queueing its fan-out
    fn step(
        &mut self,
        node_id: &str,
        event: TransitionEvent,
        source: Option<&str>,
        work: &mut Vec<PendingEvent>,
    ) -> bool {
        self.stats.events_processed += 1;

        let snapshot = self.index.snapshot();
        let Some(machine) = self.machines.get_mut(node_id) else {
            self.report(ActivationError::UnknownNode(node_id.to_string()));
            return false;
        };
        // Only direct upstream neighbours count as inputs
        if let Some(source) = source {
            if snapshot.direct_upstream(node_id).iter().any(|id| id == source) {
                machine.record_input(source, event);
            }
        }
        let from = machine.state();

        let records: Vec<TransitionRecord> = if event.is_operator() {
            machine.apply(event, source).into_iter().collect()
        } else {
            match self.desired_state(node_id, &snapshot) {
                Ok(desired) => self.settle(node_id, desired, source),
                Err(e) => {
                    log::error!(
                        "Rule evaluation failed for node '{}' (state {}, event {:?}): {}",
                        node_id,
                        from,
                        event,
                        e
                    );
                    self.report(e);
                    return self.recover(node_id, work);
                }
            }
        };

        let Some(last) = records.last() else {
            self.stats.noop_events += 1;
            log::trace!("No-op {:?} on '{}' ({})", event, node_id, from);
            return false;
        };
        let active = last.to.is_active_equivalent();

        self.stats.transitions_applied += records.len();
        for record in &records {
            log::trace!(
                "'{}': {} -> {} on {:?}",
                node_id,
                record.from,
                record.to,
                record.event
            );
            self.notify(node_id, record.to);
        }

        self.sink.push(node_id, active);
        self.fan_out(node_id, active, work);
        true
    }

    /// Apply the rule outcome to a node's machine
    ///
    /// Rule-driven deactivation passes through `PendingDeactivation` and
    /// settles to `Inactive` within the same call.
    fn settle(
        &mut self,
        node_id: &str,
        desired: bool,
        source: Option<&str>,
    ) -> Vec<TransitionRecord> {
        let Some(machine) = self.machines.get_mut(node_id) else {
            return Vec::new();
        };
        if desired == machine.state().is_active_equivalent() {
            return Vec::new();
        }

        if desired {
            machine
                .apply(TransitionEvent::InputActivated, source)
                .into_iter()
                .collect()
        } else {
            [
                TransitionEvent::InputDeactivated,
                TransitionEvent::ForceDeactivate,
            ]
            .into_iter()
            .filter_map(|event| machine.apply(event, source))
            .collect()
        }
    }

    /// Queue re-evaluation of the direct downstream neighbours of a node
    ///
    /// Neighbours are pushed in reverse so the first one is handled first.
    /// Nodes being force-deactivated are skipped.
    fn fan_out(&self, node_id: &str, active: bool, work: &mut Vec<PendingEvent>) {
        let event = if active {
            TransitionEvent::InputActivated
        } else {
            TransitionEvent::InputDeactivated
        };
        let snapshot = self.index.snapshot();
        work.extend(
            snapshot
                .direct_downstream(node_id)
                .iter()
                .rev()
                .filter(|target| !self.forced.contains(*target))
                .map(|target| PendingEvent {
                    target: target.clone(),
                    event,
                    source: Some(node_id.to_string()),
                }),
        );
    }

    /// Re-evaluate a node after its data changed
    ///
    /// When the node's own state holds, its neighbours are still
    /// re-evaluated since they read its output fields.
    fn reevaluate(&mut self, node_id: &str) -> bool {
        let mut work = Vec::new();
        let changed = self.step(node_id, TransitionEvent::InputActivated, None, &mut work);
        if !changed && self.machines.contains(node_id) {
            let active = self.machines.is_active(node_id);
            self.fan_out(node_id, active, &mut work);
        }
        self.drain(&mut work);
        changed
    }

    /// Reset a node to `Inactive` after a failure and queue the fan-out
    fn recover(&mut self, node_id: &str, work: &mut Vec<PendingEvent>) -> bool {
        let Some(record) = self.machines.get_mut(node_id).and_then(|m| m.reset()) else {
            return false;
        };
        log::warn!("Node '{}' reset from {} to INACTIVE", node_id, record.from);

        self.stats.transitions_applied += 1;
        self.notify(node_id, record.to);
        self.sink.push(node_id, false);
        self.fan_out(node_id, false, work);
        true
    }

    fn desired_state(&self, node_id: &str, snapshot: &IndexSnapshot) -> Result<bool> {
        let record = self
            .nodes
            .get(node_id)
            .ok_or_else(|| ActivationError::UnknownNode(node_id.to_string()))?;
        let view = GraphView {
            nodes: &self.nodes,
            machines: &self.machines,
        };
        self.rules
            .evaluate(&record.node, record.policy, snapshot.incoming(node_id), &view)
    }

    /// Create machines for nodes entering the graph
    ///
    /// Starting states come from the rules, iterated heads-first until
    /// nothing changes, so already-active data never shows an
    /// INACTIVE -> ACTIVE flash.
    fn initialize_nodes(&mut self, ids: &[NodeId]) {
        if ids.is_empty() {
            return;
        }
        for id in ids {
            self.machines
                .insert(NodeStateMachine::new(id.clone(), ActivationState::Inactive));
        }

        let snapshot = self.index.snapshot();
        let fresh: HashSet<&NodeId> = ids.iter().collect();
        let order: Vec<NodeId> = evaluation_order(&snapshot)
            .into_iter()
            .filter(|id| fresh.contains(id))
            .collect();

        let mut failed: HashSet<NodeId> = HashSet::new();
        for _ in 0..=order.len() {
            let mut changed = false;
            for id in &order {
                if failed.contains(id) || self.machines.is_active(id) {
                    continue;
                }
                match self.desired_state(id, &snapshot) {
                    Ok(true) => {
                        if let Some(machine) = self.machines.get_mut(id) {
                            machine.set_initial(ActivationState::Active);
                            changed = true;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.report(e);
                        failed.insert(id.clone());
                    }
                }
            }
            if !changed {
                break;
            }
        }

        for id in &order {
            let state = self.machines.state(id).unwrap_or_default();
            self.sink.push(id, state.is_active_equivalent());
            self.notify(id, state);
        }
    }

    /// Recompute every node's active input set from its direct upstream
    fn sync_active_inputs(&mut self) {
        let snapshot = self.index.snapshot();
        for id in &self.node_order {
            let inputs: HashSet<NodeId> = snapshot
                .direct_upstream(id)
                .iter()
                .filter(|source| self.machines.is_active(source))
                .cloned()
                .collect();
            if let Some(machine) = self.machines.get_mut(id) {
                machine.set_active_inputs(inputs);
            }
        }
    }

    fn notify(&mut self, node_id: &str, state: ActivationState) {
        if let Err(e) = self.observer.on_state_changed(node_id, state) {
            log::warn!("Observer failed for '{}' ({}): {}", node_id, state, e);
            self.report(ActivationError::Observer {
                node_id: node_id.to_string(),
                message: e.message,
            });
            if let Err(e) = self.observer.reset_visual(node_id) {
                log::warn!("Observer could not reset '{}': {}", node_id, e);
            }
        }
    }

    fn report(&mut self, error: ActivationError) {
        self.stats.errors += 1;
        self.errors.on_error(&error);
    }

    fn current_nodes(&self) -> Vec<GraphNode> {
        self.node_order
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|r| r.node.clone()))
            .collect()
    }
}

/// Heads first, then breadth order; nodes only reachable through cycles
/// are appended in snapshot order
fn evaluation_order(snapshot: &IndexSnapshot) -> Vec<NodeId> {
    let mut in_degree: HashMap<&str, usize> = snapshot
        .node_ids()
        .iter()
        .map(|id| (id.as_str(), snapshot.direct_upstream(id).len()))
        .collect();

    let mut queue: VecDeque<&str> = snapshot
        .node_ids()
        .iter()
        .map(|id| id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    let mut placed = HashSet::new();
    while let Some(id) = queue.pop_front() {
        if !placed.insert(id) {
            continue;
        }
        order.push(id.to_string());
        for target in snapshot.direct_downstream(id) {
            if let Some(deg) = in_degree.get_mut(target.as_str()) {
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    queue.push_back(target);
                }
            }
        }
    }

    for id in snapshot.node_ids() {
        if !placed.contains(id.as_str()) {
            order.push(id.clone());
        }
    }
    order
}
