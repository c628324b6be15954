//! Per-node activation state machines
//!
//! Every node owns one [`NodeStateMachine`], held exclusively by the
//! [`StateMachineLayer`]. The transition table in [`next_state`] is the
//! envelope of reachable states; the orchestrator decides *which* event to
//! apply by consulting the activation rules.

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Activation state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationState {
    /// Initial state
    #[default]
    Inactive,
    /// Waiting to become active
    PendingActivation,
    /// Active
    Active,
    /// Winding down; still counts as active downstream
    PendingDeactivation,
}

impl ActivationState {
    /// Whether downstream nodes should treat this state as active
    pub fn is_active_equivalent(self) -> bool {
        matches!(self, Self::Active | Self::PendingDeactivation)
    }

    /// Upper-case state name as shown to observers
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::PendingActivation => "PENDING_ACTIVATION",
            Self::Active => "ACTIVE",
            Self::PendingDeactivation => "PENDING_DEACTIVATION",
        }
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event driving a state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionEvent {
    /// Operator switched the node on
    ButtonActivate,
    /// Operator switched the node off
    ButtonDeactivate,
    /// An input became active, or the node's data changed
    InputActivated,
    /// An input became inactive
    InputDeactivated,
    /// Recovery / cascade reset
    ForceDeactivate,
}

impl TransitionEvent {
    /// Operator events bypass rule evaluation
    pub fn is_operator(self) -> bool {
        matches!(
            self,
            Self::ButtonActivate | Self::ButtonDeactivate | Self::ForceDeactivate
        )
    }
}

/// Transition table
///
/// Returns `None` where the event has no effect in the given state.
pub fn next_state(from: ActivationState, event: TransitionEvent) -> Option<ActivationState> {
    use ActivationState::*;
    use TransitionEvent::*;

    match (from, event) {
        (Inactive, ButtonActivate) | (Inactive, InputActivated) => Some(Active),

        (PendingActivation, ButtonActivate) | (PendingActivation, InputActivated) => Some(Active),
        (PendingActivation, ButtonDeactivate) | (PendingActivation, ForceDeactivate) => {
            Some(Inactive)
        }

        (Active, ButtonDeactivate) | (Active, ForceDeactivate) => Some(Inactive),
        (Active, InputDeactivated) => Some(PendingDeactivation),

        (PendingDeactivation, ButtonActivate) | (PendingDeactivation, InputActivated) => {
            Some(Active)
        }
        (PendingDeactivation, ButtonDeactivate) | (PendingDeactivation, ForceDeactivate) => {
            Some(Inactive)
        }

        _ => None,
    }
}

/// Metadata about the most recent applied transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    /// State before the transition
    pub from: ActivationState,
    /// State after the transition
    pub to: ActivationState,
    /// Event that caused it
    pub event: TransitionEvent,
    /// Upstream node that caused it, if any
    pub source: Option<NodeId>,
}

/// State machine for a single node
#[derive(Debug, Clone)]
pub struct NodeStateMachine {
    id: NodeId,
    state: ActivationState,
    active_inputs: HashSet<NodeId>,
    last_transition: Option<TransitionRecord>,
    transition_timestamp: Option<SystemTime>,
}

impl NodeStateMachine {
    /// Create a machine in the given starting state
    pub fn new(id: impl Into<String>, initial: ActivationState) -> Self {
        Self {
            id: id.into(),
            state: initial,
            active_inputs: HashSet::new(),
            last_transition: None,
            transition_timestamp: None,
        }
    }

    /// Node ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state
    pub fn state(&self) -> ActivationState {
        self.state
    }

    /// Upstream nodes currently asserting activation
    pub fn active_inputs(&self) -> &HashSet<NodeId> {
        &self.active_inputs
    }

    /// Most recent applied transition
    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.last_transition.as_ref()
    }

    /// When the most recent transition was applied
    pub fn transition_timestamp(&self) -> Option<SystemTime> {
        self.transition_timestamp
    }

    /// Record an input event from an upstream node
    ///
    /// Set semantics: repeated events from the same source are not counted
    /// twice.
    pub(crate) fn record_input(&mut self, source: &str, event: TransitionEvent) {
        match event {
            TransitionEvent::InputActivated => {
                self.active_inputs.insert(source.to_string());
            }
            TransitionEvent::InputDeactivated => {
                self.active_inputs.remove(source);
            }
            _ => {}
        }
    }

    /// Forget an input that left the graph
    pub(crate) fn forget_input(&mut self, source: &str) {
        self.active_inputs.remove(source);
    }

    /// Replace the active input set after a structural rebuild
    pub(crate) fn set_active_inputs(&mut self, inputs: HashSet<NodeId>) {
        self.active_inputs = inputs;
    }

    /// Set the starting state computed when the node enters the graph
    ///
    /// Not a transition: nothing is recorded.
    pub(crate) fn set_initial(&mut self, state: ActivationState) {
        self.state = state;
    }

    /// Apply an event through the transition table
    ///
    /// Returns the record when the state actually changed; no-op events
    /// leave the machine untouched.
    pub(crate) fn apply(
        &mut self,
        event: TransitionEvent,
        source: Option<&str>,
    ) -> Option<TransitionRecord> {
        let to = next_state(self.state, event)?;
        if to == self.state {
            return None;
        }

        let record = TransitionRecord {
            from: self.state,
            to,
            event,
            source: source.map(str::to_string),
        };
        self.state = to;
        self.last_transition = Some(record.clone());
        self.transition_timestamp = Some(SystemTime::now());
        Some(record)
    }

    /// Force the machine to `Inactive` regardless of the table
    ///
    /// Used only for error recovery.
    pub(crate) fn reset(&mut self) -> Option<TransitionRecord> {
        if self.state == ActivationState::Inactive {
            return None;
        }
        let record = TransitionRecord {
            from: self.state,
            to: ActivationState::Inactive,
            event: TransitionEvent::ForceDeactivate,
            source: None,
        };
        self.state = ActivationState::Inactive;
        self.active_inputs.clear();
        self.last_transition = Some(record.clone());
        self.transition_timestamp = Some(SystemTime::now());
        Some(record)
    }
}

/// Exclusive owner of every node's state machine
#[derive(Debug, Default)]
pub struct StateMachineLayer {
    machines: HashMap<NodeId, NodeStateMachine>,
}

impl StateMachineLayer {
    /// Create an empty layer
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of a machine
    pub fn get(&self, node_id: &str) -> Option<&NodeStateMachine> {
        self.machines.get(node_id)
    }

    /// Current state of a node
    pub fn state(&self, node_id: &str) -> Option<ActivationState> {
        self.machines.get(node_id).map(|m| m.state())
    }

    /// Whether a node is in an active-equivalent state
    pub fn is_active(&self, node_id: &str) -> bool {
        self.state(node_id)
            .is_some_and(ActivationState::is_active_equivalent)
    }

    /// Whether a machine exists for the node
    pub fn contains(&self, node_id: &str) -> bool {
        self.machines.contains_key(node_id)
    }

    /// Number of machines
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    /// Whether the layer holds no machines
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// IDs of every node in an active-equivalent state, sorted
    pub fn active_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .machines
            .values()
            .filter(|m| m.state().is_active_equivalent())
            .map(|m| m.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub(crate) fn get_mut(&mut self, node_id: &str) -> Option<&mut NodeStateMachine> {
        self.machines.get_mut(node_id)
    }

    pub(crate) fn insert(&mut self, machine: NodeStateMachine) {
        self.machines.insert(machine.id().to_string(), machine);
    }

    /// Drop machines whose nodes are no longer present
    ///
    /// Returns the removed IDs.
    pub(crate) fn retain_nodes(&mut self, keep: &HashSet<&str>) -> Vec<NodeId> {
        let removed: Vec<NodeId> = self
            .machines
            .keys()
            .filter(|id| !keep.contains(id.as_str()))
            .cloned()
            .collect();
        for id in &removed {
            self.machines.remove(id);
        }
        for machine in self.machines.values_mut() {
            for id in &removed {
                machine.forget_input(id);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ActivationState::*;
    use TransitionEvent::*;

    const STATES: [ActivationState; 4] = [Inactive, PendingActivation, Active, PendingDeactivation];
    const EVENTS: [TransitionEvent; 5] = [
        ButtonActivate,
        ButtonDeactivate,
        InputActivated,
        InputDeactivated,
        ForceDeactivate,
    ];

    #[test]
    fn test_transition_table() {
        let expected: [[Option<ActivationState>; 5]; 4] = [
            [Some(Active), None, Some(Active), None, None],
            [Some(Active), Some(Inactive), Some(Active), None, Some(Inactive)],
            [None, Some(Inactive), None, Some(PendingDeactivation), Some(Inactive)],
            [Some(Active), Some(Inactive), Some(Active), None, Some(Inactive)],
        ];

        for (row, from) in STATES.iter().enumerate() {
            for (col, event) in EVENTS.iter().enumerate() {
                assert_eq!(
                    next_state(*from, *event),
                    expected[row][col],
                    "{} on {:?}",
                    from,
                    event
                );
            }
        }
    }

    #[test]
    fn test_pending_activation_unreachable_from_inactive() {
        let mut reachable = HashSet::from([Inactive]);
        let mut frontier = vec![Inactive];
        while let Some(state) = frontier.pop() {
            for event in EVENTS {
                if let Some(next) = next_state(state, event) {
                    if reachable.insert(next) {
                        frontier.push(next);
                    }
                }
            }
        }
        assert!(reachable.contains(&Active));
        assert!(reachable.contains(&PendingDeactivation));
        assert!(!reachable.contains(&PendingActivation));
    }

    #[test]
    fn test_active_equivalence() {
        assert!(Active.is_active_equivalent());
        assert!(PendingDeactivation.is_active_equivalent());
        assert!(!Inactive.is_active_equivalent());
        assert!(!PendingActivation.is_active_equivalent());
    }

    #[test]
    fn test_apply_records_transition() {
        let mut machine = NodeStateMachine::new("n", Inactive);
        let record = machine.apply(InputActivated, Some("up")).unwrap();

        assert_eq!(record.from, Inactive);
        assert_eq!(record.to, Active);
        assert_eq!(record.source.as_deref(), Some("up"));
        assert_eq!(machine.state(), Active);
        assert!(machine.transition_timestamp().is_some());
        assert_eq!(machine.last_transition(), Some(&record));
    }

    #[test]
    fn test_apply_noop() {
        let mut machine = NodeStateMachine::new("n", Active);
        assert!(machine.apply(ButtonActivate, None).is_none());
        assert!(machine.apply(InputActivated, None).is_none());
        assert!(machine.last_transition().is_none());
        assert!(machine.transition_timestamp().is_none());
    }

    #[test]
    fn test_active_inputs_not_double_counted() {
        let mut machine = NodeStateMachine::new("n", Inactive);
        machine.record_input("a", InputActivated);
        machine.record_input("a", InputActivated);
        machine.record_input("b", InputActivated);
        assert_eq!(machine.active_inputs().len(), 2);

        machine.record_input("a", InputDeactivated);
        assert_eq!(machine.active_inputs().len(), 1);
        assert!(machine.active_inputs().contains("b"));
    }

    #[test]
    fn test_reset() {
        let mut machine = NodeStateMachine::new("n", PendingDeactivation);
        machine.record_input("a", InputActivated);
        let record = machine.reset().unwrap();
        assert_eq!(record.to, Inactive);
        assert!(machine.active_inputs().is_empty());
        assert!(machine.reset().is_none());
    }

    #[test]
    fn test_layer_retain_forgets_removed_inputs() {
        let mut layer = StateMachineLayer::new();
        let mut b = NodeStateMachine::new("b", Active);
        b.record_input("a", InputActivated);
        layer.insert(NodeStateMachine::new("a", Active));
        layer.insert(b);

        let removed = layer.retain_nodes(&HashSet::from(["b"]));
        assert_eq!(removed, vec!["a".to_string()]);
        assert!(!layer.contains("a"));
        assert!(layer.get("b").unwrap().active_inputs().is_empty());
        assert_eq!(layer.active_nodes(), vec!["b".to_string()]);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&PendingDeactivation).unwrap();
        assert_eq!(json, "\"PENDING_DEACTIVATION\"");
        let event: TransitionEvent = serde_json::from_str("\"FORCE_DEACTIVATE\"").unwrap();
        assert_eq!(event, ForceDeactivate);
    }
}
