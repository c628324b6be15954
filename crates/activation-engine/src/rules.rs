//! Activation rules: per-kind decisions on whether a node should be active
//!
//! Everything here is a pure function of the node's policy, its data, its
//! incoming connections and the state of its direct input nodes. Identical
//! inputs always give identical answers; nothing depends on call order.
//!
//! Two entry points mirror the two shapes a node can have:
//!
//! - [`ActivationRules::determine_head_state`] for nodes with no
//!   non-metadata inputs, decided from their own data alone
//! - [`ActivationRules::determine_downstream_state`] for everything else,
//!   decided from input activity, trigger gating and the policy

use std::sync::Arc;

use serde_json::Value;

use crate::catalog::{HandleRole, KindCatalog, PolicyKind};
use crate::config::EngineConfig;
use crate::error::{ActivationError, Result};
use crate::types::{Connection, GraphNode, NodeData};

/// Well-known data fields read by the rules
pub mod fields {
    /// Trigger flag
    pub const TRIGGERED: &str = "triggered";
    /// Oscillator power flag
    pub const IS_ON: &str = "isOn";
    /// Oscillator phase (boolean or number)
    pub const PHASE: &str = "phase";
    /// Oscillator pulse flag
    pub const PULSING: &str = "pulsing";
    /// Manual activation flag
    pub const MANUAL_ACTIVATION: &str = "manualActivation";
    /// Successfully parsed structured value
    pub const PARSED_DATA: &str = "parsedData";
    /// Structured parse error message
    pub const PARSE_ERROR: &str = "parseError";

    /// Fields holding a node's own output
    pub const OUTPUT_FIELDS: &[&str] = &["text", "value", "output", "heldText"];

    /// Fields a display node may show
    pub const DISPLAY_FIELDS: &[&str] = &[
        "text",
        "value",
        "output",
        "heldText",
        "displayValue",
        "content",
    ];
}

/// Read access to other nodes during rule evaluation
pub trait NodeLookup {
    /// Data of a node, if it exists
    fn node_data(&self, node_id: &str) -> Option<&NodeData>;

    /// Whether a node is currently in an active-equivalent state
    fn is_active(&self, node_id: &str) -> bool;
}

/// Whether a value counts as "meaningful"
///
/// Null, the empty string and empty collections are not; everything else
/// (including `false` and `0`) is.
pub fn is_meaningful(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Bool(_)) | Some(Value::Number(_)) => true,
    }
}

/// Whether any of the node's output fields holds a meaningful value
pub fn has_meaningful_output(data: &NodeData) -> bool {
    fields::OUTPUT_FIELDS
        .iter()
        .any(|f| is_meaningful(data.get(*f)))
}

/// Read a boolean flag; absent and null read as `false`
fn flag(node_id: &str, data: &NodeData, field: &str) -> Result<bool> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ActivationError::invalid_field(node_id, field, "boolean")),
    }
}

/// Read the oscillator phase; numbers are truthy when non-zero
fn phase(node_id: &str, data: &NodeData) -> Result<bool> {
    match data.get(fields::PHASE) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        Some(_) => Err(ActivationError::invalid_field(
            node_id,
            fields::PHASE,
            "boolean or number",
        )),
    }
}

/// Pure activation decision functions
#[derive(Debug, Clone)]
pub struct ActivationRules {
    catalog: Arc<KindCatalog>,
    trigger_port: String,
    metadata_ports: Vec<String>,
}

impl ActivationRules {
    /// Create rules over an injected kind catalog
    pub fn new(catalog: Arc<KindCatalog>, config: &EngineConfig) -> Self {
        Self {
            catalog,
            trigger_port: config.trigger_port.clone(),
            metadata_ports: config.metadata_ports.clone(),
        }
    }

    /// The injected kind catalog
    pub fn catalog(&self) -> &KindCatalog {
        &self.catalog
    }

    /// Resolve the policy for a kind
    pub fn resolve_policy(&self, kind: &str) -> PolicyKind {
        self.catalog.resolve_policy(kind)
    }

    /// Role of an input port on a node of the given kind
    ///
    /// A role declared in the catalog wins; otherwise the configured port
    /// names decide, and anything unrecognised carries data.
    pub fn port_role(&self, kind: &str, port: &str) -> HandleRole {
        if let Some(role) = self.catalog.handle_role(kind, port) {
            return role;
        }
        if port == self.trigger_port {
            HandleRole::Trigger
        } else if self.metadata_ports.iter().any(|p| p == port) {
            HandleRole::Metadata
        } else {
            HandleRole::Data
        }
    }

    /// Whether any incoming connection counts as an activation input
    pub fn has_data_inputs(&self, kind: &str, incoming: &[Connection]) -> bool {
        incoming
            .iter()
            .any(|c| self.port_role(kind, &c.target_handle) != HandleRole::Metadata)
    }

    /// Decide the desired state of a node, choosing the head or downstream rule
    pub fn evaluate(
        &self,
        node: &GraphNode,
        policy: PolicyKind,
        incoming: &[Connection],
        lookup: &dyn NodeLookup,
    ) -> Result<bool> {
        if self.has_data_inputs(&node.kind, incoming) {
            self.determine_downstream_state(node, policy, incoming, lookup)
        } else {
            self.determine_head_state(node, policy)
        }
    }

    /// Desired state of a node without non-metadata inputs
    pub fn determine_head_state(&self, node: &GraphNode, policy: PolicyKind) -> Result<bool> {
        let id = node.id.as_str();
        let data = &node.data;

        match policy {
            PolicyKind::Trigger => flag(id, data, fields::TRIGGERED),
            PolicyKind::Oscillator => {
                if !flag(id, data, fields::IS_ON)? {
                    return Ok(false);
                }
                Ok(flag(id, data, fields::TRIGGERED)?
                    || phase(id, data)?
                    || flag(id, data, fields::PULSING)?)
            }
            PolicyKind::Manual => flag(id, data, fields::MANUAL_ACTIVATION),
            PolicyKind::StructuredTest => Ok(is_meaningful(data.get(fields::PARSED_DATA))
                && !is_meaningful(data.get(fields::PARSE_ERROR))),
            PolicyKind::Transform | PolicyKind::Display | PolicyKind::Generic => {
                match data.get(fields::MANUAL_ACTIVATION) {
                    Some(v) if !v.is_null() => flag(id, data, fields::MANUAL_ACTIVATION),
                    _ => Ok(has_meaningful_output(data)),
                }
            }
        }
    }

    /// Desired state of a node with at least one non-metadata input
    pub fn determine_downstream_state(
        &self,
        node: &GraphNode,
        policy: PolicyKind,
        incoming: &[Connection],
        lookup: &dyn NodeLookup,
    ) -> Result<bool> {
        let mut has_active_input = false;
        let mut has_trigger = false;
        let mut trigger_active = false;

        for conn in incoming {
            let role = self.port_role(&node.kind, &conn.target_handle);
            if role == HandleRole::Metadata {
                continue;
            }

            let source_active = lookup.is_active(&conn.source);
            if role == HandleRole::Trigger {
                has_trigger = true;
                trigger_active |= source_active;
            }
            if !has_active_input {
                has_active_input = source_active
                    || lookup
                        .node_data(&conn.source)
                        .is_some_and(has_meaningful_output);
            }
        }

        if !has_active_input {
            return Ok(false);
        }

        let trigger_allows = !has_trigger || trigger_active;
        if !trigger_allows {
            return Ok(false);
        }

        match policy {
            PolicyKind::Transform => Ok(has_meaningful_output(&node.data)),
            PolicyKind::Display => Ok(fields::DISPLAY_FIELDS
                .iter()
                .any(|f| is_meaningful(node.data.get(*f)))),
            _ => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use serde_json::json;

    use super::*;
    use crate::catalog::{KindInfo, NodeCategory};

    #[derive(Default)]
    struct MapLookup {
        data: HashMap<String, NodeData>,
        active: HashSet<String>,
    }

    impl MapLookup {
        fn with(mut self, id: &str, data: Value, active: bool) -> Self {
            let node = GraphNode::new(id, "relay").with_data(data);
            self.data.insert(id.to_string(), node.data);
            if active {
                self.active.insert(id.to_string());
            }
            self
        }
    }

    impl NodeLookup for MapLookup {
        fn node_data(&self, node_id: &str) -> Option<&NodeData> {
            self.data.get(node_id)
        }

        fn is_active(&self, node_id: &str) -> bool {
            self.active.contains(node_id)
        }
    }

    fn rules() -> ActivationRules {
        ActivationRules::new(Arc::new(KindCatalog::builtin()), &EngineConfig::default())
    }

    fn node(id: &str, kind: &str, data: Value) -> GraphNode {
        GraphNode::new(id, kind).with_data(data)
    }

    fn head(kind: &str, data: Value) -> Result<bool> {
        let rules = rules();
        let policy = rules.resolve_policy(kind);
        rules.determine_head_state(&node("n", kind, data), policy)
    }

    #[test]
    fn test_meaningful_values() {
        assert!(!is_meaningful(None));
        assert!(!is_meaningful(Some(&Value::Null)));
        assert!(!is_meaningful(Some(&json!(""))));
        assert!(!is_meaningful(Some(&json!([]))));
        assert!(!is_meaningful(Some(&json!({}))));
        assert!(is_meaningful(Some(&json!(0))));
        assert!(is_meaningful(Some(&json!(false))));
        assert!(is_meaningful(Some(&json!(" "))));
        assert!(is_meaningful(Some(&json!({"k": null}))));
    }

    #[test]
    fn test_trigger_head_active_when_triggered() {
        assert!(head("trigger", json!({"triggered": true})).unwrap());
        assert!(!head("trigger", json!({"triggered": false})).unwrap());
        assert!(!head("trigger", json!({})).unwrap());
    }

    #[test]
    fn test_oscillator_head() {
        assert!(!head("cycle", json!({"isOn": false, "pulsing": true})).unwrap());
        assert!(!head("cycle", json!({"isOn": true})).unwrap());
        assert!(head("cycle", json!({"isOn": true, "pulsing": true})).unwrap());
        assert!(head("cycle", json!({"isOn": true, "phase": 0.25})).unwrap());
        assert!(!head("cycle", json!({"isOn": true, "phase": 0})).unwrap());
        assert!(head("cycle", json!({"isOn": true, "triggered": true})).unwrap());
    }

    #[test]
    fn test_manual_head() {
        assert!(head("button", json!({"manualActivation": true})).unwrap());
        assert!(!head("button", json!({"text": "ignored"})).unwrap());
        // Generic nodes honour the flag when present
        assert!(!head("text-input", json!({"manualActivation": false, "text": "hi"})).unwrap());
        assert!(head("text-input", json!({"manualActivation": null, "text": "hi"})).unwrap());
    }

    #[test]
    fn test_structured_test_head() {
        assert!(head("json-test", json!({"parsedData": {"a": 1}})).unwrap());
        assert!(!head("json-test", json!({"parsedData": {"a": 1}, "parseError": "bad"})).unwrap());
        assert!(!head("json-test", json!({"parseError": ""})).unwrap());
        assert!(head("json-test", json!({"parsedData": [1], "parseError": ""})).unwrap());
    }

    #[test]
    fn test_default_head_uses_output_fields() {
        assert!(head("text-input", json!({"text": "hello"})).unwrap());
        assert!(head("text-input", json!({"heldText": "held"})).unwrap());
        assert!(head("text-input", json!({"value": 0})).unwrap());
        assert!(!head("text-input", json!({"text": ""})).unwrap());
        assert!(!head("text-input", json!({"label": "not output"})).unwrap());
    }

    #[test]
    fn test_invalid_flag_type() {
        let result = head("trigger", json!({"triggered": "yes"}));
        assert!(matches!(
            result,
            Err(ActivationError::InvalidField { ref field, .. }) if field == "triggered"
        ));
        assert!(head("cycle", json!({"isOn": true, "phase": "up"})).is_err());
    }

    #[test]
    fn test_inactive_input_keeps_node_inactive() {
        let rules = rules();
        let a = node("a", "relay", json!({"text": "own data"}));
        let incoming = vec![Connection::new("b", "out", "a", "input")];
        let lookup = MapLookup::default().with("b", json!({}), false);

        assert!(!rules
            .evaluate(&a, PolicyKind::Generic, &incoming, &lookup)
            .unwrap());
    }

    #[test]
    fn test_input_with_meaningful_output_counts_as_active() {
        let rules = rules();
        let a = node("a", "relay", json!({}));
        let incoming = vec![Connection::new("b", "out", "a", "input")];
        let lookup = MapLookup::default().with("b", json!({"output": "x"}), false);

        assert!(rules
            .evaluate(&a, PolicyKind::Generic, &incoming, &lookup)
            .unwrap());
    }

    #[test]
    fn test_inactive_trigger_source_blocks_activation() {
        let rules = rules();
        let a = node("a", "relay", json!({}));
        let incoming = vec![
            Connection::new("b", "out", "a", "input"),
            Connection::new("c", "out", "a", "trigger"),
        ];
        let blocked = MapLookup::default()
            .with("b", json!({"text": "hi"}), true)
            .with("c", json!({}), false);
        assert!(!rules
            .evaluate(&a, PolicyKind::Generic, &incoming, &blocked)
            .unwrap());

        let allowed = MapLookup::default()
            .with("b", json!({"text": "hi"}), true)
            .with("c", json!({"triggered": true}), true);
        assert!(rules
            .evaluate(&a, PolicyKind::Generic, &incoming, &allowed)
            .unwrap());
    }

    #[test]
    fn test_metadata_only_inputs_fall_back_to_head_rule() {
        let rules = rules();
        let a = node("a", "text-input", json!({"text": "hi"}));
        let incoming = vec![Connection::new("b", "out", "a", "metadata")];
        let lookup = MapLookup::default().with("b", json!({}), false);

        assert!(!rules.has_data_inputs("text-input", &incoming));
        assert!(rules
            .evaluate(&a, PolicyKind::Generic, &incoming, &lookup)
            .unwrap());
    }

    #[test]
    fn test_transform_requires_own_output() {
        let rules = rules();
        let incoming = vec![Connection::new("b", "out", "t", "input")];
        let lookup = MapLookup::default().with("b", json!({"text": "in"}), true);

        let empty = node("t", "text-transform", json!({"output": ""}));
        assert!(!rules
            .evaluate(&empty, PolicyKind::Transform, &incoming, &lookup)
            .unwrap());

        let produced = node("t", "text-transform", json!({"output": "IN"}));
        assert!(rules
            .evaluate(&produced, PolicyKind::Transform, &incoming, &lookup)
            .unwrap());
    }

    #[test]
    fn test_display_requires_displayed_value() {
        let rules = rules();
        let incoming = vec![Connection::new("b", "out", "d", "input")];
        let lookup = MapLookup::default().with("b", json!({"text": "in"}), true);

        for blank in [json!({}), json!({"displayValue": ""}), json!({"content": {}}), json!({"value": []})] {
            let d = node("d", "text-display", blank.clone());
            assert!(
                !rules.evaluate(&d, PolicyKind::Display, &incoming, &lookup).unwrap(),
                "expected inactive for {}",
                blank
            );
        }

        let shown = node("d", "text-display", json!({"displayValue": "shown"}));
        assert!(rules
            .evaluate(&shown, PolicyKind::Display, &incoming, &lookup)
            .unwrap());
    }

    #[test]
    fn test_declared_trigger_role_beats_port_name() {
        let mut catalog = KindCatalog::new();
        catalog.register(
            KindInfo::new("gate", NodeCategory::Utility)
                .with_handle("fire", crate::catalog::HandleRole::Trigger),
        );
        let rules = ActivationRules::new(Arc::new(catalog), &EngineConfig::default());

        assert_eq!(rules.port_role("gate", "fire"), HandleRole::Trigger);
        assert_eq!(rules.port_role("gate", "trigger"), HandleRole::Trigger);
        assert_eq!(rules.port_role("other", "fire"), HandleRole::Data);
        assert_eq!(rules.port_role("other", "meta"), HandleRole::Metadata);

        let g = node("g", "gate", json!({}));
        let incoming = vec![
            Connection::new("src", "out", "g", "in"),
            Connection::new("clock", "out", "g", "fire"),
        ];
        let lookup = MapLookup::default()
            .with("src", json!({"text": "x"}), true)
            .with("clock", json!({}), false);
        assert!(!rules
            .evaluate(&g, PolicyKind::Generic, &incoming, &lookup)
            .unwrap());
    }

    #[test]
    fn test_determinism() {
        let rules = rules();
        let a = node("a", "relay", json!({}));
        let incoming = vec![
            Connection::new("c", "out", "a", "trigger"),
            Connection::new("b", "out", "a", "input"),
        ];
        let lookup = MapLookup::default()
            .with("b", json!({"text": "hi"}), true)
            .with("c", json!({}), true);

        let first = rules.evaluate(&a, PolicyKind::Generic, &incoming, &lookup).unwrap();
        for _ in 0..10 {
            assert_eq!(
                rules.evaluate(&a, PolicyKind::Generic, &incoming, &lookup).unwrap(),
                first
            );
        }
    }
}
