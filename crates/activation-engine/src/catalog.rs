//! Kind catalog: read-only lookup from kind strings to activation metadata
//!
//! The catalog maps a node's raw `kind` tag to its category, its declared
//! input handles (with their roles) and an optional explicit activation
//! policy. It is injected into [`ActivationRules`](crate::rules::ActivationRules)
//! at construction time and never consulted through global state afterwards.
//!
//! Built-in kinds self-register at link time through `inventory`
//! (see [`crate::kinds`]); hosts add their own with [`KindCatalog::register`].
//!
//! # Usage
//!
//! ```ignore
//! let mut catalog = KindCatalog::builtin();
//! catalog.register(
//!     KindInfo::new("llm-output", NodeCategory::Output)
//!         .with_handle("prompt", HandleRole::Data)
//!         .with_handle("trigger", HandleRole::Trigger),
//! );
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Category of a node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// User-provided values (text, numbers, buttons)
    Input,
    /// Event sources that fire a trigger flag
    Trigger,
    /// Time-driven sources (oscillators, clocks)
    Generator,
    /// Nodes that derive an output from their inputs
    Transform,
    /// Display / sink nodes
    Output,
    /// Anything else
    Utility,
}

/// Role of an input handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleRole {
    /// Carries a value; counts as an activation input
    Data,
    /// Gates activation on the source being active
    Trigger,
    /// Carries configuration only; ignored for activation
    Metadata,
}

/// Activation policy a node kind is evaluated with
///
/// Resolved once per node when it enters the graph, never re-matched on
/// each evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Active iff its own `triggered` flag is set
    Trigger,
    /// Active iff switched on and currently triggered, phased or pulsing
    Oscillator,
    /// Active iff its manual activation flag is set
    Manual,
    /// Active iff it holds a parsed structured value without parse error
    StructuredTest,
    /// Requires an active input and a meaningful own output
    Transform,
    /// Requires an active input and a non-empty displayed value
    Display,
    /// Default: own output when headless, active inputs otherwise
    Generic,
}

impl PolicyKind {
    /// Map a raw kind string to a policy by naming convention
    ///
    /// Total: every string maps to some policy, `Generic` being the fallback.
    pub fn from_kind_name(kind: &str) -> Self {
        let kind = kind.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| kind.contains(n));

        if has(&["trigger"]) {
            Self::Trigger
        } else if has(&["cycle", "oscillator", "pulse", "clock"]) {
            Self::Oscillator
        } else if has(&["button", "toggle", "switch"]) {
            Self::Manual
        } else if has(&["json-test", "json-parse", "structured"]) {
            Self::StructuredTest
        } else if has(&["transform", "filter", "template", "convert", "format"]) {
            Self::Transform
        } else if has(&["display", "output", "preview", "viewer", "monitor"]) {
            Self::Display
        } else {
            Self::Generic
        }
    }

    /// Policy implied by a category, if the category pins one down
    pub fn from_category(category: NodeCategory) -> Option<Self> {
        match category {
            NodeCategory::Trigger => Some(Self::Trigger),
            NodeCategory::Generator => Some(Self::Oscillator),
            NodeCategory::Transform => Some(Self::Transform),
            NodeCategory::Output => Some(Self::Display),
            NodeCategory::Input | NodeCategory::Utility => None,
        }
    }
}

/// A declared input handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleSpec {
    /// Port identifier
    pub id: String,
    /// Role of the port
    pub role: HandleRole,
}

/// Metadata for a node kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindInfo {
    /// Kind identifier (e.g., "text-display")
    pub kind: String,
    /// Category for grouping and policy inference
    pub category: NodeCategory,
    /// Declared input handles
    #[serde(default)]
    pub handles: Vec<HandleSpec>,
    /// Explicit policy, overriding category and naming conventions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyKind>,
}

impl KindInfo {
    /// Create kind metadata with no declared handles
    pub fn new(kind: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            kind: kind.into(),
            category,
            handles: Vec::new(),
            policy: None,
        }
    }

    /// Declare an input handle
    pub fn with_handle(mut self, id: impl Into<String>, role: HandleRole) -> Self {
        self.handles.push(HandleSpec {
            id: id.into(),
            role,
        });
        self
    }

    /// Pin an explicit policy
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Role of a declared handle
    pub fn handle_role(&self, port: &str) -> Option<HandleRole> {
        self.handles.iter().find(|h| h.id == port).map(|h| h.role)
    }
}

/// Link-time registration entry for built-in kinds
pub struct KindDescriptorFn(pub fn() -> KindInfo);

inventory::collect!(KindDescriptorFn);

/// Read-only lookup of node kinds
#[derive(Debug, Clone, Default)]
pub struct KindCatalog {
    entries: HashMap<String, KindInfo>,
}

impl KindCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog holding every kind registered through `inventory`
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for descriptor in inventory::iter::<KindDescriptorFn> {
            catalog.register((descriptor.0)());
        }
        log::debug!("Kind catalog loaded {} built-in kinds", catalog.len());
        catalog
    }

    /// Register a kind, replacing any previous entry with the same name
    pub fn register(&mut self, info: KindInfo) {
        self.entries.insert(info.kind.clone(), info);
    }

    /// Get metadata for a kind
    pub fn get(&self, kind: &str) -> Option<&KindInfo> {
        self.entries.get(kind)
    }

    /// Check if a kind is registered
    pub fn has_kind(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// List all registered kind names
    pub fn kinds(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another catalog into this one
    ///
    /// Entries from `other` override entries in `self` with the same kind.
    pub fn merge(&mut self, other: KindCatalog) {
        self.entries.extend(other.entries);
    }

    /// Declared role of an input handle on a kind, if any
    pub fn handle_role(&self, kind: &str, port: &str) -> Option<HandleRole> {
        self.get(kind).and_then(|info| info.handle_role(port))
    }

    /// Resolve the activation policy for a kind
    ///
    /// Explicit catalog policy first, then the category, then the naming
    /// convention.
    pub fn resolve_policy(&self, kind: &str) -> PolicyKind {
        match self.get(kind) {
            Some(info) => info
                .policy
                .or_else(|| PolicyKind::from_category(info.category))
                .unwrap_or_else(|| PolicyKind::from_kind_name(kind)),
            None => PolicyKind::from_kind_name(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_name_patterns() {
        assert_eq!(PolicyKind::from_kind_name("manual-trigger"), PolicyKind::Trigger);
        assert_eq!(PolicyKind::from_kind_name("CycleNode"), PolicyKind::Oscillator);
        assert_eq!(PolicyKind::from_kind_name("push-button"), PolicyKind::Manual);
        assert_eq!(PolicyKind::from_kind_name("json-test"), PolicyKind::StructuredTest);
        assert_eq!(PolicyKind::from_kind_name("text-transform"), PolicyKind::Transform);
        assert_eq!(PolicyKind::from_kind_name("text-display"), PolicyKind::Display);
        assert_eq!(PolicyKind::from_kind_name("text-input"), PolicyKind::Generic);
        assert_eq!(PolicyKind::from_kind_name(""), PolicyKind::Generic);
    }

    #[test]
    fn test_resolution_order() {
        let mut catalog = KindCatalog::new();
        // Explicit policy beats the name
        catalog.register(
            KindInfo::new("display-trigger", NodeCategory::Utility)
                .with_policy(PolicyKind::Display),
        );
        // Category beats the name
        catalog.register(KindInfo::new("sink", NodeCategory::Output));
        // Input category falls through to the name
        catalog.register(KindInfo::new("toggle", NodeCategory::Input));

        assert_eq!(catalog.resolve_policy("display-trigger"), PolicyKind::Display);
        assert_eq!(catalog.resolve_policy("sink"), PolicyKind::Display);
        assert_eq!(catalog.resolve_policy("toggle"), PolicyKind::Manual);
        assert_eq!(catalog.resolve_policy("unregistered"), PolicyKind::Generic);
    }

    #[test]
    fn test_handle_roles() {
        let mut catalog = KindCatalog::new();
        catalog.register(
            KindInfo::new("gate", NodeCategory::Utility)
                .with_handle("in", HandleRole::Data)
                .with_handle("fire", HandleRole::Trigger),
        );

        assert_eq!(catalog.handle_role("gate", "fire"), Some(HandleRole::Trigger));
        assert_eq!(catalog.handle_role("gate", "in"), Some(HandleRole::Data));
        assert_eq!(catalog.handle_role("gate", "other"), None);
        assert_eq!(catalog.handle_role("missing", "in"), None);
    }

    #[test]
    fn test_merge_override() {
        let mut base = KindCatalog::new();
        base.register(KindInfo::new("node-a", NodeCategory::Input));

        let mut other = KindCatalog::new();
        other.register(KindInfo::new("node-a", NodeCategory::Output));
        other.register(KindInfo::new("node-b", NodeCategory::Input));

        base.merge(other);
        assert_eq!(base.len(), 2);
        assert_eq!(base.get("node-a").unwrap().category, NodeCategory::Output);
    }

    #[test]
    fn test_builtin_catalog_collects_descriptors() {
        let catalog = KindCatalog::builtin();
        assert!(catalog.has_kind("trigger"));
        assert!(catalog.has_kind("text-display"));
        assert_eq!(catalog.resolve_policy("cycle"), PolicyKind::Oscillator);
    }

    #[test]
    fn test_kind_info_serialization() {
        let info = KindInfo::new("text-display", NodeCategory::Output)
            .with_handle("trigger", HandleRole::Trigger);
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"category\":\"output\""));
        assert!(json.contains("\"role\":\"trigger\""));
        assert!(!json.contains("policy"));
    }
}
