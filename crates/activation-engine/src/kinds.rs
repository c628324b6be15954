//! Built-in node kinds
//!
//! Each kind describes itself with a function returning its [`KindInfo`],
//! registered via `inventory` so [`KindCatalog::builtin`] discovers it
//! without a hand-maintained list.
//!
//! [`KindCatalog::builtin`]: crate::catalog::KindCatalog::builtin

use crate::catalog::{HandleRole, KindDescriptorFn, KindInfo, NodeCategory, PolicyKind};

/// Well-known port names used by the built-in kinds
pub mod ports {
    /// Generic value input
    pub const INPUT: &str = "input";
    /// Trigger gate input
    pub const TRIGGER: &str = "trigger";
    /// Configuration-only input
    pub const METADATA: &str = "metadata";
}

/// Fires when its `triggered` flag is set
pub fn trigger() -> KindInfo {
    KindInfo::new("trigger", NodeCategory::Trigger).with_policy(PolicyKind::Trigger)
}

inventory::submit!(KindDescriptorFn(trigger));

/// Oscillates while switched on
pub fn cycle() -> KindInfo {
    KindInfo::new("cycle", NodeCategory::Generator)
        .with_handle(ports::METADATA, HandleRole::Metadata)
        .with_policy(PolicyKind::Oscillator)
}

inventory::submit!(KindDescriptorFn(cycle));

/// Operator-controlled on/off switch
pub fn button() -> KindInfo {
    KindInfo::new("button", NodeCategory::Input).with_policy(PolicyKind::Manual)
}

inventory::submit!(KindDescriptorFn(button));

/// Parses structured text and reports whether parsing succeeded
pub fn json_test() -> KindInfo {
    KindInfo::new("json-test", NodeCategory::Utility)
        .with_handle(ports::INPUT, HandleRole::Data)
        .with_policy(PolicyKind::StructuredTest)
}

inventory::submit!(KindDescriptorFn(json_test));

/// Holds user-entered text
pub fn text_input() -> KindInfo {
    KindInfo::new("text-input", NodeCategory::Input)
        .with_handle(ports::METADATA, HandleRole::Metadata)
}

inventory::submit!(KindDescriptorFn(text_input));

/// Derives text from its input
pub fn text_transform() -> KindInfo {
    KindInfo::new("text-transform", NodeCategory::Transform)
        .with_handle(ports::INPUT, HandleRole::Data)
        .with_handle(ports::TRIGGER, HandleRole::Trigger)
        .with_handle(ports::METADATA, HandleRole::Metadata)
}

inventory::submit!(KindDescriptorFn(text_transform));

/// Shows the value it receives
pub fn text_display() -> KindInfo {
    KindInfo::new("text-display", NodeCategory::Output)
        .with_handle(ports::INPUT, HandleRole::Data)
        .with_handle(ports::TRIGGER, HandleRole::Trigger)
}

inventory::submit!(KindDescriptorFn(text_display));

/// Passes its inputs through once any of them is active
pub fn relay() -> KindInfo {
    KindInfo::new("relay", NodeCategory::Utility)
        .with_handle(ports::INPUT, HandleRole::Data)
        .with_handle(ports::TRIGGER, HandleRole::Trigger)
        .with_policy(PolicyKind::Generic)
}

inventory::submit!(KindDescriptorFn(relay));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_policies() {
        assert_eq!(trigger().policy, Some(PolicyKind::Trigger));
        assert_eq!(text_input().policy, None);
        assert_eq!(relay().handle_role(ports::TRIGGER), Some(HandleRole::Trigger));
        assert_eq!(cycle().handle_role(ports::METADATA), Some(HandleRole::Metadata));
    }
}
