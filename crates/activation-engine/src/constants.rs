//! Shared constants

/// Default configuration values
pub mod defaults {
    /// Port name that gates activation on a trigger source
    pub const TRIGGER_PORT: &str = "trigger";

    /// Port names whose connections never count as activation inputs
    pub const METADATA_PORTS: &[&str] = &["metadata", "meta"];

    /// Tick length used by the frame driver (~60 fps)
    pub const FRAME_INTERVAL_MS: u64 = 16;
}
