//! Capabilities the engine reports through
//!
//! Two narrow interfaces connect the core to its surroundings:
//!
//! - [`Observer`] receives per-node state changes for visual feedback.
//!   Fire-and-forget: a failing observer is logged and reported, never
//!   allowed to abort propagation.
//! - [`ErrorHandler`] receives every contained error. The host decides
//!   whether to surface them.

use std::sync::Mutex;

use crate::error::ActivationError;
use crate::state_machine::ActivationState;
use crate::types::NodeId;

/// Error returned by an observer
#[derive(Debug, Clone)]
pub struct ObserverError {
    pub message: String,
}

impl std::fmt::Display for ObserverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Observer error: {}", self.message)
    }
}

impl std::error::Error for ObserverError {}

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Visual feedback capability
///
/// Implementations must not block; the engine calls them synchronously from
/// inside propagation.
pub trait Observer: Send + Sync {
    /// A node's state changed
    fn on_state_changed(&self, node_id: &str, state: ActivationState) -> Result<(), ObserverError>;

    /// Put a node back into its safe inactive representation
    ///
    /// Called after `on_state_changed` failed for that node.
    fn reset_visual(&self, node_id: &str) -> Result<(), ObserverError> {
        self.on_state_changed(node_id, ActivationState::Inactive)
    }
}

/// An observer that discards all notifications
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_state_changed(&self, _node_id: &str, _state: ActivationState) -> Result<(), ObserverError> {
        Ok(())
    }
}

/// An observer that collects notifications
///
/// Useful for testing to verify which states were shown.
pub struct VecObserver {
    changes: Mutex<Vec<(NodeId, ActivationState)>>,
}

impl VecObserver {
    pub fn new() -> Self {
        Self {
            changes: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected notifications
    pub fn changes(&self) -> Vec<(NodeId, ActivationState)> {
        self.changes.lock().unwrap().clone()
    }

    /// States shown for one node, in order
    pub fn states_for(&self, node_id: &str) -> Vec<ActivationState> {
        self.changes
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == node_id)
            .map(|(_, state)| *state)
            .collect()
    }

    /// Clear all collected notifications
    pub fn clear(&self) {
        self.changes.lock().unwrap().clear();
    }
}

impl Default for VecObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for VecObserver {
    fn on_state_changed(&self, node_id: &str, state: ActivationState) -> Result<(), ObserverError> {
        self.changes
            .lock()
            .unwrap()
            .push((node_id.to_string(), state));
        Ok(())
    }
}

/// Receiver for contained errors
pub trait ErrorHandler: Send + Sync {
    fn on_error(&self, error: &ActivationError);
}

/// Error handler that writes to the log
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn on_error(&self, error: &ActivationError) {
        log::error!("Activation engine error: {}", error);
    }
}

/// Error handler that collects error messages
///
/// Useful for testing which failures were reported.
pub struct VecErrorHandler {
    errors: Mutex<Vec<String>>,
}

impl VecErrorHandler {
    pub fn new() -> Self {
        Self {
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected error messages
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    /// Number of collected errors
    pub fn len(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    /// Whether no error was reported
    pub fn is_empty(&self) -> bool {
        self.errors.lock().unwrap().is_empty()
    }
}

impl Default for VecErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler for VecErrorHandler {
    fn on_error(&self, error: &ActivationError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingObserver;

    impl Observer for FailingObserver {
        fn on_state_changed(&self, node_id: &str, _state: ActivationState) -> Result<(), ObserverError> {
            Err(ObserverError::new(format!("cannot render {}", node_id)))
        }
    }

    #[test]
    fn test_vec_observer() {
        let observer = VecObserver::new();
        observer.on_state_changed("a", ActivationState::Active).unwrap();
        observer.on_state_changed("b", ActivationState::Active).unwrap();
        observer.reset_visual("a").unwrap();

        assert_eq!(observer.changes().len(), 3);
        assert_eq!(
            observer.states_for("a"),
            vec![ActivationState::Active, ActivationState::Inactive]
        );

        observer.clear();
        assert!(observer.changes().is_empty());
    }

    #[test]
    fn test_null_observer() {
        let observer = NullObserver;
        // Should not fail
        observer.on_state_changed("a", ActivationState::Active).unwrap();
        observer.reset_visual("a").unwrap();
    }

    #[test]
    fn test_default_reset_propagates_failure() {
        let err = FailingObserver.reset_visual("x").unwrap_err();
        assert_eq!(err.to_string(), "Observer error: cannot render x");
    }

    #[test]
    fn test_vec_error_handler() {
        let handler = VecErrorHandler::new();
        assert!(handler.is_empty());
        handler.on_error(&ActivationError::UnknownNode("ghost".to_string()));
        assert_eq!(handler.errors(), vec!["Unknown node: ghost".to_string()]);
    }
}
