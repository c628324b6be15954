//! Frame driver
//!
//! Calls [`PropagationOrchestrator::flush`] once per tick on a background
//! tokio task, so activation patches reach the store at most once per frame.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::PropagationOrchestrator;

/// Orchestrator shared between the host and the frame driver
pub type SharedOrchestrator = Arc<Mutex<PropagationOrchestrator>>;

/// Background task flushing the orchestrator on a fixed interval
pub struct FrameDriver {
    running: Arc<AtomicBool>,
    batches: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl FrameDriver {
    /// Start ticking; must be called from within a tokio runtime
    pub fn spawn(orchestrator: SharedOrchestrator, interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let batches = Arc::new(AtomicUsize::new(0));

        let task_running = running.clone();
        let task_batches = batches.clone();

        log::info!("Starting frame driver with {}ms interval", interval.as_millis());

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while task_running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !task_running.load(Ordering::SeqCst) {
                    break;
                }
                if orchestrator.lock().flush() > 0 {
                    task_batches.fetch_add(1, Ordering::SeqCst);
                }
            }

            log::info!("Frame driver stopped");
        });

        Self {
            running,
            batches,
            handle: Some(handle),
        }
    }

    /// Start ticking at the orchestrator's configured frame interval
    pub fn from_config(orchestrator: SharedOrchestrator) -> Self {
        let interval = orchestrator.lock().config().frame_interval();
        Self::spawn(orchestrator, interval)
    }

    /// Stop ticking after the current tick
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("Stopping frame driver");
        }
    }

    /// Stop and wait for the task to finish
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::warn!("Frame driver task ended abnormally: {}", e);
            }
        }
    }

    /// Whether the driver is still ticking
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Non-empty batches delivered so far
    pub fn batches_delivered(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

impl Drop for FrameDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
