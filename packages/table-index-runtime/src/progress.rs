//! Per-message worker context: liveness signalling and cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::queue::MessageQueue;

/// Context handed to the orchestrator for one message.
pub trait WorkerProgress: Send + Sync {
    /// Tells the transport the message is still being worked on.
    fn progress_made(&self);

    /// Returns true once the worker has been asked to stop.
    fn is_cancelled(&self) -> bool;
}

/// Context with no transport and no cancellation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl WorkerProgress for NoProgress {
    fn progress_made(&self) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Context for a message received from a [`MessageQueue`].
///
/// Progress extends the message's visibility; cancellation follows the
/// pool's shutdown channel.
pub struct MessageProgress {
    queue: Arc<dyn MessageQueue>,
    receipt_handle: String,
    visibility: Duration,
    shutdown: watch::Receiver<bool>,
}

impl MessageProgress {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        receipt_handle: String,
        visibility: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            receipt_handle,
            visibility,
            shutdown,
        }
    }
}

impl WorkerProgress for MessageProgress {
    fn progress_made(&self) {
        match self
            .queue
            .extend_visibility(&self.receipt_handle, self.visibility)
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                receipt = %self.receipt_handle,
                "Message visibility could not be extended; it may be redelivered"
            ),
            Err(e) => tracing::warn!(
                receipt = %self.receipt_handle,
                "Failed to extend message visibility: {}",
                e
            ),
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }
}
