//! Command handle for the firing loop.
//!
//! The scheduler facade talks to its firing loop only through this handle:
//! a wake signal when the set of triggers changes, and a halt command that
//! is acknowledged once the loop has stopped dispatching.

use tokio::sync::{mpsc, oneshot};

use super::types::{LoopCommand, SchedulerError};

/// Buffer size for the command channel between the facade and the firing loop.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle for sending commands to the firing loop.
#[derive(Clone)]
pub(crate) struct LoopHandle {
    command_tx: mpsc::Sender<LoopCommand>,
}

impl LoopHandle {
    /// Create a handle and the receiver the firing loop consumes.
    pub(crate) fn channel() -> (Self, mpsc::Receiver<LoopCommand>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        (Self { command_tx }, command_rx)
    }

    /// Ask the loop to re-check what is due.
    ///
    /// Never blocks. A full channel already holds a pending wake, and a
    /// closed one means the loop is gone, so both are ignored.
    pub(crate) fn wake(&self) {
        let _ = self.command_tx.try_send(LoopCommand::Wake);
    }

    /// Stop the loop and wait until it has acknowledged.
    pub(crate) async fn halt(&self) -> Result<(), SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(LoopCommand::Halt {
                response: response_tx,
            })
            .await
            .map_err(|_| SchedulerError::ChannelError("failed to send halt command".into()))?;

        response_rx
            .await
            .map_err(|_| SchedulerError::ChannelError("failed to receive halt response".into()))
    }
}
