//! Async channel bridge between Tokio runtime and the hotplug worker thread
//!
//! The worker owns the USB context and dispatches into the inventory from a
//! plain OS thread. The Tokio side only ever talks to it through this bridge:
//! commands go down, worker events come back up.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use inventory::{DeviceKey, DispatchOutcome, EventKind};

/// Capacity of both bridge directions
pub const BRIDGE_CAPACITY: usize = 256;

/// Commands from Tokio runtime to the worker thread
#[derive(Debug)]
pub enum WorkerCommand {
    /// Report queue depths back to the caller
    Status {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<WorkerStatus>,
    },

    /// Unregister from the event source and exit the worker loop
    Shutdown,
}

/// Worker progress as seen from inside the worker thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatus {
    /// Event loop iterations since start
    pub ticks: u64,
    /// Hotplug notices taken off the notice queue
    pub notices: u64,
    /// Events waiting for a busy inventory lock
    pub pending_deferred: usize,
}

/// Events from the worker thread
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Registration succeeded; `devices` were present at startup
    Ready { devices: usize },

    /// Registration failed and the worker exited
    Failed { reason: String },

    /// One notification went through the dispatcher
    Dispatched {
        kind: EventKind,
        /// `None` when the notification did not identify a device
        key: Option<DeviceKey>,
        outcome: DispatchOutcome,
    },

    /// Worker loop exited
    Stopped,
}

/// Handle for Tokio runtime (async)
#[derive(Debug, Clone)]
pub struct WorkerBridge {
    cmd_tx: Sender<WorkerCommand>,
    event_rx: Receiver<WorkerEvent>,
}

impl WorkerBridge {
    /// Send a command to the worker thread
    pub async fn send_command(&self, cmd: WorkerCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command from a synchronous context
    pub fn send_command_blocking(&self, cmd: WorkerCommand) -> crate::Result<()> {
        self.cmd_tx
            .send_blocking(cmd)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Ask the worker for its current status
    pub async fn status(&self) -> crate::Result<WorkerStatus> {
        let (response, rx) = tokio::sync::oneshot::channel();
        self.send_command(WorkerCommand::Status { response }).await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the worker thread
    pub async fn recv_event(&self) -> crate::Result<WorkerEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from a synchronous context
    pub fn recv_event_blocking(&self) -> crate::Result<WorkerEvent> {
        self.event_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Whether the worker side has gone away
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Handle for the worker thread (blocking)
#[derive(Debug)]
pub struct WorkerEndpoint {
    cmd_rx: Receiver<WorkerCommand>,
    event_tx: Sender<WorkerEvent>,
}

impl WorkerEndpoint {
    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<WorkerCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Publish an event without blocking
    ///
    /// Returns false when the event was discarded because nobody is
    /// listening or the Tokio side is not keeping up. The worker must never
    /// stall on its observers.
    pub fn publish(&self, event: WorkerEvent) -> bool {
        match self.event_tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Publish a startup event that must not be lost
    ///
    /// Waits for room in the queue. Use [`publish`](Self::publish) once
    /// nothing guarantees the bridge is being drained.
    pub fn send_event(&self, event: WorkerEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and the worker thread
///
/// Returns (WorkerBridge for Tokio, WorkerEndpoint for the worker)
pub fn create_worker_bridge() -> (WorkerBridge, WorkerEndpoint) {
    let (cmd_tx, cmd_rx) = bounded(BRIDGE_CAPACITY);
    let (event_tx, event_rx) = bounded(BRIDGE_CAPACITY);

    (
        WorkerBridge { cmd_tx, event_rx },
        WorkerEndpoint { cmd_rx, event_tx },
    )
}
