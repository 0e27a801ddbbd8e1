//! State and shutdown plumbing shared by the delivery loops.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// Lifecycle of a delivery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Idle,
    Connecting,
    Streaming,
    ReconnectWait,
    Closed,
}

pub(crate) struct DeliveryControl {
    state: watch::Sender<DeliveryState>,
    shutdown: watch::Sender<bool>,
}

impl DeliveryControl {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: watch::Sender::new(DeliveryState::Idle),
            shutdown: watch::Sender::new(false),
        })
    }

    pub(crate) fn set(&self, state: DeliveryState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "delivery state changed");
        }
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Resolves once shutdown has been requested.
pub(crate) async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Observes and stops a running delivery loop.
#[derive(Clone)]
pub struct DeliveryHandle {
    control: Arc<DeliveryControl>,
}

impl DeliveryHandle {
    pub(crate) fn new(control: Arc<DeliveryControl>) -> Self {
        Self { control }
    }

    pub fn state(&self) -> DeliveryState {
        *self.control.state.borrow()
    }

    /// A receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<DeliveryState> {
        self.control.state.subscribe()
    }

    /// Wait until the loop reaches `state`.
    pub async fn wait_for(&self, state: DeliveryState) {
        let mut rx = self.watch();
        let _ = rx.wait_for(|s| *s == state).await;
    }

    /// Ask the loop to stop; it settles in [`DeliveryState::Closed`].
    pub fn shutdown(&self) {
        self.control.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        self.control.shutdown_requested()
    }
}

impl std::fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("state", &self.state())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
