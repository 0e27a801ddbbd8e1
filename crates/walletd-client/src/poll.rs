//! Polling event delivery.
//!
//! Subscribes to the registered events, then pulls `get_updates` at a fixed
//! interval. A failed pull is logged and retried after the same interval.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};
use walletd_core::types::{Params, UpdateBatch};

use crate::delivery::{stopped, DeliveryControl, DeliveryHandle, DeliveryState};
use crate::error::Result;
use crate::events::HandlerRegistry;
use crate::transport::RpcTransport;

/// Polling delivery loop.
pub struct PollDelivery {
    transport: Arc<RpcTransport>,
    registry: HandlerRegistry,
    interval: Duration,
    control: Arc<DeliveryControl>,
}

impl PollDelivery {
    pub fn new(transport: Arc<RpcTransport>, registry: HandlerRegistry, interval: Duration) -> Self {
        Self {
            transport,
            registry,
            interval,
            control: DeliveryControl::new(),
        }
    }

    pub fn handle(&self) -> DeliveryHandle {
        DeliveryHandle::new(self.control.clone())
    }

    /// Subscribe, then poll until shutdown.
    ///
    /// Only the initial `subscribe` call can fail the loop.
    pub async fn run(self) -> Result<()> {
        let result = self.run_loop().await;
        self.control.set(DeliveryState::Closed);
        result
    }

    async fn run_loop(&self) -> Result<()> {
        let mut shutdown = self.control.shutdown_receiver();
        self.control.set(DeliveryState::Connecting);

        let events = self.registry.events();
        info!(?events, "subscribing to daemon events");
        self.transport
            .invoke("subscribe", Params::new().arg(&events))
            .await?;
        self.control.set(DeliveryState::Streaming);

        loop {
            let pulled = tokio::select! {
                result = self.transport.invoke("get_updates", Params::new()) => result,
                _ = stopped(&mut shutdown) => return Ok(()),
            };
            match pulled {
                Ok(Value::Array(records)) => {
                    let delivered = self
                        .registry
                        .dispatch_batch(UpdateBatch::from_records(records))
                        .await;
                    debug!(delivered, "dispatched polled updates");
                }
                Ok(Value::Null) => {}
                Ok(other) => warn!(reply = %other, "unexpected get_updates reply"),
                Err(e) => error!(error = %e, "get_updates failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stopped(&mut shutdown) => return Ok(()),
            }
        }
    }
}
