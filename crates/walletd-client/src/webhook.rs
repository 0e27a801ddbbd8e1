//! Webhook event delivery.
//!
//! The daemon POSTs update batches to `/`; every request is answered with
//! `{}`, even when the body is not valid JSON.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, info};
use walletd_core::types::{Params, UpdateBatch};

use crate::delivery::{stopped, DeliveryControl, DeliveryHandle, DeliveryState};
use crate::error::{ClientError, Result};
use crate::events::HandlerRegistry;
use crate::transport::RpcTransport;

/// Port the daemon is pointed at by [`configure_webhook`].
pub const DEFAULT_WEBHOOK_PORT: u16 = 6000;
/// Notification URL registered with the daemon by [`configure_webhook`].
pub const DEFAULT_WEBHOOK_URL: &str = "http://localhost:6000";
/// Currency assumed when a webhook batch does not name one.
pub const DEFAULT_CURRENCY: &str = "BTC";

/// Router with the `POST /` webhook endpoint.
pub fn webhook_router(registry: HandlerRegistry) -> Router {
    Router::new()
        .route("/", post(handle_webhook))
        .with_state(registry)
}

async fn handle_webhook(State(registry): State<HandlerRegistry>, body: Bytes) -> Json<Value> {
    match serde_json::from_slice::<UpdateBatch>(&body) {
        Ok(mut batch) => {
            if batch.currency.is_none() {
                batch.currency = Some(DEFAULT_CURRENCY.to_string());
            }
            let delivered = registry.dispatch_batch(batch).await;
            debug!(delivered, "dispatched webhook batch");
        }
        Err(e) => debug!(error = %e, "ignoring malformed webhook body"),
    }
    Json(json!({}))
}

/// Subscribe the daemon to the registered events and, with `autoconfigure`,
/// point its notifications at `notification_url`.
pub async fn configure_webhook(
    transport: &RpcTransport,
    registry: &HandlerRegistry,
    autoconfigure: bool,
    notification_url: &str,
) -> Result<()> {
    transport
        .invoke("subscribe", Params::new().arg(registry.events()))
        .await?;
    if autoconfigure {
        transport
            .invoke("configure_notifications", Params::new().arg(notification_url))
            .await?;
    }
    Ok(())
}

/// Serves the webhook router until shut down.
pub struct WebhookServer {
    listener: TcpListener,
    registry: HandlerRegistry,
    control: Arc<DeliveryControl>,
}

impl WebhookServer {
    /// Bind to `addr`.
    pub async fn bind(addr: SocketAddr, registry: HandlerRegistry) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ClientError::Runtime(format!("cannot bind webhook listener on {addr}: {e}")))?;
        Ok(Self::from_listener(listener, registry))
    }

    pub fn from_listener(listener: TcpListener, registry: HandlerRegistry) -> Self {
        Self {
            listener,
            registry,
            control: DeliveryControl::new(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| ClientError::Runtime(e.to_string()))
    }

    pub fn handle(&self) -> DeliveryHandle {
        DeliveryHandle::new(self.control.clone())
    }

    /// Serve until [`DeliveryHandle::shutdown`] is called.
    pub async fn run(self) -> Result<()> {
        let mut shutdown = self.control.shutdown_receiver();
        let addr = self.local_addr()?;
        info!(%addr, "webhook listener started");
        self.control.set(DeliveryState::Streaming);

        let app = webhook_router(self.registry);
        let result = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { stopped(&mut shutdown).await })
            .await
            .map_err(|e| ClientError::Runtime(format!("webhook server failed: {e}")));

        self.control.set(DeliveryState::Closed);
        info!(%addr, "webhook listener stopped");
        result
    }
}
