//! # walletd-client
//!
//! Per-context connection pool, JSON-RPC transport, event delivery over
//! websocket, polling and webhook, and the bridge that lets blocking code
//! drive the async client.

pub mod bridge;
pub mod client;
pub mod context;
pub mod delivery;
mod dial;
pub mod error;
pub mod events;
pub mod poll;
pub mod pool;
pub mod spec_cache;
pub mod stream;
pub mod transport;
pub mod webhook;

pub use bridge::{Bridge, Interrupter};
pub use client::{BlockingClient, WalletClient};
pub use context::ContextKey;
pub use delivery::{DeliveryHandle, DeliveryState};
pub use error::{ClientError, Result};
pub use events::{Handler, HandlerError, HandlerRegistry};
pub use poll::PollDelivery;
pub use pool::{ConnectionPool, Session};
pub use spec_cache::SpecCache;
pub use stream::{StreamOptions, WebsocketConnector, WebsocketDelivery};
pub use transport::{RemoteMethod, RpcTransport};
pub use webhook::{configure_webhook, webhook_router, WebhookServer};
