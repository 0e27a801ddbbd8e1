//! # walletd
//!
//! Blocking and async client for a wallet daemon's JSON-RPC interface.
//!
//! ```no_run
//! use walletd::{BlockingClient, Config, Params};
//!
//! let client = BlockingClient::new(Config::default())?;
//! let balance = client.invoke("getbalance", Params::new())?;
//! println!("{balance}");
//! # Ok::<(), walletd::ClientError>(())
//! ```

pub use walletd_client::{
    BlockingClient, Bridge, ClientError, ContextKey, DeliveryHandle, DeliveryState, Handler,
    HandlerError, HandlerRegistry, PollDelivery, RemoteMethod, StreamOptions, WalletClient,
    WebhookServer,
};
pub use walletd_core::amount;
pub use walletd_core::{Config, ConfigError, Event, Params, ReconnectPolicy, RequestError, UpdateBatch};

/// Returns the library version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
