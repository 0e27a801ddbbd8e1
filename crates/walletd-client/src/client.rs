//! Client façades.
//!
//! [`WalletClient`] is the async client; it runs on whatever runtime awaits it
//! and uses that context's session. [`BlockingClient`] wraps it and routes
//! every call through a [`Bridge`].

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tracing::{error, info};
use walletd_core::config::Config;
use walletd_core::spec::SpecDocument;
use walletd_core::types::{Params, UpdateBatch};

use crate::bridge::Bridge;
use crate::delivery::DeliveryHandle;
use crate::error::Result;
use crate::events::{Handler, HandlerRegistry};
use crate::poll::PollDelivery;
use crate::pool::ConnectionPool;
use crate::spec_cache::SpecCache;
use crate::stream::{StreamOptions, WebsocketConnector, WebsocketDelivery};
use crate::transport::{RemoteMethod, RpcTransport};
use crate::webhook::{self, WebhookServer, DEFAULT_WEBHOOK_URL};

/// Async client for the wallet daemon.
#[derive(Clone)]
pub struct WalletClient {
    config: Arc<Config>,
    pool: Arc<ConnectionPool>,
    spec: Arc<SpecCache>,
    transport: Arc<RpcTransport>,
    registry: HandlerRegistry,
}

impl WalletClient {
    pub fn new(config: Config) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::new(&config)?);
        let spec = Arc::new(SpecCache::new(&config, pool.clone())?);
        let transport = Arc::new(RpcTransport::new(&config, pool.clone(), spec.clone())?);
        info!(url = %config.url, wallet = config.xpub.is_some(), "created wallet client");
        Ok(Self {
            config: Arc::new(config),
            pool,
            spec,
            transport,
            registry: HandlerRegistry::new(),
        })
    }

    /// Client configured from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::new(Config::from_file(path)?)
    }

    /// Client configured from `WALLETD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env()?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn transport(&self) -> &Arc<RpcTransport> {
        &self.transport
    }

    /// Call a remote procedure by name.
    pub async fn invoke(&self, method: &str, params: Params) -> Result<Value> {
        self.transport.invoke(method, params).await
    }

    /// A reusable handle for one remote procedure.
    pub fn method(&self, name: impl Into<String>) -> RemoteMethod {
        self.transport.method(name)
    }

    /// The daemon's spec document (fetched on first use).
    pub async fn spec(&self) -> Arc<SpecDocument> {
        self.spec.get_spec().await
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Register `handler` for `event`, replacing any previous one.
    pub fn add_event_handler(&self, event: impl Into<String>, handler: Handler) {
        self.registry.add(event, handler);
    }

    /// Register one handler for several events.
    pub fn on<I, S>(&self, events: I, handler: Handler)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry.on(events, handler);
    }

    /// A websocket delivery loop feeding this client's handlers.
    ///
    /// Options without a reconnect policy use the one from the config.
    pub fn websocket(&self, mut options: StreamOptions) -> Result<WebsocketDelivery> {
        options.reconnect.get_or_insert(self.config.reconnect);
        let connector = WebsocketConnector::new(&self.config)?;
        Ok(WebsocketDelivery::new(connector, self.registry.clone(), options))
    }

    /// Run the websocket delivery loop.
    pub async fn start_websocket(&self, options: StreamOptions) -> Result<()> {
        self.websocket(options)?.run().await
    }

    /// Update batches from a single websocket connection.
    pub async fn update_stream(&self) -> Result<BoxStream<'static, UpdateBatch>> {
        WebsocketConnector::new(&self.config)?.updates().await
    }

    /// A polling delivery loop using the configured interval.
    pub fn poller(&self) -> PollDelivery {
        PollDelivery::new(
            self.transport.clone(),
            self.registry.clone(),
            self.config.poll_interval(),
        )
    }

    /// Subscribe and poll `get_updates` until shut down.
    pub async fn poll_updates(&self) -> Result<()> {
        self.poller().run().await
    }

    /// Subscribe the daemon to the registered events and, with
    /// `autoconfigure`, point its notifications at the default webhook URL.
    pub async fn configure_webhook(&self, autoconfigure: bool) -> Result<()> {
        webhook::configure_webhook(&self.transport, &self.registry, autoconfigure, DEFAULT_WEBHOOK_URL)
            .await
    }

    /// Router serving this client's handlers at `POST /`.
    pub fn webhook_router(&self) -> Router {
        webhook::webhook_router(self.registry.clone())
    }

    /// Webhook listener bound to `addr`.
    pub async fn webhook_server(&self, addr: SocketAddr) -> Result<WebhookServer> {
        WebhookServer::bind(addr, self.registry.clone()).await
    }

    /// Close every session. Returns how many were open.
    pub fn close(&self) -> usize {
        self.pool.close_all()
    }
}

impl std::fmt::Debug for WalletClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletClient")
            .field("url", &self.config.url)
            .field("handlers", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Blocking client: every call runs on the bridge's main runtime.
pub struct BlockingClient {
    client: WalletClient,
    bridge: Bridge,
}

impl BlockingClient {
    /// Client with its own main runtime; the calling thread is the main thread.
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self::with_bridge(WalletClient::new(config)?, Bridge::new()?))
    }

    pub fn with_bridge(client: WalletClient, bridge: Bridge) -> Self {
        Self { client, bridge }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::new(Config::from_file(path)?)
    }

    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env()?)
    }

    /// The async client underneath.
    pub fn async_client(&self) -> &WalletClient {
        &self.client
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn config(&self) -> &Config {
        self.client.config()
    }

    /// Call a remote procedure by name.
    pub fn invoke(&self, method: &str, params: Params) -> Result<Value> {
        let client = self.client.clone();
        let method = method.to_string();
        self.bridge
            .block_on(async move { client.invoke(&method, params).await })?
    }

    /// Call a remote procedure through a [`RemoteMethod`] handle.
    pub fn call(&self, method: &RemoteMethod, params: Params) -> Result<Value> {
        let method = method.clone();
        self.bridge.block_on(async move { method.call(params).await })?
    }

    pub fn method(&self, name: impl Into<String>) -> RemoteMethod {
        self.client.method(name)
    }

    /// The daemon's spec document (fetched on first use).
    pub fn spec(&self) -> Result<Arc<SpecDocument>> {
        let client = self.client.clone();
        self.bridge.block_on(async move { client.spec().await })
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        self.client.handlers()
    }

    pub fn add_event_handler(&self, event: impl Into<String>, handler: Handler) {
        self.client.add_event_handler(event, handler);
    }

    pub fn on<I, S>(&self, events: I, handler: Handler)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client.on(events, handler);
    }

    pub fn websocket(&self, options: StreamOptions) -> Result<WebsocketDelivery> {
        self.client.websocket(options)
    }

    /// Run the websocket delivery loop, blocking until it ends.
    pub fn start_websocket(&self, options: StreamOptions) -> Result<()> {
        self.run_websocket(self.websocket(options)?)
    }

    /// Run a prepared websocket loop, blocking until it ends.
    pub fn run_websocket(&self, delivery: WebsocketDelivery) -> Result<()> {
        self.bridge.block_on(delivery.run())?
    }

    /// Run the websocket loop in the background on the main runtime.
    pub fn spawn_websocket(&self, options: StreamOptions) -> Result<DeliveryHandle> {
        let delivery = self.websocket(options)?;
        let handle = delivery.handle();
        self.bridge.spawn(async move {
            if let Err(e) = delivery.run().await {
                error!(error = %e, "websocket delivery stopped");
            }
        });
        Ok(handle)
    }

    /// Collect up to `limit` update batches from one websocket connection.
    pub fn collect_updates(&self, limit: usize) -> Result<Vec<UpdateBatch>> {
        let client = self.client.clone();
        let stream = self
            .bridge
            .block_on(async move { client.update_stream().await })??;
        self.bridge.collect(stream.take(limit))
    }

    pub fn poller(&self) -> PollDelivery {
        self.client.poller()
    }

    /// Subscribe and poll until shut down, blocking the caller.
    pub fn poll_updates(&self) -> Result<()> {
        self.run_poller(self.poller())
    }

    pub fn run_poller(&self, poller: PollDelivery) -> Result<()> {
        self.bridge.block_on(poller.run())?
    }

    pub fn configure_webhook(&self, autoconfigure: bool) -> Result<()> {
        let client = self.client.clone();
        self.bridge
            .block_on(async move { client.configure_webhook(autoconfigure).await })?
    }

    /// Close every session. Returns how many were open.
    pub fn close(&self) -> usize {
        self.client.close()
    }
}

impl std::fmt::Debug for BlockingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient")
            .field("client", &self.client)
            .field("bridge", &self.bridge)
            .finish()
    }
}
