//! Websocket event delivery.
//!
//! Connects to `<daemon>/ws`, registers the wallet with `{"xpub": ...}` and
//! feeds every update batch to the handler registry. On closure or error the
//! loop waits out the reconnect delay and connects again, unless
//! auto-reconnect is off.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::FutureExt;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;
use walletd_core::config::{Config, ProxyDescriptor, ReconnectPolicy};
use walletd_core::types::UpdateBatch;

use crate::dial::{dial, tls_connector};
use crate::delivery::{stopped, DeliveryControl, DeliveryHandle, DeliveryState};
use crate::error::{ClientError, Result};
use crate::events::HandlerRegistry;
use crate::pool::basic_auth;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Called after every successful (re)connection.
pub type ReconnectCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Websocket loop options.
#[derive(Clone)]
pub struct StreamOptions {
    /// Reconnect after the connection closes or fails.
    pub auto_reconnect: bool,
    /// Keep retrying even if the very first connection attempt fails.
    pub force_connect: bool,
    /// Delay between attempts. Unset means the client's configured policy,
    /// or [`ReconnectPolicy::default`] for a bare [`WebsocketDelivery`].
    pub reconnect: Option<ReconnectPolicy>,
    pub reconnect_callback: Option<ReconnectCallback>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            force_connect: false,
            reconnect: None,
            reconnect_callback: None,
        }
    }
}

impl StreamOptions {
    /// Options pinned to the reconnect policy from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconnect: Some(config.reconnect),
            ..Self::default()
        }
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn force_connect(mut self, enabled: bool) -> Self {
        self.force_connect = enabled;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Run `callback` after every successful (re)connection.
    pub fn on_reconnect<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.reconnect_callback = Some(Arc::new(move || callback().boxed()));
        self
    }
}

impl std::fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOptions")
            .field("auto_reconnect", &self.auto_reconnect)
            .field("force_connect", &self.force_connect)
            .field("reconnect", &self.reconnect)
            .field("reconnect_callback", &self.reconnect_callback.is_some())
            .finish()
    }
}

/// Opens websocket connections to the daemon.
#[derive(Clone)]
pub struct WebsocketConnector {
    url: Url,
    authorization: String,
    xpub: Option<String>,
    proxy: Option<ProxyDescriptor>,
    verify_tls: bool,
}

impl WebsocketConnector {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            url: config.websocket_url()?,
            authorization: basic_auth(&config.user, &config.password),
            xpub: config.xpub.clone(),
            proxy: config.proxy_descriptor()?,
            verify_tls: config.verify_tls,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Connect and send the registration message.
    async fn connect(&self) -> Result<WsStream> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::WebSocket(e.to_string()))?;
        let mut auth = HeaderValue::from_str(&self.authorization)
            .map_err(|e| ClientError::WebSocket(e.to_string()))?;
        auth.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, auth);

        let stream = dial(&self.url, self.proxy.as_ref()).await?;
        let tls = tls_connector(self.verify_tls)?;
        let (mut ws, _) = client_async_tls_with_config(request, stream, None, tls)
            .await
            .map_err(|e| ClientError::ConnectionFailed {
                url: self.url.to_string(),
                reason: e.to_string(),
            })?;
        let registration = json!({ "xpub": self.xpub });
        ws.send(Message::Text(registration.to_string()))
            .await
            .map_err(|e| ClientError::WebSocket(e.to_string()))?;
        Ok(ws)
    }

    /// One connection consumed as a stream of update batches.
    ///
    /// Malformed messages are skipped; the stream ends when the connection
    /// closes. No reconnects.
    pub async fn updates(&self) -> Result<BoxStream<'static, UpdateBatch>> {
        let ws = self.connect().await?;
        let stream = futures_util::stream::unfold(ws, |mut ws| async move {
            loop {
                match ws.next().await? {
                    Ok(Message::Text(text)) => match parse_batch(&text) {
                        Some(batch) => return Some((batch, ws)),
                        None => continue,
                    },
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        return None;
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Why a streaming session ended.
enum Ended {
    Shutdown,
    Disconnected,
}

/// Websocket delivery loop.
pub struct WebsocketDelivery {
    connector: WebsocketConnector,
    registry: HandlerRegistry,
    options: StreamOptions,
    control: Arc<DeliveryControl>,
}

impl WebsocketDelivery {
    pub fn new(connector: WebsocketConnector, registry: HandlerRegistry, options: StreamOptions) -> Self {
        Self {
            connector,
            registry,
            options,
            control: DeliveryControl::new(),
        }
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Handle for observing and stopping the loop.
    pub fn handle(&self) -> DeliveryHandle {
        DeliveryHandle::new(self.control.clone())
    }

    /// Run until shutdown, or until the connection closes when auto-reconnect
    /// is off.
    ///
    /// Fails only if the first connection attempt fails and `force_connect`
    /// is not set.
    pub async fn run(self) -> Result<()> {
        let result = self.run_loop().await;
        self.control.set(DeliveryState::Closed);
        result
    }

    async fn run_loop(&self) -> Result<()> {
        let mut shutdown = self.control.shutdown_receiver();
        let mut attempt: u32 = 0;
        let mut first_attempt = true;

        loop {
            if self.control.shutdown_requested() {
                return Ok(());
            }
            self.control.set(DeliveryState::Connecting);
            info!(url = %self.connector.url, "connecting to daemon websocket");

            let connected = tokio::select! {
                result = self.connector.connect() => result,
                _ = stopped(&mut shutdown) => return Ok(()),
            };

            match connected {
                Ok(ws) => {
                    first_attempt = false;
                    attempt = 0;
                    if let Some(callback) = &self.options.reconnect_callback {
                        callback().await;
                    }
                    self.control.set(DeliveryState::Streaming);
                    if let Ended::Shutdown = self.listen(ws, &mut shutdown).await {
                        return Ok(());
                    }
                    info!("daemon websocket closed");
                }
                Err(e) if first_attempt && !self.options.force_connect => {
                    warn!(error = %e, "first websocket connection failed");
                    return Err(e);
                }
                Err(e) => {
                    first_attempt = false;
                    warn!(error = %e, "websocket connection failed");
                }
            }

            if !self.options.auto_reconnect {
                return Ok(());
            }

            let delay = self.options.reconnect.unwrap_or_default().delay(attempt);
            attempt = attempt.saturating_add(1);
            self.control.set(DeliveryState::ReconnectWait);
            info!(?delay, attempt, "reconnecting to daemon websocket");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut shutdown) => return Ok(()),
            }
        }
    }

    async fn listen(&self, ws: WsStream, shutdown: &mut watch::Receiver<bool>) -> Ended {
        let (mut write, mut read) = ws.split();
        loop {
            tokio::select! {
                _ = stopped(shutdown) => {
                    let _ = write.close().await;
                    return Ended::Shutdown;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_message(&text).await,
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.handle_message(text).await,
                        Err(_) => debug!(len = data.len(), "dropping binary websocket message"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "daemon closed websocket");
                        return Ended::Disconnected;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read failed");
                        return Ended::Disconnected;
                    }
                    None => return Ended::Disconnected,
                }
            }
        }
    }

    async fn handle_message(&self, text: &str) {
        if let Some(batch) = parse_batch(text) {
            let delivered = self.registry.dispatch_batch(batch).await;
            debug!(delivered, "dispatched update batch");
        }
    }
}

fn parse_batch(text: &str) -> Option<UpdateBatch> {
    match UpdateBatch::from_json(text) {
        Ok(batch) => Some(batch),
        Err(e) => {
            warn!(error = %e, "dropping malformed update message");
            None
        }
    }
}
