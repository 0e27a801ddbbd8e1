//! JSON-RPC transport.
//!
//! Every remote procedure goes through [`RpcTransport::invoke`]:
//!
//! ```json
//! {"id": 0, "method": "getbalance", "params": [], "xpub": "xpub6C..."}
//! ```
//!
//! The `result` field of the reply is returned as-is; an `error` field is
//! mapped through the daemon's spec document.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use url::Url;
use walletd_core::config::Config;
use walletd_core::errors::ErrorMapper;
use walletd_core::types::{Params, RpcRequest, RpcResponse, REQUEST_ID};

use crate::error::{ClientError, Result};
use crate::pool::ConnectionPool;
use crate::spec_cache::SpecCache;

/// Sends requests to the daemon over the calling context's session.
pub struct RpcTransport {
    endpoint: Url,
    xpub: Option<String>,
    pool: Arc<ConnectionPool>,
    spec: Arc<SpecCache>,
    mapper: ErrorMapper<'static>,
}

impl RpcTransport {
    pub fn new(config: &Config, pool: Arc<ConnectionPool>, spec: Arc<SpecCache>) -> Result<Self> {
        Ok(Self {
            endpoint: config.daemon_url()?,
            xpub: config.xpub.clone(),
            pool,
            spec,
            mapper: ErrorMapper::default(),
        })
    }

    /// Daemon endpoint requests are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Wallet identity attached to every request, if any.
    pub fn xpub(&self) -> Option<&str> {
        self.xpub.as_deref()
    }

    /// Call `method` with `params` and return the daemon's `result` verbatim.
    pub async fn invoke(&self, method: &str, params: Params) -> Result<Value> {
        if method.is_empty() || method.starts_with('_') {
            return Err(ClientError::InvalidMethod(method.to_string()));
        }
        let request = RpcRequest::new(method, params.into_value()?, self.xpub.clone());
        let session = self.pool.bind()?;

        debug!(method, session = session.id(), "sending request");
        let response = session
            .http()?
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let reply: RpcResponse = match serde_json::from_str(&body) {
            Ok(reply) => reply,
            Err(_) if !status.is_success() => {
                return Err(ClientError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
            Err(e) => {
                return Err(ClientError::InvalidResponse(format!(
                    "cannot decode reply to '{method}': {e}"
                )))
            }
        };
        // A JSON body on a failed status is only an answer if it carries an
        // error object.
        if reply.error.is_none() && !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if reply.id != Value::from(REQUEST_ID) {
            warn!(method, id = %reply.id, "response id does not match request id");
        }

        if let Some(error) = reply.error {
            debug!(method, code = error.code, "daemon returned error");
            let spec = self.spec.get_spec().await;
            return Err(self.mapper.map(&spec, error.code, &error.message).into());
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }

    /// A reusable handle for one remote method.
    pub fn method(self: &Arc<Self>, name: impl Into<String>) -> RemoteMethod {
        RemoteMethod {
            transport: self.clone(),
            name: name.into().into(),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ClientError {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            ClientError::ConnectionFailed {
                url: self.endpoint.to_string(),
                reason: e.to_string(),
            }
        } else {
            ClientError::Http(e)
        }
    }
}

/// A remote procedure bound to its name.
#[derive(Clone)]
pub struct RemoteMethod {
    transport: Arc<RpcTransport>,
    name: Arc<str>,
}

impl RemoteMethod {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the method.
    pub async fn call(&self, params: Params) -> Result<Value> {
        self.transport.invoke(&self.name, params).await
    }
}

impl std::fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RemoteMethod").field(&self.name).finish()
    }
}
