//! Cached copy of the daemon's spec document.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;
use walletd_core::config::Config;
use walletd_core::spec::SpecDocument;

use crate::error::{ClientError, Result};
use crate::pool::ConnectionPool;

/// Spec document fetched from `<daemon>/spec`, kept for the client's lifetime.
///
/// Until a fetch succeeds the built-in document is served, and every call to
/// [`SpecCache::get_spec`] retries the fetch. Once a valid document has been
/// stored it is never refreshed.
pub struct SpecCache {
    url: Url,
    pool: Arc<ConnectionPool>,
    current: RwLock<Arc<SpecDocument>>,
    fetched: AtomicBool,
    fetch_lock: tokio::sync::Mutex<()>,
}

impl SpecCache {
    pub fn new(config: &Config, pool: Arc<ConnectionPool>) -> Result<Self> {
        Ok(Self {
            url: config.spec_url()?,
            pool,
            current: RwLock::new(Arc::new(SpecDocument::default())),
            fetched: AtomicBool::new(false),
            fetch_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The current document, fetching it first if no valid copy is cached.
    ///
    /// Never fails: fetch and validation errors are logged and the previous
    /// document stays in effect.
    pub async fn get_spec(&self) -> Arc<SpecDocument> {
        if self.is_fetched() {
            return self.cached();
        }
        let _guard = self.fetch_lock.lock().await;
        if self.is_fetched() {
            return self.cached();
        }
        match self.fetch().await {
            Ok(spec) => {
                info!(version = %spec.version, codes = spec.exceptions.len(), "loaded spec document");
                let spec = Arc::new(spec);
                *self.current.write().unwrap_or_else(PoisonError::into_inner) = spec.clone();
                self.fetched.store(true, Ordering::Release);
                spec
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "spec fetch failed, keeping cached document");
                self.cached()
            }
        }
    }

    /// The document currently in effect, without fetching.
    pub fn cached(&self) -> Arc<SpecDocument> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True once a valid document has been fetched.
    pub fn is_fetched(&self) -> bool {
        self.fetched.load(Ordering::Acquire)
    }

    async fn fetch(&self) -> Result<SpecDocument> {
        debug!(url = %self.url, "fetching spec document");
        let session = self.pool.bind()?;
        let response = session
            .http()?
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ClientError::InvalidResponse(format!("spec is not JSON: {e}")))?;
        Ok(SpecDocument::from_value(&value)?)
    }
}
