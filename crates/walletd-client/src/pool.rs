//! Per-context HTTP sessions.
//!
//! Every scheduling context gets its own `reqwest::Client`: a client's
//! connection pool belongs to the runtime it was first used on, so sessions
//! are never shared across contexts. A session opened on a runtime is
//! released when that runtime shuts down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use url::Url;
use walletd_core::config::{Config, ConfigError, ProxyDescriptor};

use crate::context::ContextKey;
use crate::error::{ClientError, Result};

/// `Basic` authorization value for `user:password`.
pub fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{user}:{password}")))
}

/// A context-bound HTTP session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: u64,
    context: ContextKey,
    http: reqwest::Client,
    closed: AtomicBool,
    watcher: OnceLock<AbortHandle>,
}

type SessionMap = HashMap<ContextKey, Session>;

impl Session {
    /// Pool-unique session id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Context this session belongs to.
    pub fn context(&self) -> ContextKey {
        self.inner.context
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The underlying HTTP client, unless the session was closed.
    pub fn http(&self) -> Result<&reqwest::Client> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(&self.inner.http)
    }

    /// Mark closed and stop watching the runtime. Returns false if it
    /// already was closed.
    fn close(&self) -> bool {
        if let Some(watcher) = self.inner.watcher.get() {
            watcher.abort();
        }
        self.expire()
    }

    fn expire(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("context", &self.inner.context)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Lazily created sessions, one per scheduling context.
pub struct ConnectionPool {
    authorization: String,
    proxy: Option<ProxyDescriptor>,
    verify_tls: bool,
    timeout: Duration,
    sessions: Arc<Mutex<SessionMap>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            authorization: basic_auth(&config.user, &config.password),
            proxy: config.proxy_descriptor()?,
            verify_tls: config.verify_tls,
            timeout: config.request_timeout(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Session of the calling context.
    pub fn bind(&self) -> Result<Session> {
        self.session_for(ContextKey::current())
    }

    /// Session for `key`, created on first access.
    pub fn session_for(&self, key: ContextKey) -> Result<Session> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let session = {
            let mut sessions = self.lock();
            if let Some(session) = sessions.get(&key) {
                if !session.is_closed() {
                    return Ok(session.clone());
                }
            }
            let session = self.open(key)?;
            sessions.insert(key, session.clone());
            session
        };
        debug!(session = session.id(), context = %key, "opened session");
        // Spawned outside the lock: a runtime that is shutting down drops the
        // watcher right away.
        if let Ok(handle) = Handle::try_current() {
            self.watch(&handle, &session);
        }
        Ok(session)
    }

    /// `Authorization` header value sent with every request.
    pub fn authorization(&self) -> &str {
        &self.authorization
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|s| !s.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close and forget the session of one context. The pool stays usable.
    pub fn release(&self, key: ContextKey) -> bool {
        let session = self.lock().remove(&key);
        session.is_some_and(|s| s.close())
    }

    /// Close every tracked session and refuse new ones.
    ///
    /// Returns how many sessions were closed by this call.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let sessions: Vec<Session> = self.lock().drain().map(|(_, s)| s).collect();
        let closed = close_sessions(sessions);
        if closed > 0 {
            debug!(closed, "closed sessions");
        }
        closed
    }

    fn open(&self, key: ContextKey) -> Result<Session> {
        let mut auth =
            HeaderValue::from_str(&self.authorization).map_err(|e| ConfigError::InvalidValue {
                key: "user",
                message: e.to_string(),
            })?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(!self.verify_tls);
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url(proxy)?)?);
        }

        Ok(Session {
            inner: Arc::new(SessionInner {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                context: key,
                http: builder.build()?,
                closed: AtomicBool::new(false),
                watcher: OnceLock::new(),
            }),
        })
    }

    /// Park a task on `handle` whose only job is to be dropped with the
    /// runtime, taking the session with it.
    fn watch(&self, handle: &Handle, session: &Session) {
        let guard = RuntimeGuard {
            sessions: Arc::downgrade(&self.sessions),
            key: session.context(),
            id: session.id(),
        };
        let task = handle.spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        let _ = session.inner.watcher.set(task.abort_handle());
        if session.is_closed() {
            task.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionMap> {
        lock_sessions(&self.sessions)
    }
}

fn lock_sessions(sessions: &Mutex<SessionMap>) -> MutexGuard<'_, SessionMap> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases one session when dropped, unless it was replaced meanwhile.
struct RuntimeGuard {
    sessions: Weak<Mutex<SessionMap>>,
    key: ContextKey,
    id: u64,
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        let Some(sessions) = self.sessions.upgrade() else {
            return;
        };
        let session = {
            let mut sessions = lock_sessions(&sessions);
            let current = sessions.get(&self.key).is_some_and(|s| s.id() == self.id);
            if current {
                sessions.remove(&self.key)
            } else {
                None
            }
        };
        if session.is_some_and(|s| s.expire()) {
            debug!(
                session = self.id,
                context = %self.key,
                "released session of finished runtime"
            );
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        let sessions: Vec<Session> = self.lock().drain().map(|(_, s)| s).collect();
        if sessions.is_empty() {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let closed = close_sessions(sessions);
                    debug!(closed, "closed sessions on drop");
                });
            }
            Err(_) => {
                close_sessions(sessions);
            }
        }
    }
}

fn close_sessions(sessions: Vec<Session>) -> usize {
    sessions.into_iter().filter(Session::close).count()
}

/// Proxy URL with credentials embedded, as reqwest expects them.
fn proxy_url(proxy: &ProxyDescriptor) -> Result<Url> {
    let raw = proxy.url();
    let mut url = Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { url: raw, source })?;
    if let Some(user) = &proxy.username {
        if url.set_username(user).is_err() || url.set_password(proxy.password.as_deref()).is_err()
        {
            warn!(proxy = %proxy.url(), "cannot attach proxy credentials");
        }
    }
    Ok(url)
}
