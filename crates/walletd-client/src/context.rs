//! Scheduling context keys.
//!
//! A [`ContextKey`] names the scheduling context a piece of code runs in:
//!
//! - inside [`ContextKey::scope`] (the bridge runs everything this way), the
//!   scoped key;
//! - otherwise, on a thread driven by a tokio runtime, a key for that runtime,
//!   so every runtime gets its own key even when several take turns on one
//!   thread;
//! - with no runtime at all, a key owned by the current thread.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::{Handle, Id as RuntimeId};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static TASK_CONTEXT: ContextKey;
}

thread_local! {
    static THREAD_CONTEXT: ContextKey = ContextKey::fresh();
}

/// Opaque key identifying a scheduling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey(Scope);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scope {
    Assigned(u64),
    Runtime(RuntimeId),
}

impl ContextKey {
    /// Allocate a new, never before used key.
    pub fn fresh() -> Self {
        Self(Scope::Assigned(NEXT_KEY.fetch_add(1, Ordering::Relaxed)))
    }

    /// Key of the runtime behind `handle`.
    pub fn for_runtime(handle: &Handle) -> Self {
        Self(Scope::Runtime(handle.id()))
    }

    /// Key of the calling context.
    pub fn current() -> Self {
        if let Ok(key) = TASK_CONTEXT.try_with(|key| *key) {
            return key;
        }
        match Handle::try_current() {
            Ok(handle) => Self::for_runtime(&handle),
            Err(_) => THREAD_CONTEXT.with(|key| *key),
        }
    }

    /// Run `fut` with this key as the current context.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        TASK_CONTEXT.scope(self, fut).await
    }

    /// True for keys that name a runtime rather than an explicit scope or a
    /// thread.
    pub fn is_runtime(&self) -> bool {
        matches!(self.0, Scope::Runtime(_))
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Scope::Assigned(n) => write!(f, "ctx-{n}"),
            Scope::Runtime(id) => write!(f, "rt-{id}"),
        }
    }
}
