//! Event handlers and dispatch.
//!
//! One handler per event name; registering a second handler for the same
//! name replaces the first. Handler failures and panics are logged and never
//! interrupt delivery of the rest of a batch.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};
use walletd_core::types::{Event, UpdateBatch};

/// Error returned by a handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Callback = dyn Fn(Event) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync;

/// A callback for one event name.
#[derive(Clone)]
pub struct Handler {
    fields: Option<Arc<[String]>>,
    callback: Arc<Callback>,
}

impl Handler {
    /// A synchronous handler.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self {
            fields: None,
            callback: Arc::new(move |event| {
                let f = f.clone();
                async move { f(event) }.boxed()
            }),
        }
    }

    /// An asynchronous handler.
    pub fn new_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            fields: None,
            callback: Arc::new(move |event| f(event).boxed()),
        }
    }

    /// Only pass these payload fields to the handler.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Declared fields, if the handler restricts them.
    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    /// Run the handler, turning a panic into an error.
    pub async fn call(&self, mut event: Event) -> Result<(), HandlerError> {
        if let Some(fields) = &self.fields {
            event.fields = filter_fields(event.fields, fields);
        }
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(event))) {
            Ok(fut) => fut,
            Err(panic) => return Err(panic_message(panic).into()),
        };
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(panic_message(panic).into()),
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

fn filter_fields(fields: Map<String, Value>, keep: &[String]) -> Map<String, Value> {
    fields
        .into_iter()
        .filter(|(name, _)| keep.iter().any(|k| k == name))
        .collect()
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

/// Shared event name → handler table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`, replacing any previous one.
    pub fn add(&self, event: impl Into<String>, handler: Handler) {
        let event = event.into();
        debug!(event = %event, "registering event handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event, handler);
    }

    /// Register one handler for several events.
    pub fn on<I, S>(&self, events: I, handler: Handler)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for event in events {
            self.add(event, handler.clone());
        }
    }

    pub fn remove(&self, event: &str) -> Option<Handler> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event)
    }

    pub fn get(&self, event: &str) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
    }

    /// Registered event names, sorted.
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        events.sort();
        events
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver one event. Returns true if a handler ran.
    pub async fn dispatch(&self, event: Event) -> bool {
        let Some(handler) = self.get(&event.name) else {
            debug!(event = %event.name, "no handler registered, dropping event");
            return false;
        };
        let name = event.name.clone();
        if let Err(e) = handler.call(event).await {
            error!(event = %name, error = %e, "event handler failed");
        }
        true
    }

    /// Deliver every record of a batch in order. Returns how many handlers ran.
    pub async fn dispatch_batch(&self, mut batch: UpdateBatch) -> usize {
        let records = std::mem::take(&mut batch.updates);
        let mut delivered = 0;
        for record in records {
            match Event::from_record(record, &batch) {
                Some(event) => {
                    if self.dispatch(event).await {
                        delivered += 1;
                    }
                }
                None => warn!("dropping update record without an event name"),
            }
        }
        delivered
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("events", &self.events())
            .finish()
    }
}
