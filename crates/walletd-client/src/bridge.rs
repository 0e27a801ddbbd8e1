//! Execution bridge between blocking callers and the client's main runtime.
//!
//! The bridge owns (or wraps) the *main* runtime. Every operation run through
//! it executes in the main context, so it uses the main context's session:
//!
//! - on the thread that created the bridge, with no runtime driving it, the
//!   operation is driven to completion right there;
//! - on any other plain thread, and on multi-thread runtime workers, it is
//!   handed to the main runtime and the caller blocks until the result comes
//!   back;
//! - on a thread driving a current-thread runtime a blocking wait would
//!   deadlock, so [`ClientError::WouldBlock`] is returned instead. Use
//!   [`Bridge::run`] from async code.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use futures::{Stream, StreamExt};
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tracing::{debug, warn};

use crate::context::ContextKey;
use crate::error::{ClientError, Result};

const MAIN_WORKER_THREADS: usize = 2;

tokio::task_local! {
    static SCOPE: TaskScope;
}

/// Sub-tasks spawned during one blocking run.
#[derive(Clone, Default)]
struct TaskScope {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl TaskScope {
    fn spawn<F>(&self, fut: F, handle: &Handle) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn_on(fut, handle)
    }

    fn take(&self) -> JoinSet<()> {
        std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Collect finished sub-tasks and let the rest run on detached.
    fn reap(&self) {
        let mut tasks = self.take();
        while let Some(result) = tasks.try_join_next() {
            log_join_error(result.err());
        }
        if !tasks.is_empty() {
            debug!(running = tasks.len(), "detaching sub-tasks still running");
        }
        tasks.detach_all();
    }

    /// Abort every sub-task and wait for all of them to finish.
    async fn abort_and_drain(&self) {
        let mut tasks = self.take();
        tasks.abort_all();
        let mut drained = 0usize;
        while tasks.join_next().await.is_some() {
            drained += 1;
        }
        debug!(drained, "aborted sub-tasks of interrupted call");
    }
}

fn log_join_error(error: Option<JoinError>) {
    if let Some(e) = error {
        if e.is_panic() {
            warn!(error = %e, "sub-task panicked");
        }
    }
}

/// Cancels blocking runs in progress on the main context.
#[derive(Clone)]
pub struct Interrupter {
    generation: Arc<watch::Sender<u64>>,
}

impl Interrupter {
    fn new() -> Self {
        Self {
            generation: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Interrupt every blocking run currently in progress.
    pub fn interrupt(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Resolves on the next interrupt after this call.
    async fn interrupted(&self) {
        let mut rx = self.generation.subscribe();
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

struct BridgeInner {
    handle: Handle,
    runtime: Option<Runtime>,
    owner: ThreadId,
    context: ContextKey,
    interrupter: Interrupter,
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Dropping a runtime blocks, which is not allowed inside another one.
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                drop(runtime);
            }
        }
    }
}

/// Runs async operations for blocking and async callers on the main runtime.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Create a bridge owning a new multi-thread main runtime. The calling
    /// thread becomes the main thread.
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(MAIN_WORKER_THREADS)
            .thread_name("walletd-main")
            .enable_all()
            .build()
            .map_err(|e| ClientError::Runtime(format!("cannot start runtime: {e}")))?;
        let handle = runtime.handle().clone();
        Ok(Self::build(handle, Some(runtime)))
    }

    /// Wrap an existing runtime. It must be a multi-thread runtime, or be
    /// driven by some thread for as long as the bridge is used.
    pub fn from_handle(handle: Handle) -> Self {
        Self::build(handle, None)
    }

    /// Wrap the runtime driving the calling task.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| ClientError::Runtime(e.to_string()))?;
        Ok(Self::from_handle(handle))
    }

    fn build(handle: Handle, runtime: Option<Runtime>) -> Self {
        let context = ContextKey::fresh();
        debug!(%context, owned = runtime.is_some(), "created bridge");
        Self {
            inner: Arc::new(BridgeInner {
                handle,
                runtime,
                owner: thread::current().id(),
                context,
                interrupter: Interrupter::new(),
            }),
        }
    }

    /// Handle of the main runtime.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Context key operations run under.
    pub fn context(&self) -> ContextKey {
        self.inner.context
    }

    pub fn interrupter(&self) -> Interrupter {
        self.inner.interrupter.clone()
    }

    /// True on the thread that created the bridge.
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.inner.owner
    }

    /// Interrupt blocking runs on Ctrl-C.
    pub fn interrupt_on_ctrl_c(&self) -> AbortHandle {
        let interrupter = self.interrupter();
        self.inner
            .handle
            .spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    debug!("ctrl-c received, interrupting");
                    interrupter.interrupt();
                }
            })
            .abort_handle()
    }

    /// Run `fut` to completion from blocking code.
    pub fn block_on<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match Handle::try_current() {
            Ok(current) => match current.runtime_flavor() {
                RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(|| self.hand_off_blocking(fut))
                }
                RuntimeFlavor::CurrentThread => Err(ClientError::WouldBlock),
                other => Err(ClientError::Runtime(format!(
                    "unsupported runtime flavor {other:?}"
                ))),
            },
            Err(_) if self.is_main_thread() => self.drive(fut),
            Err(_) => self.hand_off_blocking(fut),
        }
    }

    /// Drain a stream into a `Vec` from blocking code.
    pub fn collect<S>(&self, stream: S) -> Result<Vec<S::Item>>
    where
        S: Stream + Send + 'static,
        S::Item: Send + 'static,
    {
        self.block_on(stream.collect::<Vec<_>>())
    }

    /// Run `fut` on the main runtime and await the result from any runtime.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let task = self.inner.handle.spawn(self.inner.context.scope(fut));
        task.await.map_err(join_error)
    }

    /// Spawn a background task in the main context.
    ///
    /// Inside a blocking run the task belongs to that run: it is aborted if
    /// the run is interrupted.
    pub fn spawn<F>(&self, fut: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let fut = self.inner.context.scope(fut);
        match SCOPE.try_with(TaskScope::clone) {
            Ok(scope) => scope.spawn(fut, &self.inner.handle),
            Err(_) => self.inner.handle.spawn(fut).abort_handle(),
        }
    }

    /// Drive on the calling thread, with interrupt support.
    fn drive<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let scope = TaskScope::default();
        let context = self.inner.context;
        let interrupter = self.inner.interrupter.clone();
        self.inner.handle.block_on(async move {
            let run = SCOPE.scope(scope.clone(), context.scope(fut));
            tokio::select! {
                value = run => {
                    scope.reap();
                    Ok(value)
                }
                _ = interrupter.interrupted() => {
                    scope.abort_and_drain().await;
                    Err(ClientError::Interrupted)
                }
            }
        })
    }

    /// Hand `fut` to the main runtime and block until it finishes.
    fn hand_off_blocking<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let task = self.inner.handle.spawn(self.inner.context.scope(async move {
            let _ = tx.send(fut.await);
        }));
        match rx.blocking_recv() {
            Ok(value) => Ok(value),
            Err(_) => {
                task.abort();
                Err(ClientError::Runtime("main runtime dropped the operation".to_string()))
            }
        }
    }
}

fn join_error(e: JoinError) -> ClientError {
    if e.is_cancelled() {
        ClientError::Interrupted
    } else {
        ClientError::Runtime(format!("task failed: {e}"))
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("context", &self.inner.context)
            .field("owner", &self.inner.owner)
            .finish_non_exhaustive()
    }
}
