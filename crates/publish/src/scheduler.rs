//! Execution scaffolding for a crawl.
//!
//! - [`ForkJoinPool`] runs many independent units (directory listings) with a
//!   concurrency bound. Units may submit more units; [`ForkJoinPool::join`]
//!   waits for the transitive closure.
//! - [`SerialQueue`] feeds a single [`Worker`] that owns its state outright,
//!   so whatever it touches (the symbol store, the ledger) is only ever used
//!   from one task at a time.
//!
//! A unit that fails or panics is logged and dropped; it never cancels the
//! others.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Bounded pool of concurrently running units.
///
/// Cloning the pool hands out another submitter for the same units.
#[derive(Clone)]
pub struct ForkJoinPool {
    name: &'static str,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}
impl ForkJoinPool {
    /// At most `size` units run at once (minimum one).
    pub fn new(name: &'static str, size: usize) -> Self {
        Self {
            name,
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Run a unit once a slot is free.
    ///
    /// Errors are logged at `warn`, panics at `error`.
    pub fn submit<F, E>(&self, unit: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: fmt::Debug + Send + 'static,
    {
        let name = self.name;
        let permits = Arc::clone(&self.permits);
        self.tracker.spawn(async move {
            // The semaphore is never closed.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match AssertUnwindSafe(unit).catch_unwind().await {
                Ok(Ok(())) => {},
                Ok(Err(error)) => tracing::warn!(pool = name, ?error, "Unit failed"),
                Err(payload) => tracing::error!(pool = name, panic = panic_message(&*payload), "Unit panicked"),
            }
        });
    }

    /// Units submitted and not yet finished, including those waiting for a slot.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every unit, and every unit they submitted, has finished.
    ///
    /// Units may keep submitting while the join is in progress.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// State owned by a serial queue's consumer task.
#[async_trait]
pub trait Worker: Send + 'static {
    type Item: Send + 'static;

    /// Handle one item. `Break` stops the worker; items still queued are
    /// dropped.
    async fn process(&mut self, item: Self::Item) -> ControlFlow<()>;
}

/// Sending side of a [`SerialQueue`]. Cheap to clone.
pub struct SerialQueue<T> {
    sender: mpsc::UnboundedSender<T>,
}
impl<T> Clone for SerialQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
impl<T: Send + 'static> SerialQueue<T> {
    /// Start `worker` on its own task.
    ///
    /// The worker runs until every [`SerialQueue`] clone is dropped (and the
    /// backlog drained) or it returns `Break`. The handle gives it back.
    pub fn spawn<W>(worker: W) -> (Self, WorkerHandle<W>)
    where
        W: Worker<Item = T>,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<T>();
        let handle = tokio::spawn(async move {
            let mut worker = worker;
            while let Some(item) = receiver.recv().await {
                match AssertUnwindSafe(worker.process(item)).catch_unwind().await {
                    Ok(ControlFlow::Continue(())) => {},
                    Ok(ControlFlow::Break(())) => {
                        tracing::debug!("Serial worker stopped early");
                        break;
                    },
                    Err(payload) => {
                        tracing::error!(panic = panic_message(&*payload), "Serial worker item panicked");
                    },
                }
            }
            worker
        });
        (Self { sender }, WorkerHandle { handle })
    }

    /// Queue an item. Returns `false` if the worker has stopped.
    pub fn submit(&self, item: T) -> bool {
        self.sender.send(item).is_ok()
    }

    /// `true` once the worker has stopped accepting items.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Join handle for a [`SerialQueue`] worker.
pub struct WorkerHandle<W> {
    handle: JoinHandle<W>,
}
impl<W> WorkerHandle<W> {
    /// Wait for the worker to finish and take its state back.
    ///
    /// Drop every queue clone first, or this never returns.
    pub async fn join(self) -> Result<W> {
        self.handle.await.or_raise(|| ErrorKind::Worker)
    }
}
