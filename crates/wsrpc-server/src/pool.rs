//! Bounded worker pool for request execution.
//!
//! A fixed set of executor tasks drains one bounded queue. Submitting waits
//! for a queue slot for at most the submit timeout, then fails with
//! [`PoolError::Saturated`] so the caller can report the request as
//! undeliverable. A panicking task is caught and logged; its executor keeps
//! serving.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Error returned by [`WorkerPool::submit`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No queue slot became free within the submit timeout.
    #[error("worker pool saturated: no queue slot within {0:?}")]
    Saturated(Duration),
    /// The pool has been shut down.
    #[error("worker pool is shut down")]
    Closed,
}

/// A queued unit of work.
struct Task {
    job: BoxFuture<'static, ()>,
    enqueued_at: Instant,
}

/// Fixed-size pool of executors sharing one bounded queue.
pub struct WorkerPool {
    tx: mpsc::Sender<Task>,
    capacity: usize,
    submit_timeout: Duration,
    shutdown: CancellationToken,
    busy: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `capacity` executors and a queue holding `capacity` tasks.
    ///
    /// Must be called from within a Tokio runtime. Executors stop once
    /// `shutdown` is cancelled.
    pub fn new(capacity: usize, submit_timeout: Duration, shutdown: CancellationToken) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let busy = Arc::new(AtomicUsize::new(0));

        for index in 0..capacity {
            let _ = tokio::spawn(run_executor(
                index,
                rx.clone(),
                shutdown.clone(),
                busy.clone(),
            ));
        }
        debug!(capacity, ?submit_timeout, "worker pool started");

        Self {
            tx,
            capacity,
            submit_timeout,
            shutdown,
            busy,
        }
    }

    /// Queue `job` for execution by any free executor.
    ///
    /// Waits for a queue slot up to the submit timeout.
    pub async fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::Closed);
        }
        let task = Task {
            job: Box::pin(job),
            enqueued_at: Instant::now(),
        };
        match tokio::time::timeout(self.submit_timeout, self.tx.send(task)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_closed)) => Err(PoolError::Closed),
            Err(_elapsed) => {
                counter!("pool_saturated_total").increment(1);
                warn!(
                    capacity = self.capacity,
                    timeout_ms = self.submit_timeout.as_millis(),
                    "worker pool saturated, rejecting task"
                );
                Err(PoolError::Saturated(self.submit_timeout))
            }
        }
    }

    /// Number of executors (and queue slots).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks waiting in the queue (approximate).
    pub fn queued(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Executors currently running a task (approximate).
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    /// Stop executors from taking new work. Queued tasks are dropped.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

async fn run_executor(
    index: usize,
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    shutdown: CancellationToken,
    busy: Arc<AtomicUsize>,
) {
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => None,
            task = async { rx.lock().await.recv().await } => task,
        };
        let Some(task) = next else { break };

        trace!(
            executor = index,
            wait_us = task.enqueued_at.elapsed().as_micros(),
            "task dequeued"
        );
        let _ = busy.fetch_add(1, Ordering::Relaxed);
        if let Err(panic) = AssertUnwindSafe(task.job).catch_unwind().await {
            counter!("pool_task_panics_total").increment(1);
            error!(
                executor = index,
                panic = %panic_message(&*panic),
                "task panicked, executor continues"
            );
        }
        let _ = busy.fetch_sub(1, Ordering::Relaxed);
    }
    trace!(executor = index, "executor stopped");
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
