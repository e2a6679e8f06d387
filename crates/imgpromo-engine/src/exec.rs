//! Bounded worker-pool request execution.
//!
//! Every stage that talks to a registry runs through
//! [`SyncContext::exec_requests`]: a [`RequestSource`] seeds a bounded
//! channel, a fixed pool of workers drains it through a [`RequestHandler`],
//! and a single collector folds results into the run's error log.
//!
//! Termination is tracked by a pending counter. It is incremented exactly
//! once per enqueued request, before the request enters the channel, and
//! decremented exactly once per collected result. The run is finished when
//! the counter returns to zero.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, watch, Mutex, Notify};

use crate::context::{LoggedError, SyncContext};
use crate::error::{EngineError, Result};

/// Produces the initial requests of a batch.
#[async_trait]
pub trait RequestSource<R: Send + 'static>: Send + Sync {
    /// Enqueues every initial request.
    async fn populate(&self, queue: &RequestQueue<R>);
}

/// Processes one request.
#[async_trait]
pub trait RequestHandler<R: Send + 'static>: Send + Sync {
    /// Handles `request`, optionally enqueueing follow-up requests.
    async fn handle(&self, request: R, queue: &RequestQueue<R>) -> RequestResult;
}

/// Outcome of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestResult {
    /// Errors encountered; empty on success.
    pub errors: Vec<LoggedError>,
}

impl RequestResult {
    /// A successful result.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A result carrying a single error.
    pub fn failed(context: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            errors: vec![LoggedError::new(context, error)],
        }
    }

    /// Returns true if no errors were recorded.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Counts requests that have been enqueued but whose result has not been
/// collected yet.
#[derive(Debug, Default)]
pub struct PendingRequests {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingRequests {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        match self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(1) => self.idle.notify_waiters(),
            Ok(_) => {}
            Err(_) => tracing::error!("Pending request counter underflow"),
        }
    }

    /// Number of outstanding requests.
    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Handle used by sources and handlers to add requests to a batch.
pub struct RequestQueue<R> {
    sender: mpsc::Sender<R>,
    pending: Arc<PendingRequests>,
    enqueued: AtomicUsize,
}

impl<R: Send + 'static> RequestQueue<R> {
    /// Enqueues a request, waiting for channel capacity.
    pub async fn enqueue(&self, request: R) {
        self.pending.add();
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(request).await.is_err() {
            tracing::error!("Request channel closed before enqueue");
            self.pending.done();
        }
    }

    /// Enqueues a request without waiting. Handlers use this so a worker
    /// never blocks on a full channel that only workers can drain.
    pub fn defer(&self, request: R) {
        self.pending.add();
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        let sender = self.sender.clone();
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            if sender.send(request).await.is_err() {
                tracing::error!("Request channel closed before deferred enqueue");
                pending.done();
            }
        });
    }

    /// Number of requests enqueued so far.
    pub fn enqueued(&self) -> usize {
        self.enqueued.load(Ordering::SeqCst)
    }
}

/// Counts for one executed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecSummary {
    /// Requests enqueued, by the source and by handlers.
    pub enqueued: usize,
    /// Results collected.
    pub completed: usize,
    /// Results that carried errors.
    pub failed: usize,
}

impl ExecSummary {
    /// Fails with [`EngineError::RequestsFailed`] if any request failed.
    pub fn check(self) -> Result<Self> {
        if self.failed > 0 {
            Err(EngineError::RequestsFailed {
                failed: self.failed,
            })
        } else {
            Ok(self)
        }
    }
}

impl SyncContext {
    /// Runs one batch of requests to completion.
    ///
    /// Returns once every enqueued request, including those enqueued by
    /// handlers, has produced a result. Failed requests do not stop the
    /// batch; their errors are appended to the run's logs and counted in the
    /// summary.
    pub async fn exec_requests<R, S, H>(&self, source: &S, handler: &H) -> ExecSummary
    where
        R: fmt::Display + Send + 'static,
        S: RequestSource<R> + ?Sized,
        H: RequestHandler<R> + ?Sized,
    {
        let workers = self.config().workers.max(1);
        let (sender, receiver) = mpsc::channel::<R>(workers);
        let receiver = Mutex::new(receiver);
        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<(String, RequestResult)>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pending = Arc::new(PendingRequests::default());
        let queue = RequestQueue {
            sender,
            pending: Arc::clone(&pending),
            enqueued: AtomicUsize::new(0),
        };

        let pool: Vec<_> = (0..workers)
            .map(|worker| {
                let results_tx = results_tx.clone();
                let mut shutdown = shutdown_rx.clone();
                let (receiver, queue) = (&receiver, &queue);
                async move {
                    loop {
                        let request = tokio::select! {
                            _ = shutdown.changed() => break,
                            request = async { receiver.lock().await.recv().await } => request,
                        };
                        let Some(request) = request else { break };

                        let label = request.to_string();
                        tracing::trace!(worker, request = %label, "Handling request");
                        let result = handler.handle(request, queue).await;
                        if results_tx.send((label, result)).is_err() {
                            break;
                        }
                    }
                }
            })
            .collect();
        drop(results_tx);

        let collector = async {
            let mut summary = ExecSummary::default();
            while let Some((label, result)) = results_rx.recv().await {
                summary.completed += 1;
                if result.is_ok() {
                    tracing::debug!(request = %label, "Request OK");
                } else {
                    summary.failed += 1;
                    for err in &result.errors {
                        tracing::error!(request = %label, context = %err.context, error = %err.error, "Request failed");
                    }
                    self.record_errors(result.errors);
                }
                pending.done();
            }
            summary
        };

        let driver = async {
            source.populate(&queue).await;
            pending.wait_idle().await;
            let _ = shutdown_tx.send(true);
        };

        let ((), _, mut summary) = tokio::join!(driver, join_all(pool), collector);
        summary.enqueued = queue.enqueued();
        summary
    }
}
