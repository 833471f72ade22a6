use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Effect = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

enum Job {
    Run { label: String, effect: Effect },
    Barrier(oneshot::Sender<()>),
}

/// Ordered queue of asynchronous report writes.
///
/// A single worker task runs effects one at a time in enqueue order, so an
/// effect always observes the results of every effect enqueued before it.
/// A failing effect is logged and counted; the queue keeps going.
pub struct EffectQueue {
    sender: mpsc::UnboundedSender<Job>,
    failures: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
}

impl EffectQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let failures = Arc::new(AtomicUsize::new(0));
        let worker_failures = failures.clone();

        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                match job {
                    Job::Run { label, effect } => {
                        if let Err(e) = effect().await {
                            worker_failures.fetch_add(1, Ordering::SeqCst);
                            log::error!("report write '{}' failed: {:#}", label, e);
                        }
                    }
                    Job::Barrier(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self {
            sender,
            failures,
            worker,
        }
    }

    /// Queue an effect behind everything already queued
    pub fn enqueue<F, Fut>(&self, label: impl Into<String>, effect: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        log::debug!("queued: {}", label);
        let job = Job::Run {
            label,
            effect: Box::new(move || effect().boxed()),
        };
        if self.sender.send(job).is_err() {
            log::error!("effect queue worker has stopped, dropping report write");
        }
    }

    /// Wait until every effect queued before this call has settled
    pub async fn drain(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Job::Barrier(done)).is_err() {
            return;
        }
        let _ = wait.await;
    }

    /// Number of effects that failed so far
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl Default for EffectQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EffectQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
