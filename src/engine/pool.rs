use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::OrchestratorError;

type PoolTask = BoxFuture<'static, ()>;

/// Bounded concurrent executor used *inside* a processor to parallelize
/// per-item fetch/upload work. A `watch` channel signals cancellation, and
/// a mutex-guarded `Option<Sender>` makes "close the task channel" idempotent
/// no matter how many callers race to shut the pool down.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<PoolTask>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    cancel_tx: watch::Sender<bool>,
}

/// Returned by `submit_and_wait`; resolves once the submitted work finishes.
pub struct WaitHandle {
    rx: oneshot::Receiver<()>,
}

impl WaitHandle {
    pub async fn wait(self) {
        let _ = self.rx.await;
    }
}

impl WorkerPool {
    /// `n` workers, task channel capacity `2n`.
    pub fn new(n: usize) -> Self {
        let (tx, rx) = mpsc::channel::<PoolTask>(2 * n.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(n);
        for _ in 0..n.max(1) {
            let rx = Arc::clone(&rx);
            let mut cancel_rx = cancel_rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = cancel_rx.changed() => None,
                            task = guard.recv() => task,
                        }
                    };
                    match next {
                        Some(task) if !*cancel_rx.borrow() => task.await,
                        _ => break,
                    }
                }
            }));
        }

        Self {
            sender: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            cancel_tx,
        }
    }

    /// Enqueue `fut`; errors if the pool is shutting down.
    pub async fn submit<F>(&self, fut: F) -> Result<(), OrchestratorError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let sender = {
            let guard = self.sender.lock().await;
            guard.clone().ok_or_else(|| {
                OrchestratorError::Processor("worker pool is shutting down".to_string())
            })?
        };
        sender
            .send(Box::pin(fut))
            .await
            .map_err(|_| OrchestratorError::Processor("worker pool is shutting down".to_string()))
    }

    /// Enqueue `fut` and return a handle that completes when it returns.
    pub async fn submit_and_wait<F>(&self, fut: F) -> Result<WaitHandle, OrchestratorError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(async move {
            fut.await;
            let _ = done_tx.send(());
        })
        .await?;
        Ok(WaitHandle { rx: done_rx })
    }

    /// Close the task channel and wait for queued + in-flight work to drain.
    pub async fn wait(&self) {
        self.close_channel().await;
        self.join_all().await;
    }

    /// Cancel immediately: workers stop after their current item, queued
    /// work is dropped.
    pub async fn shutdown(&self) {
        let _ = self.cancel_tx.send(true);
        self.close_channel().await;
        self.join_all().await;
    }

    async fn close_channel(&self) {
        let mut guard = self.sender.lock().await;
        *guard = None;
    }

    async fn join_all(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_submitted_work_and_waits() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        pool.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn submit_and_wait_resolves_after_completion() {
        let pool = WorkerPool::new(2);
        let handle = pool
            .submit_and_wait(async {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            })
            .await
            .unwrap();
        handle.wait().await;
        pool.wait().await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_errors() {
        let pool = WorkerPool::new(2);
        pool.shutdown().await;
        let result = pool.submit(async {}).await;
        assert!(result.is_err());
    }
}
