//! Nonce-ordered transaction queue: a single background worker drains jobs
//! in strict FIFO order, so two concurrent callers racing to submit a NEAR
//! transaction from the same relayer account never collide on the same
//! nonce. Grounded on this codebase's former `tasks/withdrawal_processor.rs`
//! (single-consumer background task draining an mpsc channel, one job at a
//! time, with `Arc<AtomicU64>` counters for observability) but generalized
//! from one hardcoded job/result shape to a generic `TransactionQueue<T>` so
//! both `create_account_and_register_user` and
//! `verify_authentication_response` can share one relayer-nonce queue.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::error::{AppError, AppResult};

type Job<T> = Box<dyn FnOnce() -> BoxFuture<'static, AppResult<T>> + Send>;

struct Entry<T> {
    job: Job<T>,
    reply: oneshot::Sender<AppResult<T>>,
}

#[derive(Default)]
struct Counters {
    pending: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Handle to a running queue worker. Cloning shares the same worker and
/// counters; dropping all handles drops the channel sender, which ends the
/// worker task once any in-flight job finishes.
#[derive(Clone)]
pub struct TransactionQueue<T> {
    sender: mpsc::UnboundedSender<Entry<T>>,
    counters: Arc<Counters>,
}

impl<T: Send + 'static> TransactionQueue<T> {
    pub fn spawn() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Entry<T>>();
        let counters = Arc::new(Counters::default());
        let worker_counters = counters.clone();

        tokio::spawn(async move {
            while let Some(Entry { job, reply }) = receiver.recv().await {
                let outcome = job().await;
                match &outcome {
                    Ok(_) => {
                        worker_counters.completed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(_) => {
                        worker_counters.failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
                worker_counters.pending.fetch_sub(1, Ordering::SeqCst);
                // Dropping the caller's receiver (on cancellation) just
                // discards this one reply; the worker loop moves on to the
                // next entry regardless.
                let _ = reply.send(outcome);
            }
        });

        Self { sender, counters }
    }

    /// Enqueues `job`, to run strictly after every job already enqueued on
    /// this worker, and awaits its result.
    pub async fn enqueue<F>(&self, job: F) -> AppResult<T>
    where
        F: FnOnce() -> BoxFuture<'static, AppResult<T>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        self.sender
            .send(Entry {
                job: Box::new(job),
                reply: reply_tx,
            })
            .map_err(|_| AppError::Internal("transaction queue worker is gone".into()))?;
        reply_rx
            .await
            .map_err(|_| AppError::Internal("transaction queue dropped the reply".into()))?
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.counters.pending.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_run_in_fifo_order() {
        let queue: TransactionQueue<u32> = TransactionQueue::spawn();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(move || {
                        Box::pin(async move {
                            // Earlier entries sleep longer; FIFO must still
                            // preserve submission order since the worker is
                            // single-consumer, not input-delay-sensitive.
                            if i == 0 {
                                tokio::time::sleep(Duration::from_millis(20)).await;
                            }
                            order.lock().unwrap().push(i);
                            Ok(i)
                        })
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn a_failed_job_does_not_block_later_jobs() {
        let queue: TransactionQueue<u32> = TransactionQueue::spawn();

        let failed = queue
            .enqueue(|| Box::pin(async { Err(AppError::Internal("boom".into())) }))
            .await;
        assert!(failed.is_err());

        let ok = queue.enqueue(|| Box::pin(async { Ok(42) })).await.unwrap();
        assert_eq!(ok, 42);

        let stats = queue.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }
}
