//! # SerialExecutor: one-at-a-time job queue.
//!
//! [`SerialExecutor`] runs submitted futures **strictly in submission order**
//! on a single worker task. Two jobs never overlap, even if they were
//! submitted concurrently from many tasks. State that is only ever touched
//! from inside jobs therefore needs no further coordination.
//!
//! ## What it guarantees
//! - `submit` returns immediately and never polls the job on the caller.
//! - Jobs run FIFO, each to completion before the next starts.
//! - A panicking job is caught and logged; later jobs still run.
//!
//! ## What it does **not** guarantee
//! - No result is returned; capture a `oneshot` in the job if you need one.
//! - A job that awaits forever stalls every job behind it.
//!
//! ## Diagram
//! ```text
//!   submit(job A) ──┐
//!   submit(job B) ──┼──► [unbounded FIFO] ──► worker ──► A.await ─► B.await ─► C.await
//!   submit(job C) ──┘
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

type Job = BoxFuture<'static, ()>;

/// Single-worker FIFO executor.
///
/// Cloning is cheap; all clones feed the same worker. The worker exits once
/// every clone is dropped and the queue is drained.
#[derive(Clone, Debug)]
pub struct SerialExecutor {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialExecutor {
    /// Creates the executor and spawns its worker on the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime (same as [`tokio::spawn`]).
    #[must_use]
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(panic_err) = AssertUnwindSafe(job).catch_unwind().await {
                    tracing::warn!(panic = panic_message(&*panic_err), "serial executor job panicked");
                }
            }
            tracing::trace!("serial executor drained");
        });

        Self { tx }
    }

    /// Enqueues `job` behind every job submitted before it.
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tx.send(job.boxed()).is_err() {
            tracing::trace!("serial executor worker gone; job dropped");
        }
    }
}

impl Default for SerialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let exec = SerialExecutor::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50u32 {
            let seen = Arc::clone(&seen);
            exec.submit(async move {
                // Early jobs sleep longer; order must still hold.
                tokio::time::sleep(Duration::from_micros(u64::from(50 - i))).await;
                seen.lock().unwrap().push(i);
            });
        }

        let (done_tx, done_rx) = oneshot::channel();
        exec.submit(async move {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn jobs_never_overlap() {
        let exec = SerialExecutor::new();
        let running = Arc::new(Mutex::new(0u32));
        let max_seen = Arc::new(Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let exec = exec.clone();
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let running = Arc::clone(&running);
                    let max_seen = Arc::clone(&max_seen);
                    exec.submit(async move {
                        {
                            let mut r = running.lock().unwrap();
                            *r += 1;
                            let mut m = max_seen.lock().unwrap();
                            *m = (*m).max(*r);
                        }
                        tokio::task::yield_now().await;
                        *running.lock().unwrap() -= 1;
                    });
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let (done_tx, done_rx) = oneshot::channel();
        exec.submit(async move {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();

        assert_eq!(*max_seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn submit_does_not_run_on_caller() {
        let exec = SerialExecutor::new();
        let flag = Arc::new(Mutex::new(false));
        let f = Arc::clone(&flag);
        exec.submit(async move {
            *f.lock().unwrap() = true;
        });
        assert!(!*flag.lock().unwrap());
    }

    #[tokio::test]
    async fn panicking_job_does_not_stop_worker() {
        let exec = SerialExecutor::new();
        let explode = true;
        exec.submit(async move {
            if explode {
                panic!("boom");
            }
        });

        let (tx, rx) = oneshot::channel();
        exec.submit(async move {
            let _ = tx.send(42);
        });
        assert_eq!(rx.await.unwrap(), 42);
    }
}
