//! Bounded-concurrency work queue that can grow while it drains

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::error::RunnerError;

pub type Job = BoxFuture<'static, anyhow::Result<()>>;

struct Shared<T> {
    pending: Mutex<VecDeque<T>>,
    added: Notify,
    concurrency: usize,
}

/// Cloneable handle to a work queue.
///
/// Items may be added at any time, including from inside a running item; the
/// queue only completes once nothing is pending and nothing is in flight.
pub struct Queue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Queue<T> {
    pub fn new(concurrency: usize) -> Self {
        Self::with_items(Vec::new(), concurrency)
    }

    pub fn with_items(items: impl IntoIterator<Item = T>, concurrency: usize) -> Self {
        Queue {
            shared: Arc::new(Shared {
                pending: Mutex::new(items.into_iter().collect()),
                added: Notify::new(),
                concurrency: concurrency.max(1),
            }),
        }
    }

    pub fn add(&self, item: T) {
        self.lock().push_back(item);
        self.shared.added.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.shared.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Drain the queue, running `factory(item)` for each item with at most
    /// `concurrency` jobs in flight.
    ///
    /// The first failure stops new items from starting. Jobs already in
    /// flight are awaited and their results discarded before the failure is
    /// returned.
    pub async fn run<F>(&self, factory: F) -> anyhow::Result<()>
    where
        F: Fn(T) -> Job,
    {
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.len() < self.shared.concurrency {
                match self.next() {
                    Some(item) => {
                        in_flight.spawn(factory(item));
                    }
                    None => break,
                }
            }

            if in_flight.is_empty() {
                return Ok(());
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    let outcome = match joined {
                        Some(Ok(result)) => result,
                        Some(Err(join_error)) => {
                            Err(RunnerError::TaskPanicked(join_error.to_string()).into())
                        }
                        None => Ok(()),
                    };
                    if let Err(error) = outcome {
                        let stragglers = in_flight.len();
                        if stragglers > 0 {
                            tracing::debug!(stragglers, "queue failed, awaiting in-flight jobs");
                        }
                        while in_flight.join_next().await.is_some() {}
                        return Err(error);
                    }
                }
                _ = self.shared.added.notified() => {}
            }
        }
    }
}
