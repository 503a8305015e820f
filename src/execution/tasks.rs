//! Bounded spawning and ordered collection of worker tasks

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// A batch of spawned tasks sharing one concurrency limiter.
///
/// Submission blocks until a permit is free, so at most `limiter` capacity
/// tasks are in flight at once. Results come back in submission order
/// regardless of completion order.
pub(crate) struct TaskBatch<T> {
    limiter: Arc<Semaphore>,
    handles: Vec<JoinHandle<Result<T>>>,
}

impl<T: Send + 'static> TaskBatch<T> {
    pub fn new(limiter: Arc<Semaphore>) -> Self {
        Self {
            limiter,
            handles: Vec::new(),
        }
    }

    /// Spawn one task once a permit is available. The permit is released
    /// when the task finishes.
    pub async fn submit<F>(&mut self, task: F) -> Result<()>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("worker task limiter closed".to_string()))?;
        self.handles.push(tokio::spawn(async move {
            let _permit = permit;
            task.await
        }));
        Ok(())
    }

    /// Await every task and return their results in submission order.
    ///
    /// All tasks run to completion even when some fail; the earliest
    /// failure by submission order is the one reported.
    pub async fn join_ordered(self) -> Result<Vec<T>> {
        let mut results = Vec::with_capacity(self.handles.len());
        let mut first_error: Option<Error> = None;
        for handle in self.handles {
            match handle.await {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(error)) => {
                    first_error.get_or_insert(error);
                }
                Err(join_error) => {
                    first_error
                        .get_or_insert(Error::Internal(format!("worker task failed: {join_error}")));
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(results),
        }
    }
}
