use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::oneshot;

/// A type-erased unit of work queued on a partition worker.
pub type PartitionOperation = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Outcome of waiting on a [`CompletionHandle`].
#[derive(Debug, PartialEq, Eq)]
pub enum Completion<T> {
    Done(T),
    /// The bound elapsed first. The operation may still complete later.
    TimedOut,
    /// The operation can never report back (it panicked, or the worker stopped).
    Interrupted,
}

/// Handle to the result of an operation submitted to a partition worker.
pub struct CompletionHandle<T> {
    partition_id: u32,
    receiver: oneshot::Receiver<T>,
}

impl<T> CompletionHandle<T> {
    pub(crate) fn new(partition_id: u32, receiver: oneshot::Receiver<T>) -> Self {
        Self {
            partition_id,
            receiver,
        }
    }

    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// Waits at most `timeout` for the operation to finish.
    pub async fn await_completion(self, timeout: Duration) -> Completion<T> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(value)) => Completion::Done(value),
            Ok(Err(_)) => Completion::Interrupted,
            Err(_) => Completion::TimedOut,
        }
    }

    /// Waits without a bound. `None` when the operation can never report back.
    pub async fn join(self) -> Option<T> {
        self.receiver.await.ok()
    }
}
