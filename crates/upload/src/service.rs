//! The transfer service seam.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::ServiceError;
use crate::types::{AliveTask, TaskHandle, TransferEvent, TransferRequest};

/// Boxed future returned by [`TransferService`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A facility that moves a staged file to a server outside the caller's
/// control flow.
///
/// Implementations report through the event stream: zero or more
/// [`TransferEvent::Progress`] followed by exactly one
/// [`TransferEvent::Completed`] per task.
pub trait TransferService: Send + Sync {
    /// Allocates a task for `source` without starting it.
    fn create_task(
        &self,
        request: TransferRequest,
        source: PathBuf,
    ) -> BoxFuture<'_, Result<TaskHandle, ServiceError>>;

    /// Starts (or resumes) a created task.
    fn resume(&self, handle: TaskHandle) -> BoxFuture<'_, Result<(), ServiceError>>;

    /// Requests cancellation. The task still ends with a `Completed`
    /// event carrying [`TransportError::Cancelled`](crate::TransportError::Cancelled).
    fn cancel(&self, handle: TaskHandle) -> BoxFuture<'_, Result<(), ServiceError>>;

    /// Tasks that have not finished, including ones started by a
    /// previous process.
    fn alive_tasks(&self) -> BoxFuture<'_, Vec<AliveTask>>;

    /// Takes the event receiver. Can only be called once.
    fn take_events(&self) -> Option<mpsc::Receiver<TransferEvent>>;
}
