//! Cancellable operation handles
//!
//! Cancellation is best-effort, not transactional. Aborting a handle stops
//! the local task at its next suspension point; a request that already
//! reached the store may still have been applied there.

use kvmap_common::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::debug;

/// A template operation running on its own task
#[must_use = "dropping a handle detaches the operation"]
pub struct OperationHandle<T> {
    handle: JoinHandle<Result<T>>,
}

impl<T> OperationHandle<T> {
    pub(crate) const fn new(handle: JoinHandle<Result<T>>) -> Self {
        Self { handle }
    }

    /// Request cancellation; the handle then resolves to
    /// [`Error::Cancelled`] unless the operation already finished
    pub fn cancel(&self) {
        debug!("Cancelling operation");
        self.handle.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for OperationHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(Error::Cancelled)),
            Poll::Ready(Err(e)) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}
