use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::errors::HandleError;
use crate::receiver::Receiver;

/// Deferred result of [`Sender::send_async`](crate::Sender::send_async).
///
/// Resolves exactly once, to the completed [`Receiver`] or to a
/// [`HandleError`]. Transport failures are not errors here; they are part of
/// the receiver like they are for blocking sends.
///
/// Dropping the handle does not stop the attempt: the request still completes
/// and the post-processors still run. Call [`cancel`](Self::cancel) for that.
pub struct ResponseHandle<B> {
    rx: oneshot::Receiver<Receiver<B>>,
    cancel: CancellationToken,
}

impl<B> ResponseHandle<B> {
    pub(crate) fn new(rx: oneshot::Receiver<Receiver<B>>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Aborts the attempt if it has not completed yet. Post-processors do not
    /// run for a cancelled attempt and the handle resolves to
    /// [`HandleError::Cancelled`]. A receiver that was already delivered is
    /// still returned.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Blocks the current thread until the attempt resolves.
    ///
    /// Panics when called from inside an async context; `.await` the handle there.
    pub fn wait(mut self) -> Result<Receiver<B>, HandleError> {
        match self.rx.try_recv() {
            Ok(receiver) => Ok(receiver),
            Err(TryRecvError::Closed) => Err(closed(&self.cancel)),
            Err(TryRecvError::Empty) if self.cancel.is_cancelled() => Err(HandleError::Cancelled),
            Err(TryRecvError::Empty) => self.rx.blocking_recv().map_err(|_| closed(&self.cancel)),
        }
    }
}

fn closed(cancel: &CancellationToken) -> HandleError {
    if cancel.is_cancelled() {
        HandleError::Cancelled
    } else {
        HandleError::Lost
    }
}

impl<B> Future for ResponseHandle<B> {
    type Output = Result<Receiver<B>, HandleError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.rx).poll(cx);
        match polled {
            Poll::Ready(Ok(receiver)) => Poll::Ready(Ok(receiver)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(closed(&self.cancel))),
            Poll::Pending if self.cancel.is_cancelled() => Poll::Ready(Err(HandleError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<B> fmt::Debug for ResponseHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
