//! Single-shot completion future.
//!
//! A command's completion travels through an [`ImapFuture`]. The producing
//! side is a [`Completer`]: the first `done` call wins, every later call is
//! a no-op, and racing writers are serialized. The consuming side is a
//! plain [`std::future::Future`], with an advisory [`ImapFuture::cancel`]
//! that resolves the future without affecting the in-flight command.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{FailureType, ImapClientError};

type Outcome<T> = Result<T, ImapClientError>;

/// Creates a completer/future pair for one command submission.
pub(crate) fn channel<T>(session_id: u64) -> (Completer<T>, ImapFuture<T>) {
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));

    let completer = Completer { slot };
    let future = ImapFuture {
        rx,
        canceller: completer.clone(),
        session_id,
    };

    (completer, future)
}

/// Producing half: delivers the single completion value.
#[derive(Debug)]
pub(crate) struct Completer<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<Outcome<T>>>>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Completer<T> {
    /// Delivers `outcome` if nothing was delivered yet. Returns whether this
    /// call was the one that completed the future.
    pub(crate) fn done(&self, outcome: Outcome<T>) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            // A poisoned slot means a completing thread panicked; nothing
            // can be delivered anymore.
            Err(_) => None,
        };

        match sender {
            // The receiver may already be gone (dropped or cancelled);
            // delivery is then a harmless no-op but still counts as done.
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Consuming half: resolves once with the command outcome.
#[derive(Debug)]
pub struct ImapFuture<T> {
    rx: oneshot::Receiver<Outcome<T>>,
    canceller: Completer<T>,
    session_id: u64,
}

impl<T> ImapFuture<T> {
    /// Advisory cancellation: resolves this future with
    /// [`FailureType::Cancelled`]. The in-flight command is not terminated;
    /// its eventual completion is dropped.
    pub fn cancel(&self) {
        self.canceller.done(Err(ImapClientError::new(
            FailureType::Cancelled,
            self.session_id,
        )));
    }
}

impl<T> Future for ImapFuture<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Completer dropped without delivering: the session died.
            Poll::Ready(Err(_)) => Poll::Ready(Err(ImapClientError::new(
                FailureType::ConnectionInactive,
                self.session_id,
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
