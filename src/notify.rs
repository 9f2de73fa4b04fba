//! One-shot shutdown signalling for background pool tasks.
//!
//! The [`Sender`] half lives with the pool. The [`Receiver`] half is handed to a
//! background task and resolves once the sender has signalled, or has been dropped.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;

use crate::BoxFuture;

#[derive(Debug)]
pub(crate) struct Sender(Option<tokio::sync::watch::Receiver<()>>);

impl Sender {
    /// Signal the receiver. Signalling more than once is a no-op.
    pub(crate) fn send(&mut self) {
        if self.0.take().is_some() {
            tracing::trace!("sending shutdown signal");
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Receiver(Arc<tokio::sync::watch::Sender<()>>);

impl IntoFuture for Receiver {
    type IntoFuture = Notified;
    type Output = ();

    fn into_future(self) -> Self::IntoFuture {
        Notified(Box::pin(async move {
            self.0.closed().await;
        }))
    }
}

#[pin_project::pin_project]
pub(crate) struct Notified(#[pin] BoxFuture<'static, ()>);

impl std::fmt::Debug for Notified {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Notified").finish()
    }
}

impl Future for Notified {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> std::task::Poll<Self::Output> {
        self.project().0.poll(cx)
    }
}

pub(crate) fn channel() -> (Sender, Receiver) {
    let (tx, rx) = tokio::sync::watch::channel(());
    (Sender(Some(rx)), Receiver(Arc::new(tx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn send_is_idempotent() {
        let (mut sender, receiver) = channel();
        assert!(sender.0.is_some());
        assert!(!receiver.0.is_closed());

        sender.send();
        assert!(sender.0.is_none());
        assert!(receiver.0.is_closed());

        sender.send();
        assert!(sender.0.is_none());
    }

    #[tokio::test]
    async fn receiver_wakes_on_send() {
        let (mut sender, receiver) = channel();

        let task = tokio::spawn(async move {
            receiver.await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        sender.send();

        let result = timeout(Duration::from_millis(100), task).await;
        assert!(result.is_ok() && result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn receiver_wakes_on_drop() {
        let (sender, receiver) = channel();

        let task = tokio::spawn(async move {
            receiver.await;
        });

        drop(sender);

        let result = timeout(Duration::from_millis(100), task).await;
        assert!(result.is_ok() && result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn receiver_pending_until_signalled() {
        let (_sender, receiver) = channel();

        let outcome = timeout(Duration::from_millis(10), receiver.into_future()).await;
        assert!(outcome.is_err(), "receiver resolved without a signal");
    }
}
