//! Scoped change-event subscriptions.

use campus_core::ChangeEvent;
use std::fmt;
use tokio::sync::mpsc;

/// Identifier assigned by the port to a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// A long-lived feed of change events for one table.
///
/// Events are delivered through a channel the owner drains explicitly.
/// The release hook runs exactly once: on [`Subscription::unsubscribe`], or
/// on drop if the owner never unsubscribed.
pub struct Subscription<T> {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<ChangeEvent<T>>,
    release: Option<ReleaseHook>,
}

impl<T> Subscription<T> {
    pub fn new(
        id: SubscriptionId,
        receiver: mpsc::UnboundedReceiver<ChangeEvent<T>>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id,
            receiver,
            release: Some(Box::new(release)),
        }
    }

    /// Create a subscription together with the sender feeding it.
    pub fn channel(
        id: SubscriptionId,
        release: impl FnOnce() + Send + 'static,
    ) -> (mpsc::UnboundedSender<ChangeEvent<T>>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self::new(id, receiver, release))
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next buffered event, without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent<T>> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the next event. `None` once the feed has closed.
    pub async fn next(&mut self) -> Option<ChangeEvent<T>> {
        self.receiver.recv().await
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }

    /// Release the remote subscription.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        self.receiver.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_core::{new_entity_id, Post};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_subscription(counter: Arc<AtomicUsize>) -> (mpsc::UnboundedSender<ChangeEvent<Post>>, Subscription<Post>) {
        Subscription::channel(SubscriptionId(7), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_unsubscribe_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let (_tx, sub) = counting_subscription(released.clone());
        sub.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        {
            let (_tx, _sub) = counting_subscription(released.clone());
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_next_drains_in_arrival_order() {
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, mut sub) = counting_subscription(released);
        let first = new_entity_id();
        let second = new_entity_id();
        tx.send(ChangeEvent::Deleted(first)).unwrap();
        tx.send(ChangeEvent::Deleted(second)).unwrap();
        assert_eq!(sub.try_next(), Some(ChangeEvent::Deleted(first)));
        assert_eq!(sub.try_next(), Some(ChangeEvent::Deleted(second)));
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn test_sender_fails_after_release() {
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, sub) = counting_subscription(released);
        assert_eq!(sub.id().to_string(), "sub-7");
        sub.unsubscribe();
        assert!(tx.send(ChangeEvent::Deleted(new_entity_id())).is_err());
    }
}
