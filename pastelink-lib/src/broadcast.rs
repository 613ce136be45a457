//! One-to-many notification streams with a single terminal event.
//!
//! A [`Broadcast`] delivers every published value to all subscribers that exist
//! at publication time, in publication order. It ends exactly once, either with
//! [`Broadcast::cancel`] (success) or [`Broadcast::deactivate`] (failure).
//! There is no replay buffer: late subscribers only see later values, or the
//! terminal event if the stream has already ended.

use std::{convert::Infallible, fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

enum Notification<T, E> {
    Next(T),
    Failed(E),
}

#[derive(Clone)]
enum Terminal<E> {
    Cancelled,
    Deactivated(E),
}

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send>;

struct Waiter<T, E> {
    predicate: Predicate<T>,
    tx: oneshot::Sender<Result<Option<T>, E>>,
}

struct Inner<T, E> {
    subscribers: Vec<mpsc::UnboundedSender<Notification<T, E>>>,
    waiters: Vec<Waiter<T, E>>,
    terminal: Option<Terminal<E>>,
}

pub struct Broadcast<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for Broadcast<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Default for Broadcast<T, E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscribers: Vec::new(),
                waiters: Vec::new(),
                terminal: None,
            })),
        }
    }
}

impl<T, E> fmt::Debug for Broadcast<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Broadcast")
            .field("subscribers", &inner.subscribers.len())
            .field("waiters", &inner.waiters.len())
            .field("terminated", &inner.terminal.is_some())
            .finish()
    }
}

impl<T, E> Broadcast<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.lock().terminal.is_some()
    }

    pub fn publish(&self, value: T) {
        let mut inner = self.inner.lock();
        if inner.terminal.is_some() {
            trace!("publish after termination dropped");
            return;
        }
        inner
            .subscribers
            .retain(|tx| tx.send(Notification::Next(value.clone())).is_ok());

        let (matched, pending): (Vec<_>, Vec<_>) = inner
            .waiters
            .drain(..)
            .partition(|waiter| (waiter.predicate)(&value));
        inner.waiters = pending;
        for waiter in matched {
            let _ = waiter.tx.send(Ok(Some(value.clone())));
        }
    }

    /// Ends the stream successfully. Has no effect once the stream has ended.
    pub fn cancel(&self) {
        self.terminate(Terminal::Cancelled);
    }

    /// Ends the stream with a failure that every subscriber observes.
    pub fn deactivate(&self, err: E) {
        self.terminate(Terminal::Deactivated(err));
    }

    fn terminate(&self, terminal: Terminal<E>) {
        let mut inner = self.inner.lock();
        if inner.terminal.is_some() {
            return;
        }
        if let Terminal::Deactivated(err) = &terminal {
            for tx in &inner.subscribers {
                let _ = tx.send(Notification::Failed(err.clone()));
            }
        }
        // Dropping the senders ends every subscription after its queued items.
        inner.subscribers.clear();
        for waiter in inner.waiters.drain(..) {
            let _ = waiter.tx.send(match &terminal {
                Terminal::Cancelled => Ok(None),
                Terminal::Deactivated(err) => Err(err.clone()),
            });
        }
        inner.terminal = Some(terminal);
    }

    pub fn subscribe(&self) -> Subscription<T, E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        match &inner.terminal {
            None => inner.subscribers.push(tx),
            Some(Terminal::Cancelled) => {}
            Some(Terminal::Deactivated(err)) => {
                let _ = tx.send(Notification::Failed(err.clone()));
            }
        }
        Subscription { rx }
    }

    /// Resolves with the first value published from now on that satisfies
    /// `predicate`.
    ///
    /// Resolves with `Ok(None)` if the stream is cancelled first and with the
    /// error if it is deactivated first. The waiter is registered before this
    /// method returns, so values published afterwards are never missed.
    pub fn first(
        &self,
        predicate: impl Fn(&T) -> bool + Send + 'static,
    ) -> impl std::future::Future<Output = Result<Option<T>, E>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            // Waiters whose future was dropped are never resolved.
            inner.waiters.retain(|waiter| !waiter.tx.is_closed());
            match &inner.terminal {
                None => inner.waiters.push(Waiter {
                    predicate: Box::new(predicate),
                    tx,
                }),
                Some(Terminal::Cancelled) => {
                    let _ = tx.send(Ok(None));
                }
                Some(Terminal::Deactivated(err)) => {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
        async move { rx.await.unwrap_or(Ok(None)) }
    }
}

pub struct Subscription<T, E> {
    rx: mpsc::UnboundedReceiver<Notification<T, E>>,
}

impl<T, E> Subscription<T, E> {
    /// Returns `None` once the stream has ended. A failed stream yields its
    /// error once before that.
    pub async fn next(&mut self) -> Option<Result<T, E>> {
        match self.rx.recv().await? {
            Notification::Next(value) => Some(Ok(value)),
            Notification::Failed(err) => Some(Err(err)),
        }
    }

    /// Non-blocking variant of [`Subscription::next`]; `None` if nothing is
    /// queued right now.
    pub fn try_next(&mut self) -> Option<Result<T, E>> {
        match self.rx.try_recv().ok()? {
            Notification::Next(value) => Some(Ok(value)),
            Notification::Failed(err) => Some(Err(err)),
        }
    }
}

impl<T> Subscription<T, Infallible> {
    pub async fn recv(&mut self) -> Option<T> {
        match self.next().await? {
            Ok(value) => Some(value),
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Stream = Broadcast<u32, String>;

    #[tokio::test]
    async fn delivers_in_order_to_every_subscriber() {
        let stream = Stream::new();
        let mut a = stream.subscribe();
        let mut b = stream.subscribe();
        stream.publish(1);
        stream.publish(2);
        stream.cancel();

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.next().await, Some(Ok(1)));
            assert_eq!(sub.next().await, Some(Ok(2)));
            assert_eq!(sub.next().await, None);
        }
    }

    #[tokio::test]
    async fn late_subscriber_does_not_see_earlier_values() {
        let stream = Stream::new();
        stream.publish(1);
        let mut late = stream.subscribe();
        stream.publish(2);
        assert_eq!(late.next().await, Some(Ok(2)));
        assert!(late.try_next().is_none());
    }

    #[tokio::test]
    async fn only_the_first_terminal_event_counts() {
        let stream = Stream::new();
        let mut sub = stream.subscribe();
        stream.deactivate("boom".to_owned());
        stream.cancel();
        stream.deactivate("again".to_owned());
        stream.publish(3);

        assert_eq!(sub.next().await, Some(Err("boom".to_owned())));
        assert_eq!(sub.next().await, None);

        let mut after = stream.subscribe();
        assert_eq!(after.next().await, Some(Err("boom".to_owned())));
        assert_eq!(after.next().await, None);
    }

    #[tokio::test]
    async fn subscription_after_cancel_ends_immediately() {
        let stream = Stream::new();
        stream.cancel();
        let mut sub = stream.subscribe();
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn first_waits_for_a_matching_value() {
        let stream = Stream::new();
        let wait = stream.first(|value| *value >= 3);
        stream.publish(1);
        stream.publish(3);
        stream.publish(4);
        assert_eq!(wait.await, Ok(Some(3)));
    }

    #[tokio::test]
    async fn first_is_unwound_by_termination() {
        let stream = Stream::new();
        let cancelled = stream.first(|_| true);
        stream.cancel();
        assert_eq!(cancelled.await, Ok(None));

        let stream = Stream::new();
        let failed = stream.first(|_| true);
        stream.deactivate("fatal".to_owned());
        assert_eq!(failed.await, Err("fatal".to_owned()));
        assert_eq!(stream.first(|_| true).await, Err("fatal".to_owned()));
    }

    #[tokio::test]
    async fn abandoned_waiters_are_released() {
        let stream = Stream::new();
        drop(stream.first(|_| true));
        drop(stream.first(|_| true));
        let wait = stream.first(|value| *value == 2);
        assert_eq!(stream.inner.lock().waiters.len(), 1);

        stream.publish(2);
        assert_eq!(wait.await, Ok(Some(2)));
        assert!(stream.inner.lock().waiters.is_empty());
    }

    #[tokio::test]
    async fn message_stream_can_only_be_cancelled() {
        let stream = Broadcast::<&'static str, Infallible>::new();
        let mut sub = stream.subscribe();
        stream.publish("hi");
        stream.cancel();
        assert_eq!(sub.recv().await, Some("hi"));
        assert_eq!(sub.recv().await, None);
    }
}
