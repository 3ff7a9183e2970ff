use async_std::channel::{bounded, Receiver, Sender, TrySendError};
use log::*;
use std::sync::{Mutex, MutexGuard, PoisonError};

/**
 * How many changes a subscriber may fall behind before it is cut off
 */
pub const SUBSCRIBER_BACKLOG: usize = 64;

/**
 * A value the display layer can read and watch.
 *
 * Each subscriber first receives the current value, then every later one.
 * Subscribers that hung up are forgotten on the next change. A subscriber that stops
 * reading is cut off once it is `SUBSCRIBER_BACKLOG` changes behind: it can still drain
 * what was queued, then sees the channel close and may subscribe again.
 */
#[derive(Debug)]
pub struct Observable<T> {
    value: T,
    subscribers: Vec<Sender<T>>,
}

impl<T: Clone> Observable<T> {
    pub fn new(value: T) -> Self {
        Observable {
            value,
            subscribers: vec![],
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.subscribers
            .retain(|subscriber| match subscriber.try_send(value.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Dropping a subscriber that fell {} changes behind",
                        SUBSCRIBER_BACKLOG
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            });
        self.value = value;
    }

    pub fn subscribe(&mut self) -> Receiver<T> {
        let (sender, receiver) = bounded(SUBSCRIBER_BACKLOG);
        if sender.try_send(self.value.clone()).is_ok() {
            self.subscribers.push(sender);
        }
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/**
 * Nothing holding one of our locks can leave the state half-written, so a poisoned
 * lock is still safe to use.
 */
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn test_subscriber_sees_current_then_changes() {
        let mut value = Observable::new(1);
        let updates = value.subscribe();
        value.set(2);
        value.set(3);

        assert_eq!(updates.recv().await.unwrap(), 1);
        assert_eq!(updates.recv().await.unwrap(), 2);
        assert_eq!(updates.recv().await.unwrap(), 3);
        assert_eq!(*value.get(), 3);
    }

    #[test]
    fn test_dropped_subscribers_are_forgotten() {
        let mut value = Observable::new("idle");
        let kept = value.subscribe();
        drop(value.subscribe());
        assert_eq!(value.subscriber_count(), 2);

        value.set("saving");
        assert_eq!(value.subscriber_count(), 1);
        assert_eq!(kept.len(), 2);
    }

    #[async_std::test]
    async fn test_stalled_subscriber_is_cut_off() {
        let mut value = Observable::new(0);
        let stalled = value.subscribe();
        for n in 1..=SUBSCRIBER_BACKLOG * 2 {
            value.set(n);
        }
        assert_eq!(value.subscriber_count(), 0);
        assert_eq!(stalled.len(), SUBSCRIBER_BACKLOG);

        let mut seen = vec![];
        while let Ok(n) = stalled.recv().await {
            seen.push(n);
        }
        assert_eq!(seen, (0..SUBSCRIBER_BACKLOG).collect::<Vec<_>>());

        let again = value.subscribe();
        assert_eq!(again.recv().await.unwrap(), SUBSCRIBER_BACKLOG * 2);
    }
}
