use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Handle returned by `on_message` / `on_typing`; pass it to `remove_observer`.
pub type ObserverId = u64;

/// A registered observer: its id plus the receiving end of its queue.
///
/// Dropping the subscription unregisters it lazily, on the next publish.
#[derive(Debug)]
pub struct Subscription<T> {
    id: ObserverId,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Next event, or `None` once the observer has been removed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out of one event kind to many observers.
pub(crate) struct Registry<T> {
    observers: Mutex<HashMap<ObserverId, mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, id: ObserverId) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().insert(id, tx);
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.lock().remove(&id).is_some()
    }

    /// Deliver to every live observer, pruning the ones whose receiver is gone.
    pub fn publish(&self, value: &T) {
        self.observers
            .lock()
            .retain(|_, tx| tx.send(value.clone()).is_ok());
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_observer() {
        let registry = Registry::new();
        let mut a = registry.subscribe(1);
        let mut b = registry.subscribe(2);

        registry.publish(&"hi".to_string());

        assert_eq!(a.try_recv().as_deref(), Some("hi"));
        assert_eq!(b.try_recv().as_deref(), Some("hi"));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = Registry::new();
        let mut a = registry.subscribe(1);

        assert!(registry.unsubscribe(a.id()));
        assert!(!registry.unsubscribe(a.id()));
        registry.publish(&7u32);

        assert_eq!(a.try_recv(), None);
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let registry = Registry::new();
        let kept = registry.subscribe(1);
        drop(registry.subscribe(2));
        assert_eq!(registry.len(), 2);

        registry.publish(&0u8);
        assert_eq!(registry.len(), 1);
        drop(kept);
    }
}
