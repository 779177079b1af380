use crossbeam_channel::{Receiver, Sender};

/// Typed publish/subscribe channel. Each subscriber gets its own queue;
/// dropping a [`Subscription`] unsubscribes it.
pub struct EventBus<E> {
    subscribers: Vec<Sender<E>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn subscribe(&mut self) -> Subscription<E> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        Subscription { rx }
    }

    pub fn publish(&mut self, event: E) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Disconnect everyone; subscriptions drain what was already sent.
    pub fn close(&mut self) {
        self.subscribers.clear();
    }
}

pub struct Subscription<E> {
    rx: Receiver<E>,
}

impl<E> Subscription<E> {
    /// Everything published since the last drain, oldest first.
    pub fn drain(&self) -> Vec<E> {
        self.rx.try_iter().collect()
    }

    pub fn unsubscribe(self) {}
}
