//! Broadcast event bus, distinct from softirq: all subscriptions fire on
//! each EVENT signal, in registration (LIFO) order.

use std::sync::Mutex;

pub trait EventSubscriber: std::fmt::Debug + Send + Sync {
    fn notify(&self);
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Box<dyn EventSubscriber>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Box<dyn EventSubscriber>) {
        self.subscribers.lock().unwrap().insert(0, subscriber);
    }

    /// Invoked on the EVENT signal; subscribers run serially on the
    /// servicing context.
    pub fn fire_all(&self) {
        for subscriber in self.subscribers.lock().unwrap().iter() {
            subscriber.notify();
        }
    }
}
