//! Device state change notifications and a small subscription interface for
//! them.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, PoisonError,
};

use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};

use crate::model::Attributes;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StateChange {
    pub entity_id: String,
    pub old_state: Option<Attributes>,
    pub new_state: Option<Attributes>,
}

pub type Filter = Box<dyn Fn(&StateChange) -> bool + Send + Sync>;
pub type Callback = Box<dyn Fn(StateChange) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Listener {
    id: SubscriptionId,
    filter: Filter,
    callback: Callback,
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, filter: Filter, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener {
                id,
                filter,
                callback,
            });
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|x| x.id != id);
        listeners.len() != before
    }

    /// Runs every listener whose filter accepts `change` and waits for them.
    /// Returns how many listeners ran.
    pub async fn publish(&self, change: StateChange) -> usize {
        let pending: Vec<_> = {
            let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners
                .iter()
                .filter(|x| (x.filter)(&change))
                .map(|x| (x.callback)(change.clone()))
                .collect()
        };
        let count = pending.len();
        join_all(pending).await;
        count
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::AtomicUsize, Arc};

    use futures::FutureExt;

    use super::*;

    fn change(entity_id: &str) -> StateChange {
        StateChange {
            entity_id: entity_id.to_string(),
            old_state: None,
            new_state: Some(Attributes::default()),
        }
    }

    fn counter(hits: &Arc<AtomicUsize>) -> Callback {
        let hits = hits.clone();
        Box::new(move |_: StateChange| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn filters_and_unsubscribes() {
        let bus = EventBus::new();
        let trackers = Arc::new(AtomicUsize::new(0));
        let everything = Arc::new(AtomicUsize::new(0));

        let id = bus.subscribe(
            Box::new(|x: &StateChange| x.entity_id.starts_with("device_tracker.")),
            counter(&trackers),
        );
        bus.subscribe(Box::new(|_: &StateChange| true), counter(&everything));

        assert_eq!(bus.publish(change("device_tracker.a")).await, 2);
        assert_eq!(bus.publish(change("light.kitchen")).await, 1);
        assert_eq!(trackers.load(Ordering::SeqCst), 1);
        assert_eq!(everything.load(Ordering::SeqCst), 2);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.publish(change("device_tracker.a")).await, 1);
        assert_eq!(trackers.load(Ordering::SeqCst), 1);
    }
}
