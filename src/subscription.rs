//! Sample fan-out to live listeners

use crate::types::HeartRateSample;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

type Listener = Arc<dyn Fn(&HeartRateSample) + Send + Sync>;

#[derive(Default)]
struct ListenerList {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Listener)>>,
}

/// Observer list that delivers every decoded sample to all current listeners
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<ListenerList>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. It stays registered until the returned handle is
    /// dropped or [`Subscription::unsubscribe`] is called.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&HeartRateSample) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));

        Subscription {
            id,
            list: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `sample` to every listener.
    ///
    /// The list is copied before delivery so listeners may subscribe or
    /// unsubscribe from inside their callback.
    pub fn notify(&self, sample: &HeartRateSample) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`Subscribers::subscribe`]
pub struct Subscription {
    id: u64,
    list: Weak<ListenerList>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.listeners
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}
