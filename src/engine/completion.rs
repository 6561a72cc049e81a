use crate::models::ServiceId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// Per-service wake-ups for callers waiting on a terminal state.
///
/// Waiters must register and enable their `Notified` future before re-reading the persisted
/// state; a notification sent between the read and the wait is then never lost.
#[derive(Debug, Default)]
pub struct CompletionNotifier {
    waiters: DashMap<ServiceId, Arc<Notify>>,
}

impl CompletionNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, service_id: ServiceId) -> Arc<Notify> {
        self.waiters
            .entry(service_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Wake every waiter of `service_id`; called after the terminal state is persisted
    pub fn notify(&self, service_id: ServiceId) {
        if let Some((_, notify)) = self.waiters.remove(&service_id) {
            notify.notify_waiters();
        }
    }

    /// Give back a subscription whose service turned out to be terminal already.
    ///
    /// The entry is dropped unless another waiter still holds it; it would otherwise only be
    /// removed by a `notify` that never comes.
    pub fn release(&self, service_id: ServiceId, notify: Arc<Notify>) {
        drop(notify);
        self.waiters
            .remove_if(&service_id, |_, notify| Arc::strong_count(notify) == 1);
    }

    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}
