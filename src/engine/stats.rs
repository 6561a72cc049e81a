use crate::models::ProcessingLocation;
use crate::state_machine::JacsServiceState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Snapshot of engine activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Persisted records waiting for dispatch
    pub queued: u64,
    /// Services currently executing their pipeline
    pub running: usize,
    /// Dispatches blocked on a free execution slot
    pub waiting_for_slot: usize,
    /// Records in the store
    pub total: u64,
    /// Services dispatched since the engine was built
    pub dispatched: u64,
    pub available_slots: BTreeMap<String, usize>,
    pub per_state: BTreeMap<JacsServiceState, u64>,
}

/// Live counters maintained by the dispatcher
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    running: AtomicUsize,
    waiting_for_slot: AtomicUsize,
    in_flight: AtomicUsize,
    dispatched: AtomicU64,
    idle: Notify,
}

impl EngineCounters {
    pub(crate) fn track_dispatch(&self) -> CounterGuard<'_> {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        CounterGuard::new(&self.in_flight, Some(&self.idle))
    }

    pub(crate) fn track_running(&self) -> CounterGuard<'_> {
        CounterGuard::new(&self.running, None)
    }

    pub(crate) fn track_waiting_for_slot(&self) -> CounterGuard<'_> {
        CounterGuard::new(&self.waiting_for_slot, None)
    }

    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn waiting_for_slot(&self) -> usize {
        self.waiting_for_slot.load(Ordering::Acquire)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Wait until no dispatch is in flight
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements its counter when dropped
pub(crate) struct CounterGuard<'a> {
    counter: &'a AtomicUsize,
    on_zero: Option<&'a Notify>,
}

impl<'a> CounterGuard<'a> {
    fn new(counter: &'a AtomicUsize, on_zero: Option<&'a Notify>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self { counter, on_zero }
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        let previous = self.counter.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            if let Some(notify) = self.on_zero {
                notify.notify_waiters();
            }
        }
    }
}

pub(crate) fn location_key(location: ProcessingLocation) -> String {
    location.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guards_balance_counters() {
        let counters = EngineCounters::default();
        {
            let _dispatch = counters.track_dispatch();
            let _running = counters.track_running();
            assert_eq!(counters.in_flight(), 1);
            assert_eq!(counters.running(), 1);
        }
        assert_eq!(counters.in_flight(), 0);
        assert_eq!(counters.running(), 0);
        assert_eq!(counters.dispatched(), 1);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_when_drained() {
        let counters = EngineCounters::default();
        counters.wait_idle().await;
    }

    #[test]
    fn test_stats_serialize_state_keys() {
        let mut stats = EngineStats::default();
        stats.per_state.insert(JacsServiceState::Success, 2);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["per_state"]["success"], 2);
    }
}
