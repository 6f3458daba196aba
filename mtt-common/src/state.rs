//! Shared test state between the orchestration flow and the producer task.
//!
//! Every flag read and write happens under the state lock. Waiters are woken
//! through a [`Notify`] instead of polling, and every wait is bounded so the
//! caller can log progress and enforce its own deadline.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;

/// Free-form configuration key holding the coordination connect string.
pub const ZK_CONNECT_STR: &str = "zk_connect_str";

#[derive(Debug, Default)]
struct StateInner {
    stop_requested: bool,
    stop_acknowledged: bool,
    config: BTreeMap<String, String>,
}

/// Point-in-time copy of the shared state, for logs and assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub stop_requested: bool,
    pub stop_acknowledged: bool,
    pub config: BTreeMap<String, String>,
}

/// One instance per test case. Neither flag ever returns to false.
#[derive(Debug, Default)]
pub struct SharedTestState {
    inner: Mutex<StateInner>,
    changed: Notify,
}

impl SharedTestState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().expect("shared test state mutex poisoned")
    }

    /// Ask the producer task to stop. Returns true on the first request.
    pub fn request_stop(&self) -> bool {
        let first = {
            let mut inner = self.lock();
            let first = !inner.stop_requested;
            inner.stop_requested = true;
            first
        };
        self.changed.notify_waiters();
        first
    }

    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    /// Called by the producer task once it has ceased all writes.
    /// Returns true only for the first acknowledgment.
    pub fn acknowledge_stop(&self) -> bool {
        let first = {
            let mut inner = self.lock();
            let first = !inner.stop_acknowledged;
            inner.stop_acknowledged = true;
            first
        };
        self.changed.notify_waiters();
        first
    }

    pub fn stop_acknowledged(&self) -> bool {
        self.lock().stop_acknowledged
    }

    pub fn set_config(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().config.insert(key.into(), value.into());
    }

    pub fn config(&self, key: &str) -> Option<String> {
        self.lock().config.get(key).cloned()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.lock();
        StateSnapshot {
            stop_requested: inner.stop_requested,
            stop_acknowledged: inner.stop_acknowledged,
            config: inner.config.clone(),
        }
    }

    /// Wait up to `wait` for the acknowledgment, returning whether it was observed.
    /// The lock is never held while suspended.
    pub async fn acknowledged_within(&self, wait: Duration) -> bool {
        self.flag_within(wait, |inner| inner.stop_acknowledged).await
    }

    /// Wait up to `wait` for a stop request, returning whether one was observed.
    pub async fn stop_requested_within(&self, wait: Duration) -> bool {
        self.flag_within(wait, |inner| inner.stop_requested).await
    }

    async fn flag_within(&self, wait: Duration, flag: fn(&StateInner) -> bool) -> bool {
        let notified = self.changed.notified();
        tokio::pin!(notified);
        // Register before checking so a notification between check and await is not lost.
        notified.as_mut().enable();

        if flag(&*self.lock()) {
            return true;
        }
        let _ = tokio::time::timeout(wait, notified).await;
        flag(&*self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_flags_are_monotonic() {
        let state = SharedTestState::new();
        assert!(state.request_stop());
        assert!(!state.request_stop());
        assert!(state.stop_requested());

        assert!(state.acknowledge_stop());
        assert!(!state.acknowledge_stop());
        assert!(state.stop_acknowledged());
    }

    #[test]
    fn test_free_form_config() {
        let state = SharedTestState::new();
        assert_eq!(state.config(ZK_CONNECT_STR), None);
        state.set_config(ZK_CONNECT_STR, "localhost:2188");
        assert_eq!(state.config(ZK_CONNECT_STR).as_deref(), Some("localhost:2188"));
        assert_eq!(state.snapshot().config.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_within_times_out_without_ack() {
        let state = SharedTestState::new();
        let start = tokio::time::Instant::now();
        assert!(!state.acknowledged_within(Duration::from_secs(2)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_within_wakes_on_ack() {
        let state = Arc::new(SharedTestState::new());
        let producer = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                state.acknowledge_stop();
            })
        };

        let start = tokio::time::Instant::now();
        assert!(state.acknowledged_within(Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_secs(10));
        producer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_request_wakes_waiter() {
        let state = Arc::new(SharedTestState::new());
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.stop_requested_within(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        state.request_stop();
        assert!(waiter.await.unwrap());
    }
}
