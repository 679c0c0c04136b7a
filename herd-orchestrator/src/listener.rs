//! Listener registry
//!
//! Pub/sub for job lifecycle events plus one "group completed" callback per
//! owner listener id. Safe for concurrent registration, iteration and
//! removal: notifications iterate over a snapshot, so a listener may
//! unsubscribe from inside a callback.

use herd_core::domain::job::{JobId, JobRecord};
use herd_core::domain::result::ResultType;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Job lifecycle observer. Every method defaults to a no-op.
pub trait JobListener: Send + Sync {
    fn on_submit(&self, _record: &JobRecord) {}

    fn on_start(&self, _owner_id: Option<&str>, _job_id: JobId) {}

    fn on_start_array(&self, _owner_id: Option<&str>, _job_id: JobId, _array_index: u32, _num_started: u32) {}

    fn on_end_array(
        &self,
        _owner_id: Option<&str>,
        _job_id: JobId,
        _array_index: u32,
        _num_ended: u32,
        _num_canceled: u32,
        _num_failed: u32,
    ) {
    }

    fn on_end(&self, _owner_id: Option<&str>, _job_id: JobId, _result_type: ResultType) {}
}

/// Receives a single notification once every job of an owner is terminal
pub trait OwnerListener: Send + Sync {
    fn ended(&self, owner_id: &str, result_type: ResultType);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct ListenerRegistry {
    next_subscription: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn JobListener>)>>,
    owner_listeners: RwLock<HashMap<String, Arc<dyn OwnerListener>>>,
    /// Owners whose completion callback already fired this round
    completed_owners: Mutex<HashSet<String>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn JobListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn register_owner_listener(&self, listener_id: impl Into<String>, listener: Arc<dyn OwnerListener>) {
        self.owner_listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(listener_id.into(), listener);
    }

    pub fn remove_owner_listener(&self, listener_id: &str) -> bool {
        self.owner_listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(listener_id)
            .is_some()
    }

    pub fn has_owner_listener(&self, listener_id: &str) -> bool {
        self.owner_listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(listener_id)
    }

    pub fn owner_listener(&self, listener_id: &str) -> Option<Arc<dyn OwnerListener>> {
        self.owner_listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(listener_id)
            .cloned()
    }

    fn snapshot(&self) -> Vec<Arc<dyn JobListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    pub fn notify_submit(&self, record: &JobRecord) {
        for listener in self.snapshot() {
            listener.on_submit(record);
        }
    }

    pub fn notify_start(&self, owner_id: Option<&str>, job_id: JobId) {
        for listener in self.snapshot() {
            listener.on_start(owner_id, job_id);
        }
    }

    pub fn notify_start_array(&self, owner_id: Option<&str>, job_id: JobId, array_index: u32, num_started: u32) {
        for listener in self.snapshot() {
            listener.on_start_array(owner_id, job_id, array_index, num_started);
        }
    }

    pub fn notify_end_array(
        &self,
        owner_id: Option<&str>,
        job_id: JobId,
        array_index: u32,
        num_ended: u32,
        num_canceled: u32,
        num_failed: u32,
    ) {
        for listener in self.snapshot() {
            listener.on_end_array(owner_id, job_id, array_index, num_ended, num_canceled, num_failed);
        }
    }

    pub fn notify_end(&self, owner_id: Option<&str>, job_id: JobId, result_type: ResultType) {
        for listener in self.snapshot() {
            listener.on_end(owner_id, job_id, result_type);
        }
    }

    /// Starts a new completion round for an owner
    pub fn reset_owner(&self, owner_id: &str) {
        self.completed_owners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(owner_id);
    }

    /// Returns `true` for exactly one caller per completion round
    pub fn claim_owner_completion(&self, owner_id: &str) -> bool {
        self.completed_owners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(owner_id.to_string())
    }
}

/// Reports lifecycle events through tracing
pub struct LoggingListener;

impl JobListener for LoggingListener {
    fn on_submit(&self, record: &JobRecord) {
        tracing::info!(
            job_id = ?record.id,
            owner_id = ?record.spec.owner_id,
            "Job submitted: {}",
            record.spec.web_name
        );
    }

    fn on_start(&self, owner_id: Option<&str>, job_id: JobId) {
        tracing::info!(job_id, owner_id, "Job started");
    }

    fn on_start_array(&self, owner_id: Option<&str>, job_id: JobId, array_index: u32, num_started: u32) {
        tracing::debug!(job_id, owner_id, array_index, num_started, "Array element started");
    }

    fn on_end_array(
        &self,
        owner_id: Option<&str>,
        job_id: JobId,
        array_index: u32,
        num_ended: u32,
        num_canceled: u32,
        num_failed: u32,
    ) {
        tracing::debug!(
            job_id,
            owner_id,
            array_index,
            num_ended,
            num_canceled,
            num_failed,
            "Array element ended"
        );
    }

    fn on_end(&self, owner_id: Option<&str>, job_id: JobId, result_type: ResultType) {
        tracing::info!(job_id, owner_id, %result_type, "Job ended");
    }
}

impl OwnerListener for LoggingListener {
    fn ended(&self, owner_id: &str, result_type: ResultType) {
        tracing::info!(owner_id, %result_type, "All jobs of owner ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        ends: AtomicUsize,
    }

    impl JobListener for Counting {
        fn on_end(&self, _owner_id: Option<&str>, _job_id: JobId, _result_type: ResultType) {
            self.ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let registry = ListenerRegistry::new();
        let listener = Arc::new(Counting::default());
        let id = registry.subscribe(listener.clone());

        registry.notify_end(Some("o"), 1, ResultType::Success);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.notify_end(Some("o"), 2, ResultType::Success);

        assert_eq!(listener.ends.load(Ordering::SeqCst), 1);
    }

    struct SelfRemoving {
        registry: Arc<ListenerRegistry>,
        id: Mutex<Option<SubscriptionId>>,
    }

    impl JobListener for SelfRemoving {
        fn on_end(&self, _owner_id: Option<&str>, _job_id: JobId, _result_type: ResultType) {
            if let Some(id) = self.id.lock().unwrap().take() {
                self.registry.unsubscribe(id);
            }
        }
    }

    #[test]
    fn test_unsubscribe_from_callback() {
        let registry = Arc::new(ListenerRegistry::new());
        let listener = Arc::new(SelfRemoving {
            registry: registry.clone(),
            id: Mutex::new(None),
        });
        let id = registry.subscribe(listener.clone());
        *listener.id.lock().unwrap() = Some(id);

        registry.notify_end(None, 1, ResultType::Failure);
        assert!(listener.id.lock().unwrap().is_none());
    }

    #[test]
    fn test_owner_listeners() {
        let registry = ListenerRegistry::new();
        assert!(!registry.has_owner_listener("log"));
        registry.register_owner_listener("log", Arc::new(LoggingListener));
        assert!(registry.has_owner_listener("log"));
        assert!(registry.owner_listener("log").is_some());
        assert!(registry.remove_owner_listener("log"));
        assert!(registry.owner_listener("log").is_none());
    }

    #[test]
    fn test_owner_completion_claimed_once_per_round() {
        let registry = ListenerRegistry::new();
        assert!(registry.claim_owner_completion("stage-1"));
        assert!(!registry.claim_owner_completion("stage-1"));
        assert!(registry.claim_owner_completion("stage-2"));

        registry.reset_owner("stage-1");
        assert!(registry.claim_owner_completion("stage-1"));
    }
}
