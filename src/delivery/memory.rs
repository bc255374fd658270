//! In-process delivery service.
//!
//! Holds pending triggers in memory and records every call in order, so
//! scheduling behaviour can be asserted deterministically. Also usable by
//! hosts that poll [`InMemoryDeliveryService::take_due`] themselves.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::{DeliveryError, DeliveryService};
use crate::models::PendingTrigger;

/// One call made against the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryCall {
    Enqueue(String),
    Cancel(Vec<String>),
    List(String),
}

#[derive(Default)]
struct Inner {
    pending: BTreeMap<String, PendingTrigger>,
    calls: Vec<DeliveryCall>,
    rejected_prefixes: HashSet<String>,
    offline: bool,
}

#[derive(Default)]
pub struct InMemoryDeliveryService {
    inner: Mutex<Inner>,
}

impl InMemoryDeliveryService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of pending triggers, ordered by id.
    pub fn pending(&self) -> Vec<PendingTrigger> {
        self.lock().pending.values().cloned().collect()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.lock().pending.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<DeliveryCall> {
        self.lock().calls.clone()
    }

    /// Every id passed to `cancel`, in call order.
    pub fn cancelled_ids(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                DeliveryCall::Cancel(ids) => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Reject every enqueue whose id starts with `prefix`.
    pub fn reject_enqueue_of(&self, prefix: impl Into<String>) {
        self.lock().rejected_prefixes.insert(prefix.into());
    }

    pub fn accept_all(&self) {
        self.lock().rejected_prefixes.clear();
    }

    /// While offline every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Remove and return the triggers due at `now`, as the host would
    /// when delivering them.
    pub fn take_due(&self, now: NaiveDateTime) -> Vec<PendingTrigger> {
        let mut inner = self.lock();
        let due: Vec<String> = inner
            .pending
            .values()
            .filter(|t| t.fire_at <= now)
            .map(|t| t.id.clone())
            .collect();
        due.iter().filter_map(|id| inner.pending.remove(id)).collect()
    }
}

#[async_trait]
impl DeliveryService for InMemoryDeliveryService {
    async fn enqueue(&self, trigger: PendingTrigger) -> Result<(), DeliveryError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(DeliveryError::Unavailable("offline".into()));
        }
        inner.calls.push(DeliveryCall::Enqueue(trigger.id.clone()));
        if inner.rejected_prefixes.iter().any(|p| trigger.id.starts_with(p.as_str())) {
            return Err(DeliveryError::Rejected {
                id: trigger.id,
                reason: "rejected by test configuration".into(),
            });
        }
        inner.pending.insert(trigger.id.clone(), trigger);
        Ok(())
    }

    async fn cancel(&self, ids: &[String]) -> Result<(), DeliveryError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(DeliveryError::Unavailable("offline".into()));
        }
        inner.calls.push(DeliveryCall::Cancel(ids.to_vec()));
        for id in ids {
            inner.pending.remove(id);
        }
        Ok(())
    }

    async fn list_pending(&self, prefix: &str) -> Result<Vec<PendingTrigger>, DeliveryError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(DeliveryError::Unavailable("offline".into()));
        }
        inner.calls.push(DeliveryCall::List(prefix.to_string()));
        Ok(inner
            .pending
            .values()
            .filter(|t| t.id.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerPayload;
    use chrono::NaiveDate;

    fn trigger(id: &str, hour: u32) -> PendingTrigger {
        PendingTrigger {
            id: id.into(),
            fire_at: NaiveDate::from_ymd_opt(2025, 1, 10)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            payload: TriggerPayload::default(),
        }
    }

    #[tokio::test]
    async fn enqueue_replaces_same_id() {
        let service = InMemoryDeliveryService::new();
        service.enqueue(trigger("a_08_00", 8)).await.unwrap();
        service.enqueue(trigger("a_08_00", 9)).await.unwrap();
        let pending = service.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fire_at.time().format("%H").to_string(), "09");
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_cancel_ignores_unknown() {
        let service = InMemoryDeliveryService::new();
        service.enqueue(trigger("a_08_00", 8)).await.unwrap();
        service.enqueue(trigger("b_08_00", 8)).await.unwrap();

        let listed = service.list_pending("a_").await.unwrap();
        assert_eq!(listed.len(), 1);

        service.cancel(&["a_08_00".into(), "zzz".into()]).await.unwrap();
        assert_eq!(service.pending_ids(), vec!["b_08_00".to_string()]);
        assert_eq!(service.cancelled_ids(), vec!["a_08_00".to_string(), "zzz".to_string()]);
    }

    #[tokio::test]
    async fn offline_and_rejections_fail_calls() {
        let service = InMemoryDeliveryService::new();
        service.reject_enqueue_of("a_");
        assert!(matches!(
            service.enqueue(trigger("a_08_00", 8)).await,
            Err(DeliveryError::Rejected { .. })
        ));
        service.set_offline(true);
        assert!(service.list_pending("").await.is_err());
        assert!(service.pending().is_empty());
    }

    #[tokio::test]
    async fn take_due_delivers_only_past_triggers() {
        let service = InMemoryDeliveryService::new();
        service.enqueue(trigger("a_08_00", 8)).await.unwrap();
        service.enqueue(trigger("a_20_00", 20)).await.unwrap();

        let now = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap().and_hms_opt(8, 0, 0).unwrap();
        let due = service.take_due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "a_08_00");
        assert_eq!(service.pending_ids(), vec!["a_20_00".to_string()]);
    }
}
