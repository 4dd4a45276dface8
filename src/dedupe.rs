use crate::event::EventType;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeDecision {
    Fresh,
    Duplicate,
}

/// TTL-bounded cache of already-processed (call id, event type) pairs.
///
/// Each instance owns its map; handlers receive a clone sharing the same
/// inner state, and tests construct isolated instances.
#[derive(Debug, Clone)]
pub struct DedupeCache {
    ttl_seconds: i64,
    expirations: Arc<Mutex<HashMap<String, i64>>>,
}

impl DedupeCache {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl_seconds,
            expirations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Atomic check-then-mark under a single lock acquisition. Used where
    /// marking up front is acceptable (call-started and auxiliary events).
    pub fn check_and_mark(
        &self,
        call_id: &str,
        event_type: EventType,
        now_epoch: i64,
    ) -> DedupeDecision {
        let key = entry_key(call_id, event_type);
        let mut guard = match self.expirations.lock() {
            Ok(guard) => guard,
            // A poisoned map means another handler panicked mid-insert;
            // treating the event as a duplicate is the safe direction.
            Err(_) => return DedupeDecision::Duplicate,
        };

        prune_expired(&mut guard, now_epoch);
        if let Some(expires_at) = guard.get(&key)
            && *expires_at > now_epoch
        {
            return DedupeDecision::Duplicate;
        }

        guard.insert(key, now_epoch + self.ttl_seconds);
        DedupeDecision::Fresh
    }

    /// Read-only membership test. Call-ended processing checks here and
    /// marks only after the attempt tracker commits, so the upstream
    /// redelivery mechanism can retry the whole unit of work.
    pub fn is_processed(&self, call_id: &str, event_type: EventType, now_epoch: i64) -> bool {
        let key = entry_key(call_id, event_type);
        let mut guard = match self.expirations.lock() {
            Ok(guard) => guard,
            Err(_) => return true,
        };

        prune_expired(&mut guard, now_epoch);
        guard
            .get(&key)
            .is_some_and(|expires_at| *expires_at > now_epoch)
    }

    /// Idempotent: re-marking only refreshes the expiry.
    pub fn mark_processed(&self, call_id: &str, event_type: EventType, now_epoch: i64) {
        let key = entry_key(call_id, event_type);
        let Ok(mut guard) = self.expirations.lock() else {
            return;
        };

        prune_expired(&mut guard, now_epoch);
        guard.insert(key, now_epoch + self.ttl_seconds);
    }
}

fn entry_key(call_id: &str, event_type: EventType) -> String {
    format!("{call_id}:{}", event_type.as_str())
}

fn prune_expired(cache: &mut HashMap<String, i64>, now_epoch: i64) {
    cache.retain(|_, expires_at| *expires_at > now_epoch);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_and_mark_rejects_second_delivery_within_ttl() {
        let cache = DedupeCache::new(300);
        assert_eq!(
            cache.check_and_mark("call-1", EventType::CallStarted, 1_700_000_000),
            DedupeDecision::Fresh
        );
        assert_eq!(
            cache.check_and_mark("call-1", EventType::CallStarted, 1_700_000_060),
            DedupeDecision::Duplicate
        );
    }

    #[test]
    fn same_call_id_with_different_event_type_is_fresh() {
        let cache = DedupeCache::new(300);
        cache.mark_processed("call-1", EventType::CallStarted, 1_700_000_000);
        assert!(!cache.is_processed("call-1", EventType::CallEnded, 1_700_000_001));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = DedupeCache::new(300);
        cache.mark_processed("call-1", EventType::CallEnded, 1_700_000_000);

        assert!(cache.is_processed("call-1", EventType::CallEnded, 1_700_000_299));
        assert!(!cache.is_processed("call-1", EventType::CallEnded, 1_700_000_300));
        assert_eq!(
            cache.check_and_mark("call-1", EventType::CallEnded, 1_700_000_301),
            DedupeDecision::Fresh
        );
    }

    #[test]
    fn marking_twice_matches_marking_once() {
        let cache = DedupeCache::new(300);
        cache.mark_processed("call-1", EventType::CallEnded, 1_700_000_000);
        cache.mark_processed("call-1", EventType::CallEnded, 1_700_000_000);

        assert!(cache.is_processed("call-1", EventType::CallEnded, 1_700_000_010));
        assert!(!cache.is_processed("call-1", EventType::CallEnded, 1_700_000_300));
    }

    #[test]
    fn remarking_refreshes_expiry() {
        let cache = DedupeCache::new(300);
        cache.mark_processed("call-1", EventType::CallEnded, 1_700_000_000);
        cache.mark_processed("call-1", EventType::CallEnded, 1_700_000_200);

        assert!(cache.is_processed("call-1", EventType::CallEnded, 1_700_000_400));
    }

    #[test]
    fn is_processed_has_no_marking_side_effect() {
        let cache = DedupeCache::new(300);
        assert!(!cache.is_processed("call-1", EventType::CallEnded, 1_700_000_000));
        assert_eq!(
            cache.check_and_mark("call-1", EventType::CallEnded, 1_700_000_001),
            DedupeDecision::Fresh
        );
    }
}
