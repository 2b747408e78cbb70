//! At-most-once admission keyed by notification id.

use super::AlertRecord;
use std::collections::HashMap;
use tracing::{debug, info};

/// Remembers every admitted notification id until it ages out.
#[derive(Debug)]
pub struct AlertDeduplicator {
    /// notification id -> occurred_at of the admitted record
    seen: HashMap<String, i64>,
    retention_secs: i64,
}

impl AlertDeduplicator {
    pub fn new(retention_secs: i64) -> Self {
        Self {
            seen: HashMap::new(),
            retention_secs,
        }
    }

    /// Returns true the first time a notification id is offered.
    /// Re-deliveries return false and leave the cache untouched.
    pub fn admit(&mut self, record: &AlertRecord) -> bool {
        if self.seen.contains_key(&record.notification_id) {
            debug!("Dedup: dropping re-delivered {}", record.notification_id);
            return false;
        }
        self.seen
            .insert(record.notification_id.clone(), record.occurred_at);
        true
    }

    /// Drop ids whose alert occurred more than the retention window before `now`.
    /// Returns the number removed.
    pub fn purge(&mut self, now: i64) -> usize {
        let before = self.seen.len();
        let cutoff = now.saturating_sub(self.retention_secs);
        self.seen.retain(|_, occurred_at| *occurred_at >= cutoff);
        let removed = before - self.seen.len();
        if removed > 0 {
            info!("Dedup: purged {} ids, {} remain", removed, self.seen.len());
        }
        removed
    }

    pub fn contains(&self, notification_id: &str) -> bool {
        self.seen.contains_key(notification_id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, at: i64) -> AlertRecord {
        AlertRecord::new(id, at, vec!["Alpha".to_string()])
    }

    #[test]
    fn admits_each_id_once() {
        let mut dedup = AlertDeduplicator::new(3600);
        assert!(dedup.admit(&record("a", 100)));
        assert!(!dedup.admit(&record("a", 100)));
        assert!(!dedup.admit(&record("a", 200)));
        assert!(dedup.admit(&record("b", 100)));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn purge_drops_entries_older_than_retention() {
        let mut dedup = AlertDeduplicator::new(3600);
        dedup.admit(&record("old", 1_000));
        dedup.admit(&record("edge", 1_400));
        dedup.admit(&record("fresh", 4_000));

        let removed = dedup.purge(5_000);

        assert_eq!(removed, 1);
        assert!(!dedup.contains("old"));
        assert!(dedup.contains("edge"));
        assert!(dedup.contains("fresh"));
    }

    #[test]
    fn purged_ids_can_be_admitted_again() {
        let mut dedup = AlertDeduplicator::new(60);
        dedup.admit(&record("a", 0));
        dedup.purge(1_000);
        assert!(dedup.is_empty());
        assert!(dedup.admit(&record("a", 0)));
    }
}
