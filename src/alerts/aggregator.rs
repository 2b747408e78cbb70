//! Buffering of admitted alerts and per-area grouping.

use super::AlertRecord;
use crate::chat::ChatContact;
use crate::reference::{CityDirectory, ContactBook};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Cities of one area alerted within the current burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaGroup {
    pub area: String,
    /// Distinct member cities in discovery order.
    pub cities: Vec<String>,
    /// Smallest countdown index across member cities.
    pub min_countdown: u32,
    pub mentions: Vec<ChatContact>,
}

impl AreaGroup {
    fn new(area: &str, countdown: u32) -> Self {
        Self {
            area: area.to_string(),
            cities: Vec::new(),
            min_countdown: countdown,
            mentions: Vec::new(),
        }
    }
}

/// Group the cities of `alerts` by area.
///
/// Unresolvable cities and cities outside the area allow-list are skipped.
/// A contact is mentioned at most once across all groups: in the first area
/// where one of its subscribed cities shows up.
pub fn group_by_area(
    alerts: &[AlertRecord],
    directory: &CityDirectory,
    contacts: &ContactBook,
) -> Vec<AreaGroup> {
    let mut groups: Vec<AreaGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut tagged: HashSet<&str> = HashSet::new();

    for alert in alerts {
        for city in &alert.cities {
            let resolved = match directory.resolve(city) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Aggregator: skipping city in {}: {}", alert.notification_id, e);
                    continue;
                }
            };
            if !directory.is_area_allowed(resolved.area) {
                debug!("Aggregator: area {} not in allow-list, skipping {}", resolved.area, city);
                continue;
            }

            let idx = *index.entry(resolved.area.to_string()).or_insert_with(|| {
                groups.push(AreaGroup::new(resolved.area, resolved.countdown));
                groups.len() - 1
            });
            let group = &mut groups[idx];

            if !group.cities.iter().any(|c| c == city) {
                group.cities.push(city.clone());
            }
            group.min_countdown = group.min_countdown.min(resolved.countdown);

            for entry in contacts.entries() {
                if !entry.subscription.subscribes_to(city) || tagged.contains(entry.name.as_str()) {
                    continue;
                }
                tagged.insert(entry.name.as_str());
                if let Some(ref chat) = entry.chat {
                    group.mentions.push(chat.clone());
                }
            }
        }
    }

    groups
}

/// Buffer of admitted, not yet expired alerts.
#[derive(Debug)]
pub struct AlertAggregator {
    buffer: Vec<AlertRecord>,
    retention_secs: i64,
}

impl AlertAggregator {
    pub fn new(retention_secs: i64) -> Self {
        Self {
            buffer: Vec::new(),
            retention_secs,
        }
    }

    /// Buffer an admitted record. Drills and non-alert kinds are dropped.
    /// Returns true when the record was buffered.
    pub fn ingest(&mut self, mut record: AlertRecord) -> bool {
        if !record.is_actionable() {
            debug!(
                "Aggregator: ignoring {} (kind={:?}, drill={})",
                record.notification_id, record.kind, record.is_drill
            );
            return false;
        }
        record.sent = false;
        self.buffer.push(record);
        true
    }

    /// Copies of every buffered alert not yet dispatched.
    pub fn unsent(&self) -> Vec<AlertRecord> {
        self.buffer.iter().filter(|a| !a.sent).cloned().collect()
    }

    /// Flag the given notification ids as dispatched.
    pub fn mark_sent(&mut self, notification_ids: &[String]) {
        for alert in self.buffer.iter_mut() {
            if notification_ids.contains(&alert.notification_id) {
                alert.sent = true;
            }
        }
    }

    /// Drop alerts older than the retention window. Returns the number removed.
    pub fn purge_stale(&mut self, now: i64) -> usize {
        let before = self.buffer.len();
        let retention = self.retention_secs;
        self.buffer.retain(|a| a.age(now) <= retention);
        before - self.buffer.len()
    }

    pub fn alerts(&self) -> &[AlertRecord] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
