//! Owner of all mutable pipeline state.
//!
//! The dedup cache, the alert buffer and the last dispatch live behind one
//! mutex. Every method locks, mutates and returns without awaiting, so a
//! dispatch tick's snapshot can never interleave with an ingest.

use crate::alerts::{AlertAggregator, AlertDeduplicator, AlertRecord};
use crate::chat::MessageHandle;
use crate::scheduler::PeriodicTask;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The message later alerts may be folded into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastDispatch {
    pub handle: MessageHandle,
    /// Epoch seconds of the original send. Edits do not move it.
    pub sent_at: i64,
    /// Notification ids the message currently shows.
    pub alert_ids: Vec<String>,
}

/// What `submit` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Duplicate,
    Ignored,
    Buffered,
}

/// Alerts taken out of the buffer by a dispatch tick.
#[derive(Debug, Clone)]
pub struct DispatchSnapshot {
    /// Alerts dispatched by this tick.
    pub alerts: Vec<AlertRecord>,
    /// Alerts the message should show: `alerts` for a new send, plus the
    /// still-buffered alerts already on the message for an edit.
    pub render: Vec<AlertRecord>,
    /// Message to edit instead of sending a new one.
    pub edit: Option<MessageHandle>,
}

struct PipelineState {
    dedup: AlertDeduplicator,
    aggregator: AlertAggregator,
    last_dispatch: Option<LastDispatch>,
}

pub struct AlertService {
    state: Mutex<PipelineState>,
    stickers: Option<mpsc::UnboundedSender<AlertRecord>>,
}

impl AlertService {
    pub fn new(dedup_retention_secs: i64, buffer_retention_secs: i64) -> Self {
        Self {
            state: Mutex::new(PipelineState {
                dedup: AlertDeduplicator::new(dedup_retention_secs),
                aggregator: AlertAggregator::new(buffer_retention_secs),
                last_dispatch: None,
            }),
            stickers: None,
        }
    }

    /// Forward every buffered alert to a sticker worker.
    pub fn with_sticker_queue(mut self, tx: mpsc::UnboundedSender<AlertRecord>) -> Self {
        self.stickers = Some(tx);
        self
    }

    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deduplicate, then hand the record to the aggregator.
    pub fn submit(&self, record: AlertRecord) -> Admission {
        self.submit_at(record, chrono::Utc::now().timestamp())
    }

    /// `submit` with an explicit clock. Alerts dated after `now` are clamped
    /// to `now` so both caches can still age them out.
    pub fn submit_at(&self, mut record: AlertRecord, now: i64) -> Admission {
        if record.occurred_at > now {
            warn!(
                "Pipeline: {} is dated {}s in the future, clamping",
                record.notification_id,
                record.occurred_at - now
            );
            record.occurred_at = now;
        }
        let buffered = {
            let mut state = self.state();
            if !state.dedup.admit(&record) {
                return Admission::Duplicate;
            }
            let queued = record.clone();
            if !state.aggregator.ingest(record) {
                return Admission::Ignored;
            }
            queued
        };

        info!(
            "Pipeline: buffered {} ({} cities, threat={:?})",
            buffered.notification_id,
            buffered.cities.len(),
            buffered.threat_level
        );
        if let Some(ref tx) = self.stickers {
            if tx.send(buffered).is_err() {
                debug!("Pipeline: sticker worker gone, skipping sticker evaluation");
            }
        }
        Admission::Buffered
    }

    /// Take the unsent alerts and mark them sent before any outward call.
    /// Returns None when nothing is pending.
    pub fn take_unsent(&self, now: i64, edit_window_secs: i64) -> Option<DispatchSnapshot> {
        let mut state = self.state();
        let alerts = state.aggregator.unsent();
        if alerts.is_empty() {
            return None;
        }
        let ids: Vec<String> = alerts.iter().map(|a| a.notification_id.clone()).collect();
        state.aggregator.mark_sent(&ids);

        let PipelineState {
            aggregator,
            last_dispatch,
            ..
        } = &mut *state;
        let editable = last_dispatch
            .as_mut()
            .filter(|last| now.saturating_sub(last.sent_at) < edit_window_secs);
        let (edit, render) = match editable {
            Some(last) => {
                let render = aggregator
                    .alerts()
                    .iter()
                    .filter(|a| last.alert_ids.contains(&a.notification_id) || ids.contains(&a.notification_id))
                    .cloned()
                    .collect();
                last.alert_ids.extend(ids);
                (Some(last.handle.clone()), render)
            }
            None => (None, alerts.clone()),
        };
        Some(DispatchSnapshot { alerts, render, edit })
    }

    /// Start a new edit window anchored at `now` for a message showing `alert_ids`.
    pub fn record_send(&self, handle: MessageHandle, now: i64, alert_ids: Vec<String>) {
        self.state().last_dispatch = Some(LastDispatch {
            handle,
            sent_at: now,
            alert_ids,
        });
    }

    pub fn purge_stale(&self, now: i64) -> usize {
        let removed = self.state().aggregator.purge_stale(now);
        if removed > 0 {
            debug!("Pipeline: dropped {} stale buffered alerts", removed);
        }
        removed
    }

    pub fn purge_dedup(&self, now: i64) -> usize {
        self.state().dedup.purge(now)
    }

    pub fn last_dispatch(&self) -> Option<LastDispatch> {
        self.state().last_dispatch.clone()
    }

    pub fn buffered(&self) -> Vec<AlertRecord> {
        self.state().aggregator.alerts().to_vec()
    }

    pub fn is_known(&self, notification_id: &str) -> bool {
        self.state().dedup.contains(notification_id)
    }
}

/// Periodic eviction of old dedup entries.
pub struct DedupPurge {
    service: Arc<AlertService>,
}

impl DedupPurge {
    pub fn new(service: Arc<AlertService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl PeriodicTask for DedupPurge {
    fn name(&self) -> &'static str {
        "dedup-purge"
    }

    async fn run(&self) {
        let removed = self.service.purge_dedup(chrono::Utc::now().timestamp());
        info!("Pipeline: purged {} dedup entries", removed);
    }
}
