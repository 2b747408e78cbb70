//! Dispatch tick: decides between editing the last notification and sending
//! a new one, then performs the outward call.
//!
//! Alerts are marked sent before the call is made. A failed or slow send is
//! never retried, so a notification goes out at most once.

use super::composer::NotificationComposer;
use crate::alerts::group_by_area;
use crate::chat::{ChatPlatform, ChatTarget};
use crate::reference::{CityDirectory, ContactBook};
use crate::scheduler::PeriodicTask;
use crate::service::AlertService;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing pending.
    Idle,
    Sent,
    Edited,
    /// Pending alerts were consumed but nothing reached the chat.
    Failed,
}

pub struct DispatchReconciler {
    service: Arc<AlertService>,
    chat: Arc<dyn ChatPlatform>,
    target: ChatTarget,
    directory: Arc<CityDirectory>,
    contacts: Arc<ContactBook>,
    composer: NotificationComposer,
    edit_window_secs: i64,
    ack_reaction: Option<String>,
}

impl DispatchReconciler {
    pub fn new(
        service: Arc<AlertService>,
        chat: Arc<dyn ChatPlatform>,
        target: ChatTarget,
        directory: Arc<CityDirectory>,
        contacts: Arc<ContactBook>,
        edit_window_secs: i64,
    ) -> Self {
        Self {
            service,
            chat,
            target,
            composer: NotificationComposer::new(directory.clone()),
            directory,
            contacts,
            edit_window_secs,
            ack_reaction: None,
        }
    }

    pub fn with_ack_reaction(mut self, emoji: Option<String>) -> Self {
        self.ack_reaction = emoji.filter(|e| !e.trim().is_empty());
        self
    }

    /// One reconciliation pass at time `now` (epoch seconds).
    pub async fn tick(&self, now: i64) -> TickOutcome {
        let outcome = self.dispatch(now).await;
        self.service.purge_stale(now);
        outcome
    }

    async fn dispatch(&self, now: i64) -> TickOutcome {
        // Snapshot, group and compose before the first await.
        let Some(snapshot) = self.service.take_unsent(now, self.edit_window_secs) else {
            return TickOutcome::Idle;
        };
        // An edit replaces the message text, so it re-renders the alerts already shown.
        let groups = group_by_area(&snapshot.render, &self.directory, &self.contacts);
        let notification = match self.composer.compose(&groups, snapshot.render.len()) {
            Ok(n) => n,
            Err(e) => {
                warn!("Dispatch: nothing to send: {}", e);
                return TickOutcome::Failed;
            }
        };

        match snapshot.edit {
            Some(handle) => {
                info!(
                    "Dispatch: editing message {} with {} alerts ({} areas)",
                    handle.message_id,
                    snapshot.alerts.len(),
                    groups.len()
                );
                if let Err(e) = self
                    .chat
                    .edit_text(&handle, &notification.text, &notification.mentions)
                    .await
                {
                    error!("Dispatch: failed to edit message {}: {}", handle.message_id, e);
                    return TickOutcome::Failed;
                }
                if let Some(ref emoji) = self.ack_reaction {
                    if let Err(e) = self.chat.react(&handle, emoji).await {
                        warn!("Dispatch: failed to react to {}: {}", handle.message_id, e);
                    }
                }
                TickOutcome::Edited
            }
            None => {
                info!(
                    "Dispatch: sending new message with {} alerts ({} areas, {} mentions)",
                    snapshot.alerts.len(),
                    groups.len(),
                    notification.mentions.len()
                );
                match self
                    .chat
                    .send_text(&self.target, &notification.text, &notification.mentions)
                    .await
                {
                    Ok(handle) => {
                        let ids = snapshot.alerts.iter().map(|a| a.notification_id.clone()).collect();
                        self.service.record_send(handle, now, ids);
                        TickOutcome::Sent
                    }
                    Err(e) => {
                        error!("Dispatch: failed to send message to {}: {}", self.target.name, e);
                        TickOutcome::Failed
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PeriodicTask for DispatchReconciler {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    async fn run(&self) {
        self.tick(chrono::Utc::now().timestamp()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertRecord;
    use crate::test_helpers::{sample_contacts, sample_directory, target, ChatCall, RecordingChat};

    struct Harness {
        service: Arc<AlertService>,
        chat: Arc<RecordingChat>,
        reconciler: DispatchReconciler,
    }

    fn harness() -> Harness {
        let service = Arc::new(AlertService::new(3600, 120));
        let chat = Arc::new(RecordingChat::default());
        let reconciler = DispatchReconciler::new(
            service.clone(),
            chat.clone(),
            target(),
            Arc::new(sample_directory()),
            Arc::new(sample_contacts()),
            60,
        );
        Harness {
            service,
            chat,
            reconciler,
        }
    }

    fn alert(id: &str, at: i64, city: &str) -> AlertRecord {
        AlertRecord::new(id, at, vec![city.to_string()])
    }

    #[tokio::test]
    async fn idle_without_unsent_alerts() {
        let h = harness();
        assert_eq!(h.reconciler.tick(1_000).await, TickOutcome::Idle);
        assert!(h.chat.calls().is_empty());
    }

    #[tokio::test]
    async fn burst_within_window_collapses_into_edits() {
        let h = harness();
        h.service.submit(alert("1", 1_000, "Alpha"));
        assert_eq!(h.reconciler.tick(1_000).await, TickOutcome::Sent);

        h.service.submit(alert("2", 1_005, "Bravo"));
        assert_eq!(h.reconciler.tick(1_005).await, TickOutcome::Edited);

        h.service.submit(alert("3", 1_050, "Golan1"));
        assert_eq!(h.reconciler.tick(1_050).await, TickOutcome::Edited);

        assert_eq!(h.chat.sent_count(), 1);
        assert_eq!(h.chat.edit_count(), 2);
    }

    #[tokio::test]
    async fn edit_keeps_areas_from_the_original_message() {
        let h = harness();
        h.service.submit(alert("1", 1_000, "Alpha"));
        h.reconciler.tick(1_000).await;
        h.service.submit(alert("2", 1_010, "Golan1"));
        h.reconciler.tick(1_010).await;

        let edited = h.chat.calls().into_iter().find_map(|c| match c {
            ChatCall::Edit { text, .. } => Some(text),
            _ => None,
        });
        let text = edited.unwrap();
        assert!(text.contains("Alerts in North"));
        assert!(text.contains("Alerts in Golan"));
    }

    #[tokio::test]
    async fn out_of_range_feed_time_does_not_break_ticks() {
        let h = harness();
        for time in ["-1e300", "1e300"] {
            let payload = format!(
                r#"{{"type":"ALERT","data":{{"notificationId":"x{time}","time":{time},"isDrill":false,"cities":["Alpha"]}}}}"#
            );
            assert!(AlertRecord::parse(&payload).is_err());
        }
        h.service.submit(AlertRecord::new("min", i64::MIN, vec!["Alpha".to_string()]));

        assert_eq!(h.reconciler.tick(1_700_000_000).await, TickOutcome::Sent);
        assert!(h.service.buffered().is_empty());
        h.service.submit(alert("next", 1_700_000_005, "Bravo"));
        assert_eq!(h.reconciler.tick(1_700_000_005).await, TickOutcome::Edited);
    }

    #[tokio::test]
    async fn new_window_after_original_send_expires() {
        let h = harness();
        h.service.submit(alert("1", 1_000, "Alpha"));
        h.reconciler.tick(1_000).await;
        h.service.submit(alert("2", 1_040, "Bravo"));
        assert_eq!(h.reconciler.tick(1_040).await, TickOutcome::Edited);

        // 60s after the original send, even though an edit happened at 1_040.
        h.service.submit(alert("3", 1_060, "Golan1"));
        assert_eq!(h.reconciler.tick(1_060).await, TickOutcome::Sent);

        assert_eq!(h.chat.sent_count(), 2);
        assert_eq!(h.service.last_dispatch().unwrap().sent_at, 1_060);
    }

    #[tokio::test]
    async fn failed_send_is_not_retried() {
        let h = harness();
        h.chat.fail_sends(true);
        h.service.submit(alert("1", 1_000, "Alpha"));

        assert_eq!(h.reconciler.tick(1_000).await, TickOutcome::Failed);
        h.chat.fail_sends(false);
        assert_eq!(h.reconciler.tick(1_005).await, TickOutcome::Idle);

        assert!(h.service.last_dispatch().is_none());
        assert!(h.chat.calls().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_alerts_are_consumed() {
        let h = harness();
        h.service.submit(alert("1", 1_000, "Atlantis"));
        assert_eq!(h.reconciler.tick(1_000).await, TickOutcome::Failed);
        assert_eq!(h.reconciler.tick(1_005).await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn stale_alerts_are_purged_after_tick() {
        let h = harness();
        h.service.submit(alert("old", 1_000, "Alpha"));
        h.service.submit(alert("new", 1_100, "Bravo"));

        h.reconciler.tick(1_121).await;

        let ids: Vec<String> = h
            .service
            .buffered()
            .into_iter()
            .map(|a| a.notification_id)
            .collect();
        assert_eq!(ids, vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn edit_adds_ack_reaction() {
        let h = harness();
        let reconciler = DispatchReconciler::new(
            h.service.clone(),
            h.chat.clone(),
            target(),
            Arc::new(sample_directory()),
            Arc::new(sample_contacts()),
            60,
        )
        .with_ack_reaction(Some("🔁".to_string()));

        h.service.submit(alert("1", 1_000, "Alpha"));
        reconciler.tick(1_000).await;
        h.service.submit(alert("2", 1_010, "Bravo"));
        reconciler.tick(1_010).await;

        let calls = h.chat.calls();
        assert!(matches!(calls.last(), Some(ChatCall::React { emoji, .. }) if emoji == "🔁"));
    }
}
