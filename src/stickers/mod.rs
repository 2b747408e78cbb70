//! Per-contact sticker evaluation.
//!
//! Every buffered alert is handed to a dedicated worker over a channel, so a
//! slow render or a failed upload never delays admission. Each contact whose
//! subscribed cities intersect the alert gets its own sticker in the target
//! chat, with no deduplication across contacts.

pub mod render;

pub use render::ImageStickerRenderer;

use crate::alerts::AlertRecord;
use crate::chat::{ChatPlatform, ChatTarget};
use crate::reference::{CityDirectory, ContactBook};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to read font {path:?}: {source}")]
    Font {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("font {0:?} is not a usable TrueType/OpenType font")]
    InvalidFont(PathBuf),

    #[error("image {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to prepare {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("render task aborted: {0}")]
    Worker(String),
}

/// Threat category drawn on the sticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Airborne,
    Ground,
}

impl AlertKind {
    pub fn classify(threat_level: Option<i64>, max_severity: i64) -> Self {
        if threat_level == Some(max_severity) {
            AlertKind::Airborne
        } else {
            AlertKind::Ground
        }
    }

    /// File-name prefix of the matching emoji assets.
    pub fn asset_prefix(&self) -> &'static str {
        match self {
            AlertKind::Airborne => "plane",
            AlertKind::Ground => "rocket",
        }
    }
}

/// Everything a renderer needs for one sticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickerRequest {
    pub text: String,
    pub kind: AlertKind,
    /// Emoji asset family for the contact's place, e.g. "home".
    pub theme: String,
    pub rotate: bool,
    /// Countdown label, empty when unknown.
    pub runtime_label: String,
}

/// Produces a media file for a sticker request. Called from a blocking thread.
pub trait StickerRenderer: Send + Sync {
    fn render(&self, request: &StickerRequest) -> Result<PathBuf, RenderError>;
}

pub struct StickerTrigger {
    renderer: Arc<dyn StickerRenderer>,
    chat: Arc<dyn ChatPlatform>,
    target: ChatTarget,
    directory: Arc<CityDirectory>,
    contacts: Arc<ContactBook>,
    max_severity: i64,
}

impl StickerTrigger {
    pub fn new(
        renderer: Arc<dyn StickerRenderer>,
        chat: Arc<dyn ChatPlatform>,
        target: ChatTarget,
        directory: Arc<CityDirectory>,
        contacts: Arc<ContactBook>,
        max_severity: i64,
    ) -> Self {
        Self {
            renderer,
            chat,
            target,
            directory,
            contacts,
            max_severity,
        }
    }

    /// One request per contact subscribed to any of the alert's cities.
    pub fn requests_for(&self, record: &AlertRecord) -> Vec<StickerRequest> {
        let kind = AlertKind::classify(record.threat_level, self.max_severity);
        let runtime_label = record
            .cities
            .iter()
            .filter_map(|city| self.directory.countdown_of(city))
            .min()
            .map(|idx| self.directory.countdown_label(idx).to_string())
            .unwrap_or_default();

        self.contacts
            .entries()
            .iter()
            .filter(|entry| record.cities.iter().any(|c| entry.subscription.subscribes_to(c)))
            .map(|entry| {
                let theme = entry.subscription.visual_theme.as_ref();
                StickerRequest {
                    text: theme.map(|t| t.text.clone()).unwrap_or_default(),
                    kind,
                    theme: theme
                        .map(|t| t.emoji.clone())
                        .unwrap_or_else(|| "home".to_string()),
                    rotate: true,
                    runtime_label: runtime_label.clone(),
                }
            })
            .collect()
    }

    /// Render and post every sticker for `record`. Returns how many were posted.
    pub async fn evaluate(&self, record: &AlertRecord) -> usize {
        let requests = self.requests_for(record);
        if requests.is_empty() {
            debug!("Stickers: no subscribed contacts for {}", record.notification_id);
            return 0;
        }

        let mut posted = 0;
        for request in requests {
            let renderer = self.renderer.clone();
            let rendered = tokio::task::spawn_blocking(move || renderer.render(&request))
                .await
                .map_err(|e| RenderError::Worker(e.to_string()))
                .and_then(|r| r);
            let path = match rendered {
                Ok(path) => path,
                Err(e) => {
                    warn!("Stickers: render failed for {}: {}", record.notification_id, e);
                    continue;
                }
            };
            match self.chat.send_sticker(&self.target, &path).await {
                Ok(_) => posted += 1,
                Err(e) => warn!("Stickers: failed to post {:?}: {}", path, e),
            }
        }
        info!("Stickers: posted {} for {}", posted, record.notification_id);
        posted
    }
}

/// Drain the sticker queue until cancelled or every sender is gone.
pub async fn run_sticker_worker(
    mut rx: mpsc::UnboundedReceiver<AlertRecord>,
    trigger: StickerTrigger,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(record) => {
                    trigger.evaluate(&record).await;
                }
                None => break,
            },
        }
    }
    debug!("Stickers: worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{sample_contacts, sample_directory, target, RecordingChat};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRenderer {
        requests: Mutex<Vec<StickerRequest>>,
        fail_theme: Option<String>,
    }

    impl StickerRenderer for FakeRenderer {
        fn render(&self, request: &StickerRequest) -> Result<PathBuf, RenderError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail_theme.as_deref() == Some(request.theme.as_str()) {
                return Err(RenderError::InvalidFont(PathBuf::from("broken.ttf")));
            }
            Ok(PathBuf::from(format!("/tmp/{}.png", request.theme)))
        }
    }

    fn trigger(renderer: Arc<FakeRenderer>, chat: Arc<RecordingChat>) -> StickerTrigger {
        StickerTrigger::new(
            renderer,
            chat,
            target(),
            Arc::new(sample_directory()),
            Arc::new(sample_contacts()),
            5,
        )
    }

    fn alert(cities: &[&str], threat: i64) -> AlertRecord {
        AlertRecord::new("n1", 1_000, cities.iter().map(|c| c.to_string()).collect()).with_threat(threat)
    }

    #[test]
    fn kind_follows_max_severity() {
        assert_eq!(AlertKind::classify(Some(5), 5), AlertKind::Airborne);
        assert_eq!(AlertKind::classify(Some(1), 5), AlertKind::Ground);
        assert_eq!(AlertKind::classify(None, 5), AlertKind::Ground);
        assert_eq!(AlertKind::Airborne.asset_prefix(), "plane");
    }

    #[tokio::test]
    async fn one_sticker_per_matching_contact() {
        let renderer = Arc::new(FakeRenderer::default());
        let chat = Arc::new(RecordingChat::default());

        let posted = trigger(renderer.clone(), chat.clone()).evaluate(&alert(&["Golan1"], 5)).await;

        assert_eq!(posted, 2);
        let requests = renderer.requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![
                StickerRequest {
                    text: "Dana".to_string(),
                    kind: AlertKind::Airborne,
                    theme: "hotel".to_string(),
                    rotate: true,
                    runtime_label: "15 seconds".to_string(),
                },
                StickerRequest {
                    text: String::new(),
                    kind: AlertKind::Airborne,
                    theme: "home".to_string(),
                    rotate: true,
                    runtime_label: "15 seconds".to_string(),
                },
            ]
        );
        assert_eq!(chat.stickers().len(), 2);
    }

    #[test]
    fn contacts_without_chat_account_still_get_a_sticker() {
        let t = trigger(Arc::new(FakeRenderer::default()), Arc::new(RecordingChat::default()));
        // dana and ghost subscribe to Alpha.
        let requests = t.requests_for(&alert(&["Alpha", "Atlantis"], 2));
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.kind == AlertKind::Ground));
        assert!(requests.iter().all(|r| r.runtime_label == "1.5 minutes"));
    }

    #[test]
    fn unrelated_alert_requests_nothing() {
        let t = trigger(Arc::new(FakeRenderer::default()), Arc::new(RecordingChat::default()));
        assert!(t.requests_for(&alert(&["Atlantis"], 5)).is_empty());
    }

    #[tokio::test]
    async fn render_failure_only_skips_that_sticker() {
        let renderer = Arc::new(FakeRenderer {
            fail_theme: Some("hotel".to_string()),
            ..Default::default()
        });
        let chat = Arc::new(RecordingChat::default());

        let posted = trigger(renderer, chat.clone()).evaluate(&alert(&["Golan1"], 5)).await;

        assert_eq!(posted, 1);
        assert_eq!(chat.stickers(), vec![PathBuf::from("/tmp/home.png")]);
    }

    #[tokio::test]
    async fn worker_drains_queue_until_senders_drop() {
        let renderer = Arc::new(FakeRenderer::default());
        let chat = Arc::new(RecordingChat::default());
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(alert(&["Golan1"], 5)).unwrap();
        tx.send(alert(&["Alpha"], 1)).unwrap();
        drop(tx);
        run_sticker_worker(rx, trigger(renderer, chat.clone()), CancellationToken::new()).await;

        assert_eq!(chat.stickers().len(), 4);
    }

    #[tokio::test]
    async fn worker_stops_on_cancel() {
        let (_tx, rx) = mpsc::unbounded_channel::<AlertRecord>();
        let cancel = CancellationToken::new();
        cancel.cancel();
        run_sticker_worker(
            rx,
            trigger(Arc::new(FakeRenderer::default()), Arc::new(RecordingChat::default())),
            cancel,
        )
        .await;
    }
}
