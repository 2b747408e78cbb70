//! Inbound alert feed.
//!
//! `FeedConnector` keeps one session to the feed open, reconnecting with
//! exponential backoff after every close and forcing a fresh session on a
//! fixed refresh cadence. Transport failures are logged and never end the
//! loop; only cancellation does.

pub mod ws;

pub use ws::WsTransport;

use crate::alerts::AlertRecord;
use crate::service::{Admission, AlertService};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("invalid feed request: {0}")]
    Request(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Reconnect delay: starts at `base`, doubles after each scheduled
/// reconnect, resets when a session opens.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    current: Duration,
    cap: Option<Duration>,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, cap: Option<Duration>) -> Self {
        Self {
            base,
            current: base,
            cap,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Delay for the reconnect being scheduled now. Doubles the next one.
    pub fn schedule(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(Duration::MAX);
        self.current = match self.cap {
            Some(cap) => next.min(cap),
            None => next,
        };
        delay
    }
}

/// Opens sessions to the feed.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FeedSession>, ConnectionError>;
}

/// One open feed session.
#[async_trait]
pub trait FeedSession: Send {
    /// Next text frame. `Ok(None)` means the peer closed the session.
    /// Must be cancel safe.
    async fn next_frame(&mut self) -> Result<Option<String>, ConnectionError>;

    async fn close(&mut self);
}

enum SessionEnd {
    Cancelled,
    Refresh,
    Closed(Option<ConnectionError>),
}

pub struct FeedConnector {
    transport: Arc<dyn FeedTransport>,
    backoff: ReconnectBackoff,
    refresh_interval: Duration,
}

impl FeedConnector {
    pub fn new(transport: Arc<dyn FeedTransport>, backoff: ReconnectBackoff, refresh_interval: Duration) -> Self {
        Self {
            transport,
            backoff,
            refresh_interval,
        }
    }

    /// Keep the feed connected until `cancel` fires, submitting every parsed
    /// frame to `service`.
    pub async fn run(mut self, service: Arc<AlertService>, cancel: CancellationToken) {
        // Re-armed whenever a session opens, so a deadline that passed during
        // a slow handshake cannot end the new session right away.
        let mut refresh = tokio::time::interval_at(
            tokio::time::Instant::now() + self.refresh_interval,
            self.refresh_interval,
        );
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            info!("Feed: connecting");
            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.transport.connect() => res,
            };

            match connected {
                Ok(mut session) => {
                    self.backoff.reset();
                    refresh.reset();
                    info!("Feed: connected");
                    let end = pump(session.as_mut(), &service, &mut refresh, &cancel).await;
                    session.close().await;
                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Refresh => info!("Feed: refreshing session"),
                        SessionEnd::Closed(None) => warn!("Feed: disconnected"),
                        SessionEnd::Closed(Some(e)) => warn!("Feed: disconnected: {}", e),
                    }
                }
                Err(e) => warn!("Feed: {}", e),
            }

            let delay = self.backoff.schedule();
            info!(
                "Feed: reconnecting in {:?} (next backoff {:?})",
                delay,
                self.backoff.current()
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = refresh.tick() => info!("Feed: refresh due, reconnecting now"),
            }
        }
        info!("Feed: stopped");
    }
}

async fn pump(
    session: &mut dyn FeedSession,
    service: &AlertService,
    refresh: &mut Interval,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            _ = refresh.tick() => return SessionEnd::Refresh,
            frame = session.next_frame() => match frame {
                Ok(Some(text)) => handle_frame(&text, service),
                Ok(None) => return SessionEnd::Closed(None),
                Err(e) => return SessionEnd::Closed(Some(e)),
            },
        }
    }
}

fn handle_frame(text: &str, service: &AlertService) {
    let record = match AlertRecord::parse(text) {
        Ok(r) => r,
        Err(e) => {
            warn!("Feed: dropping frame: {}", e);
            return;
        }
    };
    let id = record.notification_id.clone();
    match service.submit(record) {
        Admission::Duplicate => debug!("Feed: {} already seen", id),
        Admission::Ignored => debug!("Feed: {} is not actionable", id),
        Admission::Buffered => {}
    }
}
