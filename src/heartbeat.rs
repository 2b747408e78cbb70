//! Liveness messages to an operator chat.

use crate::chat::{ChatPlatform, ChatTarget};
use crate::scheduler::PeriodicTask;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const STARTUP_MESSAGE: &str = "I'm now alive!";
pub const HEARTBEAT_MESSAGE: &str = "I'm still UP!";

pub struct Heartbeat {
    chat: Arc<dyn ChatPlatform>,
    target: ChatTarget,
}

impl Heartbeat {
    pub fn new(chat: Arc<dyn ChatPlatform>, target: ChatTarget) -> Self {
        Self { chat, target }
    }

    async fn post(&self, text: &str) -> bool {
        match self.chat.send_text(&self.target, text, &[]).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Heartbeat: failed to post to {}: {}", self.target.name, e);
                false
            }
        }
    }

    /// Announce startup after `delay`, unless cancelled first.
    pub async fn announce(&self, delay: Duration, cancel: CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => self.post(STARTUP_MESSAGE).await,
        }
    }
}

#[async_trait]
impl PeriodicTask for Heartbeat {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    async fn run(&self) {
        self.post(HEARTBEAT_MESSAGE).await;
    }
}
