//! Chat-platform seam.
//!
//! The pipeline only talks to the platform through `ChatPlatform`; the
//! Discord implementation lives in `discord`.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub mod discord;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("chat platform request failed: {0}")]
    Platform(String),

    #[error("invalid message handle: {0}")]
    InvalidHandle(String),

    #[error("failed to read media {path}: {source}")]
    Media {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A group chat the relay can post into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTarget {
    pub id: String,
    pub name: String,
    /// Container the chat belongs to (e.g. a Discord guild), used to list members.
    pub scope: Option<String>,
}

/// A platform user that can be mentioned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatContact {
    pub id: String,
    pub number: String,
    pub display_name: String,
    /// Text that renders as a mention on this platform.
    pub mention: String,
}

/// Reference to a message already posted, used for edits and reactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub chat_id: String,
    pub message_id: String,
}

/// Capabilities the relay consumes from a chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// First group whose display name contains `name_fragment`.
    async fn find_group(&self, name_fragment: &str) -> Result<Option<ChatTarget>, ChatError>;

    async fn list_contacts(&self, target: &ChatTarget) -> Result<Vec<ChatContact>, ChatError>;

    async fn send_text(
        &self,
        target: &ChatTarget,
        text: &str,
        mentions: &[ChatContact],
    ) -> Result<MessageHandle, ChatError>;

    async fn edit_text(
        &self,
        message: &MessageHandle,
        text: &str,
        mentions: &[ChatContact],
    ) -> Result<(), ChatError>;

    async fn send_sticker(&self, target: &ChatTarget, media: &Path) -> Result<MessageHandle, ChatError>;

    async fn react(&self, message: &MessageHandle, emoji: &str) -> Result<(), ChatError>;
}
