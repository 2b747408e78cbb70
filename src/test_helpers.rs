//! Shared fixtures for unit tests.

use crate::chat::{ChatContact, ChatError, ChatPlatform, ChatTarget, MessageHandle};
use crate::reference::{contacts_from_json, CityDirectory, ContactBook};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const RESIDENCE_JSON: &str = r#"{
    "areas": {"1": "North", "2": "Golan"},
    "cities": {
        "Alpha": {"area": 1, "countdown": 30},
        "Bravo": {"area": 1, "countdown": 10},
        "Golan1": {"area": 2, "countdown": 2}
    },
    "countdown": {"2": "15 seconds", "10": "45 seconds", "30": "1.5 minutes"}
}"#;

pub const CONTACTS_JSON: &str = r#"{
    "dana": {"phoneNumber": "num-dana", "cities": ["Alpha", "Bravo", "Golan1"], "emojiConf": {"text": "Dana", "emoji": "hotel"}},
    "ghost": {"phoneNumber": "num-ghost", "cities": ["Alpha"]},
    "omer": {"phoneNumber": "num-omer", "cities": ["Golan1"], "default": true}
}"#;

pub fn sample_directory() -> CityDirectory {
    CityDirectory::from_json(RESIDENCE_JSON).unwrap()
}

pub fn chat_contact(name: &str) -> ChatContact {
    ChatContact {
        id: format!("id-{name}"),
        number: format!("num-{name}"),
        display_name: name.to_string(),
        mention: format!("@{name}"),
    }
}

/// dana and omer are on the platform, ghost is not.
pub fn sample_contacts() -> ContactBook {
    let directory = contacts_from_json(CONTACTS_JSON).unwrap();
    ContactBook::resolve(&directory, &[chat_contact("dana"), chat_contact("omer")])
}

pub fn target() -> ChatTarget {
    ChatTarget {
        id: "chat-1".to_string(),
        name: "alerts".to_string(),
        scope: Some("guild-1".to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    Text {
        chat_id: String,
        text: String,
        mentions: Vec<ChatContact>,
    },
    Edit {
        message_id: String,
        text: String,
    },
    Sticker {
        chat_id: String,
        media: PathBuf,
    },
    React {
        message_id: String,
        emoji: String,
    },
}

/// Chat platform fake that records every successful call.
#[derive(Default)]
pub struct RecordingChat {
    calls: Mutex<Vec<ChatCall>>,
    next_id: AtomicUsize,
    fail_sends: AtomicBool,
}

impl RecordingChat {
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ChatCall::Text { .. }))
            .count()
    }

    pub fn edit_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ChatCall::Edit { .. }))
            .count()
    }

    pub fn stickers(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ChatCall::Sticker { media, .. } => Some(media),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ChatCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn handle(&self, chat_id: &str) -> MessageHandle {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        MessageHandle {
            chat_id: chat_id.to_string(),
            message_id: format!("m{n}"),
        }
    }

    fn check(&self) -> Result<(), ChatError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::Platform("offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for RecordingChat {
    async fn find_group(&self, name_fragment: &str) -> Result<Option<ChatTarget>, ChatError> {
        let t = target();
        Ok(t.name.contains(name_fragment).then_some(t))
    }

    async fn list_contacts(&self, _target: &ChatTarget) -> Result<Vec<ChatContact>, ChatError> {
        Ok(vec![chat_contact("dana"), chat_contact("omer")])
    }

    async fn send_text(
        &self,
        target: &ChatTarget,
        text: &str,
        mentions: &[ChatContact],
    ) -> Result<MessageHandle, ChatError> {
        self.check()?;
        self.record(ChatCall::Text {
            chat_id: target.id.clone(),
            text: text.to_string(),
            mentions: mentions.to_vec(),
        });
        Ok(self.handle(&target.id))
    }

    async fn edit_text(
        &self,
        message: &MessageHandle,
        text: &str,
        _mentions: &[ChatContact],
    ) -> Result<(), ChatError> {
        self.check()?;
        self.record(ChatCall::Edit {
            message_id: message.message_id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_sticker(&self, target: &ChatTarget, media: &Path) -> Result<MessageHandle, ChatError> {
        self.check()?;
        self.record(ChatCall::Sticker {
            chat_id: target.id.clone(),
            media: media.to_path_buf(),
        });
        Ok(self.handle(&target.id))
    }

    async fn react(&self, message: &MessageHandle, emoji: &str) -> Result<(), ChatError> {
        self.check()?;
        self.record(ChatCall::React {
            message_id: message.message_id.clone(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }
}
