//! Discord implementation of the chat-platform seam.
//!
//! Uses serenity's REST client only; no gateway session is needed to post,
//! edit and react. Token is resolved (in order) from: DISCORD_BOT_TOKEN env,
//! .config.env in the current directory, then ~/.alert-relay/.config.env.
//! Token is never logged.

use super::{ChatContact, ChatError, ChatPlatform, ChatTarget, MessageHandle};
use crate::config::Config;
use async_trait::async_trait;
use serenity::builder::{CreateAllowedMentions, CreateAttachment, CreateMessage, EditMessage};
use serenity::http::Http;
use serenity::model::channel::{ChannelType, ReactionType};
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::path::Path;
use tracing::{debug, info};

/// Discord caps member listing pages at 1000.
const MEMBER_PAGE: u64 = 1000;

pub struct DiscordChat {
    http: Http,
}

impl DiscordChat {
    pub fn new(token: &str) -> Self {
        Self {
            http: Http::new(token),
        }
    }
}

fn platform_err(e: serenity::Error) -> ChatError {
    ChatError::Platform(e.to_string())
}

fn parse_id(raw: &str) -> Result<u64, ChatError> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| ChatError::InvalidHandle(raw.to_string()))
}

fn allowed_mentions(mentions: &[ChatContact]) -> Result<CreateAllowedMentions, ChatError> {
    let users = mentions
        .iter()
        .map(|c| parse_id(&c.id).map(UserId::new))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CreateAllowedMentions::new().users(users))
}

#[async_trait]
impl ChatPlatform for DiscordChat {
    async fn find_group(&self, name_fragment: &str) -> Result<Option<ChatTarget>, ChatError> {
        let guilds = self.http.get_guilds(None, None).await.map_err(platform_err)?;
        for guild in guilds {
            let channels = guild.id.channels(&self.http).await.map_err(platform_err)?;
            let found = channels
                .values()
                .find(|ch| ch.kind == ChannelType::Text && ch.name.contains(name_fragment));
            if let Some(channel) = found {
                info!(
                    "Discord: resolved {:?} to #{} in {}",
                    name_fragment, channel.name, guild.name
                );
                return Ok(Some(ChatTarget {
                    id: channel.id.to_string(),
                    name: channel.name.clone(),
                    scope: Some(guild.id.to_string()),
                }));
            }
        }
        debug!("Discord: no text channel matches {:?}", name_fragment);
        Ok(None)
    }

    async fn list_contacts(&self, target: &ChatTarget) -> Result<Vec<ChatContact>, ChatError> {
        let Some(ref scope) = target.scope else {
            return Ok(Vec::new());
        };
        let guild_id = GuildId::new(parse_id(scope)?);
        let mut contacts = Vec::new();
        let mut after: Option<UserId> = None;
        loop {
            let page = guild_id
                .members(&self.http, Some(MEMBER_PAGE), after)
                .await
                .map_err(platform_err)?;
            let page_len = page.len() as u64;
            after = page.last().map(|m| m.user.id);
            contacts.extend(page.into_iter().map(|m| ChatContact {
                id: m.user.id.to_string(),
                number: m.user.id.to_string(),
                display_name: m.user.name.clone(),
                mention: format!("<@{}>", m.user.id),
            }));
            if page_len < MEMBER_PAGE {
                break;
            }
        }
        debug!("Discord: {} members in {}", contacts.len(), target.name);
        Ok(contacts)
    }

    async fn send_text(
        &self,
        target: &ChatTarget,
        text: &str,
        mentions: &[ChatContact],
    ) -> Result<MessageHandle, ChatError> {
        let channel_id = ChannelId::new(parse_id(&target.id)?);
        let builder = CreateMessage::new()
            .content(text)
            .allowed_mentions(allowed_mentions(mentions)?);
        let message = channel_id
            .send_message(&self.http, builder)
            .await
            .map_err(platform_err)?;
        Ok(MessageHandle {
            chat_id: target.id.clone(),
            message_id: message.id.to_string(),
        })
    }

    async fn edit_text(
        &self,
        message: &MessageHandle,
        text: &str,
        mentions: &[ChatContact],
    ) -> Result<(), ChatError> {
        let channel_id = ChannelId::new(parse_id(&message.chat_id)?);
        let message_id = MessageId::new(parse_id(&message.message_id)?);
        let builder = EditMessage::new()
            .content(text)
            .allowed_mentions(allowed_mentions(mentions)?);
        channel_id
            .edit_message(&self.http, message_id, builder)
            .await
            .map_err(platform_err)?;
        Ok(())
    }

    async fn send_sticker(&self, target: &ChatTarget, media: &Path) -> Result<MessageHandle, ChatError> {
        let channel_id = ChannelId::new(parse_id(&target.id)?);
        let attachment = CreateAttachment::path(media).await.map_err(|e| match e {
            serenity::Error::Io(source) => ChatError::Media {
                path: media.display().to_string(),
                source,
            },
            other => platform_err(other),
        })?;
        let message = channel_id
            .send_message(&self.http, CreateMessage::new().add_file(attachment))
            .await
            .map_err(platform_err)?;
        Ok(MessageHandle {
            chat_id: target.id.clone(),
            message_id: message.id.to_string(),
        })
    }

    async fn react(&self, message: &MessageHandle, emoji: &str) -> Result<(), ChatError> {
        let channel_id = ChannelId::new(parse_id(&message.chat_id)?);
        let message_id = MessageId::new(parse_id(&message.message_id)?);
        channel_id
            .create_reaction(&self.http, message_id, ReactionType::Unicode(emoji.to_string()))
            .await
            .map_err(platform_err)
    }
}

/// Read the token from a .config.env-style file (DISCORD_BOT_TOKEN=...).
fn token_from_config_env_file(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    content
        .lines()
        .find(|l| l.starts_with("DISCORD_BOT_TOKEN="))
        .and_then(|l| l.split_once('='))
        .map(|(_, v)| v.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Get the Discord token: DISCORD_BOT_TOKEN env, then .config.env (cwd, then ~/.alert-relay).
pub fn get_discord_token() -> Option<String> {
    if let Ok(t) = std::env::var("DISCORD_BOT_TOKEN") {
        let t = t.trim().to_string();
        if !t.is_empty() {
            info!("Discord: Token from DISCORD_BOT_TOKEN env");
            return Some(t);
        }
    }
    let candidates = [
        std::env::current_dir().ok().map(|cwd| cwd.join(".config.env")),
        Some(Config::app_dir().join(".config.env")),
    ];
    for path in candidates.into_iter().flatten() {
        if path.is_file() {
            if let Some(t) = token_from_config_env_file(&path) {
                info!("Discord: Token from {:?}", path);
                return Some(t);
            }
        }
    }
    None
}
