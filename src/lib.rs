//! alert-relay Library
//!
//! Relays a live emergency-alert feed into one group chat.
//!
//! ## Architecture
//!
//! The codebase is organized into modules:
//! - `feed`: websocket session with reconnect backoff and periodic refresh
//! - `alerts`: alert records, deduplication, buffering and area grouping
//! - `service`: the single owner of mutable pipeline state
//! - `dispatch`: notification text and the send-or-edit tick
//! - `stickers`: per-contact sticker rendering and posting
//! - `chat`: chat-platform seam and its Discord implementation
//! - `reference`: city directory and contact directory
//! - `scheduler`: named periodic ticks with re-entrancy guards
//! - `config` / `logging`: settings, paths and tracing setup
//!
//! ## Main Entry Points
//!
//! - `run()`: start with Discord, the live websocket feed and image stickers
//! - `run_with()`: start with caller-supplied collaborators

pub mod alerts;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod feed;
pub mod heartbeat;
mod logging;
pub mod reference;
pub mod scheduler;
pub mod service;
pub mod stickers;

#[cfg(test)]
mod test_helpers;

pub use logging::init_tracing;

use anyhow::{anyhow, Context};
use chat::discord::{get_discord_token, DiscordChat};
use chat::ChatPlatform;
use config::RelayConfig;
use dispatch::DispatchReconciler;
use feed::{FeedConnector, FeedTransport, ReconnectBackoff, WsTransport};
use heartbeat::Heartbeat;
use reference::{load_contacts, CityDirectory, ContactBook};
use scheduler::Scheduler;
use service::{AlertService, DedupPurge};
use std::sync::Arc;
use std::time::Duration;
use stickers::{run_sticker_worker, ImageStickerRenderer, StickerRenderer, StickerTrigger};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// External systems the relay talks to.
pub struct Collaborators {
    pub chat: Arc<dyn ChatPlatform>,
    pub transport: Arc<dyn FeedTransport>,
    /// None disables stickers.
    pub renderer: Option<Arc<dyn StickerRenderer>>,
}

/// Run against Discord and the live feed until Ctrl-C.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let token = get_discord_token()
        .ok_or_else(|| anyhow!("no Discord token (DISCORD_BOT_TOKEN env or .config.env)"))?;

    let renderer: Option<Arc<dyn StickerRenderer>> = if config.stickers.enabled {
        match ImageStickerRenderer::new(
            config.stickers.assets_dir.clone(),
            config.stickers.output_dir.clone(),
            &config.stickers.font_path,
        ) {
            Ok(r) => Some(Arc::new(r)),
            Err(e) => {
                warn!("Stickers: disabled, renderer unavailable: {}", e);
                None
            }
        }
    } else {
        info!("Stickers: disabled in config");
        None
    };

    let parts = Collaborators {
        chat: Arc::new(DiscordChat::new(&token)),
        transport: Arc::new(WsTransport::new(config.feed.url.clone(), config.feed.headers.clone())),
        renderer,
    };

    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown: Ctrl-C received");
        ctrlc_cancel.cancel();
    }) {
        warn!("Shutdown: could not install Ctrl-C handler: {}", e);
    }

    run_with(&config, parts, cancel).await
}

/// Load reference data, resolve chats and drive every task until `cancel` fires.
pub async fn run_with(
    config: &RelayConfig,
    parts: Collaborators,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let Collaborators {
        chat,
        transport,
        renderer,
    } = parts;

    let directory = Arc::new(
        CityDirectory::load(&config.data.residence_path).context("loading city directory")?,
    );
    let contact_directory =
        load_contacts(&config.data.contacts_path).context("loading contact directory")?;

    let target = chat
        .find_group(&config.dispatch.target_chat)
        .await
        .context("looking up target chat")?
        .ok_or_else(|| anyhow!("no group chat matching {:?}", config.dispatch.target_chat))?;
    info!("Relay: target chat {} ({})", target.name, target.id);

    let platform_contacts = match chat.list_contacts(&target).await {
        Ok(c) => c,
        Err(e) => {
            warn!("Relay: could not list contacts, mentions disabled: {}", e);
            Vec::new()
        }
    };
    let contacts = Arc::new(ContactBook::resolve(&contact_directory, &platform_contacts));

    let mut scheduler = Scheduler::new(cancel.clone());

    let mut service = AlertService::new(config.dedup.retention_secs, config.dispatch.buffer_retention_secs);
    if let Some(renderer) = renderer {
        let (tx, rx) = mpsc::unbounded_channel();
        service = service.with_sticker_queue(tx);
        let trigger = StickerTrigger::new(
            renderer,
            chat.clone(),
            target.clone(),
            directory.clone(),
            contacts.clone(),
            config.stickers.max_severity,
        );
        scheduler.spawn("stickers", run_sticker_worker(rx, trigger, cancel.clone()));
    }
    let service = Arc::new(service);

    let reconciler = DispatchReconciler::new(
        service.clone(),
        chat.clone(),
        target,
        directory,
        contacts,
        config.dispatch.edit_window_secs,
    )
    .with_ack_reaction(config.dispatch.ack_reaction.clone());
    scheduler.every(config.tick_interval(), Arc::new(reconciler));
    scheduler.every(config.dedup_purge_interval(), Arc::new(DedupPurge::new(service.clone())));

    if let Some(ref name) = config.status.chat {
        match chat.find_group(name).await {
            Ok(Some(status)) => {
                let heartbeat = Arc::new(Heartbeat::new(chat.clone(), status));
                let announcer = heartbeat.clone();
                let delay = Duration::from_secs(config.status.startup_delay_secs);
                let announce_cancel = cancel.clone();
                scheduler.spawn("announce", async move {
                    announcer.announce(delay, announce_cancel).await;
                });
                scheduler.every(
                    Duration::from_secs(config.status.heartbeat_interval_secs),
                    heartbeat,
                );
            }
            Ok(None) => warn!("Heartbeat: no chat matching {:?}", name),
            Err(e) => warn!("Heartbeat: status chat lookup failed: {}", e),
        }
    }

    let backoff = ReconnectBackoff::new(
        Duration::from_millis(config.feed.backoff_base_ms),
        config.feed.backoff_cap_ms.map(Duration::from_millis),
    );
    let connector = FeedConnector::new(transport, backoff, config.refresh_interval());
    scheduler.spawn("feed", connector.run(service, cancel.clone()));

    info!("Relay: running");
    scheduler.run().await;
    Ok(())
}
