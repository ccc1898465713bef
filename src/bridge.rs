//! Event adapter
//!
//! Turns ledger events and community events into tracker and enforcement
//! calls. Nothing here returns an error: misses are logged and skipped.

use crate::audit;
use crate::enforcement::notice;
use crate::enforcement::{ApplyMode, Enforcer, RemovalCause};
use crate::ledger::{LedgerEntry, LedgerEvent};
use crate::links::AccountLinks;
use crate::platform::MessageRef;
use crate::punishment::{NO_REASON, PunishmentDuration, PunishmentKind, PunishmentRecord};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A message posted in the community, reduced to what enforcement needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub author_id: String,
    pub author_is_bot: bool,
    /// `None` for direct messages
    pub guild_id: Option<u64>,
    pub channel_id: u64,
    pub message_id: u64,
}

#[derive(Clone)]
pub struct PunishmentBridge {
    enforcer: Enforcer,
    links: Arc<dyn AccountLinks>,
}

impl PunishmentBridge {
    pub fn new(enforcer: Enforcer, links: Arc<dyn AccountLinks>) -> Self {
        Self { enforcer, links }
    }

    #[must_use]
    pub fn enforcer(&self) -> &Enforcer {
        &self.enforcer
    }

    /// Dispatch ledger events until the ledger closes its stream
    ///
    /// Each event is handled on its own task.
    pub fn run_ledger_events(&self, mut rx: Receiver<LedgerEvent>) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.handle_ledger_event(event).await });
            }
            info!("Ledger event stream closed");
        })
    }

    pub async fn handle_ledger_event(&self, event: LedgerEvent) {
        match event {
            LedgerEvent::EntryAdded(entry) => self.entry_added(entry).await,
            LedgerEvent::EntryRemoved(entry) => self.entry_removed(entry).await,
        }
    }

    fn game_uuid(entry: &LedgerEntry) -> Option<Uuid> {
        let Some(raw) = entry.game_uuid.as_deref() else {
            debug!("Ignoring {} entry without a player uuid", entry.kind);
            return None;
        };
        match Uuid::parse_str(raw) {
            Ok(uuid) => Some(uuid),
            Err(e) => {
                debug!("Ignoring {} entry with invalid uuid {raw}: {e}", entry.kind);
                None
            }
        }
    }

    async fn entry_added(&self, entry: LedgerEntry) {
        let Some(game_uuid) = Self::game_uuid(&entry) else {
            return;
        };
        let community_id = self.links.resolve_platform_id(game_uuid);
        let player = self.enforcer.player_name(game_uuid).await;

        let Ok(kind) = PunishmentKind::try_from(entry.kind) else {
            // Warnings are only passed on to the member
            if let Some(community_id) = community_id {
                let reason = entry.reason.as_deref().unwrap_or(NO_REASON);
                self.enforcer
                    .notify(&community_id, entry.kind, &player, reason, "")
                    .await;
            }
            return;
        };

        let tracker = self.enforcer.tracker();
        let now = tracker.now();
        let duration = PunishmentDuration::from_date_end(entry.date_end, now);
        let record = PunishmentRecord::issue(game_uuid, player, kind, entry.reason, duration, now);

        let Some(community_id) = community_id else {
            debug!("{} ({game_uuid}) has no linked account", record.player_name);
            audit::punishment_applied("Not linked", &record);
            return;
        };

        tracker.add_punishment(&community_id, record.clone()).await;
        audit::punishment_applied(&community_id, &record);
        info!(
            "Synced {} of {} to {community_id} for {}",
            record.kind,
            record.player_name,
            duration.describe()
        );

        self.enforcer.notify_punishment(&community_id, &record).await;
        self.enforcer
            .apply(&community_id, &record, ApplyMode::Announce)
            .await;
    }

    async fn entry_removed(&self, entry: LedgerEntry) {
        let Ok(kind) = PunishmentKind::try_from(entry.kind) else {
            debug!("Ignoring {} removal", entry.kind);
            return;
        };
        let Some(game_uuid) = Self::game_uuid(&entry) else {
            return;
        };
        let Some(community_id) = self.links.resolve_platform_id(game_uuid) else {
            debug!("{game_uuid} has no linked account, nothing to lift");
            return;
        };

        let Some(record) = self.enforcer.current_punishment(&community_id).await else {
            debug!("No active punishment on record for {community_id}");
            return;
        };
        if record.kind != kind {
            debug!(
                "{community_id} is under {}, ignoring {kind} removal",
                record.kind
            );
            return;
        }

        self.enforcer.tracker().remove_punishment(&community_id).await;
        audit::punishment_removed(&community_id, &record.player_name, kind);
        info!("Lifted {kind} of {} from {community_id}", record.player_name);

        self.enforcer
            .remove(&community_id, &record, RemovalCause::Revoked)
            .await;
    }

    /// Block a message from a punished member
    ///
    /// Deletes the message and posts a warning that removes itself after the
    /// configured delay. Returns whether the message was blocked.
    pub async fn handle_message(&self, message: InboundMessage) -> bool {
        let config = self.enforcer.config();
        if message.author_is_bot || message.guild_id != Some(config.guild_id) {
            return false;
        }

        let Some(record) = self.enforcer.current_punishment(&message.author_id).await else {
            return false;
        };

        let platform = Arc::clone(self.enforcer.platform());
        let original = MessageRef {
            channel_id: message.channel_id,
            message_id: message.message_id,
        };
        if let Err(e) = platform.delete_message(original).await {
            warn!("Failed to delete message from {}: {e}", message.author_id);
        }

        let mention = format!("<@{}>", message.author_id);
        let text = notice::warning(config, &record, &mention, self.enforcer.tracker().now());
        match platform.send_channel_message(message.channel_id, &text).await {
            Ok(reply) => {
                let delay = config.warning_delete_after();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = platform.delete_message(reply).await;
                });
            }
            Err(e) => warn!(
                "Failed to warn {} in channel {}: {e}",
                message.author_id, message.channel_id
            ),
        }

        debug!("Blocked message from punished member {}", message.author_id);
        true
    }

    /// Re-establish a punishment for a member who joined the community
    pub async fn handle_member_join(&self, guild_id: u64, community_id: &str) {
        if guild_id != self.enforcer.config().guild_id {
            return;
        }
        self.enforcer.reapply_on_rejoin(community_id).await;
    }

    /// Catch up on punishments issued before the account was linked
    pub async fn handle_account_linked(
        &self,
        game_uuid: Uuid,
        community_id: &str,
    ) -> Option<PunishmentRecord> {
        self.enforcer.retroactive_sync(game_uuid, community_id).await
    }
}
