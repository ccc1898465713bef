//! Enforcement engine
//!
//! Moves a community member between unrestricted and restricted by adding or
//! removing the restriction role and the voice mute. Remote failures are
//! logged and never retried; the next punishment, rejoin or sweep is the
//! retry point.

use crate::audit;
use crate::config::{ChannelMessage, LinkConfig};
use crate::enforcement::notice::{self, ChannelNotice};
use crate::ledger::{Ledger, LedgerEntry, LedgerEntryKind};
use crate::platform::{CommunityPlatform, Member};
use crate::punishment::{
    Expiry, PunishmentKind, PunishmentLookup, PunishmentRecord, PunishmentTracker,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Whether an application is announced in the audit channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// A new punishment
    Announce,
    /// Re-establishing an existing punishment, e.g. after a rejoin
    Silent,
}

/// Why a punishment is being lifted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Lifted on the game server
    Revoked,
    /// Ran out and was swept
    Expired,
}

/// Applies and lifts punishments on the community platform
#[derive(Clone)]
pub struct Enforcer {
    platform: Arc<dyn CommunityPlatform>,
    ledger: Arc<dyn Ledger>,
    tracker: PunishmentTracker,
    config: Arc<LinkConfig>,
}

impl Enforcer {
    pub fn new(
        platform: Arc<dyn CommunityPlatform>,
        ledger: Arc<dyn Ledger>,
        tracker: PunishmentTracker,
        config: Arc<LinkConfig>,
    ) -> Self {
        Self {
            platform,
            ledger,
            tracker,
            config,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &PunishmentTracker {
        &self.tracker
    }

    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    #[must_use]
    pub fn platform(&self) -> &Arc<dyn CommunityPlatform> {
        &self.platform
    }

    async fn lookup(&self, community_id: &str) -> Option<Member> {
        match self.platform.lookup_member(community_id).await {
            Ok(member) => Some(member),
            Err(e) if e.is_missing_member() => {
                debug!("Could not find member {community_id}: {e}");
                None
            }
            Err(e) => {
                warn!("Failed to look up member {community_id}: {e}");
                None
            }
        }
    }

    /// The member's unexpired punishment
    ///
    /// A record found expired is evicted by this read and its restriction is
    /// lifted before returning, so the sweep that would have done it does
    /// not need to see it.
    pub async fn current_punishment(&self, community_id: &str) -> Option<PunishmentRecord> {
        match self.tracker.lookup(community_id).await {
            PunishmentLookup::Active(record) => Some(record),
            PunishmentLookup::Evicted(record) => {
                self.lift_expired(community_id, &record).await;
                None
            }
            PunishmentLookup::Absent => None,
        }
    }

    /// Audit and lift a punishment that has run out
    pub async fn lift_expired(&self, community_id: &str, record: &PunishmentRecord) {
        audit::punishment_expired(community_id, record);
        info!(
            "Lifting expired {} of {community_id} ({})",
            record.kind, record.player_name
        );
        self.remove(community_id, record, RemovalCause::Expired).await;
    }

    /// Restrict a member
    ///
    /// Role and voice mute are applied independently; one failing does not
    /// stop the other.
    pub async fn apply(&self, community_id: &str, record: &PunishmentRecord, mode: ApplyMode) {
        let Some(member) = self.lookup(community_id).await else {
            return;
        };

        tokio::join!(
            self.add_role(&member, record, mode),
            self.voice_mute(&member, record)
        );
    }

    async fn add_role(&self, member: &Member, record: &PunishmentRecord, mode: ApplyMode) {
        let Some(role_id) = self.config.muted_role() else {
            return;
        };

        let reason = format!("{} punishment: {}", record.kind, record.reason_or_default());
        match self.platform.add_role(&member.id, role_id, &reason).await {
            Ok(()) => {
                info!("Added punishment role to {} ({})", member.display_name, member.id);
                audit::platform_action(
                    "Role Added",
                    &member.id,
                    &record.player_name,
                    &audit::describe_change(record.kind, record.duration()),
                );
                if mode == ApplyMode::Announce {
                    self.announce(&self.config.log_channel.messages.role_applied, member, record)
                        .await;
                }
            }
            Err(e) => warn!("Failed to add punishment role to {}: {e}", member.id),
        }
    }

    async fn voice_mute(&self, member: &Member, record: &PunishmentRecord) {
        if !self.config.apply_server_mute || member.voice_muted {
            return;
        }

        match self.platform.set_voice_mute(&member.id, true).await {
            Ok(()) => audit::platform_action(
                "Voice Muted",
                &member.id,
                &record.player_name,
                &audit::describe_change(record.kind, record.duration()),
            ),
            Err(e) => warn!("Failed to voice mute {}: {e}", member.id),
        }
    }

    /// Lift a member's restriction
    ///
    /// Only touches the role if the member has it and the voice mute if the
    /// member is muted.
    pub async fn remove(&self, community_id: &str, record: &PunishmentRecord, cause: RemovalCause) {
        let Some(member) = self.lookup(community_id).await else {
            return;
        };

        tokio::join!(
            self.remove_role(&member, record, cause),
            self.voice_unmute(&member, record)
        );
    }

    async fn remove_role(&self, member: &Member, record: &PunishmentRecord, cause: RemovalCause) {
        let Some(role_id) = self.config.muted_role().filter(|id| member.has_role(*id)) else {
            return;
        };

        let reason = match cause {
            RemovalCause::Revoked => format!("{} lifted", record.kind),
            RemovalCause::Expired => format!("{} expired", record.kind),
        };
        match self.platform.remove_role(&member.id, role_id, &reason).await {
            Ok(()) => {
                info!("Removed punishment role from {} ({})", member.display_name, member.id);
                audit::platform_action("Role Removed", &member.id, &record.player_name, &reason);
                let messages = &self.config.log_channel.messages;
                let template = match cause {
                    RemovalCause::Revoked => &messages.role_removed,
                    RemovalCause::Expired => &messages.punishment_expired,
                };
                self.announce(template, member, record).await;
            }
            Err(e) => warn!("Failed to remove punishment role from {}: {e}", member.id),
        }
    }

    async fn voice_unmute(&self, member: &Member, record: &PunishmentRecord) {
        if !self.config.apply_server_mute || !member.voice_muted {
            return;
        }

        match self.platform.set_voice_mute(&member.id, false).await {
            Ok(()) => audit::platform_action(
                "Voice Unmuted",
                &member.id,
                &record.player_name,
                &format!("{} lifted", record.kind),
            ),
            Err(e) => warn!("Failed to remove voice mute from {}: {e}", member.id),
        }
    }

    /// Post to the audit channel if it and this message type are enabled
    async fn announce(&self, template: &ChannelMessage, member: &Member, record: &PunishmentRecord) {
        let Some(channel_id) = self.config.log_channel_id() else {
            return;
        };
        if !template.enabled {
            return;
        }

        let duration = record.duration().describe();
        let text = ChannelNotice {
            member_id: &member.id,
            player: &record.player_name,
            role_id: self.config.muted_role(),
            kind: record.kind,
            reason: record.reason_or_default(),
            duration: &duration,
        }
        .render(&template.message);

        if let Err(e) = self.platform.send_channel_message(channel_id, &text).await {
            warn!("Failed to post to log channel {channel_id}: {e}");
        }
    }

    /// Direct-message a member about a new punishment
    pub async fn notify_punishment(&self, community_id: &str, record: &PunishmentRecord) {
        let time = record.duration().describe();
        self.notify(
            community_id,
            record.kind.into(),
            &record.player_name,
            record.reason_or_default(),
            &time,
        )
        .await;
    }

    /// Direct-message a member using the template for `kind`
    pub async fn notify(
        &self,
        community_id: &str,
        kind: LedgerEntryKind,
        player: &str,
        reason: &str,
        time: &str,
    ) {
        let text = notice::notification(&self.config, kind, player, reason, time);
        match self.platform.send_direct_message(community_id, &text).await {
            Ok(()) => debug!("Sent {kind} notification to {community_id}"),
            Err(e) => warn!("Failed to send {kind} notification to {community_id}: {e}"),
        }
    }

    /// Re-establish a punishment for a member who rejoined the community
    pub async fn reapply_on_rejoin(&self, community_id: &str) {
        let Some(record) = self.current_punishment(community_id).await else {
            return;
        };

        info!(
            "Reapplying {} to rejoining member {community_id} ({})",
            record.kind, record.player_name
        );
        self.apply(community_id, &record, ApplyMode::Silent).await;
    }

    /// Bring a freshly linked account in line with the ledger
    ///
    /// Returns the record created, if the player turned out to be punished.
    pub async fn retroactive_sync(
        &self,
        game_uuid: Uuid,
        community_id: &str,
    ) -> Option<PunishmentRecord> {
        if self.current_punishment(community_id).await.is_some() {
            debug!("{community_id} already has a punishment on record, skipping retroactive sync");
            return None;
        }

        let entry = self.active_entry(game_uuid).await?;
        let kind = PunishmentKind::try_from(entry.kind).ok()?;
        let expiry = if entry.date_end == 0 {
            Expiry::Permanent
        } else {
            Expiry::from_millis(entry.date_end)
        };

        let player_name = self.player_name(game_uuid).await;
        let record = PunishmentRecord::new(
            game_uuid,
            player_name,
            kind,
            entry.reason,
            expiry,
            self.tracker.now(),
        );

        self.tracker.add_punishment(community_id, record.clone()).await;
        audit::punishment_applied(community_id, &record);
        audit::platform_action(
            "Retroactive Punishment",
            community_id,
            &record.player_name,
            &format!("Applied {} after account link", record.kind),
        );
        info!(
            "Retroactively applying {} to {community_id} ({})",
            record.kind, record.player_name
        );

        self.notify_punishment(community_id, &record).await;
        self.apply(community_id, &record, ApplyMode::Announce).await;
        Some(record)
    }

    /// The player's active ban, or failing that their active mute
    async fn active_entry(&self, game_uuid: Uuid) -> Option<LedgerEntry> {
        match self.ledger.active_ban(game_uuid).await {
            Ok(Some(ban)) => return Some(ban),
            Ok(None) => {}
            Err(e) => warn!("Failed to check active ban for {game_uuid}: {e}"),
        }
        match self.ledger.active_mute(game_uuid).await {
            Ok(mute) => mute,
            Err(e) => {
                warn!("Failed to check active mute for {game_uuid}: {e}");
                None
            }
        }
    }

    /// Display name of a player, falling back to the uuid
    pub async fn player_name(&self, game_uuid: Uuid) -> String {
        match self.ledger.player_name(game_uuid).await {
            Ok(Some(name)) => name,
            Ok(None) => game_uuid.to_string(),
            Err(e) => {
                debug!("Failed to look up name for {game_uuid}: {e}");
                game_uuid.to_string()
            }
        }
    }
}
