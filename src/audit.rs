//! Punishment audit trail
//!
//! Entries are emitted as tracing events on [`AUDIT_TARGET`]; the logging setup
//! routes that target to the append-only audit file.

use crate::AUDIT_TARGET;
use crate::punishment::{PunishmentDuration, PunishmentKind, PunishmentRecord};
use tracing::info;

/// A punishment was mirrored onto a community account
pub fn punishment_applied(community_id: &str, record: &PunishmentRecord) {
    let duration = record.duration().describe();
    info!(
        target: AUDIT_TARGET,
        entry = "PUNISHMENT APPLIED",
        player = %record.player_name,
        game_uuid = %record.game_uuid,
        community_id = %community_id,
        kind = %record.kind,
        reason = %record.reason_or_default(),
        duration = %duration,
        "PUNISHMENT APPLIED | Player: {} ({}) | Discord ID: {} | Type: {} | Reason: {} | Duration: {}",
        record.player_name,
        record.game_uuid,
        community_id,
        record.kind,
        record.reason_or_default(),
        duration,
    );
}

/// A punishment was lifted on the game server before it ran out
pub fn punishment_removed(community_id: &str, player_name: &str, kind: PunishmentKind) {
    info!(
        target: AUDIT_TARGET,
        entry = "PUNISHMENT REMOVED",
        player = %player_name,
        community_id = %community_id,
        kind = %kind,
        "PUNISHMENT REMOVED | Player: {player_name} | Discord ID: {community_id} | Type: {kind}",
    );
}

/// A punishment ran out and was swept
pub fn punishment_expired(community_id: &str, record: &PunishmentRecord) {
    info!(
        target: AUDIT_TARGET,
        entry = "PUNISHMENT EXPIRED",
        player = %record.player_name,
        community_id = %community_id,
        kind = %record.kind,
        "PUNISHMENT EXPIRED | Player: {} | Discord ID: {} | Type: {}",
        record.player_name,
        community_id,
        record.kind,
    );
}

/// Something the bot did on the community platform
pub fn platform_action(action: &str, community_id: &str, player_name: &str, details: &str) {
    info!(
        target: AUDIT_TARGET,
        entry = "PLATFORM ACTION",
        action = %action,
        player = %player_name,
        community_id = %community_id,
        "PLATFORM ACTION | Action: {action} | Player: {player_name} | Discord ID: {community_id} | Details: {details}",
    );
}

/// Details line for a role or mute change
#[must_use]
pub fn describe_change(kind: PunishmentKind, duration: PunishmentDuration) -> String {
    format!("{kind} for {}", duration.describe())
}
