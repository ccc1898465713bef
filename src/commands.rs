use crate::punishment::PunishmentRecord;
use crate::{Data, Error};
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use poise::{Context, command};
use tracing::warn;
use uuid::Uuid;

/// Most punishments listed in a single reply
const LIST_LIMIT: usize = 20;

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[command(prefix_command, slash_command, guild_only)]
pub async fn ping(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// Show active punishments, or the punishment of one member
#[command(slash_command, guild_only, ephemeral)]
pub async fn punishments(
    ctx: Context<'_, Data, Error>,
    #[description = "Member to check"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let enforcer = ctx.data().bridge.enforcer();
    let tracker = enforcer.tracker();
    let now = tracker.now();

    let reply = if let Some(user) = user {
        let community_id = user.id.get().to_string();
        match enforcer.current_punishment(&community_id).await {
            Some(record) => describe_punishment(&community_id, &record, now),
            None => format!("<@{community_id}> has no active punishment."),
        }
    } else {
        let mut records: Vec<_> = tracker.get_all_punishments().await.into_iter().collect();
        records.retain(|(_, record)| !record.is_expired(now));
        records.sort_by(|(a, _), (b, _)| a.cmp(b));
        summarize(&records, now)
    };

    ctx.say(reply).await?;
    Ok(())
}

/// Link a game account to a member and sync any punishment it already has
#[command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn link(
    ctx: Context<'_, Data, Error>,
    #[description = "Member to link"] user: serenity::User,
    #[description = "Game account uuid"] game_uuid: String,
) -> Result<(), Error> {
    let Ok(game_uuid) = Uuid::parse_str(game_uuid.trim()) else {
        ctx.say(format!("`{game_uuid}` is not a valid uuid.")).await?;
        return Ok(());
    };

    let community_id = user.id.get().to_string();
    let data = ctx.data();
    data.links.link(game_uuid, community_id.clone());
    if let Err(e) = data.links.save().await {
        warn!("Failed to save account links: {e}");
    }

    ctx.say(format!("Linked {game_uuid} to <@{community_id}>."))
        .await?;

    if let Some(record) = data
        .bridge
        .handle_account_linked(game_uuid, &community_id)
        .await
    {
        ctx.say(format!(
            "Found an active {} on the game server, applied it.",
            record.kind
        ))
        .await?;
    }
    Ok(())
}

/// One line describing a member's punishment
#[must_use]
pub fn describe_punishment(
    community_id: &str,
    record: &PunishmentRecord,
    now: DateTime<Utc>,
) -> String {
    let remaining = if record.is_permanent() {
        "permanent".to_string()
    } else {
        format!("{} remaining", record.time_remaining_formatted(now))
    };
    format!(
        "<@{community_id}>: {} as {} ({}), {remaining}",
        record.kind,
        record.player_name,
        record.reason_or_default(),
    )
}

/// Reply listing active punishments, capped at [`LIST_LIMIT`] lines
#[must_use]
pub fn summarize(records: &[(String, PunishmentRecord)], now: DateTime<Utc>) -> String {
    if records.is_empty() {
        return "No active punishments.".to_string();
    }

    let mut lines = vec![format!("**{} active punishment(s)**", records.len())];
    lines.extend(
        records
            .iter()
            .take(LIST_LIMIT)
            .map(|(community_id, record)| describe_punishment(community_id, record, now)),
    );
    if records.len() > LIST_LIMIT {
        lines.push(format!("...and {} more", records.len() - LIST_LIMIT));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punishment::{PunishmentDuration, PunishmentKind};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn record(kind: PunishmentKind, duration: PunishmentDuration) -> PunishmentRecord {
        PunishmentRecord::issue(
            Uuid::new_v4(),
            "Steve",
            kind,
            Some("spam".to_string()),
            duration,
            now(),
        )
    }

    // Test that the ping command is properly defined
    #[test]
    fn test_ping_command_definition() {
        let cmd = ping();
        assert_eq!(cmd.name, "ping");
        assert!(
            cmd.description
                .as_deref()
                .unwrap_or_default()
                .contains("check if the bot is responsive")
        );
        assert!(cmd.guild_only);
        assert!(cmd.create_as_slash_command().is_some());
    }

    #[test]
    fn test_link_requires_manage_roles() {
        let cmd = link();
        assert_eq!(cmd.name, "link");
        assert!(cmd.guild_only);
        assert!(
            cmd.required_permissions
                .contains(serenity::Permissions::MANAGE_ROLES)
        );
        assert_eq!(cmd.parameters.len(), 2);
    }

    #[test]
    fn test_punishments_user_is_optional() {
        let cmd = punishments();
        assert_eq!(cmd.parameters.len(), 1);
        assert!(!cmd.parameters[0].required);
        assert!(cmd.ephemeral);
    }

    #[test]
    fn test_describe_punishment() {
        let timed = record(PunishmentKind::Mute, PunishmentDuration::Timed(Duration::hours(3)));
        assert_eq!(
            describe_punishment("42", &timed, now()),
            "<@42>: MUTE as Steve (spam), 3 hours remaining"
        );
        let permanent = record(PunishmentKind::Ban, PunishmentDuration::Permanent);
        assert!(describe_punishment("42", &permanent, now()).ends_with("(spam), permanent"));
    }

    #[test]
    fn test_summarize_caps_list() {
        assert_eq!(summarize(&[], now()), "No active punishments.");

        let records: Vec<_> = (0..25)
            .map(|i| {
                (
                    i.to_string(),
                    record(PunishmentKind::Ban, PunishmentDuration::Permanent),
                )
            })
            .collect();
        let text = summarize(&records, now());
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "**25 active punishment(s)**");
        assert_eq!(lines.len(), 1 + LIST_LIMIT + 1);
        assert_eq!(lines[LIST_LIMIT + 1], "...and 5 more");
    }
}
