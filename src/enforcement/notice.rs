//! Message templates

use crate::config::{LinkConfig, MessageTemplate};
use crate::ledger::LedgerEntryKind;
use crate::punishment::{PunishmentKind, PunishmentRecord};
use chrono::{DateTime, Utc};

/// Replace every `{name}` placeholder in `template`
///
/// The template is scanned once, so placeholder text inside a substituted
/// value is left as it is. Unknown placeholders are kept verbatim.
#[must_use]
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find(['{', '}']).filter(|i| after.as_bytes()[*i] == b'}') else {
            out.push('{');
            rest = after;
            continue;
        };
        let name = &after[..close];
        match values.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Direct message for a newly issued punishment or warning
///
/// `time` is empty for warnings.
#[must_use]
pub fn notification(
    config: &LinkConfig,
    kind: LedgerEntryKind,
    player: &str,
    reason: &str,
    time: &str,
) -> String {
    let messages = &config.notification_messages;
    let template = match kind {
        LedgerEntryKind::Ban => &messages.ban,
        LedgerEntryKind::Mute => &messages.mute,
        LedgerEntryKind::Warn => &messages.warn,
    };
    render(
        &template.text(),
        &[("reason", reason), ("time", time), ("player", player)],
    )
}

/// In-channel warning for a punished member who tried to talk
#[must_use]
pub fn warning(
    config: &LinkConfig,
    record: &PunishmentRecord,
    mention: &str,
    now: DateTime<Utc>,
) -> String {
    let template: &MessageTemplate = match record.kind {
        PunishmentKind::Ban => &config.messages.ban,
        PunishmentKind::Mute => &config.messages.mute,
    };
    let time = record.time_remaining_formatted(now);
    let text = render(
        &template.text(),
        &[
            ("reason", record.reason_or_default()),
            ("time", time.as_str()),
            ("player", record.player_name.as_str()),
        ],
    );
    format!("{mention} {text}")
}

/// Values for an audit-channel message
#[derive(Debug, Clone)]
pub struct ChannelNotice<'a> {
    pub member_id: &'a str,
    pub player: &'a str,
    pub role_id: Option<u64>,
    pub kind: PunishmentKind,
    pub reason: &'a str,
    pub duration: &'a str,
}

impl ChannelNotice<'_> {
    #[must_use]
    pub fn render(&self, template: &MessageTemplate) -> String {
        let mention = format!("<@{}>", self.member_id);
        let role = self
            .role_id
            .map_or_else(|| "none".to_string(), |id| format!("<@&{id}>"));
        render(
            &template.text(),
            &[
                ("discord-user", mention.as_str()),
                ("discord-id", self.member_id),
                ("player", self.player),
                ("punished-role", role.as_str()),
                ("type", self.kind.as_str()),
                ("reason", self.reason),
                ("duration", self.duration),
            ],
        )
    }
}
