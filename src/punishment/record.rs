//! Punishment records
//!
//! A record is the local statement that a community account is restricted
//! because of a ban or mute on the game server. Records are replaced
//! wholesale, never edited in place.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Stored `expiry_time` value for permanent punishments
pub const PERMANENT_SENTINEL: i64 = -1;

/// Kind of restriction a record represents. Warnings never produce a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PunishmentKind {
    Ban,
    Mute,
}

impl PunishmentKind {
    /// Stored and displayed form
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ban => "BAN",
            Self::Mute => "MUTE",
        }
    }

    /// Key used to look up message templates
    #[must_use]
    pub fn template_key(self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Mute => "mute",
        }
    }
}

impl fmt::Display for PunishmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown punishment kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for PunishmentKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("BAN") {
            Ok(Self::Ban)
        } else if s.eq_ignore_ascii_case("MUTE") {
            Ok(Self::Mute)
        } else {
            Err(UnknownKind(s.to_string()))
        }
    }
}

/// When a punishment stops applying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expiry {
    Permanent,
    At(DateTime<Utc>),
}

impl Expiry {
    /// Decode the stored epoch-millis form
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        if millis == PERMANENT_SENTINEL {
            return Self::Permanent;
        }
        // An unrepresentable instant is treated as long past
        Self::At(DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    /// Encode to epoch millis, `-1` for permanent
    #[must_use]
    pub fn as_millis(self) -> i64 {
        match self {
            Self::Permanent => PERMANENT_SENTINEL,
            Self::At(at) => at.timestamp_millis(),
        }
    }
}

/// Length of a punishment as reported by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunishmentDuration {
    Permanent,
    Timed(Duration),
}

impl PunishmentDuration {
    /// Ledger entries carry an absolute end timestamp where `0` means permanent.
    #[must_use]
    pub fn from_date_end(date_end_millis: i64, now: DateTime<Utc>) -> Self {
        if date_end_millis == 0 {
            Self::Permanent
        } else {
            Self::Timed(Duration::milliseconds(
                date_end_millis.saturating_sub(now.timestamp_millis()),
            ))
        }
    }

    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        if millis == PERMANENT_SENTINEL {
            Self::Permanent
        } else {
            Self::Timed(Duration::milliseconds(millis))
        }
    }

    #[must_use]
    pub fn expiry_from(self, now: DateTime<Utc>) -> Expiry {
        match self {
            Self::Permanent => Expiry::Permanent,
            Self::Timed(duration) => Expiry::At(now + duration),
        }
    }

    /// Human readable form used in logs and messages
    #[must_use]
    pub fn describe(self) -> String {
        match self {
            Self::Permanent => "Permanent".to_string(),
            Self::Timed(duration) => format_duration(duration),
        }
    }
}

/// Render a duration the way players see it: "3 days", "1 hour", "Expired".
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.num_milliseconds();
    if millis <= 0 {
        return "Expired".to_string();
    }

    let seconds = millis / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        plural(days, "day")
    } else if hours > 0 {
        plural(hours, "hour")
    } else if minutes > 0 {
        plural(minutes, "minute")
    } else {
        plural(seconds, "second")
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("{count} {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

/// Active restriction for one community account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentRecord {
    /// Punished game account
    pub game_uuid: Uuid,
    /// Game display name at the time of the punishment
    pub player_name: String,
    pub kind: PunishmentKind,
    pub reason: Option<String>,
    pub expiry: Expiry,
    issued_at: DateTime<Utc>,
}

impl PunishmentRecord {
    #[must_use]
    pub fn new(
        game_uuid: Uuid,
        player_name: impl Into<String>,
        kind: PunishmentKind,
        reason: Option<String>,
        expiry: Expiry,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            game_uuid,
            player_name: player_name.into(),
            kind,
            reason,
            expiry,
            issued_at,
        }
    }

    /// Create a record issued at `now` that lasts for `duration`
    #[must_use]
    pub fn issue(
        game_uuid: Uuid,
        player_name: impl Into<String>,
        kind: PunishmentKind,
        reason: Option<String>,
        duration: PunishmentDuration,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            game_uuid,
            player_name,
            kind,
            reason,
            duration.expiry_from(now),
            now,
        )
    }

    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.expiry == Expiry::Permanent
    }

    /// A record is expired once its real expiry is at or before `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Expiry::Permanent => false,
            Expiry::At(at) => at <= now,
        }
    }

    /// Remaining time, `None` for permanent punishments
    #[must_use]
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.expiry {
            Expiry::Permanent => None,
            Expiry::At(at) => Some((at - now).max(Duration::zero())),
        }
    }

    /// Remaining milliseconds, `-1` for permanent punishments
    #[must_use]
    pub fn time_remaining_millis(&self, now: DateTime<Utc>) -> i64 {
        self.time_remaining(now)
            .map_or(PERMANENT_SENTINEL, |remaining| remaining.num_milliseconds())
    }

    #[must_use]
    pub fn time_remaining_formatted(&self, now: DateTime<Utc>) -> String {
        match self.time_remaining(now) {
            None => "Permanent".to_string(),
            Some(remaining) => format_duration(remaining),
        }
    }

    /// Length of the punishment measured from when this record was issued
    #[must_use]
    pub fn duration(&self) -> PunishmentDuration {
        match self.expiry {
            Expiry::Permanent => PunishmentDuration::Permanent,
            Expiry::At(at) => PunishmentDuration::Timed(at - self.issued_at),
        }
    }

    #[must_use]
    pub fn reason_or_default(&self) -> &str {
        self.reason.as_deref().unwrap_or(NO_REASON)
    }
}

/// Placeholder used wherever a reason is missing
pub const NO_REASON: &str = "No reason provided";
