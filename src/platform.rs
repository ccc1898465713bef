//! Community platform seam
//!
//! Everything the bot does to Discord goes through [`CommunityPlatform`], so the
//! enforcement logic can be exercised against a mock.

use async_trait::async_trait;
use serenity::all::{
    ChannelId, CreateMessage, EditMember, GuildId, Http, HttpError, MessageId, RoleId, UserId,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Invalid platform identity: {0}")]
    InvalidIdentity(String),

    #[error("Member {0} is not part of the community")]
    MemberNotFound(String),

    #[error("Discord API error: {0}")]
    Discord(#[from] Box<serenity::Error>),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl PlatformError {
    /// Whether the error only means there is nobody to act on
    #[must_use]
    pub fn is_missing_member(&self) -> bool {
        matches!(self, Self::MemberNotFound(_) | Self::InvalidIdentity(_))
    }
}

impl From<serenity::Error> for PlatformError {
    fn from(e: serenity::Error) -> Self {
        Self::Discord(Box::new(e))
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Snapshot of a community member taken when it was looked up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub display_name: String,
    pub roles: Vec<u64>,
    /// Server-muted in voice
    pub voice_muted: bool,
}

impl Member {
    #[must_use]
    pub fn has_role(&self, role_id: u64) -> bool {
        self.roles.contains(&role_id)
    }
}

/// A message the bot posted and may later delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// Operations the bot performs against the community
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommunityPlatform: Send + Sync {
    async fn lookup_member(&self, member_id: &str) -> PlatformResult<Member>;

    async fn add_role(&self, member_id: &str, role_id: u64, reason: &str) -> PlatformResult<()>;

    async fn remove_role(&self, member_id: &str, role_id: u64, reason: &str)
    -> PlatformResult<()>;

    async fn set_voice_mute(&self, member_id: &str, muted: bool) -> PlatformResult<()>;

    async fn send_direct_message(&self, member_id: &str, text: &str) -> PlatformResult<()>;

    async fn send_channel_message(&self, channel_id: u64, text: &str)
    -> PlatformResult<MessageRef>;

    async fn delete_message(&self, message: MessageRef) -> PlatformResult<()>;
}

/// Parse a Discord snowflake, rejecting anything serenity would panic on
///
/// # Errors
/// Returns `InvalidIdentity` for non-numeric or zero ids.
pub fn parse_snowflake(raw: &str) -> PlatformResult<u64> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(PlatformError::InvalidIdentity(raw.to_string())),
        Ok(id) => Ok(id),
    }
}

fn nonzero(id: u64, what: &str) -> PlatformResult<u64> {
    if id == 0 {
        Err(PlatformError::InvalidIdentity(format!("{what} id 0")))
    } else {
        Ok(id)
    }
}

fn is_not_found(e: &serenity::Error) -> bool {
    matches!(
        e,
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404
    )
}

/// Discord implementation backed by the serenity HTTP client
pub struct SerenityPlatform {
    http: Arc<Http>,
    guild_id: GuildId,
}

impl SerenityPlatform {
    /// # Errors
    /// Returns `InvalidIdentity` if the guild id is zero.
    pub fn new(http: Arc<Http>, guild_id: u64) -> PlatformResult<Self> {
        let guild_id = GuildId::new(nonzero(guild_id, "guild")?);
        Ok(Self { http, guild_id })
    }

    fn user_id(member_id: &str) -> PlatformResult<UserId> {
        parse_snowflake(member_id).map(UserId::new)
    }
}

#[async_trait]
impl CommunityPlatform for SerenityPlatform {
    async fn lookup_member(&self, member_id: &str) -> PlatformResult<Member> {
        let http: &Http = &self.http;
        let user_id = Self::user_id(member_id)?;
        let member = self.guild_id.member(http, user_id).await.map_err(|e| {
            if is_not_found(&e) {
                PlatformError::MemberNotFound(member_id.to_string())
            } else {
                e.into()
            }
        })?;

        Ok(Member {
            id: member.user.id.get().to_string(),
            display_name: member.display_name().to_string(),
            roles: member.roles.iter().map(|role| role.get()).collect(),
            voice_muted: member.mute,
        })
    }

    async fn add_role(&self, member_id: &str, role_id: u64, reason: &str) -> PlatformResult<()> {
        let http: &Http = &self.http;
        let user_id = Self::user_id(member_id)?;
        let role_id = RoleId::new(nonzero(role_id, "role")?);
        http.add_member_role(self.guild_id, user_id, role_id, Some(reason))
            .await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        member_id: &str,
        role_id: u64,
        reason: &str,
    ) -> PlatformResult<()> {
        let http: &Http = &self.http;
        let user_id = Self::user_id(member_id)?;
        let role_id = RoleId::new(nonzero(role_id, "role")?);
        http.remove_member_role(self.guild_id, user_id, role_id, Some(reason))
            .await?;
        Ok(())
    }

    async fn set_voice_mute(&self, member_id: &str, muted: bool) -> PlatformResult<()> {
        let http: &Http = &self.http;
        let user_id = Self::user_id(member_id)?;
        self.guild_id
            .edit_member(http, user_id, EditMember::new().mute(muted))
            .await?;
        Ok(())
    }

    async fn send_direct_message(&self, member_id: &str, text: &str) -> PlatformResult<()> {
        let http: &Http = &self.http;
        let user_id = Self::user_id(member_id)?;
        user_id
            .direct_message(http, CreateMessage::new().content(text))
            .await?;
        Ok(())
    }

    async fn send_channel_message(
        &self,
        channel_id: u64,
        text: &str,
    ) -> PlatformResult<MessageRef> {
        let http: &Http = &self.http;
        let channel = ChannelId::new(nonzero(channel_id, "channel")?);
        let message = channel.say(http, text).await?;
        Ok(MessageRef {
            channel_id: message.channel_id.get(),
            message_id: message.id.get(),
        })
    }

    async fn delete_message(&self, message: MessageRef) -> PlatformResult<()> {
        let http: &Http = &self.http;
        let channel = ChannelId::new(nonzero(message.channel_id, "channel")?);
        let message_id = MessageId::new(nonzero(message.message_id, "message")?);
        channel.delete_message(http, message_id).await?;
        Ok(())
    }
}
