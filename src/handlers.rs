use crate::EVENT_TARGET;
use crate::bridge::{InboundMessage, PunishmentBridge};
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, GuildId, Member, Message, Ready,
};
use tracing::{debug, info, warn};

/// Forwards gateway events to the punishment bridge
///
/// Work is spawned so the gateway is never held up by store or API calls.
pub struct Handler {
    bridge: PunishmentBridge,
}

impl Handler {
    #[must_use]
    pub fn new(bridge: PunishmentBridge) -> Self {
        Self { bridge }
    }
}

fn inbound(msg: &Message) -> InboundMessage {
    InboundMessage {
        author_id: msg.author.id.get().to_string(),
        author_is_bot: msg.author.bot,
        guild_id: msg.guild_id.map(GuildId::get),
        channel_id: msg.channel_id.get(),
        message_id: msg.id.get(),
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_id = self.bridge.enforcer().config().guild_id;
        if !guilds.iter().any(|id| id.get() == guild_id) {
            warn!(
                target: EVENT_TARGET,
                "Bot is not a member of the configured guild {guild_id}"
            );
        }
        info!(
            target: EVENT_TARGET,
            "Cache ready! The bot is in {} guild(s)",
            ctx.cache.guild_count()
        );
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let message = inbound(&msg);
        if message.author_is_bot || message.guild_id.is_none() {
            return;
        }

        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            bridge.handle_message(message).await;
        });
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: Member) {
        let guild_id = new_member.guild_id.get();
        let community_id = new_member.user.id.get().to_string();
        debug!(target: EVENT_TARGET, "Member {community_id} joined guild {guild_id}");

        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            bridge.handle_member_join(guild_id, &community_id).await;
        });
    }
}
