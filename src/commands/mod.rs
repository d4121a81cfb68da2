pub mod help;
pub mod loop_mode;
pub mod pause;
pub mod play;
pub mod queue;
pub mod resume;
pub mod skip;

use serenity::all::{ChannelId, Context as SerenityContext, GuildId, UserId};

/// The voice channel the user occupies and how many non-bot members are
/// in it, read from the gateway cache. `None` when the user is not in
/// voice. Members the cache cannot classify count as humans.
pub(crate) fn voice_presence(
    ctx: &SerenityContext,
    guild_id: GuildId,
    user_id: UserId,
) -> Option<(ChannelId, usize)> {
    let guild = ctx.cache.guild(guild_id)?;
    let channel = guild
        .voice_states
        .get(&user_id)
        .and_then(|vs| vs.channel_id)?;
    let listeners = guild
        .voice_states
        .values()
        .filter(|vs| vs.channel_id == Some(channel))
        .filter(|vs| {
            let is_bot = vs
                .member
                .as_ref()
                .map(|m| m.user.bot)
                .or_else(|| guild.members.get(&vs.user_id).map(|m| m.user.bot))
                .unwrap_or(false);
            !is_bot
        })
        .count();
    Some((channel, listeners))
}
