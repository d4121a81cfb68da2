use anyhow::{Result, anyhow};
use serenity::all::{
    CommandDataOptionValue, CommandInteraction, CommandOptionType, Context as SerenityContext,
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse,
};

use crate::resolver;
use crate::session::{self, EnqueueOutcome};

pub fn definition() -> CreateCommand {
    let opt = CreateCommandOption::new(CommandOptionType::String, "query", "Song title or URL")
        .required(true);
    CreateCommand::new("play")
        .description("Queue a song by URL or search")
        .add_option(opt)
}

pub async fn handle(ctx: &SerenityContext, cmd: &CommandInteraction) -> Result<()> {
    let query = cmd
        .data
        .options
        .iter()
        .find(|o| o.name == "query")
        .and_then(|o| match &o.value {
            CommandDataOptionValue::String(s) => Some(s.as_str()),
            _ => None,
        })
        .ok_or_else(|| anyhow!("missing query"))?;

    // Resolution can take a while; defer and edit the response later.
    cmd.create_response(
        &ctx.http,
        CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
    )
    .await
    .ok();

    let guild_id = cmd.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let Some((channel_id, _)) = super::voice_presence(ctx, guild_id, cmd.user.id) else {
        cmd.edit_response(
            &ctx.http,
            EditInteractionResponse::new().content("🔇 Join a voice channel first."),
        )
        .await
        .ok();
        return Ok(());
    };

    let track = match resolver::resolve(query, cmd.user.id).await {
        Ok(track) => track,
        Err(e) => {
            cmd.edit_response(
                &ctx.http,
                EditInteractionResponse::new().content(format!("❌ Could not resolve that: {e}")),
            )
            .await
            .ok();
            return Ok(());
        }
    };

    let registry = session::registry(ctx)
        .await
        .ok_or_else(|| anyhow!("session registry not initialized"))?;
    let session = registry.get_or_create(guild_id).await;

    let msg = match session.enqueue(track, channel_id).await {
        Ok(EnqueueOutcome::Started { title }) => format!("🎶 Now playing **{title}**"),
        Ok(EnqueueOutcome::Queued { title, position }) => {
            format!("✅ Added **{title}** to the queue (position {position})")
        }
        Ok(EnqueueOutcome::Dropped { title }) => {
            format!("⚠️ **{title}** could not be streamed and was dropped.")
        }
        Err(e) => format!("❌ {e}"),
    };
    cmd.edit_response(&ctx.http, EditInteractionResponse::new().content(msg))
        .await
        .ok();
    Ok(())
}
