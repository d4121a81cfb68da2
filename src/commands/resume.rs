use anyhow::{Result, anyhow};
use serenity::all::{
    CommandInteraction, Context as SerenityContext, CreateCommand, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse,
};

use crate::session::{self, PauseOutcome};

pub fn definition() -> CreateCommand {
    CreateCommand::new("resume").description("Resume a paused song")
}

pub async fn handle(ctx: &SerenityContext, cmd: &CommandInteraction) -> Result<()> {
    cmd.create_response(
        &ctx.http,
        CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
    )
    .await
    .ok();

    let guild_id = cmd.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let registry = session::registry(ctx)
        .await
        .ok_or_else(|| anyhow!("session registry not initialized"))?;
    let msg = match registry.get(guild_id).await {
        None => "❌ Nothing is playing.",
        Some(session) => match session.set_paused(false).await {
            PauseOutcome::NothingPlaying => "❌ Nothing is playing.",
            _ => "▶️ Resumed.",
        },
    };
    cmd.edit_response(&ctx.http, EditInteractionResponse::new().content(msg))
        .await
        .ok();
    Ok(())
}
