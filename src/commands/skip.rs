use anyhow::{Result, anyhow};
use serenity::all::{
    CommandInteraction, Context as SerenityContext, CreateCommand, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse,
};

use crate::session::{self, SkipOutcome};

pub fn definition() -> CreateCommand {
    CreateCommand::new("skip").description("Skip the current song")
}

pub async fn handle(ctx: &SerenityContext, cmd: &CommandInteraction) -> Result<()> {
    cmd.create_response(
        &ctx.http,
        CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
    )
    .await
    .ok();

    let guild_id = cmd.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let Some((_, listeners)) = super::voice_presence(ctx, guild_id, cmd.user.id) else {
        cmd.edit_response(
            &ctx.http,
            EditInteractionResponse::new()
                .content("🔇 You need to be in the voice channel to skip."),
        )
        .await
        .ok();
        return Ok(());
    };

    let registry = session::registry(ctx)
        .await
        .ok_or_else(|| anyhow!("session registry not initialized"))?;
    let msg = match registry.get(guild_id).await {
        None => "❌ Nothing is playing.".to_string(),
        Some(session) => match session.request_skip(cmd.user.id, listeners).await {
            SkipOutcome::NothingPlaying => "❌ Nothing is playing.".to_string(),
            SkipOutcome::SkippedByRequester => "⏭️ Skipped by the requester.".to_string(),
            SkipOutcome::SkippedByVote => "⏭️ Skipped by vote.".to_string(),
            SkipOutcome::VotePending { votes, required } => {
                format!("🗳️ Vote skip: {votes}/{required} needed")
            }
        },
    };
    cmd.edit_response(&ctx.http, EditInteractionResponse::new().content(msg))
        .await
        .ok();
    Ok(())
}
