use anyhow::{Result, anyhow};
use serenity::all::{
    CommandInteraction, Context as SerenityContext, CreateCommand, CreateEmbed,
    CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
};

use crate::session;

pub fn definition() -> CreateCommand {
    CreateCommand::new("queue").description("Show the current queue")
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
    let titles = match registry.get(guild_id).await {
        Some(session) => session.queue_titles().await,
        None => Vec::new(),
    };

    if titles.is_empty() {
        cmd.edit_response(
            &ctx.http,
            EditInteractionResponse::new().content("📭 Queue is empty."),
        )
        .await
        .ok();
        return Ok(());
    }

    let list = titles
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. {}", i + 1, t))
        .collect::<Vec<_>>()
        .join("\n");
    let embed = CreateEmbed::new()
        .title("📜 Current queue")
        .description(list)
        .colour(0x00FF7F); // Spring green
    cmd.edit_response(
        &ctx.http,
        EditInteractionResponse::new().embeds(vec![embed]),
    )
    .await
    .ok();
    Ok(())
}
