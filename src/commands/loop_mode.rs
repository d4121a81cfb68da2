use anyhow::{Result, anyhow};
use serenity::all::{
    CommandDataOptionValue, CommandInteraction, CommandOptionType, Context as SerenityContext,
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse,
};

use crate::queue::LoopMode;
use crate::session;

pub fn definition() -> CreateCommand {
    let opt = CreateCommandOption::new(CommandOptionType::String, "mode", "off, single, or all")
        .required(true)
        .add_string_choice("off", "off")
        .add_string_choice("single", "single")
        .add_string_choice("all", "all");
    CreateCommand::new("loop")
        .description("Set the loop mode")
        .add_option(opt)
}

pub async fn handle(ctx: &SerenityContext, cmd: &CommandInteraction) -> Result<()> {
    let mode = cmd
        .data
        .options
        .iter()
        .find(|o| o.name == "mode")
        .and_then(|o| match &o.value {
            CommandDataOptionValue::String(s) => LoopMode::parse(s),
            _ => None,
        })
        .ok_or_else(|| anyhow!("missing or invalid mode"))?;

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
        None => "❌ Nothing is playing. Start something with /play first.".to_string(),
        Some(session) => {
            let mode = session.set_loop_mode(mode).await;
            format!("🔁 Loop mode set to **{}**", mode.label())
        }
    };
    cmd.edit_response(&ctx.http, EditInteractionResponse::new().content(msg))
        .await
        .ok();
    Ok(())
}
