use anyhow::Result;
use serenity::all::{
    CommandInteraction, Context as SerenityContext, CreateCommand, CreateInteractionResponse,
    CreateInteractionResponseMessage,
};

pub fn definition() -> CreateCommand {
    CreateCommand::new("help").description("List the available commands")
}

pub async fn handle(ctx: &SerenityContext, cmd: &CommandInteraction) -> Result<()> {
    let text = "📖 **Commands**\n\
        • /play <title or url> — queue a song\n\
        • /skip — skip the current song\n\
        • /pause — pause playback\n\
        • /resume — resume playback\n\
        • /loop <off|single|all> — set the loop mode\n\
        • /queue — show the queue\n\
        • /help — this message\n\
        \n\
        ⏳ Only the requester can skip instantly; everyone else votes.";
    cmd.create_response(
        &ctx.http,
        CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().content(text)),
    )
    .await
    .ok();
    Ok(())
}
