use anyhow::Result;
use serenity::{
    all::{
        Command as AppCommand, Context as SerenityContext, GatewayIntents, Interaction,
        Permissions, Ready,
    },
    async_trait,
};
use songbird::{Config as VoiceConfig, Songbird, driver::MixMode, serenity::SerenityInit};
use tracing::{error, info};

mod commands;
mod env;
mod error;
mod metrics;
mod queue;
mod resolver;
mod session;

use metrics::METRICS;
use session::{SessionRegistry, SessionRegistryKey};

struct Handler;

#[async_trait]
impl serenity::prelude::EventHandler for Handler {
    async fn ready(&self, ctx: SerenityContext, ready: Ready) {
        info!("Logged in as {}", ready.user.name);

        // Log an invite URL with minimal required voice permissions
        let perms = Permissions::CONNECT | Permissions::SPEAK;
        if let Ok(app) = ctx.http.get_current_application_info().await {
            let invite = format!(
                "https://discord.com/api/oauth2/authorize?client_id={}&permissions={}&scope=bot%20applications.commands",
                app.id,
                perms.bits()
            );
            info!(
                "Invite this bot: {} (app_id={}, user_id={})",
                invite, app.id, ready.user.id
            );
        }

        // Register global slash commands
        for def in [
            commands::play::definition(),
            commands::skip::definition(),
            commands::pause::definition(),
            commands::resume::definition(),
            commands::loop_mode::definition(),
            commands::queue::definition(),
            commands::help::definition(),
        ] {
            if let Err(e) = AppCommand::create_global_command(&ctx.http, def).await {
                error!("failed to register global command: {e:?}");
            }
        }
    }

    async fn interaction_create(&self, ctx: SerenityContext, interaction: Interaction) {
        if let Interaction::Command(cmd) = interaction {
            let result = match cmd.data.name.as_str() {
                "play" => commands::play::handle(&ctx, &cmd).await,
                "skip" => commands::skip::handle(&ctx, &cmd).await,
                "pause" => commands::pause::handle(&ctx, &cmd).await,
                "resume" => commands::resume::handle(&ctx, &cmd).await,
                "loop" => commands::loop_mode::handle(&ctx, &cmd).await,
                "queue" => commands::queue::handle(&ctx, &cmd).await,
                "help" => commands::help::handle(&ctx, &cmd).await,
                _ => Ok(()),
            };
            if let Err(why) = result {
                error!("/{} failed: {why:?}", cmd.data.name);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let token = env::read_discord_token()?;
    let intents = GatewayIntents::non_privileged() | GatewayIntents::GUILD_VOICE_STATES;

    // Tune the voice driver to reduce the chance of audio hiccups under load.
    // - preallocated_tracks: avoid runtime allocations when queueing
    // - use_softclip(false): small perf win; safe since we play one track at a time
    let voice_cfg = {
        let mix = match std::env::var("ARIA_MIX_MODE").as_deref() {
            Ok("mono") => MixMode::Mono,
            _ => MixMode::Stereo,
        };
        VoiceConfig::default()
            .preallocated_tracks(2)
            .use_softclip(false)
            .mix_mode(mix)
    };
    let songbird = Songbird::serenity_from_config(voice_cfg);
    let registry = SessionRegistry::new(songbird.clone());

    let mut client = serenity::Client::builder(token, intents)
        .event_handler(Handler)
        .register_songbird_with(songbird)
        .type_map_insert::<SessionRegistryKey>(registry)
        .await?;

    // Leave a clean exit path: on Ctrl-C, log a final snapshot and stop
    // the shards so in-flight voice connections are released.
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutting down: {:?}", METRICS.snapshot());
        shard_manager.shutdown_all().await;
    });

    info!("Commands: /play query:<title or url>, /skip, /pause, /resume, /loop, /queue, /help");
    info!(
        "Tunables: ARIA_MIX_MODE=mono|stereo, ARIA_BITRATE=16000..192000, ARIA_IDLE_TIMEOUT_MS=1..3600000, DOWNLOAD_FOLDER=path"
    );

    if let Err(why) = client.start_autosharded().await {
        error!("Client error: {why:?}");
    }
    Ok(())
}
