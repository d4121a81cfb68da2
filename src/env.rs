use std::time::Duration;

use anyhow::{Result, anyhow};

pub fn read_discord_token() -> Result<String> {
    const CANDIDATES: &[&str] = &["DISCORD_TOKEN", "DISCORD_BOT_TOKEN", "BOT_TOKEN"];
    for key in CANDIDATES {
        if let Ok(val) = std::env::var(key)
            && !val.is_empty()
        {
            return Ok(val);
        }
    }
    Err(anyhow!(
        "Set one of DISCORD_TOKEN, DISCORD_BOT_TOKEN, or BOT_TOKEN in environment"
    ))
}

/// Voice bitrate in bits per second. Lower values reduce CPU usage and
/// packet size on busy hosts.
pub fn read_bitrate() -> u32 {
    std::env::var("ARIA_BITRATE")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|v| (16_000..=192_000).contains(v))
        .unwrap_or(96_000)
}

/// How long a session may sit with an empty queue before the bot leaves
/// the voice channel.
pub fn read_idle_timeout() -> Duration {
    let ms = std::env::var("ARIA_IDLE_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|ms| *ms > 0 && *ms <= 3_600_000)
        .unwrap_or(300_000);
    Duration::from_millis(ms)
}
