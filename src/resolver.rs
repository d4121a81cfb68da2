//! Track resolution and audio acquisition, both backed by yt-dlp.
//!
//! Resolution maps a user query (direct link or free-text search) to a
//! stable URL plus display title. Acquisition downloads the audio into a
//! per-media cache and hands the file to the voice driver. The yt-dlp
//! binary itself is looked up on PATH and otherwise fetched once from the
//! project's release feed into the user cache dir.

use std::{
    hash::{DefaultHasher, Hash, Hasher},
    path::PathBuf,
    process::Stdio,
};

use once_cell::sync::Lazy;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use serenity::all::UserId;
use songbird::input::{File as FileInput, Input};
use tokio::{fs, process::Command as TokioCommand};
use tracing::{debug, warn};
use url::Url;

use crate::{error::ResolveError, queue::Track};

static HTTP: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent("aria-bot/0.1 (+https://github.com/)")
        .build()
        .expect("client")
});

const GITHUB_RELEASES_API: &str = "https://api.github.com/repos/yt-dlp/yt-dlp/releases/latest";

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    assets: Vec<ReleaseAsset>,
}

/// The subset of `yt-dlp --dump-single-json` output we read. Search
/// queries come back as a playlist wrapper with nested entries.
#[derive(Debug, Deserialize)]
struct MediaInfo {
    title: Option<String>,
    webpage_url: Option<String>,
    entries: Option<Vec<MediaInfo>>,
}

/// Resolves a query to a playable track. Direct http(s) links are passed
/// through; anything else becomes a first-result search.
pub async fn resolve(query: &str, requester: UserId) -> Result<Track, ResolveError> {
    let ytdlp = ensure_yt_dlp().await?;
    let target = if looks_like_url(query) {
        query.to_string()
    } else {
        format!("ytsearch1:{query}")
    };

    let out = TokioCommand::new(&ytdlp)
        .arg("--dump-single-json")
        .arg("--skip-download")
        .arg("--no-warnings")
        .arg("-q")
        .arg(&target)
        .stdin(Stdio::null())
        .output()
        .await?;
    if !out.status.success() {
        return Err(ResolveError::ToolFailed(out.status));
    }

    let info: MediaInfo = serde_json::from_slice(&out.stdout)?;
    let (url, title) = pick_first(info)?;
    debug!("resolved {query:?} -> {title:?}");
    Ok(Track {
        url,
        title,
        requester,
    })
}

/// Fetches the audio for a resolved URL and wraps it for the voice
/// driver. The download is cached per media id, so loop replays and
/// repeat requests skip the network.
pub async fn acquire_input(url: &str) -> Result<Input, ResolveError> {
    let path = download_audio(url).await?;
    Ok(FileInput::new(path).into())
}

pub fn looks_like_url(query: &str) -> bool {
    Url::parse(query)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Unwraps a search playlist to its first entry; plain extractions pass
/// through unchanged.
fn pick_first(info: MediaInfo) -> Result<(String, String), ResolveError> {
    let picked = match info.entries {
        Some(mut entries) => {
            if entries.is_empty() {
                return Err(ResolveError::NoMatch);
            }
            entries.remove(0)
        }
        None => info,
    };
    match (picked.webpage_url, picked.title) {
        (Some(url), Some(title)) => Ok((url, title)),
        _ => Err(ResolveError::NoMatch),
    }
}

fn tool_cache_dir() -> Result<PathBuf, ResolveError> {
    let base = dirs::cache_dir().ok_or(ResolveError::NoCacheDir)?;
    Ok(base.join("aria").join("yt-dlp"))
}

fn audio_cache_dir() -> Result<PathBuf, ResolveError> {
    if let Ok(dir) = std::env::var("DOWNLOAD_FOLDER") {
        let p = PathBuf::from(dir);
        return if p.is_absolute() {
            Ok(p)
        } else {
            Ok(std::env::current_dir()?.join(p))
        };
    }
    Ok(tool_cache_dir()?.join("downloads"))
}

fn platform_asset_name() -> &'static str {
    if cfg!(target_os = "windows") {
        if cfg!(target_arch = "x86_64") {
            "yt-dlp.exe"
        } else {
            "yt-dlp_x86.exe"
        }
    } else if cfg!(target_os = "linux") {
        "yt-dlp_linux"
    } else if cfg!(target_os = "macos") {
        "yt-dlp_macos"
    } else {
        "yt-dlp"
    }
}

async fn ensure_yt_dlp() -> Result<PathBuf, ResolveError> {
    if let Ok(p) = which::which("yt-dlp") {
        return Ok(p);
    }

    let dir = tool_cache_dir()?;
    fs::create_dir_all(&dir).await.ok();
    let local = dir.join(if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    });
    if fs::try_exists(&local).await.unwrap_or(false) {
        return Ok(local);
    }

    let rel: ReleaseInfo = HTTP
        .get(GITHUB_RELEASES_API)
        .header(ACCEPT, "application/vnd.github+json")
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let wanted = platform_asset_name();
    let asset = rel
        .assets
        .into_iter()
        .find(|a| a.name == wanted)
        .ok_or(ResolveError::NoAsset(wanted))?;

    let bytes = HTTP
        .get(asset.browser_download_url)
        .header(USER_AGENT, "aria-bot/0.1")
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    fs::write(&local, &bytes).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&local).await?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&local, perms).await?;
    }
    debug!("installed yt-dlp at {}", local.display());
    Ok(local)
}

/// Stable cache key for a media URL: the extractor id when yt-dlp can
/// produce one, else a hash of the URL.
async fn media_id(ytdlp: &PathBuf, url: &str) -> String {
    let out = TokioCommand::new(ytdlp)
        .arg("--print")
        .arg("id")
        .arg("--skip-download")
        .arg("-q")
        .arg(url)
        .stdin(Stdio::null())
        .output()
        .await;
    if let Ok(out) = out
        && out.status.success()
    {
        let id = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if !id.is_empty() {
            return id;
        }
    }
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    format!("h{:016x}", hasher.finish())
}

async fn download_audio(url: &str) -> Result<PathBuf, ResolveError> {
    let ytdlp = ensure_yt_dlp().await?;
    let base = audio_cache_dir()?;
    fs::create_dir_all(&base).await?;

    let id = media_id(&ytdlp, url).await;
    let cached = base.join(format!("{id}.mp3"));
    if fs::try_exists(&cached).await.unwrap_or(false) {
        debug!("audio cache hit for {id}");
        return Ok(cached);
    }

    // Work in a per-media scratch dir so a concurrent request for a
    // different track cannot pick up the wrong file.
    let scratch = base.join(format!("job-{id}"));
    fs::create_dir_all(&scratch).await?;

    let status = TokioCommand::new(&ytdlp)
        .arg("-f")
        .arg("bestaudio/best")
        .arg("-x")
        .arg("--audio-format")
        .arg("mp3")
        .arg("--audio-quality")
        .arg("0")
        .arg("--postprocessor-args")
        .arg("ffmpeg:-ar 48000 -ac 2") // 48kHz stereo, the voice gateway's native format
        .arg("--no-playlist")
        .arg("-q")
        .arg("-o")
        .arg(scratch.join("%(id)s.%(ext)s").to_string_lossy().to_string())
        .arg(url)
        .stdin(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        let _ = fs::remove_dir_all(&scratch).await;
        return Err(ResolveError::ToolFailed(status));
    }

    let produced = newest_mp3(&scratch).await?.ok_or(ResolveError::NoMatch)?;

    // Move into the cache slot; fall back to copy across devices, and
    // tolerate a concurrent download having won the race.
    let final_path = if fs::try_exists(&cached).await.unwrap_or(false)
        || fs::rename(&produced, &cached).await.is_ok()
    {
        cached
    } else if fs::copy(&produced, &cached).await.is_ok() {
        cached
    } else {
        warn!("could not move {} into the audio cache", produced.display());
        produced.clone()
    };
    if final_path != produced {
        let _ = fs::remove_dir_all(&scratch).await;
    }
    Ok(final_path)
}

async fn newest_mp3(dir: &PathBuf) -> Result<Option<PathBuf>, ResolveError> {
    let mut entries = fs::read_dir(dir).await?;
    let mut newest: Option<(PathBuf, std::time::SystemTime)> = None;
    while let Some(e) = entries.next_entry().await? {
        let p = e.path();
        if p.extension().and_then(|s| s.to_str()) == Some("mp3") {
            let meta = e.metadata().await?;
            let mtime = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            if newest.as_ref().map(|(_, t)| mtime > *t).unwrap_or(true) {
                newest = Some((p, mtime));
            }
        }
    }
    Ok(newest.map(|(p, _)| p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls_are_detected() {
        assert!(looks_like_url("https://example.com/watch?v=abc"));
        assert!(looks_like_url("http://example.com/track"));
        assert!(!looks_like_url("never gonna give you up"));
        assert!(!looks_like_url("ftp://example.com/file"));
        assert!(!looks_like_url(""));
    }

    #[test]
    fn plain_extraction_passes_through() {
        let info: MediaInfo = serde_json::from_value(json!({
            "title": "Some Song",
            "webpage_url": "https://example.com/v/abc",
        }))
        .unwrap();
        let (url, title) = pick_first(info).unwrap();
        assert_eq!(url, "https://example.com/v/abc");
        assert_eq!(title, "Some Song");
    }

    #[test]
    fn search_result_takes_first_entry() {
        let info: MediaInfo = serde_json::from_value(json!({
            "title": "query playlist",
            "entries": [
                { "title": "First Hit", "webpage_url": "https://example.com/v/1" },
                { "title": "Second Hit", "webpage_url": "https://example.com/v/2" },
            ],
        }))
        .unwrap();
        let (url, title) = pick_first(info).unwrap();
        assert_eq!(url, "https://example.com/v/1");
        assert_eq!(title, "First Hit");
    }

    #[test]
    fn empty_search_is_no_match() {
        let info: MediaInfo = serde_json::from_value(json!({
            "title": "query playlist",
            "entries": [],
        }))
        .unwrap();
        assert!(matches!(pick_first(info), Err(ResolveError::NoMatch)));
    }

    #[test]
    fn missing_metadata_is_no_match() {
        let info: MediaInfo = serde_json::from_value(json!({
            "webpage_url": "https://example.com/v/abc",
        }))
        .unwrap();
        assert!(matches!(pick_first(info), Err(ResolveError::NoMatch)));
    }
}
