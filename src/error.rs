use thiserror::Error;

/// Failures while turning a user query into a playable track, or while
/// fetching the audio for one. Reported to the requester; the queue is
/// left untouched.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no playable result for that query")]
    NoMatch,

    #[error("media metadata was malformed: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("yt-dlp exited unsuccessfully ({0})")]
    ToolFailed(std::process::ExitStatus),

    #[error("could not run yt-dlp: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not download the yt-dlp binary: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("no yt-dlp build published for this platform ({0})")]
    NoAsset(&'static str),

    #[error("no cache directory available on this system")]
    NoCacheDir,
}

/// Failures at the playback-session boundary.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not join the voice channel: {0}")]
    VoiceJoin(#[from] songbird::error::JoinError),

    #[error("this session is shutting down, try again")]
    Destroyed,
}
