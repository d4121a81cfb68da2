//! Per-guild playback sessions and the process-wide session registry.
//!
//! Every guild gets at most one `PlaybackSession`. All of its mutable
//! state lives behind a single async mutex that is held for the full
//! length of each transition, so commands, track-end events, and the
//! idle timer never interleave within one guild. Stale track events
//! (a duplicate end notification racing a skip) are rejected by
//! comparing track uuids against the active player handle.

use std::{collections::HashMap, sync::Arc, sync::Weak, time::Duration};

use serenity::all::{ChannelId, Context as SerenityContext, GuildId, UserId};
use serenity::async_trait;
use serenity::prelude::TypeMapKey;
use songbird::driver::Bitrate;
use songbird::error::JoinError;
use songbird::input::Input;
use songbird::tracks::TrackHandle;
use songbird::{Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::metrics::METRICS;
use crate::queue::{LoopMode, SkipVerdict, Track, TrackQueue};
use crate::{env, resolver};

const MAX_JOIN_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Playing,
    Paused,
    Destroyed,
}

/// What an enqueue did, for the reply to the requester.
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Playback started (with whichever queued track survived streaming).
    Started { title: String },
    /// Something is already playing; the track waits at `position`.
    Queued { title: String, position: usize },
    /// Nothing could be streamed; the queue drained back to idle.
    Dropped { title: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipOutcome {
    NothingPlaying,
    SkippedByRequester,
    SkippedByVote,
    VotePending { votes: usize, required: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    NothingPlaying,
    Paused,
    Resumed,
}

struct SessionState {
    queue: TrackQueue,
    phase: Phase,
    call: Option<Arc<Mutex<Call>>>,
    player: Option<TrackHandle>,
    /// Set by a skip so the end-of-track policy advances even in
    /// single-loop mode; consumed by the next end event.
    force_advance: bool,
    idle_timer: Option<JoinHandle<()>>,
}

pub struct PlaybackSession {
    guild_id: GuildId,
    songbird: Arc<Songbird>,
    registry: Weak<SessionRegistry>,
    idle_timeout: Duration,
    state: Mutex<SessionState>,
}

impl PlaybackSession {
    fn new(
        guild_id: GuildId,
        songbird: Arc<Songbird>,
        registry: Weak<SessionRegistry>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            guild_id,
            songbird,
            registry,
            idle_timeout,
            state: Mutex::new(SessionState {
                queue: TrackQueue::new(),
                phase: Phase::Idle,
                call: None,
                player: None,
                force_advance: false,
                idle_timer: None,
            }),
        }
    }

    /// Appends a track. If nothing is playing, joins the requester's
    /// voice channel (when not already connected) and starts the queue.
    pub async fn enqueue(
        self: &Arc<Self>,
        track: Track,
        voice_channel: ChannelId,
    ) -> Result<EnqueueOutcome, SessionError> {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Destroyed {
            return Err(SessionError::Destroyed);
        }

        let title = track.title.clone();
        if matches!(state.phase, Phase::Playing | Phase::Paused) {
            let position = state.queue.push(track);
            METRICS.inc_queued();
            return Ok(EnqueueOutcome::Queued { title, position });
        }

        if state.call.is_none() {
            self.set_phase(&mut state, Phase::Connecting);
            match self.join_voice(voice_channel).await {
                Ok(call) => {
                    state.call = Some(call);
                    METRICS.inc_connections();
                }
                Err(e) => {
                    // The enqueue is abandoned; leave the session idle and
                    // let the timer reap it if nothing else shows up.
                    self.set_phase(&mut state, Phase::Idle);
                    self.arm_idle_timer(&mut state);
                    return Err(SessionError::VoiceJoin(e));
                }
            }
        }

        state.queue.push(track);
        METRICS.inc_queued();
        self.advance(&mut state).await;

        match state.queue.current() {
            Some(current) if state.phase == Phase::Playing => Ok(EnqueueOutcome::Started {
                title: current.title.clone(),
            }),
            _ => Ok(EnqueueOutcome::Dropped { title }),
        }
    }

    /// Skip arbitration. The current requester skips unconditionally;
    /// everyone else votes toward `ceil(listeners / 2)`.
    pub async fn request_skip(&self, user: UserId, non_bot_members: usize) -> SkipOutcome {
        let mut state = self.state.lock().await;
        let Some(player) = state.player.clone() else {
            return SkipOutcome::NothingPlaying;
        };
        match state.queue.request_skip(user, non_bot_members) {
            SkipVerdict::Requester => {
                state.force_advance = true;
                player.stop().ok();
                SkipOutcome::SkippedByRequester
            }
            SkipVerdict::Quorum => {
                state.force_advance = true;
                player.stop().ok();
                SkipOutcome::SkippedByVote
            }
            SkipVerdict::Pending { votes, required } => SkipOutcome::VotePending { votes, required },
        }
    }

    /// Pauses or resumes the active player; a no-op when idle.
    pub async fn set_paused(&self, pause: bool) -> PauseOutcome {
        let mut state = self.state.lock().await;
        let Some(player) = state.player.clone() else {
            return PauseOutcome::NothingPlaying;
        };
        if pause {
            player.pause().ok();
            self.set_phase(&mut state, Phase::Paused);
            PauseOutcome::Paused
        } else {
            player.play().ok();
            self.set_phase(&mut state, Phase::Playing);
            PauseOutcome::Resumed
        }
    }

    /// Pure mode switch; the in-flight track is never interrupted.
    pub async fn set_loop_mode(&self, mode: LoopMode) -> LoopMode {
        let mut state = self.state.lock().await;
        state.queue.set_loop_mode(mode);
        mode
    }

    /// Titles front-to-back; the first entry is the current track.
    pub async fn queue_titles(&self) -> Vec<String> {
        self.state.lock().await.queue.titles()
    }

    /// Queue progression. Runs until playback starts or the queue is
    /// exhausted; unstreamable tracks are logged and dropped along the
    /// way. In `All` mode an empty queue is refilled from the loop
    /// snapshot at most once per invocation, so a batch of dead tracks
    /// cannot spin this loop forever.
    async fn advance(self: &Arc<Self>, state: &mut SessionState) {
        let mut refilled = false;
        loop {
            if state.queue.is_empty() {
                if refilled || !state.queue.refill_from_snapshot() {
                    self.go_idle(state);
                    return;
                }
                refilled = true;
            }

            if let Some(timer) = state.idle_timer.take() {
                timer.abort();
            }

            let Some(track) = state.queue.start_front() else {
                continue;
            };
            let Some(call) = state.call.clone() else {
                warn!("guild {}: no voice connection to play into", self.guild_id);
                self.go_idle(state);
                return;
            };

            match resolver::acquire_input(&track.url).await {
                Ok(input) => match self.start_playback(call, input).await {
                    Ok(handle) => {
                        info!("guild {}: now playing {:?}", self.guild_id, track.title);
                        state.player = Some(handle);
                        self.set_phase(state, Phase::Playing);
                        METRICS.inc_played();
                        return;
                    }
                    Err(e) => {
                        warn!(
                            "guild {}: could not start {:?}: {e}; dropping it",
                            self.guild_id, track.title
                        );
                        state.queue.discard_front();
                        METRICS.inc_failed();
                    }
                },
                Err(e) => {
                    warn!(
                        "guild {}: could not stream {:?}: {e}; dropping it",
                        self.guild_id, track.title
                    );
                    state.queue.discard_front();
                    METRICS.inc_failed();
                }
            }
        }
    }

    async fn start_playback(
        self: &Arc<Self>,
        call: Arc<Mutex<Call>>,
        input: Input,
    ) -> Result<TrackHandle, songbird::error::ControlError> {
        let mut call = call.lock().await;
        let handle = call.play_input(input);
        let wired = handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    session: Arc::clone(self),
                },
            )
            .and(handle.add_event(
                Event::Track(TrackEvent::Error),
                TrackErrorNotifier {
                    session: Arc::clone(self),
                },
            ));
        if let Err(e) = wired {
            // Without the end handler the queue would stall on this track.
            handle.stop().ok();
            return Err(e);
        }
        Ok(handle)
    }

    /// End-of-track event. Ignores notifications for anything but the
    /// active player, then applies the loop policy and moves on.
    async fn on_track_end(self: &Arc<Self>, ended: TrackHandle) {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Destroyed {
            return;
        }
        let Some(current) = &state.player else {
            return;
        };
        if current.uuid() != ended.uuid() {
            debug!("guild {}: stale track-end event ignored", self.guild_id);
            return;
        }
        state.player = None;
        let forced = std::mem::take(&mut state.force_advance);
        state.queue.complete(forced);
        self.advance(&mut state).await;
    }

    /// Mid-stream failure: same discard policy as an unstreamable track.
    async fn on_track_error(self: &Arc<Self>, errored: TrackHandle) {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Destroyed {
            return;
        }
        let Some(current) = &state.player else {
            return;
        };
        if current.uuid() != errored.uuid() {
            return;
        }
        warn!("guild {}: playback error, dropping current track", self.guild_id);
        state.player = None;
        state.force_advance = false;
        state.queue.discard_front();
        METRICS.inc_failed();
        self.advance(&mut state).await;
    }

    async fn join_voice(&self, channel: ChannelId) -> Result<Arc<Mutex<Call>>, JoinError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.songbird.join(self.guild_id, channel).await {
                Ok(call) => {
                    info!(
                        "guild {}: joined voice channel {} (attempt {attempt})",
                        self.guild_id, channel
                    );
                    let bitrate = env::read_bitrate();
                    call.lock()
                        .await
                        .set_bitrate(Bitrate::BitsPerSecond(bitrate as i32));
                    return Ok(call);
                }
                Err(e) if attempt < MAX_JOIN_ATTEMPTS => {
                    let delay_ms = std::cmp::min(4000, 1000 * 2_u64.pow(attempt - 1));
                    warn!(
                        "guild {}: voice join attempt {attempt} failed: {e}; retrying in {delay_ms}ms",
                        self.guild_id
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Queue ran dry: park the session and start the inactivity clock.
    fn go_idle(self: &Arc<Self>, state: &mut SessionState) {
        state.player = None;
        state.queue.reset_current();
        self.set_phase(state, Phase::Idle);
        self.arm_idle_timer(state);
    }

    fn arm_idle_timer(self: &Arc<Self>, state: &mut SessionState) {
        if state.idle_timer.is_some() {
            return;
        }
        let session = Arc::clone(self);
        state.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(session.idle_timeout).await;
            session.idle_fire().await;
        }));
    }

    async fn idle_fire(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        // The timer task is done with itself; drop the handle so teardown
        // does not abort the very task running it.
        state.idle_timer = None;
        if state.phase != Phase::Idle || !state.queue.is_empty() {
            return;
        }
        info!(
            "guild {}: idle for {:?}, leaving voice",
            self.guild_id, self.idle_timeout
        );
        self.teardown(&mut state).await;
    }

    /// Releases the voice connection and player unconditionally and
    /// removes this session from the registry. Safe to reach from any
    /// state; runs its effects at most once.
    async fn teardown(&self, state: &mut SessionState) {
        if state.phase == Phase::Destroyed {
            return;
        }
        state.phase = Phase::Destroyed;
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
        if let Some(player) = state.player.take() {
            player.stop().ok();
        }
        if state.call.take().is_some() {
            if let Err(e) = self.songbird.remove(self.guild_id).await {
                debug!("guild {}: voice handler already gone: {e}", self.guild_id);
            }
            METRICS.dec_connections();
        }
        state.queue.clear();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.guild_id).await;
        }
    }

    fn set_phase(&self, state: &mut SessionState, next: Phase) {
        if state.phase != next {
            debug!("guild {}: {:?} -> {:?}", self.guild_id, state.phase, next);
            state.phase = next;
        }
    }

    #[cfg(test)]
    async fn park_idle_for_test(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        self.go_idle(&mut state);
    }
}

struct TrackEndNotifier {
    session: Arc<PlaybackSession>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(ended) = ctx {
            for (_, handle) in ended.iter() {
                self.session.on_track_end((*handle).clone()).await;
            }
        }
        None
    }
}

struct TrackErrorNotifier {
    session: Arc<PlaybackSession>,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(errored) = ctx {
            for (_, handle) in errored.iter() {
                self.session.on_track_error((*handle).clone()).await;
            }
        }
        None
    }
}

/// Process-wide guild-to-session map. Created once at startup and stored
/// in the client's data map; sessions are created lazily on first use and
/// remove themselves on idle teardown.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<GuildId, Arc<PlaybackSession>>>,
    songbird: Arc<Songbird>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(songbird: Arc<Songbird>) -> Arc<Self> {
        Self::with_idle_timeout(songbird, env::read_idle_timeout())
    }

    pub fn with_idle_timeout(songbird: Arc<Songbird>, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            songbird,
            idle_timeout,
        })
    }

    pub async fn get_or_create(self: &Arc<Self>, guild_id: GuildId) -> Arc<PlaybackSession> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("guild {guild_id}: creating playback session");
                METRICS.inc_sessions();
                Arc::new(PlaybackSession::new(
                    guild_id,
                    self.songbird.clone(),
                    Arc::downgrade(self),
                    self.idle_timeout,
                ))
            })
            .clone()
    }

    /// Returns the live session, if the guild has one. Commands other
    /// than `/play` never create sessions.
    pub async fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.lock().await.get(&guild_id).cloned()
    }

    async fn remove(&self, guild_id: GuildId) {
        if self.sessions.lock().await.remove(&guild_id).is_some() {
            info!("guild {guild_id}: playback session removed");
            METRICS.dec_sessions();
        }
    }
}

pub struct SessionRegistryKey;

impl TypeMapKey for SessionRegistryKey {
    type Value = Arc<SessionRegistry>;
}

/// Fetches the registry installed at client construction.
pub async fn registry(ctx: &SerenityContext) -> Option<Arc<SessionRegistry>> {
    ctx.data.read().await.get::<SessionRegistryKey>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry(timeout: Duration) -> Arc<SessionRegistry> {
        SessionRegistry::with_idle_timeout(Songbird::serenity(), timeout)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn registry_creates_lazily_and_reuses() {
        let registry = test_registry(Duration::from_secs(300));
        let guild = GuildId::new(1);
        assert!(registry.get(guild).await.is_none());

        let a = registry.get_or_create(guild).await;
        let b = registry.get_or_create(guild).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get(guild).await.is_some());

        // A different guild gets its own session.
        let c = registry.get_or_create(GuildId::new(2)).await;
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_window_removes_session() {
        let window = Duration::from_millis(300_000);
        let registry = test_registry(window);
        let guild = GuildId::new(7);
        let session = registry.get_or_create(guild).await;

        session.park_idle_for_test().await;
        assert!(registry.get(guild).await.is_some());

        // Just short of the window: still registered.
        tokio::time::sleep(window - Duration::from_millis(1)).await;
        settle().await;
        assert!(registry.get(guild).await.is_some());

        tokio::time::sleep(Duration::from_millis(2)).await;
        settle().await;
        assert!(registry.get(guild).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_runs_once_despite_repeat_idling() {
        let window = Duration::from_millis(1000);
        let registry = test_registry(window);
        let guild = GuildId::new(8);
        let session = registry.get_or_create(guild).await;

        // Parking twice must not double-arm the timer or double-remove.
        session.park_idle_for_test().await;
        session.park_idle_for_test().await;
        tokio::time::sleep(window * 2).await;
        settle().await;
        assert!(registry.get(guild).await.is_none());

        // A fresh session for the same guild is a new object.
        let fresh = registry.get_or_create(guild).await;
        assert!(!Arc::ptr_eq(&session, &fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_session_rejects_enqueue() {
        let window = Duration::from_millis(10);
        let registry = test_registry(window);
        let guild = GuildId::new(9);
        let session = registry.get_or_create(guild).await;

        session.park_idle_for_test().await;
        tokio::time::sleep(window * 2).await;
        settle().await;

        let track = Track {
            url: "https://example.com/t".into(),
            title: "t".into(),
            requester: UserId::new(1),
        };
        let res = session.enqueue(track, ChannelId::new(1)).await;
        assert!(matches!(res, Err(SessionError::Destroyed)));
    }

    #[tokio::test]
    async fn commands_without_playback_are_noops() {
        let registry = test_registry(Duration::from_secs(300));
        let session = registry.get_or_create(GuildId::new(10)).await;

        assert_eq!(
            session.request_skip(UserId::new(1), 4).await,
            SkipOutcome::NothingPlaying
        );
        assert_eq!(session.set_paused(true).await, PauseOutcome::NothingPlaying);
        assert_eq!(session.set_paused(false).await, PauseOutcome::NothingPlaying);
        assert!(session.queue_titles().await.is_empty());
        assert_eq!(session.set_loop_mode(LoopMode::All).await, LoopMode::All);
    }
}
