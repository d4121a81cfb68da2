//! Pure queue state for a guild: track order, loop policy, and vote-skip
//! tallies. No I/O happens here; the session layer drives this and owns
//! the voice handles.

use std::collections::{HashSet, VecDeque};

use serenity::all::UserId;

/// A resolved, playable request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub url: String,
    pub title: String,
    pub requester: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    /// Replay the current track until the mode changes or the requester skips.
    Single,
    /// Refill the queue from the loop snapshot once it runs dry.
    All,
}

impl LoopMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(Self::Off),
            "single" => Some(Self::Single),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Single => "single",
            Self::All => "all",
        }
    }
}

/// Outcome of a skip request against the current track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipVerdict {
    /// The requester of the current track skips unconditionally.
    Requester,
    /// Enough distinct voters reached the quorum.
    Quorum,
    /// Vote recorded, quorum not reached yet.
    Pending { votes: usize, required: usize },
}

/// Ordered playback state for one guild. The front of the queue is the
/// track that is playing (or about to play).
#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: VecDeque<Track>,
    loop_mode: LoopMode,
    loop_snapshot: Vec<Track>,
    vote_skips: HashSet<UserId>,
    current_requester: Option<UserId>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a track and returns its 1-based position (the front counts
    /// as position 1). In `All` mode the loop snapshot is refreshed to the
    /// post-append contents.
    pub fn push(&mut self, track: Track) -> usize {
        self.tracks.push_back(track);
        if self.loop_mode == LoopMode::All {
            self.loop_snapshot = self.tracks.iter().cloned().collect();
        }
        self.tracks.len()
    }

    /// Marks the front track as current: records its requester and resets
    /// the vote tally. Returns a copy of the track to play.
    pub fn start_front(&mut self) -> Option<Track> {
        let track = self.tracks.front().cloned()?;
        self.current_requester = Some(track.requester);
        self.vote_skips.clear();
        Some(track)
    }

    /// Applies the end-of-track policy: `Single` keeps the front in place
    /// for a replay unless the skip was forced; every other mode drops it.
    pub fn complete(&mut self, forced: bool) {
        if self.loop_mode != LoopMode::Single || forced {
            self.tracks.pop_front();
        }
    }

    /// Drops the front track unconditionally (unstreamable or errored).
    pub fn discard_front(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    /// Restores the queue from the loop snapshot. Returns false when the
    /// mode is not `All` or there is nothing to restore.
    pub fn refill_from_snapshot(&mut self) -> bool {
        if self.loop_mode != LoopMode::All || self.loop_snapshot.is_empty() {
            return false;
        }
        self.tracks = self.loop_snapshot.iter().cloned().collect();
        true
    }

    /// Pure mode switch; the next queue-advance decision picks it up.
    /// Entering `All` freezes the current queue contents as the snapshot.
    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        if mode == LoopMode::All && self.loop_mode != LoopMode::All {
            self.loop_snapshot = self.tracks.iter().cloned().collect();
        }
        self.loop_mode = mode;
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// Resolves a skip request. The current requester bypasses the vote;
    /// anyone else is tallied against `ceil(non_bot_members / 2)`.
    pub fn request_skip(&mut self, user: UserId, non_bot_members: usize) -> SkipVerdict {
        if self.current_requester == Some(user) {
            return SkipVerdict::Requester;
        }
        self.vote_skips.insert(user);
        let required = Self::votes_required(non_bot_members);
        let votes = self.vote_skips.len();
        if votes >= required {
            SkipVerdict::Quorum
        } else {
            SkipVerdict::Pending { votes, required }
        }
    }

    /// Majority with ties rounding up: 1 listener needs 1 vote, 3 need 2.
    pub fn votes_required(non_bot_members: usize) -> usize {
        non_bot_members.div_ceil(2).max(1)
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.front()
    }

    pub fn current_requester(&self) -> Option<UserId> {
        self.current_requester
    }

    pub fn titles(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.title.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Clears everything, including the snapshot and tally. Used on
    /// session teardown and when the queue goes idle.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.loop_snapshot.clear();
        self.vote_skips.clear();
        self.current_requester = None;
    }

    /// Called when the queue runs dry without a refill.
    pub fn reset_current(&mut self) {
        self.current_requester = None;
        self.vote_skips.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str, requester: u64) -> Track {
        Track {
            url: format!("https://example.com/{title}"),
            title: title.to_string(),
            requester: UserId::new(requester),
        }
    }

    #[test]
    fn push_preserves_insertion_order() {
        let mut q = TrackQueue::new();
        assert_eq!(q.push(track("a", 1)), 1);
        assert_eq!(q.push(track("b", 2)), 2);
        assert_eq!(q.push(track("c", 3)), 3);
        assert_eq!(q.titles(), vec!["a", "b", "c"]);
        assert_eq!(q.current().unwrap().title, "a");
    }

    #[test]
    fn start_front_sets_requester_and_clears_votes() {
        let mut q = TrackQueue::new();
        q.push(track("a", 1));
        q.push(track("b", 2));
        q.start_front();
        assert_eq!(q.current_requester(), Some(UserId::new(1)));

        // A non-requester vote carries over only until the track changes.
        assert!(matches!(
            q.request_skip(UserId::new(9), 4),
            SkipVerdict::Pending { votes: 1, required: 2 }
        ));
        q.complete(false);
        q.start_front();
        assert_eq!(q.current_requester(), Some(UserId::new(2)));
        assert!(matches!(
            q.request_skip(UserId::new(9), 4),
            SkipVerdict::Pending { votes: 1, required: 2 }
        ));
    }

    #[test]
    fn complete_pops_front_except_single_loop() {
        let mut q = TrackQueue::new();
        q.push(track("a", 1));
        q.push(track("b", 1));

        q.set_loop_mode(LoopMode::Single);
        q.start_front();
        q.complete(false);
        assert_eq!(q.current().unwrap().title, "a");

        // A forced skip advances even while single-looping.
        q.complete(true);
        assert_eq!(q.current().unwrap().title, "b");

        q.set_loop_mode(LoopMode::Off);
        q.complete(false);
        assert!(q.is_empty());
    }

    #[test]
    fn set_loop_mode_is_idempotent() {
        let mut q = TrackQueue::new();
        q.push(track("a", 1));
        q.set_loop_mode(LoopMode::All);
        let snapshot_titles = q.titles();
        q.set_loop_mode(LoopMode::All);
        assert_eq!(q.loop_mode(), LoopMode::All);

        // Snapshot captured on entry is not disturbed by the repeat call.
        q.discard_front();
        assert!(q.refill_from_snapshot());
        assert_eq!(q.titles(), snapshot_titles);
    }

    #[test]
    fn entering_all_mode_freezes_current_queue() {
        let mut q = TrackQueue::new();
        q.push(track("a", 1));
        q.push(track("b", 1));
        q.set_loop_mode(LoopMode::All);

        // Draining the queue does not touch the frozen copy.
        q.discard_front();
        q.discard_front();
        assert!(q.is_empty());
        assert!(q.refill_from_snapshot());
        assert_eq!(q.titles(), vec!["a", "b"]);
    }

    #[test]
    fn refill_reproduces_snapshot_repeatedly() {
        let mut q = TrackQueue::new();
        q.set_loop_mode(LoopMode::All);
        q.push(track("a", 1));
        q.push(track("b", 2));

        for _ in 0..3 {
            while !q.is_empty() {
                q.start_front();
                q.complete(false);
            }
            assert!(q.refill_from_snapshot());
            assert_eq!(q.titles(), vec!["a", "b"]);
        }
    }

    #[test]
    fn refill_requires_all_mode_and_contents() {
        let mut q = TrackQueue::new();
        assert!(!q.refill_from_snapshot());

        q.push(track("a", 1));
        q.set_loop_mode(LoopMode::All);
        q.discard_front();
        assert!(q.refill_from_snapshot());

        q.set_loop_mode(LoopMode::Off);
        q.discard_front();
        assert!(!q.refill_from_snapshot());
    }

    #[test]
    fn push_in_all_mode_refreshes_snapshot() {
        let mut q = TrackQueue::new();
        q.set_loop_mode(LoopMode::All);
        q.push(track("a", 1));
        q.push(track("b", 1));

        q.discard_front();
        q.discard_front();
        assert!(q.refill_from_snapshot());
        assert_eq!(q.titles(), vec!["a", "b"]);
    }

    #[test]
    fn requester_skips_without_votes() {
        let mut q = TrackQueue::new();
        q.push(track("a", 42));
        q.start_front();
        assert_eq!(q.request_skip(UserId::new(42), 50), SkipVerdict::Requester);
    }

    #[test]
    fn vote_quorum_is_ceiling_of_half() {
        assert_eq!(TrackQueue::votes_required(1), 1);
        assert_eq!(TrackQueue::votes_required(2), 1);
        assert_eq!(TrackQueue::votes_required(3), 2);
        assert_eq!(TrackQueue::votes_required(4), 2);
        assert_eq!(TrackQueue::votes_required(5), 3);
        // Degenerate channel still needs one voter.
        assert_eq!(TrackQueue::votes_required(0), 1);
    }

    #[test]
    fn distinct_voters_reach_quorum() {
        let mut q = TrackQueue::new();
        q.push(track("a", 1));
        q.start_front();

        // 4 non-bot listeners: quorum is 2.
        assert!(matches!(
            q.request_skip(UserId::new(2), 4),
            SkipVerdict::Pending { votes: 1, required: 2 }
        ));
        // The same voter again does not move the tally.
        assert!(matches!(
            q.request_skip(UserId::new(2), 4),
            SkipVerdict::Pending { votes: 1, required: 2 }
        ));
        assert_eq!(q.request_skip(UserId::new(3), 4), SkipVerdict::Quorum);
    }

    #[test]
    fn clear_resets_everything() {
        let mut q = TrackQueue::new();
        q.set_loop_mode(LoopMode::All);
        q.push(track("a", 1));
        q.start_front();
        q.request_skip(UserId::new(2), 4);

        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.current_requester(), None);
        assert!(!q.refill_from_snapshot());
    }
}
