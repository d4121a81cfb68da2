use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Instant,
};

use once_cell::sync::Lazy;

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Process-lifetime playback counters, logged on shutdown.
#[derive(Debug)]
pub struct Metrics {
    start: Instant,
    active_sessions: AtomicUsize,
    active_voice_calls: AtomicUsize,
    tracks_queued: AtomicU64,
    tracks_played: AtomicU64,
    tracks_failed: AtomicU64,
}

impl Metrics {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            active_sessions: AtomicUsize::new(0),
            active_voice_calls: AtomicUsize::new(0),
            tracks_queued: AtomicU64::new(0),
            tracks_played: AtomicU64::new(0),
            tracks_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_sessions(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }
    pub fn dec_sessions(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    pub fn inc_connections(&self) {
        self.active_voice_calls.fetch_add(1, Ordering::Relaxed);
    }
    pub fn dec_connections(&self) {
        let _ = self
            .active_voice_calls
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    pub fn inc_queued(&self) {
        self.tracks_queued.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_played(&self) {
        self.tracks_played.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_failed(&self) {
        self.tracks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start.elapsed().as_secs(),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            active_voice_calls: self.active_voice_calls.load(Ordering::Relaxed),
            tracks_queued: self.tracks_queued.load(Ordering::Relaxed),
            tracks_played: self.tracks_played.load(Ordering::Relaxed),
            tracks_failed: self.tracks_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub active_voice_calls: usize,
    pub tracks_queued: u64,
    pub tracks_played: u64,
    pub tracks_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_round_trip() {
        let m = Metrics::new();
        m.inc_sessions();
        m.inc_connections();
        m.inc_queued();
        m.inc_queued();
        m.inc_played();
        m.inc_failed();

        let snap = m.snapshot();
        assert_eq!(snap.active_sessions, 1);
        assert_eq!(snap.active_voice_calls, 1);
        assert_eq!(snap.tracks_queued, 2);
        assert_eq!(snap.tracks_played, 1);
        assert_eq!(snap.tracks_failed, 1);
    }

    #[test]
    fn decrements_saturate_at_zero() {
        let m = Metrics::new();
        m.dec_sessions();
        m.dec_connections();
        let snap = m.snapshot();
        assert_eq!(snap.active_sessions, 0);
        assert_eq!(snap.active_voice_calls, 0);
    }
}
