//! Statistics for relay sessions and mounts

use std::time::{Duration, Instant};

use crate::mount::MountPhase;

/// Connection-level statistics, logged when a source or listener ends
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Total bytes received
    pub bytes_received: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Connection duration
    pub duration: Duration,
    /// Metadata blocks carrying a title
    pub metadata_blocks: u64,
    /// Chunks lost because the listener fell behind
    pub dropped_chunks: u64,
    /// Average bitrate (bits/sec)
    pub bitrate: u64,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate bitrate from bytes moved and duration
    pub fn calculate_bitrate(&mut self) {
        let secs = self.duration.as_secs();
        if secs > 0 {
            self.bitrate = (self.bytes_received.max(self.bytes_sent) * 8) / secs;
        }
    }
}

/// Point-in-time snapshot of one mount
#[derive(Debug, Clone)]
pub struct MountStats {
    /// Mount name
    pub name: String,
    /// Content type sent to listeners
    pub content_type: String,
    /// Lifecycle phase
    pub phase: MountPhase,
    /// Serial of the source currently feeding listeners
    pub active_source: Option<u64>,
    /// Queued sources, active one included
    pub sources: usize,
    /// Attached listeners
    pub listeners: usize,
    /// Title listeners currently see
    pub now_playing: String,
    /// Listeners evicted by the fan-out
    pub evicted_listeners: u64,
    /// When the mount last lost its active source
    pub idle_since: Option<Instant>,
}

impl MountStats {
    /// How long the mount has been without a source
    pub fn idle_for(&self) -> Option<Duration> {
        self.idle_since.map(|since| since.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_new() {
        let stats = SessionStats::new();
        assert_eq!(stats.bytes_received, 0);
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.metadata_blocks, 0);
        assert_eq!(stats.dropped_chunks, 0);
        assert_eq!(stats.bitrate, 0);
    }

    #[test]
    fn test_session_stats_calculate_bitrate() {
        let mut stats = SessionStats::new();
        stats.bytes_sent = 1_600_000;
        stats.duration = Duration::from_secs(100);

        stats.calculate_bitrate();

        // 128 kbit/s
        assert_eq!(stats.bitrate, 128_000);
    }

    #[test]
    fn test_session_stats_calculate_bitrate_zero_duration() {
        let mut stats = SessionStats::new();
        stats.bytes_received = 1_000_000;
        stats.duration = Duration::from_secs(0);

        stats.calculate_bitrate();

        assert_eq!(stats.bitrate, 0);
    }

    #[test]
    fn test_mount_stats_idle_for() {
        let stats = MountStats {
            name: "/live".into(),
            content_type: "audio/mpeg".into(),
            phase: MountPhase::Idle,
            active_source: None,
            sources: 0,
            listeners: 0,
            now_playing: String::new(),
            evicted_listeners: 0,
            idle_since: Some(Instant::now() - Duration::from_secs(5)),
        };
        assert!(stats.idle_for().unwrap() >= Duration::from_secs(5));

        let live = MountStats {
            phase: MountPhase::Live,
            idle_since: None,
            ..stats
        };
        assert!(live.idle_for().is_none());
    }
}
