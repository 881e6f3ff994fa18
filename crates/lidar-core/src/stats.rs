//! Lock-free running counters shared across pipeline tasks, logged
//! periodically at `log_interval_secs` rather than per-event.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IngestStats {
    pub packets_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub recv_timeouts: AtomicU64,
    pub decode_errors: AtomicU64,
}

impl IngestStats {
    pub fn record_packet(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.recv_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct ForwardStats {
    pub forwarded: AtomicU64,
    pub dropped_queue_full: AtomicU64,
    pub send_errors: AtomicU64,
}

impl ForwardStats {
    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct FrameBuilderStats {
    pub frames_emitted: AtomicU64,
    pub frames_too_small_dropped: AtomicU64,
    pub frames_malformed_dropped: AtomicU64,
    pub inactivity_timeouts: AtomicU64,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_processed: AtomicU64,
    pub frames_rate_limited: AtomicU64,
    pub inbound_drops: AtomicU64,
    pub tracks_confirmed_total: AtomicU64,
    pub background_resets: AtomicU64,
}

/// Everything rolled up for the periodic log line and the admin API's stats
/// endpoint.
#[derive(Debug, Default)]
pub struct PipelineStatsSnapshot {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub recv_timeouts: u64,
    pub decode_errors: u64,
    pub forwarded: u64,
    pub dropped_queue_full: u64,
    pub frames_emitted: u64,
    pub frames_too_small_dropped: u64,
    pub frames_malformed_dropped: u64,
    pub frames_processed: u64,
    pub frames_rate_limited: u64,
    pub inbound_drops: u64,
    pub tracks_confirmed_total: u64,
    pub background_resets: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let s = IngestStats::default();
        s.record_packet(100);
        s.record_packet(200);
        s.record_timeout();
        assert_eq!(s.packets_received.load(Ordering::Relaxed), 2);
        assert_eq!(s.bytes_received.load(Ordering::Relaxed), 300);
        assert_eq!(s.recv_timeouts.load(Ordering::Relaxed), 1);
    }
}
