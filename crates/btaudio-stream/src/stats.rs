//! Lock-free stream counters shared with the control plane.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the I/O thread.
#[derive(Debug, Default)]
pub struct StreamStats {
    packets_written: AtomicU64,
    packets_read: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    bytes_skipped: AtomicU64,
    bitpool_reductions: AtomicU64,
    dropped_packets: AtomicU64,
    write_anomalies: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_written: u64,
    pub packets_read: u64,
    /// PCM bytes consumed by the playback direction.
    pub bytes_written: u64,
    /// PCM bytes delivered to the capture direction.
    pub bytes_read: u64,
    /// PCM bytes dropped by playback catch-up.
    pub bytes_skipped: u64,
    pub bitpool_reductions: u64,
    /// Malformed or misaligned packets dropped on receive.
    pub dropped_packets: u64,
    /// Writes that returned EAGAIN right after POLLOUT.
    pub write_anomalies: u64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, pcm_bytes: usize) {
        self.packets_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(pcm_bytes as u64, Ordering::Relaxed);
    }

    pub fn record_read(&self, pcm_bytes: usize) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(pcm_bytes as u64, Ordering::Relaxed);
    }

    pub fn record_skip(&self, bytes: u64) {
        self.bytes_skipped.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bitpool_reduction(&self) {
        self.bitpool_reductions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_packet(&self) {
        self.dropped_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_anomaly(&self) {
        self.write_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_written: self.packets_written.load(Ordering::Relaxed),
            packets_read: self.packets_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_skipped: self.bytes_skipped.load(Ordering::Relaxed),
            bitpool_reductions: self.bitpool_reductions.load(Ordering::Relaxed),
            dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
            write_anomalies: self.write_anomalies.load(Ordering::Relaxed),
        }
    }
}
