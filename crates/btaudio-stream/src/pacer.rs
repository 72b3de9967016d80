//! Wall-clock pacing for playback without an input stream to follow.

use btaudio_core::{SampleSpec, Usec};

/// What the loop should do about playback right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceDecision {
    /// Audio sent is ahead of the wall clock.
    Wait,
    /// One block is due. A non-zero skip drops that much audio first.
    Write { skip_usec: Usec, skip_bytes: u64 },
}

/// Compares audio sent against time elapsed since the first write.
#[derive(Debug, Clone)]
pub struct PlaybackPacer {
    max_catch_up: Usec,
    started_at: Usec,
}

impl PlaybackPacer {
    pub fn new(max_catch_up: Usec) -> Self {
        Self {
            max_catch_up,
            started_at: 0,
        }
    }

    /// Anchor the stream start. Called right before the first write.
    pub fn start(&mut self, now: Usec) {
        self.started_at = now;
    }

    pub fn reset(&mut self) {
        self.started_at = 0;
    }

    pub fn started_at(&self) -> Usec {
        self.started_at
    }

    /// Decide whether a block is due given `write_index` bytes sent so far.
    ///
    /// Never catches up more than the configured ceiling: any backlog beyond
    /// it is skipped.
    pub fn decide(&self, now: Usec, write_index: u64, spec: &SampleSpec) -> PaceDecision {
        let time_passed = now.saturating_sub(self.started_at);
        let audio_sent = spec.bytes_to_usec(write_index);

        if audio_sent > time_passed {
            return PaceDecision::Wait;
        }

        let audio_to_send = time_passed - audio_sent;
        if write_index > 0 && audio_to_send > self.max_catch_up {
            let skip_usec = audio_to_send - self.max_catch_up;
            PaceDecision::Write {
                skip_usec,
                skip_bytes: spec.usec_to_bytes(skip_usec),
            }
        } else {
            PaceDecision::Write {
                skip_usec: 0,
                skip_bytes: 0,
            }
        }
    }

    /// Time until the next block is due.
    pub fn sleep_for(&self, now: Usec, write_index: u64, spec: &SampleSpec) -> Usec {
        let time_passed = now.saturating_sub(self.started_at);
        let next_write_at = spec.bytes_to_usec(write_index);
        next_write_at.saturating_sub(time_passed)
    }
}
