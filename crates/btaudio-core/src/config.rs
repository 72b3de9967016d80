//! Stream engine configuration.

use crate::error::{Error, Result};
use crate::profile::Profile;
use crate::spec::{SampleSpec, Usec, USEC_PER_MSEC, USEC_PER_SEC};

/// Tunables for one streaming session.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Largest backlog the playback pacer will skip over before it drops audio.
    pub max_playback_catch_up: Usec,
    pub fixed_latency_playback_a2dp: Usec,
    pub fixed_latency_playback_sco: Usec,
    pub fixed_latency_record_a2dp: Usec,
    pub fixed_latency_record_sco: Usec,
    /// Bitpool congestion backoff never goes below this.
    pub bitpool_dec_limit: u8,
    pub bitpool_dec_step: u8,
    /// Poll timeout while a write is owed but the socket is not writable.
    pub idle_drop_interval: Usec,
    pub smoother_adjust_time: Usec,
    pub smoother_history_time: Usec,
    pub smoother_min_history: usize,
    pub sco_sample_spec: SampleSpec,
    pub thread_name: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_playback_catch_up: 100 * USEC_PER_MSEC,
            fixed_latency_playback_a2dp: 25 * USEC_PER_MSEC,
            fixed_latency_playback_sco: 125 * USEC_PER_MSEC,
            fixed_latency_record_a2dp: 25 * USEC_PER_MSEC,
            fixed_latency_record_sco: 25 * USEC_PER_MSEC,
            bitpool_dec_limit: 32,
            bitpool_dec_step: 5,
            idle_drop_interval: 500 * USEC_PER_MSEC,
            smoother_adjust_time: USEC_PER_SEC,
            smoother_history_time: 2 * USEC_PER_SEC,
            smoother_min_history: 10,
            sco_sample_spec: SampleSpec::sco_default(),
            thread_name: "bluetooth-io".to_string(),
        }
    }
}

impl StreamConfig {
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::new()
    }

    /// Fixed playback latency for the profile's link type.
    pub fn fixed_latency_playback(&self, profile: Profile) -> Usec {
        if profile.is_a2dp() {
            self.fixed_latency_playback_a2dp
        } else {
            self.fixed_latency_playback_sco
        }
    }

    /// Fixed record latency for the profile's link type.
    pub fn fixed_latency_record(&self, profile: Profile) -> Usec {
        if profile.is_a2dp() {
            self.fixed_latency_record_a2dp
        } else {
            self.fixed_latency_record_sco
        }
    }
}

/// Builder for [`StreamConfig`].
#[derive(Debug, Clone, Default)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    /// Create new builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_playback_catch_up(mut self, usec: Usec) -> Self {
        self.config.max_playback_catch_up = usec;
        self
    }

    /// Set the fixed playback latencies for A2DP and SCO links.
    pub fn fixed_latency_playback(mut self, a2dp: Usec, sco: Usec) -> Self {
        self.config.fixed_latency_playback_a2dp = a2dp;
        self.config.fixed_latency_playback_sco = sco;
        self
    }

    /// Set the fixed record latencies for A2DP and SCO links.
    pub fn fixed_latency_record(mut self, a2dp: Usec, sco: Usec) -> Self {
        self.config.fixed_latency_record_a2dp = a2dp;
        self.config.fixed_latency_record_sco = sco;
        self
    }

    /// Set the bitpool backoff floor and step.
    pub fn bitpool_backoff(mut self, limit: u8, step: u8) -> Self {
        self.config.bitpool_dec_limit = limit;
        self.config.bitpool_dec_step = step;
        self
    }

    pub fn idle_drop_interval(mut self, usec: Usec) -> Self {
        self.config.idle_drop_interval = usec;
        self
    }

    /// Set the smoother adjust time, history span and minimum sample count.
    pub fn smoother(mut self, adjust_time: Usec, history_time: Usec, min_history: usize) -> Self {
        self.config.smoother_adjust_time = adjust_time;
        self.config.smoother_history_time = history_time;
        self.config.smoother_min_history = min_history;
        self
    }

    pub fn sco_sample_spec(mut self, spec: SampleSpec) -> Self {
        self.config.sco_sample_spec = spec;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<StreamConfig> {
        let config = self.config;
        if config.bitpool_dec_step == 0 {
            return Err(Error::Config("bitpool_dec_step must be non-zero".into()));
        }
        if config.max_playback_catch_up == 0 {
            return Err(Error::Config("max_playback_catch_up must be non-zero".into()));
        }
        if config.idle_drop_interval == 0 {
            return Err(Error::Config("idle_drop_interval must be non-zero".into()));
        }
        if !config.sco_sample_spec.is_valid() {
            return Err(Error::Config(format!(
                "invalid SCO sample spec {:?}",
                config.sco_sample_spec
            )));
        }
        if config.smoother_min_history < 2 {
            return Err(Error::Config("smoother_min_history must be at least 2".into()));
        }
        if config.thread_name.is_empty() {
            return Err(Error::Config("thread_name must not be empty".into()));
        }
        Ok(config)
    }
}
