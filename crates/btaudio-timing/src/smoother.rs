//! Clock smoother for capture latency estimation.
//!
//! Maps local monotonic time to stream time (microseconds of audio received).
//! Raw observations jitter with the Bluetooth link scheduling; the smoother
//! fits a line over a bounded history and moves its estimate towards that
//! line over `adjust_time` instead of jumping.

use std::collections::VecDeque;

use btaudio_core::Usec;

/// Hard cap on retained observations.
const HISTORY_MAX: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Sample {
    x: f64,
    y: f64,
}

/// Piecewise-linear estimate: a ramp from `start` to `end`, then `slope`.
#[derive(Debug, Clone, Copy)]
struct Estimate {
    start: Sample,
    end: Sample,
    slope: f64,
}

impl Estimate {
    fn at(&self, x: f64) -> f64 {
        if x <= self.start.x {
            self.start.y
        } else if x < self.end.x {
            let t = (x - self.start.x) / (self.end.x - self.start.x);
            self.start.y + t * (self.end.y - self.start.y)
        } else {
            self.end.y + self.slope * (x - self.end.x)
        }
    }
}

/// Smoothed mapping from local time to stream position.
#[derive(Debug, Clone)]
pub struct ClockSmoother {
    adjust_time: Usec,
    history_time: Usec,
    min_history: usize,
    history: VecDeque<Sample>,
    estimate: Option<Estimate>,
    slope: f64,
    time_offset: Usec,
    paused: bool,
    pause_time: Usec,
    last_output: Usec,
}

impl ClockSmoother {
    /// Create a smoother. A paused smoother is frozen at `now` until resumed.
    pub fn new(
        adjust_time: Usec,
        history_time: Usec,
        min_history: usize,
        now: Usec,
        paused: bool,
    ) -> Self {
        Self {
            adjust_time: adjust_time.max(1),
            history_time,
            min_history: min_history.max(2),
            history: VecDeque::with_capacity(HISTORY_MAX),
            estimate: None,
            slope: 1.0,
            time_offset: 0,
            paused,
            pause_time: now,
            last_output: 0,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn internal(&self, x: Usec) -> f64 {
        x.saturating_sub(self.time_offset) as f64
    }

    /// Feed one observation: at local time `x` the stream was at `y`.
    ///
    /// Observations while paused are dropped.
    pub fn put(&mut self, x: Usec, y: Usec) {
        if self.paused {
            return;
        }

        let x = self.internal(x);
        let y = y as f64;
        let current = self.estimate.map(|e| e.at(x).max(self.last_output as f64));

        self.history.push_back(Sample { x, y });
        while self.history.len() > HISTORY_MAX
            || (self.history.len() > self.min_history
                && self
                    .history
                    .front()
                    .is_some_and(|s| x - s.x > self.history_time as f64))
        {
            self.history.pop_front();
        }

        let (fit_x, fit_y) = if self.history.len() >= self.min_history {
            let (slope, mean_x, mean_y) = regression(&self.history);
            self.slope = slope.unwrap_or(self.slope);
            (mean_x, mean_y)
        } else {
            (x, y)
        };

        let target_x = x + self.adjust_time as f64;
        let target_y = fit_y + self.slope * (target_x - fit_x);

        self.estimate = Some(match current {
            None => Estimate {
                start: Sample { x, y },
                end: Sample { x, y },
                slope: self.slope,
            },
            Some(current) => Estimate {
                start: Sample { x, y: current },
                end: Sample {
                    x: target_x,
                    y: target_y.max(current),
                },
                slope: self.slope,
            },
        });
    }

    /// Estimated stream position at local time `x`. Never decreases.
    pub fn get(&mut self, x: Usec) -> Usec {
        let x = if self.paused { self.pause_time } else { x };
        let Some(estimate) = self.estimate else {
            return self.last_output;
        };

        let y = estimate.at(self.internal(x)).max(0.0) as Usec;
        if y > self.last_output {
            self.last_output = y;
        }
        self.last_output
    }

    /// Freeze the estimate at `x`.
    pub fn pause(&mut self, x: Usec) {
        if self.paused {
            return;
        }
        self.paused = true;
        self.pause_time = x;
    }

    /// Unfreeze at `x`, so that the paused interval is not counted.
    ///
    /// With `fix_now` the estimate restarts from its current value instead of
    /// continuing a ramp that began before the pause.
    pub fn resume(&mut self, x: Usec, fix_now: bool) {
        if !self.paused {
            return;
        }

        let x = x.max(self.pause_time);
        self.time_offset += x - self.pause_time;
        self.paused = false;

        if fix_now {
            if let Some(estimate) = self.estimate {
                let now = self.internal(x);
                let y = estimate.at(now).max(self.last_output as f64);
                let anchor = Sample { x: now, y };
                self.estimate = Some(Estimate {
                    start: anchor,
                    end: anchor,
                    slope: self.slope,
                });
            }
        }
    }

    /// Drop all history, keeping the pause state.
    pub fn reset(&mut self, now: Usec, paused: bool) {
        self.history.clear();
        self.estimate = None;
        self.slope = 1.0;
        self.time_offset = 0;
        self.paused = paused;
        self.pause_time = now;
        self.last_output = 0;
    }
}

/// Least squares slope with the means it was computed around.
fn regression(history: &VecDeque<Sample>) -> (Option<f64>, f64, f64) {
    let n = history.len() as f64;
    let mean_x = history.iter().map(|s| s.x).sum::<f64>() / n;
    let mean_y = history.iter().map(|s| s.y).sum::<f64>() / n;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for s in history {
        let dx = s.x - mean_x;
        sxy += dx * (s.y - mean_y);
        sxx += dx * dx;
    }

    let slope = if sxx > 0.0 {
        Some((sxy / sxx).max(0.0))
    } else {
        None
    };
    (slope, mean_x, mean_y)
}
