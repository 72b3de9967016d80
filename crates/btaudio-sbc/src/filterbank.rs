//! Polyphase analysis and synthesis filterbanks.
//!
//! Analysis keeps a 10×M sample history per channel, synthesis a 20×M
//! history. The cosine matrices are computed once per filterbank.

use std::f64::consts::PI;

use crate::tables::{PROTO_4, PROTO_8};

fn prototype(subbands: usize) -> &'static [f64] {
    if subbands == 4 {
        &PROTO_4
    } else {
        &PROTO_8
    }
}

/// Splits PCM blocks of M samples into M subband samples.
#[derive(Debug, Clone)]
pub(crate) struct Analysis {
    subbands: usize,
    history: Vec<f64>,
    matrix: Vec<f64>,
}

impl Analysis {
    pub fn new(subbands: usize) -> Self {
        let m = subbands as f64;
        let mut matrix = Vec::with_capacity(subbands * 2 * subbands);
        for k in 0..subbands {
            for i in 0..2 * subbands {
                matrix.push(((k as f64 + 0.5) * (i as f64 - m / 2.0) * PI / m).cos());
            }
        }
        Self {
            subbands,
            history: vec![0.0; 10 * subbands],
            matrix,
        }
    }

    /// Feed M new samples (oldest first) and write M subband samples.
    pub fn process(&mut self, input: &[f64], output: &mut [f64]) {
        let m = self.subbands;
        let proto = prototype(m);

        self.history.copy_within(0..9 * m, m);
        for (i, &sample) in input[..m].iter().enumerate() {
            self.history[m - 1 - i] = sample;
        }

        let mut y = [0.0f64; 16];
        for (i, y_i) in y.iter_mut().take(2 * m).enumerate() {
            *y_i = (0..5)
                .map(|k| {
                    let idx = i + k * 2 * m;
                    proto[idx] * self.history[idx]
                })
                .sum();
        }

        for (k, out) in output[..m].iter_mut().enumerate() {
            let row = &self.matrix[k * 2 * m..(k + 1) * 2 * m];
            *out = row.iter().zip(&y[..2 * m]).map(|(c, y)| c * y).sum();
        }
    }
}

/// Rebuilds M PCM samples from M subband samples.
#[derive(Debug, Clone)]
pub(crate) struct Synthesis {
    subbands: usize,
    history: Vec<f64>,
    matrix: Vec<f64>,
}

impl Synthesis {
    pub fn new(subbands: usize) -> Self {
        let m = subbands as f64;
        let mut matrix = Vec::with_capacity(2 * subbands * subbands);
        for k in 0..2 * subbands {
            for i in 0..subbands {
                matrix.push(((i as f64 + 0.5) * (k as f64 + m / 2.0) * PI / m).cos());
            }
        }
        Self {
            subbands,
            history: vec![0.0; 20 * subbands],
            matrix,
        }
    }

    pub fn process(&mut self, input: &[f64], output: &mut [f64]) {
        let m = self.subbands;
        let proto = prototype(m);
        let gain = -(m as f64);

        self.history.copy_within(0..18 * m, 2 * m);
        for k in 0..2 * m {
            let row = &self.matrix[k * m..(k + 1) * m];
            self.history[k] = row.iter().zip(&input[..m]).map(|(c, s)| c * s).sum();
        }

        for (j, out) in output[..m].iter_mut().enumerate() {
            let mut acc = 0.0;
            for i in 0..5 {
                // u[2Mi + j] = v[4Mi + j], u[2Mi + M + j] = v[4Mi + 3M + j]
                let lo = i * 2 * m + j;
                let hi = lo + m;
                acc += self.history[i * 4 * m + j] * proto[lo];
                acc += self.history[i * 4 * m + 3 * m + j] * proto[hi];
            }
            *out = acc * gain;
        }
    }
}
