//! Hissing-sip detector: smoothed high-band energy with a low-band ceiling.
//! The optional warm-up rides out the attack of a blow, which lights the
//! high band first before bin 1 catches up.

use crate::detect::{ band_sum, ewma, SoundDetector, HIGH_BAND, LOW_BIN };
use crate::sounds::ParamSpec;

/// Smoothing factor for both accumulators.
pub const ALPHA: f32 = 0.25;

const REFRACTORY_BLOCKS: u32 = 15;

#[derive(Debug, Clone)]
pub struct SipParams {
    pub high_on: f32,
    pub high_off: f32,
    pub low_limit: f32,
    pub warmup_blocks: u32,
}

impl Default for SipParams {
    fn default() -> Self {
        Self {
            high_on: 20.0,
            high_off: 8.0,
            low_limit: 15.0,
            warmup_blocks: 2,
        }
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::ranged("high_on", 1.0, 200.0),
        ParamSpec::ranged("high_off", 0.5, 100.0),
        ParamSpec::ranged("low_limit", 1.0, 100.0),
        ParamSpec::ranged("warmup_blocks", 0.0, 5.0)
    ]
}

pub fn param_constraints() -> Vec<(usize, usize)> {
    // high_off < high_on
    vec![(1, 0)]
}

impl SipParams {
    pub fn from_values(v: &[f64]) -> Self {
        Self {
            high_on: v[0] as f32,
            high_off: v[1] as f32,
            low_limit: v[2] as f32,
            warmup_blocks: v[3].round().max(0.0) as u32,
        }
    }

    pub fn to_values(&self) -> Vec<f64> {
        vec![
            self.high_on as f64,
            self.high_off as f64,
            self.low_limit as f64,
            self.warmup_blocks as f64
        ]
    }
}

pub struct SipDetector {
    params: SipParams,
    high_ewma: f32,
    low_ewma: f32,
    qualified_streak: u32,
}

impl SipDetector {
    pub fn new(params: SipParams) -> Self {
        Self { params, high_ewma: 0.0, low_ewma: 0.0, qualified_streak: 0 }
    }
}

impl SoundDetector for SipDetector {
    fn name(&self) -> &'static str {
        "hissing-sip"
    }

    fn update_state(&mut self, spectrum: &[f32]) {
        self.high_ewma = ewma(ALPHA, band_sum(spectrum, HIGH_BAND), self.high_ewma);
        self.low_ewma = ewma(ALPHA, spectrum[LOW_BIN], self.low_ewma);

        if self.high_ewma > self.params.high_on && self.low_ewma < self.params.low_limit {
            self.qualified_streak += 1;
        } else {
            self.qualified_streak = 0;
        }
    }

    fn should_transition_on(&self) -> bool {
        self.qualified_streak >= 1 + self.params.warmup_blocks
    }

    fn should_transition_off(&self) -> bool {
        self.high_ewma < self.params.high_off
    }

    fn refractory_blocks(&self) -> u32 {
        REFRACTORY_BLOCKS
    }

    fn reset_averages(&mut self) {
        self.high_ewma = 0.0;
        self.low_ewma = 0.0;
        self.qualified_streak = 0;
    }
}
