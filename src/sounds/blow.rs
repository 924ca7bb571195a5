//! Blow detector. A blow puts energy into bin 1 and across the high band at
//! the same time; both must hold for a full lookback window before the
//! detector commits, and releasing requires the high band to stay quiet for
//! a short warm-up so turbulence tails don't chatter.

use crate::detect::{ band_sum, SoundDetector, HIGH_BAND, LOW_BIN };
use crate::sounds::ParamSpec;

/// Extra confirmation blocks when `require_delay` is set.
pub const DELAY_BLOCKS: u32 = 3;
/// Consecutive quiet blocks required before deactivating.
pub const DEACTIVATE_WARMUP_BLOCKS: u32 = 3;

const REFRACTORY_BLOCKS: u32 = 10;

#[derive(Debug, Clone)]
pub struct BlowParams {
    pub low_on: f32,
    pub high_on: f32,
    pub high_off: f32,
    pub lookback_blocks: u32,
    pub require_delay: bool,
}

impl Default for BlowParams {
    fn default() -> Self {
        Self {
            low_on: 10.0,
            high_on: 30.0,
            high_off: 5.0,
            lookback_blocks: 3,
            require_delay: false,
        }
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::ranged("low_on", 1.0, 100.0),
        ParamSpec::ranged("high_on", 1.0, 200.0),
        ParamSpec::ranged("high_off", 0.5, 100.0),
        ParamSpec::ranged("lookback_blocks", 1.0, 6.0),
        ParamSpec::flag("require_delay")
    ]
}

pub fn param_constraints() -> Vec<(usize, usize)> {
    // high_off < high_on
    vec![(2, 1)]
}

impl BlowParams {
    pub fn from_values(v: &[f64]) -> Self {
        Self {
            low_on: v[0] as f32,
            high_on: v[1] as f32,
            high_off: v[2] as f32,
            lookback_blocks: (v[3].round() as u32).max(1),
            require_delay: v[4] >= 0.5,
        }
    }

    pub fn to_values(&self) -> Vec<f64> {
        vec![
            self.low_on as f64,
            self.high_on as f64,
            self.high_off as f64,
            self.lookback_blocks as f64,
            if self.require_delay { 1.0 } else { 0.0 }
        ]
    }
}

pub struct BlowDetector {
    params: BlowParams,
    qualified_streak: u32,
    quiet_streak: u32,
}

impl BlowDetector {
    pub fn new(params: BlowParams) -> Self {
        Self { params, qualified_streak: 0, quiet_streak: 0 }
    }
}

impl SoundDetector for BlowDetector {
    fn name(&self) -> &'static str {
        "blow"
    }

    fn update_state(&mut self, spectrum: &[f32]) {
        let low = spectrum[LOW_BIN];
        let high = band_sum(spectrum, HIGH_BAND);

        if low > self.params.low_on && high > self.params.high_on {
            self.qualified_streak += 1;
        } else {
            self.qualified_streak = 0;
        }

        if high < self.params.high_off {
            self.quiet_streak += 1;
        } else {
            self.quiet_streak = 0;
        }
    }

    fn should_transition_on(&self) -> bool {
        let need =
            self.params.lookback_blocks +
            (if self.params.require_delay { DELAY_BLOCKS } else { 0 });
        self.qualified_streak >= need
    }

    fn should_transition_off(&self) -> bool {
        self.quiet_streak >= DEACTIVATE_WARMUP_BLOCKS
    }

    fn refractory_blocks(&self) -> u32 {
        REFRACTORY_BLOCKS
    }

    fn reset_averages(&mut self) {
        self.qualified_streak = 0;
        self.quiet_streak = 0;
    }
}
