//! Hum detector: sustained low-frequency energy with a quiet mid band. The
//! mid-band limit keeps voiced speech (which spreads upward) from counting
//! as a hum.

use crate::detect::{ band_sum, ewma, SoundDetector, LOW_BIN, MID_BAND };
use crate::sounds::ParamSpec;

/// Smoothing factor for both accumulators.
pub const ALPHA: f32 = 0.25;
/// Extra confirmation blocks when `require_delay` is set.
pub const DELAY_BLOCKS: u32 = 2;

const REFRACTORY_BLOCKS: u32 = 20;

#[derive(Debug, Clone)]
pub struct HumParams {
    pub on_thr: f32,
    pub off_thr: f32,
    pub mid_limit: f32,
    pub require_delay: bool,
}

impl Default for HumParams {
    fn default() -> Self {
        Self {
            on_thr: 10.0,
            off_thr: 5.0,
            mid_limit: 20.0,
            require_delay: false,
        }
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::ranged("on_thr", 1.0, 100.0),
        ParamSpec::ranged("off_thr", 0.5, 100.0),
        ParamSpec::ranged("mid_limit", 1.0, 200.0),
        ParamSpec::flag("require_delay")
    ]
}

pub fn param_constraints() -> Vec<(usize, usize)> {
    // off_thr < on_thr
    vec![(1, 0)]
}

impl HumParams {
    pub fn from_values(v: &[f64]) -> Self {
        Self {
            on_thr: v[0] as f32,
            off_thr: v[1] as f32,
            mid_limit: v[2] as f32,
            require_delay: v[3] >= 0.5,
        }
    }

    pub fn to_values(&self) -> Vec<f64> {
        vec![
            self.on_thr as f64,
            self.off_thr as f64,
            self.mid_limit as f64,
            if self.require_delay { 1.0 } else { 0.0 }
        ]
    }
}

pub struct HumDetector {
    params: HumParams,
    low_ewma: f32,
    mid_ewma: f32,
    qualified_streak: u32,
}

impl HumDetector {
    pub fn new(params: HumParams) -> Self {
        Self { params, low_ewma: 0.0, mid_ewma: 0.0, qualified_streak: 0 }
    }
}

impl SoundDetector for HumDetector {
    fn name(&self) -> &'static str {
        "hum"
    }

    fn update_state(&mut self, spectrum: &[f32]) {
        self.low_ewma = ewma(ALPHA, spectrum[LOW_BIN], self.low_ewma);
        self.mid_ewma = ewma(ALPHA, band_sum(spectrum, MID_BAND), self.mid_ewma);

        if self.low_ewma > self.params.on_thr && self.mid_ewma < self.params.mid_limit {
            self.qualified_streak += 1;
        } else {
            self.qualified_streak = 0;
        }
    }

    fn should_transition_on(&self) -> bool {
        let need = 1 + (if self.params.require_delay { DELAY_BLOCKS } else { 0 });
        self.qualified_streak >= need
    }

    fn should_transition_off(&self) -> bool {
        self.low_ewma < self.params.off_thr
    }

    fn refractory_blocks(&self) -> u32 {
        REFRACTORY_BLOCKS
    }

    fn reset_averages(&mut self) {
        self.low_ewma = 0.0;
        self.mid_ewma = 0.0;
        self.qualified_streak = 0;
    }
}
