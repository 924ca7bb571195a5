//! Tongue-click detector: a single sharp burst inside a configurable
//! frequency range. Its refractory counter only runs down while the band is
//! quiet, so a held noisy sound cannot wait out the refractory and
//! double-fire.

use crate::detect::{ band_sum, hz_to_bin, SoundDetector };
use crate::sounds::ParamSpec;

const REFRACTORY_BLOCKS: u32 = 12;

#[derive(Debug, Clone)]
pub struct TongueParams {
    pub band_low_hz: f32,
    pub band_high_hz: f32,
    pub high_thr: f32,
    pub low_thr: f32,
}

impl Default for TongueParams {
    fn default() -> Self {
        Self {
            band_low_hz: 5_000.0,
            band_high_hz: 10_000.0,
            high_thr: 50.0,
            low_thr: 10.0,
        }
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::ranged("band_low_hz", 2_000.0, 10_000.0),
        ParamSpec::ranged("band_high_hz", 4_000.0, 16_000.0),
        ParamSpec::ranged("high_thr", 1.0, 300.0),
        ParamSpec::ranged("low_thr", 0.5, 100.0)
    ]
}

pub fn param_constraints() -> Vec<(usize, usize)> {
    // band_low_hz < band_high_hz, low_thr < high_thr
    vec![(0, 1), (3, 2)]
}

impl TongueParams {
    pub fn from_values(v: &[f64]) -> Self {
        Self {
            band_low_hz: v[0] as f32,
            band_high_hz: v[1] as f32,
            high_thr: v[2] as f32,
            low_thr: v[3] as f32,
        }
    }

    pub fn to_values(&self) -> Vec<f64> {
        vec![
            self.band_low_hz as f64,
            self.band_high_hz as f64,
            self.high_thr as f64,
            self.low_thr as f64
        ]
    }
}

pub struct TongueDetector {
    params: TongueParams,
    lo_bin: usize,
    hi_bin: usize,
    band: f32,
}

impl TongueDetector {
    pub fn new(params: TongueParams) -> Self {
        let lo_bin = hz_to_bin(params.band_low_hz);
        let hi_bin = hz_to_bin(params.band_high_hz).max(lo_bin + 1);
        Self { params, lo_bin, hi_bin, band: 0.0 }
    }
}

impl SoundDetector for TongueDetector {
    fn name(&self) -> &'static str {
        "tongue"
    }

    fn update_state(&mut self, spectrum: &[f32]) {
        self.band = band_sum(spectrum, self.lo_bin..self.hi_bin);
    }

    fn should_transition_on(&self) -> bool {
        self.band > self.params.high_thr
    }

    fn should_transition_off(&self) -> bool {
        self.band < self.params.high_thr
    }

    fn refractory_blocks(&self) -> u32 {
        REFRACTORY_BLOCKS
    }

    fn refractory_may_tick(&self) -> bool {
        self.band < self.params.low_thr
    }

    fn reset_averages(&mut self) {
        self.band = 0.0;
    }
}
