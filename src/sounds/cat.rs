//! Cat-attention detector ("psst"-style clicks). High-band bursts qualify
//! against a dynamic threshold: a loud low-frequency transient boosts the
//! threshold, which then decays linearly back to its base over a few
//! blocks, so clicks riding the tail of a thump are ignored.

use crate::detect::{ band_sum, SoundDetector, HIGH_BAND, LOW_BIN };
use crate::sounds::ParamSpec;

/// Blocks over which a boosted threshold decays back to the base value.
pub const BOOST_DECAY_BLOCKS: u32 = 7;

const REFRACTORY_BLOCKS: u32 = 7;

#[derive(Debug, Clone)]
pub struct CatParams {
    pub base_thr: f32,
    pub boost_thr: f32,
    pub low_limit: f32,
    pub require_warmup: bool,
}

impl Default for CatParams {
    fn default() -> Self {
        Self {
            base_thr: 30.0,
            boost_thr: 120.0,
            low_limit: 40.0,
            require_warmup: true,
        }
    }
}

pub fn param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::ranged("base_thr", 1.0, 200.0),
        ParamSpec::ranged("boost_thr", 1.0, 400.0),
        ParamSpec::ranged("low_limit", 1.0, 200.0),
        ParamSpec::flag("require_warmup")
    ]
}

pub fn param_constraints() -> Vec<(usize, usize)> {
    // base_thr < boost_thr
    vec![(0, 1)]
}

impl CatParams {
    pub fn from_values(v: &[f64]) -> Self {
        Self {
            base_thr: v[0] as f32,
            boost_thr: v[1] as f32,
            low_limit: v[2] as f32,
            require_warmup: v[3] >= 0.5,
        }
    }

    pub fn to_values(&self) -> Vec<f64> {
        vec![
            self.base_thr as f64,
            self.boost_thr as f64,
            self.low_limit as f64,
            if self.require_warmup { 1.0 } else { 0.0 }
        ]
    }
}

pub struct CatDetector {
    params: CatParams,
    high_sum: f32,
    boost_left: u32,
    qualified_streak: u32,
}

impl CatDetector {
    pub fn new(params: CatParams) -> Self {
        Self { params, high_sum: 0.0, boost_left: 0, qualified_streak: 0 }
    }

    /// Base threshold, lifted toward `boost_thr` right after a loud bin-1
    /// transient and falling back linearly.
    fn dynamic_threshold(&self) -> f32 {
        if self.boost_left == 0 {
            return self.params.base_thr;
        }
        let frac = (self.boost_left as f32) / (BOOST_DECAY_BLOCKS as f32);
        self.params.base_thr + (self.params.boost_thr - self.params.base_thr) * frac
    }
}

impl SoundDetector for CatDetector {
    fn name(&self) -> &'static str {
        "cat"
    }

    fn update_state(&mut self, spectrum: &[f32]) {
        if spectrum[LOW_BIN] > self.params.low_limit {
            self.boost_left = BOOST_DECAY_BLOCKS;
        } else if self.boost_left > 0 {
            self.boost_left -= 1;
        }

        self.high_sum = band_sum(spectrum, HIGH_BAND);

        if self.high_sum > self.dynamic_threshold() {
            self.qualified_streak += 1;
        } else {
            self.qualified_streak = 0;
        }
    }

    fn should_transition_on(&self) -> bool {
        let need = if self.params.require_warmup { 2 } else { 1 };
        self.qualified_streak >= need
    }

    fn should_transition_off(&self) -> bool {
        self.high_sum < self.params.base_thr
    }

    fn refractory_blocks(&self) -> u32 {
        REFRACTORY_BLOCKS
    }

    fn reset_averages(&mut self) {
        self.high_sum = 0.0;
        self.boost_left = 0;
        self.qualified_streak = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SPECTRUM_LEN;
    use crate::detect::replay_training;

    fn spectrum(bin1: f32, high_sum: f32) -> Vec<f32> {
        let mut s = vec![0.0f32; SPECTRUM_LEN];
        s[1] = bin1;
        s[64] = high_sum;
        s
    }

    #[test]
    fn high_band_burst_activates_after_warmup() {
        let spectra: Vec<Vec<f32>> = (0..6).map(|_| spectrum(0.0, 60.0)).collect();
        let frames = replay_training(
            Box::new(CatDetector::new(CatParams::default())),
            &spectra
        );
        // two qualifying blocks required → block 2
        assert_eq!(frames, vec![2]);
    }

    #[test]
    fn no_warmup_activates_on_first_qualifying_block() {
        let params = CatParams { require_warmup: false, ..CatParams::default() };
        let spectra: Vec<Vec<f32>> = (0..6).map(|_| spectrum(0.0, 60.0)).collect();
        let frames = replay_training(Box::new(CatDetector::new(params)), &spectra);
        assert_eq!(frames, vec![1]);
    }

    #[test]
    fn loud_transient_boosts_threshold_then_decays() {
        let det_spectra = |click_after: usize| -> Vec<Vec<f32>> {
            // loud bin-1 thump, then high-band clicks of 60 a few blocks later
            let mut v = vec![spectrum(100.0, 0.0)];
            for _ in 0..click_after {
                v.push(spectrum(0.0, 0.0));
            }
            for _ in 0..4 {
                v.push(spectrum(0.0, 60.0));
            }
            v
        };

        // right after the thump the boosted threshold (≥ 120 decaying)
        // still sits above 60, so the click is swallowed
        let early = replay_training(
            Box::new(CatDetector::new(CatParams::default())),
            &det_spectra(1)
        );
        assert!(early.is_empty());

        // once the boost has fully decayed the same click registers
        let late = replay_training(
            Box::new(CatDetector::new(CatParams::default())),
            &det_spectra(BOOST_DECAY_BLOCKS as usize + 1)
        );
        assert_eq!(late.len(), 1);
    }

    #[test]
    fn deactivates_below_base_threshold() {
        let mut spectra: Vec<Vec<f32>> = (0..4).map(|_| spectrum(0.0, 60.0)).collect();
        spectra.extend((0..4).map(|_| spectrum(0.0, 10.0)));
        spectra.extend((0..10).map(|_| spectrum(0.0, 60.0)));

        let frames = replay_training(
            Box::new(CatDetector::new(CatParams::default())),
            &spectra
        );
        // second activation only after the off plus refractory
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], 2);
        assert!(frames[1] > frames[0] + (REFRACTORY_BLOCKS as u64));
    }
}
