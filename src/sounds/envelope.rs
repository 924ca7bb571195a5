//! Two catch-all variants: an EWMA envelope over the whole spectrum, and a
//! generic single-band detector. The band detector is the template to start
//! from when registering a new sound type.

use crate::detect::{ band_sum, ewma, hz_to_bin, SoundDetector };
use crate::sounds::ParamSpec;

/// Envelope smoothing; slower than the per-sound EWMAs on purpose.
pub const ENVELOPE_ALPHA: f32 = 0.1;

const REFRACTORY_BLOCKS: u32 = 8;

#[derive(Debug, Clone)]
pub struct EnvelopeParams {
    pub on_thr: f32,
    pub off_thr: f32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self { on_thr: 50.0, off_thr: 20.0 }
    }
}

pub fn envelope_param_specs() -> Vec<ParamSpec> {
    vec![ParamSpec::ranged("on_thr", 1.0, 500.0), ParamSpec::ranged("off_thr", 0.5, 250.0)]
}

pub fn envelope_param_constraints() -> Vec<(usize, usize)> {
    vec![(1, 0)]
}

impl EnvelopeParams {
    pub fn from_values(v: &[f64]) -> Self {
        Self { on_thr: v[0] as f32, off_thr: v[1] as f32 }
    }

    pub fn to_values(&self) -> Vec<f64> {
        vec![self.on_thr as f64, self.off_thr as f64]
    }
}

/// Total-energy envelope with hysteresis.
pub struct EnvelopeDetector {
    params: EnvelopeParams,
    envelope: f32,
}

impl EnvelopeDetector {
    pub fn new(params: EnvelopeParams) -> Self {
        Self { params, envelope: 0.0 }
    }
}

impl SoundDetector for EnvelopeDetector {
    fn name(&self) -> &'static str {
        "envelope"
    }

    fn update_state(&mut self, spectrum: &[f32]) {
        // skip DC; it only tracks mic offset
        let energy: f32 = spectrum[1..].iter().sum();
        self.envelope = ewma(ENVELOPE_ALPHA, energy, self.envelope);
    }

    fn should_transition_on(&self) -> bool {
        self.envelope > self.params.on_thr
    }

    fn should_transition_off(&self) -> bool {
        self.envelope < self.params.off_thr
    }

    fn refractory_blocks(&self) -> u32 {
        REFRACTORY_BLOCKS
    }

    fn reset_averages(&mut self) {
        self.envelope = 0.0;
    }
}

#[derive(Debug, Clone)]
pub struct BandParams {
    pub band_low_hz: f32,
    pub band_high_hz: f32,
    pub on_thr: f32,
    pub off_thr: f32,
}

impl Default for BandParams {
    fn default() -> Self {
        Self {
            band_low_hz: 1_000.0,
            band_high_hz: 4_000.0,
            on_thr: 40.0,
            off_thr: 15.0,
        }
    }
}

pub fn band_param_specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::ranged("band_low_hz", 100.0, 12_000.0),
        ParamSpec::ranged("band_high_hz", 500.0, 20_000.0),
        ParamSpec::ranged("on_thr", 1.0, 300.0),
        ParamSpec::ranged("off_thr", 0.5, 150.0)
    ]
}

pub fn band_param_constraints() -> Vec<(usize, usize)> {
    // band_low_hz < band_high_hz, off_thr < on_thr
    vec![(0, 1), (3, 2)]
}

impl BandParams {
    pub fn from_values(v: &[f64]) -> Self {
        Self {
            band_low_hz: v[0] as f32,
            band_high_hz: v[1] as f32,
            on_thr: v[2] as f32,
            off_thr: v[3] as f32,
        }
    }

    pub fn to_values(&self) -> Vec<f64> {
        vec![
            self.band_low_hz as f64,
            self.band_high_hz as f64,
            self.on_thr as f64,
            self.off_thr as f64
        ]
    }
}

/// Instantaneous banded-energy detector with plain hysteresis.
pub struct GenericBandDetector {
    params: BandParams,
    lo_bin: usize,
    hi_bin: usize,
    band: f32,
}

impl GenericBandDetector {
    pub fn new(params: BandParams) -> Self {
        let lo_bin = hz_to_bin(params.band_low_hz);
        let hi_bin = hz_to_bin(params.band_high_hz).max(lo_bin + 1);
        Self { params, lo_bin, hi_bin, band: 0.0 }
    }
}

impl SoundDetector for GenericBandDetector {
    fn name(&self) -> &'static str {
        "band"
    }

    fn update_state(&mut self, spectrum: &[f32]) {
        self.band = band_sum(spectrum, self.lo_bin..self.hi_bin);
    }

    fn should_transition_on(&self) -> bool {
        self.band > self.params.on_thr
    }

    fn should_transition_off(&self) -> bool {
        self.band < self.params.off_thr
    }

    fn refractory_blocks(&self) -> u32 {
        REFRACTORY_BLOCKS
    }

    fn reset_averages(&mut self) {
        self.band = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SPECTRUM_LEN;
    use crate::detect::replay_training;

    #[test]
    fn envelope_rises_and_releases_with_hysteresis() {
        let loud = {
            let mut s = vec![0.0f32; SPECTRUM_LEN];
            s[10] = 600.0;
            s
        };
        let quiet = vec![0.0f32; SPECTRUM_LEN];

        let mut spectra = vec![loud; 10];
        spectra.extend(vec![quiet; 40]);
        spectra.extend(
            vec![{
                let mut s = vec![0.0f32; SPECTRUM_LEN];
                s[10] = 600.0;
                s
            }; 10]
        );

        let frames = replay_training(
            Box::new(EnvelopeDetector::new(EnvelopeParams::default())),
            &spectra
        );
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn band_detector_ignores_out_of_band_energy() {
        let mut in_band = vec![0.0f32; SPECTRUM_LEN];
        in_band[hz_to_bin(2_000.0)] = 100.0;
        let mut out_band = vec![0.0f32; SPECTRUM_LEN];
        out_band[hz_to_bin(8_000.0)] = 100.0;

        let hits = replay_training(
            Box::new(GenericBandDetector::new(BandParams::default())),
            &vec![in_band; 5]
        );
        assert_eq!(hits.len(), 1);

        let misses = replay_training(
            Box::new(GenericBandDetector::new(BandParams::default())),
            &vec![out_band; 5]
        );
        assert!(misses.is_empty());
    }
}
