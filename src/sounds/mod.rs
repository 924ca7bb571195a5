//! Concrete sound detectors plus the registry that maps a sound kind to its
//! tunable parameter space, its factory and its enablement rule. New sound
//! types register here and nowhere else.

pub mod blow;
pub mod cat;
pub mod envelope;
pub mod hum;
pub mod sip;
pub mod tongue;

pub use blow::BlowDetector;
pub use cat::CatDetector;
pub use envelope::{ EnvelopeDetector, GenericBandDetector };
pub use hum::HumDetector;
pub use sip::SipDetector;
pub use tongue::TongueDetector;

use crate::detect::SoundDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundKind {
    Blow,
    Hum,
    Cat,
    HissingSip,
    Tongue,
    Envelope,
    Band,
}

pub const ALL_KINDS: [SoundKind; 7] = [
    SoundKind::Blow,
    SoundKind::Hum,
    SoundKind::Cat,
    SoundKind::HissingSip,
    SoundKind::Tongue,
    SoundKind::Envelope,
    SoundKind::Band,
];

impl SoundKind {
    pub fn name(&self) -> &'static str {
        match self {
            SoundKind::Blow => "blow",
            SoundKind::Hum => "hum",
            SoundKind::Cat => "cat",
            SoundKind::HissingSip => "hissing-sip",
            SoundKind::Tongue => "tongue",
            SoundKind::Envelope => "envelope",
            SoundKind::Band => "band",
        }
    }

    pub fn parse(s: &str) -> Option<SoundKind> {
        match s.trim() {
            "blow" => Some(SoundKind::Blow),
            "hum" => Some(SoundKind::Hum),
            "cat" => Some(SoundKind::Cat),
            "hissing-sip" => Some(SoundKind::HissingSip),
            "tongue" => Some(SoundKind::Tongue),
            "envelope" => Some(SoundKind::Envelope),
            "band" => Some(SoundKind::Band),
            _ => None,
        }
    }
}

/// One tunable parameter: a closed range, or a boolean encoded as 0/1.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub boolean: bool,
}

impl ParamSpec {
    pub const fn ranged(name: &'static str, min: f64, max: f64) -> Self {
        Self { name, min, max, boolean: false }
    }

    pub const fn flag(name: &'static str) -> Self {
        Self { name, min: 0.0, max: 1.0, boolean: true }
    }
}

/// When the optimizer may mark a kind enabled: the score on the raw example
/// set must be within `raw_tol`, and, when set, the noise-mixed score within
/// `noise_tol`.
#[derive(Debug, Clone, Copy)]
pub struct EnableRule {
    pub raw_tol: u32,
    pub noise_tol: Option<u32>,
}

pub fn param_specs(kind: SoundKind) -> Vec<ParamSpec> {
    match kind {
        SoundKind::Blow => blow::param_specs(),
        SoundKind::Hum => hum::param_specs(),
        SoundKind::Cat => cat::param_specs(),
        SoundKind::HissingSip => sip::param_specs(),
        SoundKind::Tongue => tongue::param_specs(),
        SoundKind::Envelope => envelope::envelope_param_specs(),
        SoundKind::Band => envelope::band_param_specs(),
    }
}

/// Pairs (lower, upper) of spec indices where values[lower] < values[upper]
/// must hold (off thresholds sit below their on thresholds, band edges are
/// ordered).
pub fn param_constraints(kind: SoundKind) -> Vec<(usize, usize)> {
    match kind {
        SoundKind::Blow => blow::param_constraints(),
        SoundKind::Hum => hum::param_constraints(),
        SoundKind::Cat => cat::param_constraints(),
        SoundKind::HissingSip => sip::param_constraints(),
        SoundKind::Tongue => tongue::param_constraints(),
        SoundKind::Envelope => envelope::envelope_param_constraints(),
        SoundKind::Band => envelope::band_param_constraints(),
    }
}

pub fn default_values(kind: SoundKind) -> Vec<f64> {
    match kind {
        SoundKind::Blow => blow::BlowParams::default().to_values(),
        SoundKind::Hum => hum::HumParams::default().to_values(),
        SoundKind::Cat => cat::CatParams::default().to_values(),
        SoundKind::HissingSip => sip::SipParams::default().to_values(),
        SoundKind::Tongue => tongue::TongueParams::default().to_values(),
        SoundKind::Envelope => envelope::EnvelopeParams::default().to_values(),
        SoundKind::Band => envelope::BandParams::default().to_values(),
    }
}

pub fn build_detector(kind: SoundKind, values: &[f64]) -> Box<dyn SoundDetector> {
    match kind {
        SoundKind::Blow => Box::new(BlowDetector::new(blow::BlowParams::from_values(values))),
        SoundKind::Hum => Box::new(HumDetector::new(hum::HumParams::from_values(values))),
        SoundKind::Cat => Box::new(CatDetector::new(cat::CatParams::from_values(values))),
        SoundKind::HissingSip => Box::new(SipDetector::new(sip::SipParams::from_values(values))),
        SoundKind::Tongue =>
            Box::new(TongueDetector::new(tongue::TongueParams::from_values(values))),
        SoundKind::Envelope =>
            Box::new(EnvelopeDetector::new(envelope::EnvelopeParams::from_values(values))),
        SoundKind::Band =>
            Box::new(GenericBandDetector::new(envelope::BandParams::from_values(values))),
    }
}

/// Cat and tongue sounds are short clicks that false-positive easily, so
/// they must match the noiseless examples exactly before going live.
pub fn enable_rule(kind: SoundKind) -> EnableRule {
    match kind {
        SoundKind::Cat | SoundKind::Tongue => EnableRule { raw_tol: 0, noise_tol: Some(2) },
        _ => EnableRule { raw_tol: 1, noise_tol: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SPECTRUM_LEN;

    #[test]
    fn every_kind_round_trips_its_default_values() {
        for kind in ALL_KINDS {
            let specs = param_specs(kind);
            let values = default_values(kind);
            assert_eq!(
                specs.len(),
                values.len(),
                "{}: spec/value count mismatch",
                kind.name()
            );
            for (spec, v) in specs.iter().zip(values.iter()) {
                assert!(
                    *v >= spec.min && *v <= spec.max,
                    "{}.{} default {} outside [{}, {}]",
                    kind.name(),
                    spec.name,
                    v,
                    spec.min,
                    spec.max
                );
            }
        }
    }

    #[test]
    fn constraints_reference_valid_indices_and_hold_for_defaults() {
        for kind in ALL_KINDS {
            let n = param_specs(kind).len();
            let values = default_values(kind);
            for (lo, hi) in param_constraints(kind) {
                assert!(lo < n && hi < n, "{}: constraint out of range", kind.name());
                assert!(
                    values[lo] < values[hi],
                    "{}: default values violate constraint {} < {}",
                    kind.name(),
                    lo,
                    hi
                );
            }
        }
    }

    #[test]
    fn every_kind_builds_a_working_detector() {
        let quiet = vec![0.0f32; SPECTRUM_LEN];
        for kind in ALL_KINDS {
            let mut det = build_detector(kind, &default_values(kind));
            det.update_state(&quiet);
            assert!(!det.should_transition_on(), "{} fires on silence", kind.name());
            assert!(det.refractory_blocks() > 0);
        }
    }

    #[test]
    fn kind_names_parse_back() {
        for kind in ALL_KINDS {
            assert_eq!(SoundKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(SoundKind::parse("gurgle"), None);
    }
}
