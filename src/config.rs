//! Plain-text configuration: calibration scale plus one section per sound
//! type carrying its enabled flag, action assignment, inhibition targets and
//! tuned parameters. The calibrate mode writes this file; the live and
//! replay modes read it.

use anyhow::{ Context, Result };
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::detect::{ Action, DetectorBank, DetectorSlot };
use crate::sounds::{ self, SoundKind };

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: SoundKind,
    pub enabled: bool,
    pub on_action: Action,
    pub off_action: Action,
    pub inhibits: Vec<SoundKind>,
    /// Parameter values in the kind's spec order.
    pub values: Vec<f64>,
}

impl DetectorSettings {
    pub fn defaults(kind: SoundKind, on_action: Action, off_action: Action) -> Self {
        Self {
            kind,
            enabled: false,
            on_action,
            off_action,
            inhibits: Vec::new(),
            values: sounds::default_values(kind),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub calibration_scale: f32,
    pub detectors: Vec<DetectorSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut blow = DetectorSettings::defaults(SoundKind::Blow, Action::LeftDown, Action::LeftUp);
        // a blow lights the high band the same way a cat click or a sip
        // does; while it is on, both stay suppressed
        blow.inhibits = vec![SoundKind::Cat, SoundKind::HissingSip];

        Self {
            calibration_scale: 1.0,
            detectors: vec![
                blow,
                DetectorSettings::defaults(SoundKind::Cat, Action::RightDown, Action::RightUp),
                DetectorSettings::defaults(SoundKind::Hum, Action::ScrollUp, Action::NoAction),
                DetectorSettings::defaults(
                    SoundKind::HissingSip,
                    Action::ScrollDown,
                    Action::NoAction
                ),
                DetectorSettings::defaults(SoundKind::Tongue, Action::LeftDown, Action::LeftUp)
            ],
        }
    }
}

impl AppConfig {
    pub fn settings(&self, kind: SoundKind) -> Option<&DetectorSettings> {
        self.detectors.iter().find(|d| d.kind == kind)
    }

    pub fn settings_mut(&mut self, kind: SoundKind) -> Option<&mut DetectorSettings> {
        self.detectors.iter_mut().find(|d| d.kind == kind)
    }

    /// Build the runtime detector bank: one slot per configured sound type
    /// (disabled ones stay in the bank, administratively off, so inhibition
    /// indices remain stable), inhibition wired by kind.
    pub fn build_bank(&self) -> DetectorBank {
        let mut bank = DetectorBank::new();
        let mut index_of: HashMap<SoundKind, usize> = HashMap::new();

        for settings in &self.detectors {
            let detector = sounds::build_detector(settings.kind, &settings.values);
            let mut slot = DetectorSlot::new(detector, settings.on_action, settings.off_action);
            slot.enabled = settings.enabled;
            let idx = bank.push(slot);
            index_of.insert(settings.kind, idx);
        }
        for settings in &self.detectors {
            let from = index_of[&settings.kind];
            for target in &settings.inhibits {
                if let Some(&to) = index_of.get(target) {
                    bank.add_inhibition(from, to);
                }
            }
        }
        bank
    }

    pub fn load(path: &Path) -> Result<Self> {
        let body = fs
            ::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&body).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(body: &str) -> Result<Self> {
        let mut config = AppConfig { calibration_scale: 1.0, detectors: Vec::new() };
        let mut current: Option<usize> = None;

        for (lineno, raw) in body.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let kind = SoundKind::parse(name).ok_or_else(||
                    anyhow::anyhow!("line {}: unknown sound type '{}'", lineno + 1, name)
                )?;
                config.detectors.push(
                    DetectorSettings::defaults(kind, Action::NoAction, Action::NoAction)
                );
                current = Some(config.detectors.len() - 1);
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("line {}: expected 'key = value'", lineno + 1))?;
            let key = key.trim();
            let value = value.trim();

            match current {
                None => {
                    if key == "calibration_scale" {
                        config.calibration_scale = value
                            .parse()
                            .map_err(|_| {
                                anyhow::anyhow!("line {}: bad calibration_scale", lineno + 1)
                            })?;
                    }
                }
                Some(idx) => {
                    let settings = &mut config.detectors[idx];
                    match key {
                        "enabled" => {
                            settings.enabled = value == "true" || value == "1";
                        }
                        "on_action" => {
                            settings.on_action = Action::parse(value).ok_or_else(||
                                anyhow::anyhow!("line {}: unknown action '{}'", lineno + 1, value)
                            )?;
                        }
                        "off_action" => {
                            settings.off_action = Action::parse(value).ok_or_else(||
                                anyhow::anyhow!("line {}: unknown action '{}'", lineno + 1, value)
                            )?;
                        }
                        "inhibits" => {
                            settings.inhibits = value
                                .split(',')
                                .filter(|s| !s.trim().is_empty())
                                .map(|s| {
                                    SoundKind::parse(s).ok_or_else(||
                                        anyhow::anyhow!(
                                            "line {}: unknown sound type '{}'",
                                            lineno + 1,
                                            s.trim()
                                        )
                                    )
                                })
                                .collect::<Result<Vec<_>>>()?;
                        }
                        _ => {
                            // tuned parameter, addressed by its spec name
                            let specs = sounds::param_specs(settings.kind);
                            if let Some(pos) = specs.iter().position(|s| s.name == key) {
                                settings.values[pos] = value
                                    .parse()
                                    .map_err(|_| {
                                        anyhow::anyhow!(
                                            "line {}: bad value for '{}'",
                                            lineno + 1,
                                            key
                                        )
                                    })?;
                            }
                            // unknown keys are skipped so configs survive
                            // version drift
                        }
                    }
                }
            }
        }

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str("# sound-mouse configuration\n");
        out.push_str(&format!("# saved {}\n\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")));
        out.push_str(&format!("calibration_scale = {}\n", self.calibration_scale));

        for settings in &self.detectors {
            out.push_str(&format!("\n[{}]\n", settings.kind.name()));
            out.push_str(&format!("enabled = {}\n", settings.enabled));
            out.push_str(&format!("on_action = {}\n", settings.on_action.name()));
            out.push_str(&format!("off_action = {}\n", settings.off_action.name()));
            if !settings.inhibits.is_empty() {
                let names: Vec<&str> = settings.inhibits
                    .iter()
                    .map(|k| k.name())
                    .collect();
                out.push_str(&format!("inhibits = {}\n", names.join(", ")));
            }
            for (spec, value) in sounds::param_specs(settings.kind).iter().zip(&settings.values) {
                out.push_str(&format!("{} = {}\n", spec.name, value));
            }
        }

        fs::write(path, out).with_context(|| format!("writing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_config(name: &str) -> PathBuf {
        std::env::temp_dir().join(
            format!("sound-mouse-cfgtest-{}-{}.txt", name, std::process::id())
        )
    }

    #[test]
    fn default_config_round_trips_through_disk() {
        let path = temp_config("roundtrip");
        let mut config = AppConfig::default();
        config.calibration_scale = 2.5;
        config.settings_mut(SoundKind::Blow).unwrap().enabled = true;
        config.settings_mut(SoundKind::Blow).unwrap().values[0] = 17.25;

        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();

        assert_eq!(loaded.calibration_scale, 2.5);
        let blow = loaded.settings(SoundKind::Blow).unwrap();
        assert!(blow.enabled);
        assert_eq!(blow.values[0], 17.25);
        assert_eq!(blow.on_action, Action::LeftDown);
        assert_eq!(blow.inhibits, vec![SoundKind::Cat, SoundKind::HissingSip]);
        assert_eq!(loaded.detectors.len(), 5);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn unknown_sound_type_is_rejected() {
        assert!(AppConfig::parse("[warble]\nenabled = true\n").is_err());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = AppConfig::parse(
            "[blow]\nenabled = true\nsome_future_knob = 3\nlow_on = 12\n"
        ).unwrap();
        let blow = config.settings(SoundKind::Blow).unwrap();
        assert!(blow.enabled);
        assert_eq!(blow.values[0], 12.0);
    }

    #[test]
    fn bank_wires_inhibition_and_enabled_flags() {
        let mut config = AppConfig::default();
        config.settings_mut(SoundKind::Blow).unwrap().enabled = true;
        config.settings_mut(SoundKind::Cat).unwrap().enabled = true;

        let bank = config.build_bank();
        assert_eq!(bank.len(), 5);
        assert!(bank.slot(0).enabled); // blow
        assert!(bank.slot(1).enabled); // cat
        assert!(!bank.slot(2).enabled); // hum stays administratively off
        // blow inhibits cat (index 1) and hissing-sip (index 3)
        assert_eq!(bank.slot(0).inhibits, vec![1, 3]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(AppConfig::load(Path::new("/nonexistent/sound-mouse.cfg")).is_err());
    }
}
