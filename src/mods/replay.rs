//! Replay mode: run one recording through the configured detectors offline
//! and log every detected event with its timestamp. Useful for sanity
//! checking a calibration without touching the mouse.

use anyhow::Result;
use std::{ path::Path, sync::Arc };

use crate::audio::{ self, BLOCK_LEN, SAMPLE_RATE };
use crate::config::AppConfig;
use crate::logger::Logger;
use crate::optimize::block_spectra;
use crate::sounds;
use crate::spectral::SpectralEngine;
use crate::Config;

pub fn run_replay(cli: &Config, logger: Arc<Logger>) -> Result<()> {
    if cli.input_path.is_empty() {
        anyhow::bail!("--input <PATH> is required in replay mode");
    }
    let path = Path::new(&cli.input_path);
    if !path.exists() {
        anyhow::bail!("Input file not found: {}", path.display());
    }

    let app = match AppConfig::load(Path::new(&cli.config_path)) {
        Ok(app) => app,
        Err(_) => {
            logger.warn("no config found, replaying with defaults")?;
            AppConfig::default()
        }
    };

    logger.info(&format!("Decoding: {}", path.display()))?;
    let recording = audio::decode::load_mono(path)?;
    logger.info(
        &format!(
            "Decoded: sr={} Hz, channels={}, samples(mono)={}",
            recording.sr,
            recording.channels,
            recording.samples.len()
        )
    )?;
    let samples = audio::resample_linear_mono(&recording.samples, recording.sr, SAMPLE_RATE);

    let engine = SpectralEngine::new(BLOCK_LEN, Path::new(&cli.plan_cache_path))?;
    let spectra = block_spectra(&engine, &samples, app.calibration_scale)?;
    logger.info(
        &format!(
            "Replaying {:.1} s ({} block(s)) through {} detector(s)…",
            (samples.len() as f32) / (SAMPLE_RATE as f32),
            spectra.len(),
            app.detectors.len()
        )
    )?;

    let block_s = (BLOCK_LEN as f32) / (SAMPLE_RATE as f32);
    let mut total = 0usize;
    for settings in &app.detectors {
        let detector = sounds::build_detector(settings.kind, &settings.values);
        let frames = crate::detect::replay_training(detector, &spectra);

        let tag = if settings.enabled { "" } else { " (disabled in config)" };
        logger.info(
            &format!("{}: {} event(s){}", settings.kind.name(), frames.len(), tag)
        )?;
        for frame in &frames {
            logger.info(
                &format!(
                    "  [{:8.2}s] {} -> {}",
                    (*frame as f32) * block_s,
                    settings.kind.name(),
                    settings.on_action.name()
                )
            )?;
        }
        if settings.enabled {
            total += frames.len();
        }
    }

    logger.info(&format!("Replay done: {} event(s) from enabled detectors.", total))?;
    Ok(())
}
