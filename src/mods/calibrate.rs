//! Calibrate mode: tune every sound type that has recorded examples and
//! write the winning thresholds back to the config file.
//!
//! Examples live in one directory, named `<kind>-<count>.<ext>`, where
//! `count` is the number of sound events the recording contains, e.g.
//! `blow-3.wav` or `tongue-5.flac`. An optional `noise.wav` is mixed into
//! the second example-set; without one a seeded synthetic noise bed is used
//! so runs stay reproducible.

use anyhow::{ Context, Result };
use rand::{ rngs::StdRng, SeedableRng };
use std::{ fs, path::{ Path, PathBuf }, sync::Arc };

use crate::audio::{ self, BLOCK_LEN, SAMPLE_RATE };
use crate::config::AppConfig;
use crate::logger::Logger;
use crate::optimize::{
    self,
    enabled_for,
    prepare_sets,
    ParamSpace,
    ReplayScorer,
    TrainingExample,
};
use crate::sounds::SoundKind;
use crate::spectral::SpectralEngine;
use crate::Config;

/// Sound types the calibrator tunes when examples exist for them.
const TRAINABLE: [SoundKind; 5] = [
    SoundKind::Blow,
    SoundKind::Hum,
    SoundKind::Cat,
    SoundKind::HissingSip,
    SoundKind::Tongue,
];

pub fn run_calibrate(cli: &Config, logger: Arc<Logger>) -> Result<()> {
    let dir = Path::new(&cli.examples_dir);
    if !dir.is_dir() {
        anyhow::bail!("examples directory not found: {}", dir.display());
    }
    logger.info(
        &format!("calibrating from {} (seed {})…", dir.display(), cli.seed)
    )?;

    let engine = SpectralEngine::new(BLOCK_LEN, Path::new(&cli.plan_cache_path))?;
    let mut rng = StdRng::seed_from_u64(cli.seed);

    let mut config = match AppConfig::load(Path::new(&cli.config_path)) {
        Ok(config) => config,
        Err(_) => AppConfig::default(),
    };

    let noise = load_noise(dir, &mut rng, &logger)?;

    let mut tuned = 0usize;
    for kind in TRAINABLE {
        let examples = load_examples(dir, kind, &logger)?;
        if examples.is_empty() {
            logger.info(&format!("{}: no examples, skipping", kind.name()))?;
            continue;
        }
        logger.info(&format!("{}: {} example(s)", kind.name(), examples.len()))?;

        let sets = prepare_sets(&engine, &examples, &noise, config.calibration_scale)?;
        let space = ParamSpace::for_kind(kind);
        let scorer = ReplayScorer { kind, sets };

        let outcome = optimize::optimize(&space, &scorer, &mut rng, &logger)?;
        let enabled = enabled_for(kind, &outcome.best);

        let per_set: Vec<String> = scorer.sets
            .iter()
            .zip(outcome.best.scores.iter())
            .map(|(set, score)| format!("{}={}", set.label, score))
            .collect();
        logger.info(
            &format!(
                "{}: best mismatch {} -> {}",
                kind.name(),
                per_set.join(" "),
                if enabled {
                    "enabled"
                } else {
                    "kept disabled (score outside tolerance)"
                }
            )
        )?;

        if let Some(settings) = config.settings_mut(kind) {
            settings.values = outcome.best.values.clone();
            settings.enabled = enabled;
        }
        tuned += 1;
    }

    if tuned == 0 {
        anyhow::bail!(
            "no examples found in {}; record some as <kind>-<count>.wav first",
            dir.display()
        );
    }

    config.save(Path::new(&cli.config_path))?;
    logger.info(&format!("calibration written to {}", cli.config_path))?;
    Ok(())
}

/// The background-noise bed for the second example-set: `noise.wav` when
/// present, otherwise one second of seeded uniform noise.
fn load_noise(dir: &Path, rng: &mut StdRng, logger: &Logger) -> Result<Vec<f32>> {
    let path = dir.join("noise.wav");
    if path.is_file() {
        let recording = audio::decode::load_mono(&path)?;
        logger.info(
            &format!("background noise: {} ({} samples)", path.display(), recording.samples.len())
        )?;
        return Ok(audio::resample_linear_mono(&recording.samples, recording.sr, SAMPLE_RATE));
    }
    logger.info("background noise: none recorded, using a synthetic bed")?;
    Ok(optimize::synthetic_noise(SAMPLE_RATE as usize, rng))
}

/// All `<kind>-<count>.*` recordings in the directory, decoded, resampled to
/// the analysis rate, sorted by filename for reproducible scoring order.
fn load_examples(dir: &Path, kind: SoundKind, logger: &Logger) -> Result<Vec<TrainingExample>> {
    let prefix = format!("{}-", kind.name());
    let mut paths: Vec<PathBuf> = fs
        ::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() &&
                path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map_or(false, |stem| stem.starts_with(&prefix))
        })
        .collect();
    paths.sort();

    let mut examples = Vec::new();
    for path in paths {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let expected: usize = match stem[prefix.len()..].parse() {
            Ok(n) => n,
            Err(_) => {
                logger.warn(
                    &format!("skipping {}: event count missing from filename", path.display())
                )?;
                continue;
            }
        };

        let recording = audio::decode::load_mono(&path)?;
        let samples = audio::resample_linear_mono(&recording.samples, recording.sr, SAMPLE_RATE);
        if samples.len() < BLOCK_LEN {
            logger.warn(&format!("skipping {}: shorter than one block", path.display()))?;
            continue;
        }
        examples.push(TrainingExample { samples, expected_events: expected });
    }
    Ok(examples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;

    #[test]
    fn example_filenames_parse_expected_counts() {
        let dir = std::env
            ::temp_dir()
            .join(format!("sound-mouse-caltest-{}", std::process::id()));
        let _ = fs::create_dir_all(&dir);

        // not decodable audio, but the name filter runs first; a bad count
        // must be skipped before decoding is attempted
        fs::write(dir.join("blow-x.wav"), b"junk").unwrap();
        fs::write(dir.join("unrelated.txt"), b"junk").unwrap();

        let log_path = dir.join("test.log");
        let logger = Logger::new(&log_path.to_string_lossy(), LogLevel::Error).unwrap();

        let examples = load_examples(&dir, SoundKind::Blow, &logger).unwrap();
        assert!(examples.is_empty());

        let _ = fs::remove_dir_all(&dir);
    }
}
