//! Live mode: microphone blocks through the pipeline, detected actions out
//! to the dispatcher, a watchdog on the heartbeat. Fatal conditions here
//! end the process; an external supervisor restarts it.

use anyhow::Result;
use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use chrono::Utc;
use crossbeam_channel::bounded;
use std::{
    path::Path,
    sync::{ atomic::{ AtomicBool, Ordering }, Arc },
    thread,
    time::Duration,
};

use crate::audio::{ self, BLOCK_LEN, SAMPLE_RATE };
use crate::channel::ActionChannel;
use crate::config::AppConfig;
use crate::detect::EmitSink;
use crate::logger::Logger;
use crate::pipeline::BlockPipeline;
use crate::spectral::SpectralEngine;
use crate::Config;

/// Heartbeat age after which the watchdog declares the pipeline hung.
pub const WATCHDOG_STALE_MS: u64 = 1_000;

pub fn run_live(cli: &Config, logger: Arc<Logger>) -> Result<()> {
    logger.info("sound-mouse live mode starting…")?;

    let app = match AppConfig::load(Path::new(&cli.config_path)) {
        Ok(app) => app,
        Err(e) => {
            logger.warn(
                &format!(
                    "no usable config at {} ({}); starting with defaults, run --mode calibrate to tune",
                    cli.config_path,
                    e
                )
            )?;
            AppConfig::default()
        }
    };
    let enabled = app.detectors
        .iter()
        .filter(|d| d.enabled)
        .count();
    logger.info(
        &format!("{} of {} detector(s) enabled, calibration scale {}", enabled, app.detectors.len(), app.calibration_scale)
    )?;

    // spectral engine construction settles the plan cache; failure is fatal
    let engine = Arc::new(SpectralEngine::new(BLOCK_LEN, Path::new(&cli.plan_cache_path))?);
    logger.info(&format!("spectral engine ready with {} worker(s)", engine.worker_count()))?;

    let mut pipeline = BlockPipeline::new(engine, app.build_bank(), app.calibration_scale);
    let heartbeat = pipeline.heartbeat();

    // ctrl+c to quit
    let quit = Arc::new(AtomicBool::new(false));
    {
        let q = quit.clone();
        let _ = ctrlc::set_handler(move || {
            q.store(true, Ordering::SeqCst);
        });
    }

    // === microphone ===
    let host = cpal::default_host();
    let mic_device = host
        .default_input_device()
        .ok_or_else(|| anyhow::anyhow!("No default input device (microphone) found"))?;
    let mut mic_config = mic_device.default_input_config()?.config();
    if let Some(sr) = audio::maybe_rate_supported(&mic_device, SAMPLE_RATE) {
        mic_config.sample_rate.0 = sr;
    }
    let channels = mic_config.channels.max(1) as usize;

    logger.info(&format!("Mic device: {}", mic_device.name().unwrap_or_default()))?;
    logger.info(
        &format!("Mic: sample rate {} Hz, channels {}", mic_config.sample_rate.0, channels)
    )?;

    let (tx_capture, rx_capture) = bounded::<Vec<f32>>(8);
    let mic_stream = audio::build_input_stream(&mic_device, &mic_config, tx_capture, logger.clone())?;
    mic_stream.play()?;

    let actions = Arc::new(ActionChannel::new(logger.clone()));

    // === dispatcher ===
    // stands in for the OS input injector: drains the queue and logs what
    // would be injected
    let dispatcher = {
        let actions = actions.clone();
        let logger = logger.clone();
        thread::spawn(move || {
            while let Some(action) = actions.dequeue() {
                let _ = logger.info(&format!("dispatch: {}", action.name()));
            }
        })
    };

    // === watchdog ===
    // a stale heartbeat means the audio subsystem hung; exiting non-zero
    // hands recovery to the supervisor
    let watchdog = {
        let heartbeat = heartbeat.clone();
        let quit = quit.clone();
        let logger = logger.clone();
        thread::spawn(move || {
            loop {
                if quit.load(Ordering::SeqCst) {
                    return;
                }
                let age = (Utc::now().timestamp_millis() as u64).saturating_sub(
                    heartbeat.load(Ordering::Relaxed)
                );
                if age > WATCHDOG_STALE_MS {
                    let _ = logger.error(
                        &format!("watchdog: no block processed for {} ms, exiting for restart", age)
                    );
                    std::process::exit(2);
                }
                thread::sleep(Duration::from_millis(250));
            }
        })
    };

    // === pipeline ===
    let pipeline_thread = {
        let actions = actions.clone();
        let quit = quit.clone();
        let logger = logger.clone();
        thread::spawn(move || {
            let mut chunker = audio::BlockChunker::new(channels);
            let mut sink = EmitSink::Live(&actions);
            while !quit.load(Ordering::SeqCst) {
                let captured = match rx_capture.recv_timeout(Duration::from_millis(100)) {
                    Ok(samples) => samples,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        continue;
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                        break;
                    }
                };
                for block in chunker.push(&captured) {
                    if
                        let Err(e) = pipeline.process_block(
                            &block.samples,
                            BLOCK_LEN,
                            block.channels,
                            &mut sink
                        )
                    {
                        // no partial-failure mode on the real-time path
                        let _ = logger.error(&format!("pipeline fatal: {}", e));
                        std::process::exit(1);
                    }
                }
            }
        })
    };

    while !quit.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    logger.info("shutting down…")?;
    actions.shutdown();
    let _ = pipeline_thread.join();
    let _ = dispatcher.join();
    let _ = watchdog.join();
    drop(mic_stream);
    logger.info("sound-mouse live mode stopped.")?;
    Ok(())
}
