//! Per-block fan-out: one incoming audio block becomes one calibrated power
//! spectrum, delivered to every active detector, with a heartbeat the
//! watchdog reads. Exactly one thread calls `process_block` at a time; the
//! caller owns that discipline.

use anyhow::Result;
use chrono::Utc;
use std::sync::{ atomic::{ AtomicU64, Ordering }, Arc };

use crate::audio::downmix_to_mono;
use crate::detect::{ DetectorBank, EmitSink };
use crate::spectral::SpectralEngine;

pub struct BlockPipeline {
    engine: Arc<SpectralEngine>,
    bank: DetectorBank,
    scale: f32,
    heartbeat: Arc<AtomicU64>,
    blocks_processed: u64,
}

impl BlockPipeline {
    pub fn new(engine: Arc<SpectralEngine>, bank: DetectorBank, scale: f32) -> Self {
        Self {
            engine,
            bank,
            scale,
            heartbeat: Arc::new(AtomicU64::new(Utc::now().timestamp_millis() as u64)),
            blocks_processed: 0,
        }
    }

    /// Epoch-millis of the last processed block; the watchdog polls this.
    pub fn heartbeat(&self) -> Arc<AtomicU64> {
        self.heartbeat.clone()
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    pub fn bank(&self) -> &DetectorBank {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut DetectorBank {
        &mut self.bank
    }

    /// Swap the active detector set without tearing the pipeline down.
    pub fn set_bank(&mut self, bank: DetectorBank) {
        self.bank = bank;
    }

    /// Analyze one interleaved block. A frame-count mismatch is fatal to the
    /// real-time path; callers terminate the process on error.
    pub fn process_block(
        &mut self,
        samples: &[f32],
        frame_count: usize,
        channels: usize,
        sink: &mut EmitSink<'_>
    ) -> Result<()> {
        let block_len = self.engine.block_len();
        anyhow::ensure!(
            frame_count == block_len,
            "block size mismatch: expected {} frames, got {}",
            block_len,
            frame_count
        );
        anyhow::ensure!(
            samples.len() == frame_count * channels.max(1),
            "interleaved length {} does not match {} frames x {} channels",
            samples.len(),
            frame_count,
            channels
        );

        let mono = downmix_to_mono(samples, channels);
        let spectrum = self.engine.borrow().power_spectrum(&mono, self.scale)?;

        self.bank.process_block(&spectrum, sink);

        self.blocks_processed += 1;
        self.heartbeat.store(Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
        Ok(())
    }
}
