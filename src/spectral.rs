//! Pool-backed spectral analysis. A fixed set of FFT workers (one realfft
//! plan plus buffers each) is shared by every thread that needs a transform;
//! `borrow()` hands out exclusive, scope-bound leases so no caller ever
//! allocates a plan of its own.

use anyhow::{ Context, Result };
use chrono::Utc;
use realfft::{ RealFftPlanner, RealToComplex };
use rustfft::num_complex::Complex;
use std::{
    fs,
    path::Path,
    sync::{ Arc, Condvar, Mutex, MutexGuard },
    thread,
    time::Instant,
};

/// Ceiling on the worker pool; beyond this the pool just wastes memory.
pub const MAX_WORKERS: usize = 32;

/// Iterations of the timed warmup pass run when the plan cache is cold.
const WARMUP_ITERATIONS: usize = 64;

struct FftWorker {
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl FftWorker {
    fn new(planner: &mut RealFftPlanner<f32>, block_len: usize) -> Self {
        let plan = planner.plan_fft_forward(block_len);
        let input = plan.make_input_vec();
        let output = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();
        Self { plan, input, output, scratch }
    }

    fn run(&mut self) -> Result<()> {
        self.plan
            .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
            .map_err(|e| anyhow::anyhow!("transform failed: {}", e))
    }
}

/// Fixed pool of reusable real-to-complex transform workers.
pub struct SpectralEngine {
    workers: Vec<Mutex<FftWorker>>,
    free: Mutex<usize>,
    available: Condvar,
    block_len: usize,
}

impl SpectralEngine {
    /// Pool sized to the machine: hardware concurrency, capped and floored.
    pub fn new(block_len: usize, cache_path: &Path) -> Result<Self> {
        Self::with_workers(block_len, default_worker_count(), cache_path)
    }

    /// Fixed worker count; tests use this for deterministic pool sizes.
    pub fn with_workers(block_len: usize, count: usize, cache_path: &Path) -> Result<Self> {
        anyhow::ensure!(block_len.is_power_of_two(), "block length must be a power of two");
        let count = count.clamp(1, MAX_WORKERS);

        // The plan cache must be settled before any worker plan is created,
        // so every plan benefits from the warmed planner.
        let mut planner = RealFftPlanner::<f32>::new();
        sync_plan_cache(&mut planner, block_len, count, cache_path)?;

        let workers = (0..count)
            .map(|_| Mutex::new(FftWorker::new(&mut planner, block_len)))
            .collect::<Vec<_>>();

        Ok(Self {
            workers,
            free: Mutex::new(count),
            available: Condvar::new(),
            block_len,
        })
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Block until a worker is free, then take it exclusively. The returned
    /// lease releases the worker when dropped, on every exit path.
    pub fn borrow(&self) -> SpectralLease<'_> {
        let mut free = self.free.lock().unwrap();
        while *free == 0 {
            free = self.available.wait(free).unwrap();
        }
        *free -= 1;
        drop(free);

        // A slot is reserved, so some worker mutex is (or is about to be)
        // unlocked; scan until the claim lands.
        loop {
            for worker in &self.workers {
                if let Ok(guard) = worker.try_lock() {
                    return SpectralLease { engine: self, worker: Some(guard) };
                }
            }
            thread::yield_now();
        }
    }
}

/// Exclusive, scope-bound borrow of one FFT worker.
pub struct SpectralLease<'a> {
    engine: &'a SpectralEngine,
    worker: Option<MutexGuard<'a, FftWorker>>,
}

impl<'a> SpectralLease<'a> {
    fn worker(&mut self) -> &mut FftWorker {
        self.worker.as_mut().unwrap()
    }

    /// The transform input buffer; fill before `run_transform()`.
    pub fn input(&mut self) -> &mut [f32] {
        &mut self.worker().input
    }

    pub fn run_transform(&mut self) -> Result<()> {
        self.worker().run()
    }

    /// Complex output of the last transform.
    pub fn output(&self) -> &[Complex<f32>] {
        &self.worker.as_ref().unwrap().output
    }

    /// Fill, transform, and return the squared-magnitude spectrum scaled by
    /// `scale`. `mono` must be exactly one block.
    pub fn power_spectrum(&mut self, mono: &[f32], scale: f32) -> Result<Vec<f32>> {
        let block_len = self.engine.block_len;
        anyhow::ensure!(
            mono.len() == block_len,
            "power_spectrum needs {} samples, got {}",
            block_len,
            mono.len()
        );
        self.worker().input.copy_from_slice(mono);
        self.run_transform()?;
        Ok(
            self
                .output()
                .iter()
                .map(|c| c.norm_sqr() * scale)
                .collect()
        )
    }
}

impl<'a> Drop for SpectralLease<'a> {
    fn drop(&mut self) {
        // unlock the worker first, then publish the free slot
        drop(self.worker.take());
        let mut free = self.engine.free.lock().unwrap();
        *free += 1;
        self.engine.available.notify_one();
    }
}

pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_WORKERS)
}

/// Settle the persisted plan cache for `block_len`. A hit skips the timed
/// warmup pass; a miss runs it once and records the measurement so later
/// constructions are fast.
fn sync_plan_cache(
    planner: &mut RealFftPlanner<f32>,
    block_len: usize,
    workers: usize,
    path: &Path
) -> Result<()> {
    if let Ok(body) = fs::read_to_string(path) {
        let cached_len = body
            .lines()
            .find_map(|l| l.strip_prefix("block_len = "))
            .and_then(|v| v.trim().parse::<usize>().ok());
        if cached_len == Some(block_len) {
            // plan once so the planner's internal cache is primed, no timing
            let _ = planner.plan_fft_forward(block_len);
            return Ok(());
        }
    }

    let plan = planner.plan_fft_forward(block_len);
    let mut input = plan.make_input_vec();
    let mut output = plan.make_output_vec();
    let mut scratch = plan.make_scratch_vec();
    for (i, v) in input.iter_mut().enumerate() {
        *v = ((i % 7) as f32) * 0.125 - 0.375;
    }

    let started = Instant::now();
    for _ in 0..WARMUP_ITERATIONS {
        plan
            .process_with_scratch(&mut input, &mut output, &mut scratch)
            .map_err(|e| anyhow::anyhow!("warmup transform failed: {}", e))?;
    }
    let elapsed_us = started.elapsed().as_micros();

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).with_context(|| {
                format!("creating plan cache directory {}", dir.display())
            })?;
        }
    }
    let body = format!(
        "# sound-mouse transform plan cache\nblock_len = {}\nworkers = {}\nwarmup_us = {}\ncreated = {}\n",
        block_len,
        workers,
        elapsed_us,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    fs::write(path, body).with_context(|| format!("writing plan cache {}", path.display()))?;
    Ok(())
}
