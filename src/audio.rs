//! Audio plumbing shared by the live and offline modes: cpal capture,
//! fixed-size block framing, and decoding of recorded examples.

use anyhow::Result;
use cpal::traits::DeviceTrait;
use crossbeam_channel::Sender;
use std::sync::Arc;

use crate::logger::Logger;

/// Samples per analysis block (power of two; one spectral-analysis unit).
pub const BLOCK_LEN: usize = 256;
/// Power bins produced per block (N/2 + 1).
pub const SPECTRUM_LEN: usize = BLOCK_LEN / 2 + 1;
/// Fixed capture/analysis rate.
pub const SAMPLE_RATE: u32 = 44_100;

/// One capture block: interleaved samples plus the channel count they carry.
#[derive(Clone)]
pub struct Block {
    pub samples: Vec<f32>,
    pub channels: usize,
}

/// Re-frames arbitrarily sized capture callbacks into exact
/// `BLOCK_LEN * channels` interleaved blocks.
pub struct BlockChunker {
    leftover: Vec<f32>,
    channels: usize,
}

impl BlockChunker {
    pub fn new(channels: usize) -> Self {
        Self {
            leftover: Vec::with_capacity(BLOCK_LEN * channels.max(1) * 2),
            channels: channels.max(1),
        }
    }

    /// Feed interleaved samples; returns every complete block now available.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Block> {
        self.leftover.extend_from_slice(samples);
        let chunk = BLOCK_LEN * self.channels;
        let mut out = Vec::new();
        while self.leftover.len() >= chunk {
            let samples = self.leftover.drain(0..chunk).collect::<Vec<f32>>();
            out.push(Block { samples, channels: self.channels });
        }
        out
    }
}

/// Average interleaved channel pairs down to mono. Mono input passes through.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let frames = samples.len() / channels;
    let mut mono = Vec::with_capacity(frames);
    for f in 0..frames {
        let base = f * channels;
        let mut acc = 0.0f32;
        for c in 0..channels {
            acc += samples[base + c];
        }
        mono.push(acc / (channels as f32));
    }
    mono
}

/// Build a cpal input stream that forwards interleaved f32 samples.
/// I16/U16 devices are converted in the callback.
pub fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: Sender<Vec<f32>>,
    logger: Arc<Logger>
) -> Result<cpal::Stream> {
    let err_logger = logger.clone();
    let err_fn = move |e| {
        let _ = err_logger.error(&format!("audio stream error: {}", e));
    };

    match device.default_input_config()?.sample_format() {
        cpal::SampleFormat::F32 => {
            Ok(
                device.build_input_stream(
                    config,
                    move |data: &[f32], _| {
                        let _ = tx.send(data.to_vec());
                    },
                    err_fn,
                    None
                )?
            )
        }
        cpal::SampleFormat::I16 => {
            Ok(
                device.build_input_stream(
                    config,
                    move |data: &[i16], _| {
                        let mut tmp = Vec::with_capacity(data.len());
                        for &s in data {
                            tmp.push((s as f32) / 32768.0);
                        }
                        let _ = tx.send(tmp);
                    },
                    err_fn,
                    None
                )?
            )
        }
        cpal::SampleFormat::U16 => {
            Ok(
                device.build_input_stream(
                    config,
                    move |data: &[u16], _| {
                        let mut tmp = Vec::with_capacity(data.len());
                        for &s in data {
                            tmp.push(((s as f32) / 65535.0) * 2.0 - 1.0);
                        }
                        let _ = tx.send(tmp);
                    },
                    err_fn,
                    None
                )?
            )
        }
        _ => anyhow::bail!("Unsupported input sample format"),
    }
}

pub fn maybe_rate_supported(device: &cpal::Device, want: u32) -> Option<u32> {
    if let Ok(mut configs) = device.supported_input_configs() {
        for c in configs.by_ref() {
            let r = c.min_sample_rate().0..=c.max_sample_rate().0;
            if r.contains(&want) {
                return Some(want);
            }
        }
    }
    None
}

/// Simple linear resampler (mono), for recordings not captured at the
/// analysis rate.
pub fn resample_linear_mono(x: &[f32], sr_in: u32, sr_out: u32) -> Vec<f32> {
    if x.is_empty() || sr_in == 0 || sr_out == 0 || sr_in == sr_out {
        return x.to_vec();
    }
    let ratio = (sr_out as f64) / (sr_in as f64);
    let n_out = ((x.len() as f64) * ratio).floor().max(1.0) as usize;
    let mut y = Vec::with_capacity(n_out);

    for i in 0..n_out {
        let pos = (i as f64) / ratio;
        let i0 = pos.floor() as usize;
        if i0 + 1 >= x.len() {
            y.push(*x.last().unwrap());
        } else {
            let t = (pos - (i0 as f64)) as f32;
            let a = x[i0];
            let b = x[i0 + 1];
            y.push(a + (b - a) * t);
        }
    }
    y
}

// ───────────────────────────────────────────────────────────────────────────────
// Decoder for recorded examples (WAV/MP3/FLAC) using symphonia
// ───────────────────────────────────────────────────────────────────────────────
pub mod decode {
    use std::{ fs::File, path::Path };
    use symphonia::core::{
        audio::SampleBuffer,
        codecs::DecoderOptions,
        errors::Error,
        formats::FormatOptions,
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
    };
    use symphonia::default::{ get_codecs, get_probe };

    #[derive(Debug)]
    pub struct Recording {
        pub sr: u32,
        pub channels: u16,
        /// Channel-averaged mono samples.
        pub samples: Vec<f32>,
    }

    /// Decode a recording to mono at the source rate. Callers resample to
    /// the analysis rate with `resample_linear_mono` when needed.
    pub fn load_mono<P: AsRef<Path>>(path: P) -> anyhow::Result<Recording> {
        let path_ref = path.as_ref();

        let file = File::open(path_ref)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path_ref.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default()
        )?;
        let mut format = probed.format;

        let (track_id, codec_params) = {
            let track = format
                .default_track()
                .ok_or_else(|| anyhow::anyhow!("no default audio track found"))?;
            (track.id, track.codec_params.clone())
        };

        let mut decoder = get_codecs().make(&codec_params, &DecoderOptions::default())?;

        let sr = codec_params.sample_rate.ok_or_else(|| anyhow::anyhow!("unknown sample rate"))?;
        let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(1u16);

        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut mono = Vec::<f32>::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(Error::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(err) => {
                    return Err(err.into());
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::DecodeError(_)) => {
                    continue;
                }
                Err(err) => {
                    return Err(err.into());
                }
            };

            let spec = *decoded.spec();
            let chan_count = spec.channels.count().max(1);

            if
                sample_buf
                    .as_ref()
                    .map(|b| b.capacity() < decoded.capacity())
                    .unwrap_or(true)
            {
                sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            }
            let buf = sample_buf.as_mut().unwrap();

            buf.copy_interleaved_ref(decoded);
            let samples = buf.samples();

            // average channels instead of taking the first one; detectors are
            // tuned against the same downmix the live path applies
            for frame in samples.chunks_exact(chan_count) {
                let acc: f32 = frame.iter().sum();
                mono.push(acc / (chan_count as f32));
            }
        }

        Ok(Recording { sr, channels, samples: mono })
    }
}
