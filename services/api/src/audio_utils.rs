use anyhow::Result;
use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tutor_core::frames::AudioFrame;

// Sample rates expected on each side of the model connections
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24_000;
pub const GEMINI_INPUT_SAMPLE_RATE: u32 = 16_000;
pub const GEMINI_OUTPUT_SAMPLE_RATE: u32 = 24_000;

const RESAMPLER_CHUNK_SIZE: usize = 480;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1, // mono
    )?;
    Ok(resampler)
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

pub fn encode_i16(pcm16: &[i16]) -> String {
    let pcm16_bytes: Vec<u8> = pcm16
        .iter()
        .flat_map(|&sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16_bytes)
}

pub fn decode_i16(base64_fragment: &str) -> Vec<i16> {
    if let Ok(pcm16_bytes) = base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        pcm16_bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect()
    } else {
        tracing::error!("Failed to decode base64 fragment to i16");
        Vec::new()
    }
}

/// Brings incoming audio frames to one fixed sample rate.
///
/// Samples are buffered until a full resampler chunk is available, so output
/// lags input by at most one chunk.
pub struct RateConverter {
    target: u32,
    state: Option<(u32, FastFixedIn<f32>)>,
    pending: Vec<f32>,
}

impl RateConverter {
    pub fn new(target: u32) -> Self {
        Self {
            target,
            state: None,
            pending: Vec::new(),
        }
    }

    pub fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<i16>> {
        if frame.sample_rate == self.target {
            return Ok(frame.samples.clone());
        }

        let stale = !matches!(&self.state, Some((rate, _)) if *rate == frame.sample_rate);
        if stale {
            let resampler = create_resampler(
                frame.sample_rate as f64,
                self.target as f64,
                RESAMPLER_CHUNK_SIZE,
            )?;
            self.state = Some((frame.sample_rate, resampler));
            self.pending.clear();
        }
        let Some((_, resampler)) = self.state.as_mut() else {
            return Ok(Vec::new());
        };

        self.pending.extend(convert_i16_to_f32(&frame.samples));
        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let resampled = resampler.process(&[chunk], None)?;
            out.extend(convert_f32_to_i16(&resampled[0]));
        }
        Ok(out)
    }
}
