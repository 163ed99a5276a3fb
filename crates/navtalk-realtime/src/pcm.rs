//! PCM16 encoding, base64 chunking, and resampling for outbound microphone audio.

use crate::error::AudioError;
use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rate the realtime API expects for `pcm16` input.
pub const REALTIME_PCM16_SAMPLE_RATE: u32 = 24_000;
/// Samples per processed frame.
pub const FRAME_SAMPLES: usize = 8192;
/// Upper bound on the base64 text carried by a single append message.
pub const APPEND_CHUNK_CHARS: usize = 4096;

const RESAMPLER_CHUNK: usize = 1024;

/// Converts normalized float samples to little-endian signed 16-bit PCM.
/// Samples are clamped to [-1, 1]; negative values scale by 32768 and
/// positive values by 32767 so both ends of the range are reachable.
pub fn f32_to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
            let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
            (scaled as i16).to_le_bytes()
        })
        .collect()
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Splits base64 text into pieces of at most `size` characters. Base64 is
/// ASCII, so byte offsets are character offsets.
pub fn chunk_base64(encoded: &str, size: usize) -> impl Iterator<Item = &str> {
    encoded
        .as_bytes()
        .chunks(size.max(1))
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
}

/// Encodes one frame into the base64 pieces sent as `input_audio_buffer.append`.
pub fn encode_frame(samples: &[f32]) -> Vec<String> {
    let encoded = encode_base64(&f32_to_pcm16_le(samples));
    chunk_base64(&encoded, APPEND_CHUNK_CHARS)
        .map(str::to_owned)
        .collect()
}

/// Averages interleaved channels down to mono.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Creates a mono resampler between two sample rates.
pub fn create_resampler(
    in_sampling_rate: u32,
    out_sampling_rate: u32,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, AudioError> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate as f64 / in_sampling_rate as f64,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Turns arbitrary-size device callbacks into fixed 24 kHz frames.
pub struct Framer {
    resampler: Option<FastFixedIn<f32>>,
    pending_input: Vec<f32>,
    pending_output: Vec<f32>,
}

impl Framer {
    pub fn new(device_rate: u32) -> Result<Self, AudioError> {
        let resampler = if device_rate == REALTIME_PCM16_SAMPLE_RATE {
            None
        } else {
            Some(create_resampler(
                device_rate,
                REALTIME_PCM16_SAMPLE_RATE,
                RESAMPLER_CHUNK,
            )?)
        };
        Ok(Self {
            resampler,
            pending_input: Vec::new(),
            pending_output: Vec::with_capacity(FRAME_SAMPLES * 2),
        })
    }

    /// Feeds mono samples at the device rate and returns every completed frame.
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<Vec<f32>>, AudioError> {
        match self.resampler.as_mut() {
            None => self.pending_output.extend_from_slice(samples),
            Some(resampler) => {
                self.pending_input.extend_from_slice(samples);
                loop {
                    let needed = resampler.input_frames_next();
                    if self.pending_input.len() < needed {
                        break;
                    }
                    let chunk: Vec<f32> = self.pending_input.drain(..needed).collect();
                    let out = resampler
                        .process(&[chunk], None)
                        .map_err(|e| AudioError::Resampler(e.to_string()))?;
                    self.pending_output.extend_from_slice(&out[0]);
                }
            }
        }

        let mut frames = Vec::new();
        while self.pending_output.len() >= FRAME_SAMPLES {
            frames.push(self.pending_output.drain(..FRAME_SAMPLES).collect());
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn decode(encoded: &str) -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap()
    }

    fn as_i16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn test_f32_to_pcm16_scaling_and_clamping() {
        let pcm = as_i16(&f32_to_pcm16_le(&[1.0, -1.0, 0.0, 0.5, 2.0, -2.0, f32::NAN]));
        assert_eq!(pcm, vec![32767, -32768, 0, 16383, 32767, -32768, 0]);
    }

    #[test]
    fn test_f32_to_pcm16_empty() {
        assert!(f32_to_pcm16_le(&[]).is_empty());
    }

    #[test]
    fn test_chunks_reassemble_to_original_bytes() {
        for len in [0usize, 1, 2, 3, 3071, 3072, 3073, 16_384, 100_001, 4 * 1024 * 1024 + 7] {
            let original: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let encoded = encode_base64(&original);
            let chunks: Vec<&str> = chunk_base64(&encoded, APPEND_CHUNK_CHARS).collect();
            assert!(chunks.iter().all(|c| c.len() <= APPEND_CHUNK_CHARS));
            assert_eq!(chunks.len(), encoded.len().div_ceil(APPEND_CHUNK_CHARS));
            let joined: String = chunks.concat();
            assert_eq!(decode(&joined), original, "length {len}");
        }
    }

    #[test]
    fn test_full_frame_splits_into_six_chunks() {
        let frame = vec![0.25f32; FRAME_SAMPLES];
        let chunks = encode_frame(&frame);
        // 16384 bytes -> 21848 base64 characters.
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks[5].len(), 21_848 - 5 * APPEND_CHUNK_CHARS);
        let pcm = as_i16(&decode(&chunks.concat()));
        assert_eq!(pcm.len(), FRAME_SAMPLES);
        assert!(pcm.iter().all(|&s| s == (0.25f32 * 32767.0) as i16));
    }

    #[test]
    fn test_downmix_to_mono() {
        assert_eq!(downmix_to_mono(&[0.2, 0.4, -1.0, 1.0], 2), vec![0.3, 0.0]);
        assert_eq!(downmix_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_framer_passthrough_at_native_rate() {
        let mut framer = Framer::new(REALTIME_PCM16_SAMPLE_RATE).unwrap();
        assert!(framer.push(&vec![0.1; FRAME_SAMPLES - 1]).unwrap().is_empty());
        let frames = framer.push(&vec![0.2; FRAME_SAMPLES + 1]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), FRAME_SAMPLES);
        assert_abs_diff_eq!(frames[0][FRAME_SAMPLES - 1], 0.2);
        assert_eq!(framer.pending_output.len(), FRAME_SAMPLES);
    }

    #[test]
    fn test_framer_resamples_device_rate() {
        let mut framer = Framer::new(48_000).unwrap();
        // Two seconds at 48 kHz should yield close to two seconds at 24 kHz.
        let mut frames = Vec::new();
        for _ in 0..96 {
            frames.extend(framer.push(&vec![0.0; 1000]).unwrap());
        }
        let produced = frames.len() * FRAME_SAMPLES + framer.pending_output.len();
        assert!((46_000..=48_000).contains(&produced), "produced {produced}");
        assert!(frames.iter().all(|f| f.len() == FRAME_SAMPLES));
    }

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(48_000, 24_000, 1024).is_ok());
        assert!(create_resampler(16_000, 24_000, 1024).is_ok());
    }
}
