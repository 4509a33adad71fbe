//! Raw PCM decoding.
//!
//! Converts little-endian signed PCM of any supported input quality into
//! interleaved 16-bit samples at the broadcast quality: bit-depth reduction,
//! channel mapping and linear-interpolation sample-rate conversion.

use crate::error::FormatError;
use crate::protocol_constants::SUPPORTED_BITS_PER_SAMPLE;

use super::AudioQuality;

/// Stateful decoder for one negotiated input quality.
///
/// Keeps the last output-channel frame and the fractional read position
/// between calls so consecutive chunks resample without seams.
#[derive(Debug)]
pub struct PcmDecoder {
    input: AudioQuality,
    target: AudioQuality,
    /// Input samples advanced per output sample.
    step: f64,
    /// Read position relative to the start of the next chunk. `-1.0..0.0`
    /// refers to the carried-over `prev` frame.
    position: f64,
    prev: Option<Vec<i16>>,
}

impl PcmDecoder {
    /// Checks that `quality` describes raw PCM this decoder can read.
    pub fn validate(quality: &AudioQuality) -> Result<(), FormatError> {
        if !SUPPORTED_BITS_PER_SAMPLE.contains(&quality.bits_per_sample) {
            return Err(FormatError::UnsupportedBitDepth(quality.bits_per_sample));
        }
        if quality.sample_rate == 0 || quality.channels == 0 {
            return Err(FormatError::InvalidQuality(*quality));
        }
        Ok(())
    }

    /// Creates a decoder from `input` to `target`.
    ///
    /// `target` must be 16-bit; only the sample rate and channel count of
    /// the target are applied.
    pub fn new(input: AudioQuality, target: AudioQuality) -> Result<Self, FormatError> {
        Self::validate(&input)?;
        if target.bits_per_sample != 16 || target.sample_rate == 0 || target.channels == 0 {
            return Err(FormatError::InvalidQuality(target));
        }

        Ok(Self {
            input,
            target,
            step: input.sample_rate as f64 / target.sample_rate as f64,
            position: 0.0,
            prev: None,
        })
    }

    /// The input quality this decoder reads.
    pub fn input(&self) -> AudioQuality {
        self.input
    }

    /// Decodes one chunk into interleaved target-quality samples.
    ///
    /// Trailing bytes that do not form a whole input frame are ignored.
    pub fn decode(&mut self, raw: &[u8]) -> Vec<i16> {
        let frames = self.remap_channels(raw);
        if self.input.sample_rate == self.target.sample_rate {
            return frames.concat();
        }
        self.resample(frames)
    }

    /// Reads every input frame and maps it onto the target channel layout.
    fn remap_channels(&self, raw: &[u8]) -> Vec<Vec<i16>> {
        let in_channels = self.input.channels as usize;
        let out_channels = self.target.channels as usize;
        let width = self.input.bytes_per_sample();

        raw.chunks_exact(self.input.frame_size())
            .map(|frame| {
                let samples: Vec<i16> = frame
                    .chunks_exact(width)
                    .map(|bytes| read_sample(bytes, self.input.bits_per_sample))
                    .collect();

                (0..out_channels)
                    .map(|ch| {
                        if out_channels == 1 && in_channels >= 2 {
                            ((samples[0] as i32 + samples[1] as i32) / 2) as i16
                        } else {
                            samples[ch.min(in_channels - 1)]
                        }
                    })
                    .collect()
            })
            .collect()
    }

    fn resample(&mut self, frames: Vec<Vec<i16>>) -> Vec<i16> {
        let count = frames.len();
        if count == 0 {
            return Vec::new();
        }

        let channels = self.target.channels as usize;
        let estimate = ((count as f64 / self.step).ceil() as usize + 1) * channels;
        let mut out = Vec::with_capacity(estimate);
        let last = (count - 1) as f64;

        while self.position <= last {
            let base = self.position.floor();
            let frac = self.position - base;
            let index = base as isize;

            let current = frame_at(&frames, self.prev.as_deref(), index);
            if frac == 0.0 {
                out.extend_from_slice(current);
            } else {
                let next = frame_at(&frames, self.prev.as_deref(), index + 1);
                for ch in 0..channels {
                    let a = current[ch] as f64;
                    let b = next[ch] as f64;
                    out.push((a + (b - a) * frac).round() as i16);
                }
            }
            self.position += self.step;
        }

        self.position -= count as f64;
        self.prev = frames.into_iter().last();
        out
    }
}

/// Frame `index` of the current chunk; `-1` is the carried-over frame.
fn frame_at<'a>(frames: &'a [Vec<i16>], prev: Option<&'a [i16]>, index: isize) -> &'a [i16] {
    if index < 0 {
        prev.unwrap_or(&frames[0])
    } else {
        &frames[index as usize]
    }
}

/// Reads one little-endian signed sample and scales it to 16 bits.
fn read_sample(bytes: &[u8], bits_per_sample: u16) -> i16 {
    match bits_per_sample {
        24 => {
            let value = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
            (value >> 8) as i16
        }
        32 => (i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) >> 16) as i16,
        _ => i16::from_le_bytes([bytes[0], bytes[1]]),
    }
}
