//! Audio encoding for the broadcast stream.
//!
//! This module provides the `AudioEncoder` / `EncoderFactory` seam between the
//! encode pipeline and the codec library, plus two implementations:
//! the LAME MP3 encoder used for real listeners and a passthrough encoder
//! that emits the raw PCM unchanged.

use bytes::BytesMut;
use mp3lame_encoder::{max_required_buffer_size, Bitrate, Builder, InterleavedPcm, MonoPcm, Quality};

use crate::error::{EncodeError, FormatError};

use super::{AudioQuality, PcmDecoder};

/// One chunk of raw PCM together with the quality it is encoded in.
#[derive(Debug, Clone, Copy)]
pub struct PcmFrame<'a> {
    pub data: &'a [u8],
    /// Samples per channel, derived from the byte length.
    pub samples: usize,
    pub quality: AudioQuality,
}

impl<'a> PcmFrame<'a> {
    /// Wraps `data` and computes the sample count from `quality`.
    pub fn new(data: &'a [u8], quality: AudioQuality) -> Self {
        Self {
            data,
            samples: quality.samples_in(data.len()),
            quality,
        }
    }
}

/// A configured encoder for one input quality.
///
/// Implementations convert raw PCM frames to the broadcast format and append
/// the produced bytes to `out`. Encoders may buffer internally, so a call can
/// legitimately produce zero bytes. Dropping the encoder releases it.
pub trait AudioEncoder: Send {
    /// Encodes one frame, returning the number of bytes appended to `out`.
    fn encode(&mut self, frame: &PcmFrame<'_>, out: &mut BytesMut) -> Result<usize, EncodeError>;

    /// Returns a description of the encoder for logging.
    fn description(&self) -> &'static str;
}

/// Builds encoders for a given input quality.
pub trait EncoderFactory: Send + Sync {
    /// Configures an encoder that reads `input` and produces `target`.
    ///
    /// Returns [`FormatError::EncoderUnavailable`] when the codec cannot be
    /// set up for `target`.
    fn build(
        &self,
        input: AudioQuality,
        target: AudioQuality,
    ) -> Result<Box<dyn AudioEncoder>, FormatError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// LAME MP3
// ─────────────────────────────────────────────────────────────────────────────

/// Builds LAME MP3 encoders at a constant bitrate.
#[derive(Debug, Clone, Copy)]
pub struct LameEncoderFactory {
    bitrate_kbps: u32,
}

impl LameEncoderFactory {
    /// Creates a factory for the given constant bitrate.
    pub fn new(bitrate_kbps: u32) -> Self {
        Self { bitrate_kbps }
    }

    fn bitrate(&self) -> Result<Bitrate, FormatError> {
        let bitrate = match self.bitrate_kbps {
            64 => Bitrate::Kbps64,
            96 => Bitrate::Kbps96,
            112 => Bitrate::Kbps112,
            128 => Bitrate::Kbps128,
            160 => Bitrate::Kbps160,
            192 => Bitrate::Kbps192,
            256 => Bitrate::Kbps256,
            320 => Bitrate::Kbps320,
            other => {
                return Err(FormatError::EncoderUnavailable(format!(
                    "unsupported bitrate {} kbps",
                    other
                )))
            }
        };
        Ok(bitrate)
    }
}

impl EncoderFactory for LameEncoderFactory {
    fn build(
        &self,
        input: AudioQuality,
        target: AudioQuality,
    ) -> Result<Box<dyn AudioEncoder>, FormatError> {
        let decoder = PcmDecoder::new(input, target)?;

        let unavailable = |what: &str, e: &dyn std::fmt::Debug| {
            FormatError::EncoderUnavailable(format!("{}: {:?}", what, e))
        };

        let mut builder = Builder::new()
            .ok_or_else(|| FormatError::EncoderUnavailable("LAME init failed".to_string()))?;
        builder
            .set_num_channels(target.channels as u8)
            .map_err(|e| unavailable("channel count", &e))?;
        builder
            .set_sample_rate(target.sample_rate)
            .map_err(|e| unavailable("sample rate", &e))?;
        builder
            .set_brate(self.bitrate()?)
            .map_err(|e| unavailable("bitrate", &e))?;
        builder
            .set_quality(Quality::Good)
            .map_err(|e| unavailable("quality", &e))?;
        let lame = builder.build().map_err(|e| unavailable("build", &e))?;

        log::info!(
            "[Encoder] MP3 encoder ready: {} -> {} @ {} kbps",
            input,
            target,
            self.bitrate_kbps
        );

        Ok(Box::new(Mp3Encoder {
            decoder,
            lame,
            channels: target.channels,
            scratch: Vec::new(),
        }))
    }
}

/// LAME-backed encoder fed through a [`PcmDecoder`].
struct Mp3Encoder {
    decoder: PcmDecoder,
    lame: mp3lame_encoder::Encoder,
    channels: u16,
    /// Reused output buffer; LAME writes into its spare capacity.
    scratch: Vec<u8>,
}

impl AudioEncoder for Mp3Encoder {
    fn encode(&mut self, frame: &PcmFrame<'_>, out: &mut BytesMut) -> Result<usize, EncodeError> {
        let pcm = self.decoder.decode(frame.data);
        if pcm.is_empty() {
            return Ok(0);
        }

        let samples = pcm.len() / self.channels as usize;
        self.scratch.clear();
        self.scratch.reserve(max_required_buffer_size(samples));

        let result = if self.channels == 1 {
            self.lame.encode_to_vec(MonoPcm(&pcm), &mut self.scratch)
        } else {
            self.lame.encode_to_vec(InterleavedPcm(&pcm), &mut self.scratch)
        };
        let written = result.map_err(|e| EncodeError::Codec(format!("{:?}", e)))?;

        out.extend_from_slice(&self.scratch[..written]);
        Ok(written)
    }

    fn description(&self) -> &'static str {
        "mp3 (lame)"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Passthrough
// ─────────────────────────────────────────────────────────────────────────────

/// Builds [`Passthrough`] encoders.
///
/// Useful for exercising the fan-out path without a codec: every byte a
/// listener receives is a byte the player produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughFactory;

impl EncoderFactory for PassthroughFactory {
    fn build(
        &self,
        input: AudioQuality,
        _target: AudioQuality,
    ) -> Result<Box<dyn AudioEncoder>, FormatError> {
        PcmDecoder::validate(&input)?;
        Ok(Box::new(Passthrough))
    }
}

/// Passthrough encoder that performs no conversion.
pub struct Passthrough;

impl AudioEncoder for Passthrough {
    fn encode(&mut self, frame: &PcmFrame<'_>, out: &mut BytesMut) -> Result<usize, EncodeError> {
        out.extend_from_slice(frame.data);
        Ok(frame.data.len())
    }

    fn description(&self) -> &'static str {
        "passthrough"
    }
}
