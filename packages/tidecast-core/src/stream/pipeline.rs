//! Encode pipeline and input-quality negotiation.
//!
//! The pipeline owns the active encoder and the shared buffer of encoded
//! bytes not yet fanned out. It lives on the dispatcher thread only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::{EncodeError, FormatError};

use super::encoder::{AudioEncoder, EncoderFactory, PcmFrame};
use super::{AudioQuality, PcmDecoder};

pub struct EncodePipeline {
    factory: Arc<dyn EncoderFactory>,
    /// Broadcast quality every encoder is built for.
    target: AudioQuality,
    /// Negotiated input quality; [`AudioQuality::UNKNOWN`] until negotiated.
    quality: AudioQuality,
    encoder: Option<Box<dyn AudioEncoder>>,
    encoded: BytesMut,
    /// Sticky "cannot encode" flag, shared with session admission.
    not_supported: Arc<AtomicBool>,
}

impl EncodePipeline {
    pub fn new(
        factory: Arc<dyn EncoderFactory>,
        target: AudioQuality,
        not_supported: Arc<AtomicBool>,
    ) -> Self {
        Self {
            factory,
            target,
            quality: AudioQuality::UNKNOWN,
            encoder: None,
            encoded: BytesMut::new(),
            not_supported,
        }
    }

    /// Rebuilds the encoder for a new input quality.
    ///
    /// Any existing encoder is released first. On failure the pipeline is
    /// left without an encoder and the sticky unsupported flag is raised;
    /// the caller is responsible for ending active sessions.
    pub fn negotiate(&mut self, quality: AudioQuality) -> Result<(), FormatError> {
        if let Some(old) = self.encoder.take() {
            log::debug!(
                "[Encoder] Releasing {} encoder for {}",
                old.description(),
                self.quality
            );
        }

        // Validate the raw input before touching the codec
        if let Err(e) = PcmDecoder::validate(&quality) {
            log::error!(
                "[Encoder] Unknown or unsupported input quality ({}), cannot encode: {}",
                quality,
                e
            );
            self.not_supported.store(true, Ordering::SeqCst);
            return Err(e);
        }

        match self.factory.build(quality, self.target) {
            Ok(encoder) => {
                log::info!(
                    "[Encoder] Input quality {} negotiated ({})",
                    quality,
                    encoder.description()
                );
                self.encoder = Some(encoder);
                self.quality = quality;
                self.not_supported.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "[Encoder] Will not be able to stream, encoder unavailable for {}: {}",
                    self.target,
                    e
                );
                self.not_supported.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Encodes one raw PCM chunk and appends the output to the shared buffer.
    ///
    /// Returns the number of encoded bytes produced.
    pub fn encode(&mut self, raw: &[u8]) -> Result<usize, EncodeError> {
        if self.not_supported.load(Ordering::SeqCst) {
            return Err(EncodeError::NotSupported);
        }
        if self.quality.is_unknown() {
            return Err(EncodeError::NotNegotiated);
        }
        let encoder = self.encoder.as_mut().ok_or(EncodeError::NotNegotiated)?;

        let frame = PcmFrame::new(raw, self.quality);
        log::trace!(
            "[Encoder] Encoding {} bytes ({} samples at {})",
            raw.len(),
            frame.samples,
            self.quality
        );
        encoder.encode(&frame, &mut self.encoded)
    }

    /// Negotiated input quality.
    pub fn quality(&self) -> AudioQuality {
        self.quality
    }

    /// Number of encoded bytes awaiting fan-out.
    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    /// Drains the shared buffer.
    pub fn take_encoded(&mut self) -> Bytes {
        self.encoded.split().freeze()
    }

    /// Discards encoded bytes awaiting fan-out.
    pub fn clear_encoded(&mut self) {
        self.encoded.clear();
    }

    /// Releases the encoder and the buffer.
    pub fn release(&mut self) {
        self.encoder = None;
        self.encoded = BytesMut::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::PassthroughFactory;

    struct NoCodec;

    impl EncoderFactory for NoCodec {
        fn build(
            &self,
            _input: AudioQuality,
            _target: AudioQuality,
        ) -> Result<Box<dyn AudioEncoder>, FormatError> {
            Err(FormatError::EncoderUnavailable("no mp3".into()))
        }
    }

    fn pipeline(factory: Arc<dyn EncoderFactory>) -> (EncodePipeline, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            EncodePipeline::new(factory, AudioQuality::broadcast(), Arc::clone(&flag)),
            flag,
        )
    }

    #[test]
    fn encode_before_negotiation_is_an_error() {
        let (mut pipeline, _) = pipeline(Arc::new(PassthroughFactory));
        assert!(matches!(
            pipeline.encode(&[0; 4]),
            Err(EncodeError::NotNegotiated)
        ));
    }

    #[test]
    fn negotiated_pipeline_accumulates_output() {
        let (mut pipeline, flag) = pipeline(Arc::new(PassthroughFactory));
        pipeline.negotiate(AudioQuality::new(44_100, 16, 2)).unwrap();
        assert!(!flag.load(Ordering::SeqCst));

        pipeline.encode(&[1, 2, 3, 4]).unwrap();
        pipeline.encode(&[5, 6, 7, 8]).unwrap();
        assert_eq!(pipeline.encoded_len(), 8);

        let drained = pipeline.take_encoded();
        assert_eq!(&drained[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(pipeline.encoded_len(), 0);
    }

    #[test]
    fn eight_bit_input_sets_not_supported() {
        let (mut pipeline, flag) = pipeline(Arc::new(PassthroughFactory));
        let err = pipeline.negotiate(AudioQuality::new(44_100, 8, 2)).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedBitDepth(8)));
        assert!(flag.load(Ordering::SeqCst));
        assert!(matches!(
            pipeline.encode(&[0; 4]),
            Err(EncodeError::NotSupported)
        ));
    }

    #[test]
    fn missing_codec_sets_not_supported() {
        let (mut pipeline, flag) = pipeline(Arc::new(NoCodec));
        let err = pipeline.negotiate(AudioQuality::broadcast()).unwrap_err();
        assert!(matches!(err, FormatError::EncoderUnavailable(_)));
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn successful_renegotiation_clears_not_supported() {
        let (mut pipeline, flag) = pipeline(Arc::new(PassthroughFactory));
        let _ = pipeline.negotiate(AudioQuality::new(44_100, 8, 2));
        assert!(flag.load(Ordering::SeqCst));

        pipeline.negotiate(AudioQuality::new(48_000, 24, 1)).unwrap();
        assert!(!flag.load(Ordering::SeqCst));
        assert_eq!(pipeline.quality(), AudioQuality::new(48_000, 24, 1));
    }

    #[test]
    fn release_drops_pending_output() {
        let (mut pipeline, _) = pipeline(Arc::new(PassthroughFactory));
        pipeline.negotiate(AudioQuality::broadcast()).unwrap();
        pipeline.encode(&[9; 8]).unwrap();
        pipeline.release();
        assert_eq!(pipeline.encoded_len(), 0);
        assert!(pipeline.encode(&[9; 8]).is_err());
    }
}
