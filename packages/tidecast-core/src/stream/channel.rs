//! Producer → dispatcher channels.
//!
//! Two bounded channels cross from the player's thread into the dispatcher:
//! raw PCM chunks and input-quality changes. Writes never block. A full
//! channel drops the write with a warning; a closed one logs an error. Audio
//! is a continuous stream, so a lost chunk is tolerated.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::ChannelError;
use crate::state::StreamingConfig;

use super::AudioQuality;

/// Creates the producer and the dispatcher's receiving ends.
///
/// `active` is the registry's session counter; the producer skips all work
/// while it is zero.
pub fn stream_channels(
    config: &StreamingConfig,
    active: Arc<AtomicUsize>,
) -> (StreamProducer, IngestReceiver) {
    let (audio_tx, audio_rx) = mpsc::channel(config.ingest_capacity);
    let (quality_tx, quality_rx) = mpsc::channel(config.quality_capacity);

    let producer = StreamProducer {
        audio: audio_tx,
        quality: quality_tx,
        last_quality: Mutex::new(AudioQuality::UNKNOWN),
        active,
    };
    let receiver = IngestReceiver {
        audio: audio_rx,
        quality: quality_rx,
    };
    (producer, receiver)
}

/// Receiving ends owned by the dispatcher.
pub struct IngestReceiver {
    pub audio: mpsc::Receiver<Bytes>,
    pub quality: mpsc::Receiver<AudioQuality>,
}

impl IngestReceiver {
    /// Discards all queued audio without touching quality messages.
    ///
    /// Returns the number of chunks dropped.
    pub fn discard_audio(&mut self) -> usize {
        let mut dropped = 0;
        while self.audio.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

/// Player-facing write side.
pub struct StreamProducer {
    audio: mpsc::Sender<Bytes>,
    quality: mpsc::Sender<AudioQuality>,
    /// Last quality successfully written to the quality channel.
    last_quality: Mutex<AudioQuality>,
    active: Arc<AtomicUsize>,
}

impl StreamProducer {
    /// Hands one block of player output to the broadcast.
    ///
    /// Returns immediately while nobody is listening. A quality change is
    /// announced before the audio that uses it; if the announcement cannot be
    /// written, the audio is dropped too and the announcement is retried with
    /// the next block.
    pub fn on_audio_block(&self, quality: AudioQuality, samples: Bytes) {
        if self.active.load(Ordering::Relaxed) == 0 {
            return;
        }

        {
            let mut last = self.last_quality.lock();
            if *last != quality {
                if self.write_quality(quality).is_err() {
                    return;
                }
                *last = quality;
            }
        }

        let _ = self.write_audio(samples);
    }

    /// Writes to the audio channel without blocking.
    pub fn write_audio(&self, samples: Bytes) -> Result<(), ChannelError> {
        let len = samples.len();
        self.audio.try_send(samples).map_err(|e| {
            let err = channel_error(&e);
            log_write_failure("audio", len, err);
            err
        })
    }

    /// Writes to the quality channel without blocking.
    pub fn write_quality(&self, quality: AudioQuality) -> Result<(), ChannelError> {
        log::debug!("[Stream] Announcing input quality {}", quality);
        self.quality.try_send(quality).map_err(|e| {
            let err = channel_error(&e);
            log_write_failure("quality", 1, err);
            err
        })
    }

    /// Quality most recently announced to the dispatcher.
    pub fn last_quality(&self) -> AudioQuality {
        *self.last_quality.lock()
    }
}

fn channel_error<T>(err: &TrySendError<T>) -> ChannelError {
    match err {
        TrySendError::Full(_) => ChannelError::Full,
        TrySendError::Closed(_) => ChannelError::Closed,
    }
}

fn log_write_failure(channel: &str, len: usize, err: ChannelError) {
    match err {
        ChannelError::Full => {
            log::warn!("[Stream] {} channel full, dropped {} bytes", channel, len)
        }
        ChannelError::Closed => {
            log::error!("[Stream] {} channel closed, write abandoned", channel)
        }
    }
}
