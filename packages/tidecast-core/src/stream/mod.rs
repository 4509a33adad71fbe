//! Broadcast streaming: quality negotiation, encoding, ICY splicing and
//! fan-out to listener sessions.

pub mod channel;
pub mod dispatcher;
pub mod encoder;
pub mod icy;
pub mod pcm;
pub mod pipeline;
pub mod session;

pub use channel::{stream_channels, IngestReceiver, StreamProducer};
pub use dispatcher::Dispatcher;
pub use encoder::{AudioEncoder, EncoderFactory, LameEncoderFactory, PassthroughFactory, PcmFrame};
pub use icy::{IcyFormatter, ICY_METAINT};
pub use pcm::PcmDecoder;
pub use pipeline::EncodePipeline;
pub use session::{SessionId, SessionRegistry, StreamConnection, StreamSession};

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    BROADCAST_BITS_PER_SAMPLE, BROADCAST_CHANNELS, BROADCAST_SAMPLE_RATE,
};

// ─────────────────────────────────────────────────────────────────────────────
// Silence Frame Cache
// ─────────────────────────────────────────────────────────────────────────────

/// Global cache for silence frames to avoid repeated allocations.
///
/// Silence frames are keyed by their byte length since different qualities
/// with the same frame size produce the same buffer. The cache is lazily
/// initialized and never cleared (silence frames are small and finite).
static SILENCE_CACHE: OnceLock<RwLock<HashMap<usize, Bytes>>> = OnceLock::new();

/// Gets a cached silence frame of the given byte length, or creates and caches one.
///
/// The `Bytes::clone()` is O(1) (Arc bump).
fn get_or_create_silence(byte_len: usize) -> Bytes {
    let cache = SILENCE_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Some(silence) = cache.read().get(&byte_len) {
        return silence.clone();
    }

    let mut cache_write = cache.write();
    // Another thread may have inserted while we waited for the write lock
    if let Some(silence) = cache_write.get(&byte_len) {
        return silence.clone();
    }

    let silence = Bytes::from(vec![0u8; byte_len]);
    cache_write.insert(byte_len, silence.clone());
    silence
}

/// PCM format descriptor reported by the player.
///
/// `channels == 0` is the sentinel for "not yet known".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AudioQuality {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl AudioQuality {
    /// Quality of the "not yet negotiated" state.
    pub const UNKNOWN: Self = Self {
        sample_rate: 0,
        bits_per_sample: 0,
        channels: 0,
    };

    /// Creates a new quality descriptor.
    pub const fn new(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
        }
    }

    /// The fixed quality the broadcast encoder is configured for.
    pub const fn broadcast() -> Self {
        Self::new(
            BROADCAST_SAMPLE_RATE,
            BROADCAST_BITS_PER_SAMPLE,
            BROADCAST_CHANNELS,
        )
    }

    /// Returns `true` while no format has been negotiated.
    #[inline]
    pub const fn is_unknown(&self) -> bool {
        self.channels == 0
    }

    /// Returns bytes per sample (e.g., 2 for 16-bit audio).
    #[inline]
    pub const fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Bytes occupied by one sample across all channels.
    #[inline]
    pub const fn frame_size(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Number of samples per channel held by `byte_len` bytes.
    ///
    /// Trailing bytes that do not form a whole frame are not counted.
    #[inline]
    pub const fn samples_in(&self, byte_len: usize) -> usize {
        let frame = self.frame_size();
        if frame == 0 {
            0
        } else {
            byte_len / frame
        }
    }

    /// Byte length of `samples` samples per channel.
    ///
    /// Uses saturating arithmetic to prevent overflow with extreme values.
    #[inline]
    pub fn bytes_for_samples(&self, samples: u32) -> usize {
        (samples as usize).saturating_mul(self.frame_size())
    }

    /// Creates a zeroed PCM frame of `samples` samples per channel.
    ///
    /// Digital silence is all-zero for every supported signed bit depth.
    /// Frames are cached globally by byte length.
    pub fn silence_frame(&self, samples: u32) -> Bytes {
        get_or_create_silence(self.bytes_for_samples(samples))
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.sample_rate, self.bits_per_sample, self.channels
        )
    }
}
