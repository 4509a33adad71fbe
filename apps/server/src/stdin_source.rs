//! Raw PCM source read from standard input.
//!
//! Stands in for a full player: raw little-endian PCM of a fixed quality is
//! read in nominal read-size chunks and handed to the engine's producer. The
//! player is reported `Playing` while data flows and `Paused` once input
//! ends, so listeners then receive silence instead of being starved.

use std::io::{self, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tidecast_core::protocol_constants::READ_CHUNK_SAMPLES;
use tidecast_core::stream::PcmDecoder;
use tidecast_core::{AudioQuality, LocalPlayer, PlaybackState, StreamProducer};

/// Spawns the reader thread.
///
/// Fails with [`io::ErrorKind::InvalidInput`] if `quality` cannot be decoded.
pub fn spawn<R>(
    reader: R,
    quality: AudioQuality,
    producer: Arc<StreamProducer>,
    player: Arc<LocalPlayer>,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    PcmDecoder::validate(&quality).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    thread::Builder::new()
        .name("stdin-source".into())
        .spawn(move || match pump(reader, quality, &producer, &player) {
            Ok(bytes) => log::info!("[Player] Input ended after {} bytes", bytes),
            Err(e) => log::error!("[Player] Input failed: {}", e),
        })
}

/// Reads `reader` to the end, feeding the producer at real-time pace.
///
/// Returns the number of bytes read.
pub fn pump<R: Read>(
    mut reader: R,
    quality: AudioQuality,
    producer: &StreamProducer,
    player: &LocalPlayer,
) -> io::Result<u64> {
    let chunk_len = quality.bytes_for_samples(READ_CHUNK_SAMPLES);
    let mut buf = vec![0u8; chunk_len];
    let started = Instant::now();
    let mut total: u64 = 0;

    let result = loop {
        let filled = match read_full(&mut reader, &mut buf) {
            Ok(0) => break Ok(total),
            Ok(n) => n,
            Err(e) => break Err(e),
        };
        if total == 0 {
            player.set_state(PlaybackState::Playing);
        }
        total += filled as u64;
        producer.on_audio_block(quality, Bytes::copy_from_slice(&buf[..filled]));

        // Files are read faster than real time; hold back to the audio clock
        let played = Duration::from_secs_f64(
            quality.samples_in(total as usize) as f64 / quality.sample_rate as f64,
        );
        if let Some(ahead) = played.checked_sub(started.elapsed()) {
            thread::sleep(ahead);
        }
    };

    player.set_state(PlaybackState::Paused);
    result
}

/// Fills `buf` unless the reader ends first. Returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tidecast_core::stream::PassthroughFactory;
    use tidecast_core::{Player, StreamingConfig, StreamingEngine};

    #[test]
    fn read_full_handles_short_reads() {
        struct Trickle(Cursor<Vec<u8>>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let len = buf.len().min(3);
                self.0.read(&mut buf[..len])
            }
        }

        let mut reader = Trickle(Cursor::new((0..10).collect()));
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 8);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn unusable_input_quality_is_refused_before_reading() {
        let player = Arc::new(LocalPlayer::new());
        let engine = StreamingEngine::start(
            &StreamingConfig::default(),
            player.clone(),
            Arc::new(PassthroughFactory),
        )
        .unwrap();

        for quality in [AudioQuality::new(0, 16, 2), AudioQuality::new(44_100, 8, 2)] {
            let err = spawn(Cursor::new(vec![0u8; 64]), quality, engine.producer(), player.clone())
                .unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
        assert_eq!(player.status().state, PlaybackState::Stopped);
    }

    #[test]
    fn pump_reports_playing_then_paused() {
        let player = Arc::new(LocalPlayer::new());
        let engine = StreamingEngine::start(
            &StreamingConfig::default(),
            player.clone(),
            Arc::new(PassthroughFactory),
        )
        .unwrap();

        let quality = AudioQuality::new(44_100, 16, 2);
        let input = Cursor::new(vec![0u8; 1408 * 3 + 100]);
        let bytes = pump(input, quality, &engine.producer(), &player).unwrap();

        assert_eq!(bytes, 1408 * 3 + 100);
        assert_eq!(player.status().state, PlaybackState::Paused);
    }

    #[test]
    fn empty_input_goes_straight_to_paused() {
        let player = LocalPlayer::new();
        let engine = StreamingEngine::start(
            &StreamingConfig::default(),
            Arc::new(LocalPlayer::new()),
            Arc::new(PassthroughFactory),
        )
        .unwrap();

        let producer = engine.producer();
        let bytes = pump(Cursor::new(Vec::new()), AudioQuality::broadcast(), &producer, &player).unwrap();
        assert_eq!(bytes, 0);
        assert_eq!(player.status().state, PlaybackState::Paused);
    }
}
