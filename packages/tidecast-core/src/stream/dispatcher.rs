//! Broadcast dispatcher.
//!
//! The dispatcher is the single owner of the encode pipeline and the shared
//! encoded buffer. Each tick it drains the producer channels (or, after a
//! quiet interval, substitutes silence while the player is paused), encodes,
//! refreshes the ICY title, and fans the encoded bytes out to every session.
//!
//! The tick handlers are plain methods so they can be driven directly; `run`
//! is the reactor loop used in production.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::EncodeError;
use crate::player::{PlaybackState, Player};

use super::{AudioQuality, EncodePipeline, IcyFormatter, IngestReceiver, SessionRegistry};

/// Cached ICY block for the current queue item.
struct TitleCache {
    block: Vec<u8>,
    /// Item the block was built for; `None` until first built.
    item: Option<Option<u32>>,
    /// Set when the player reported a change since the last check.
    stale: bool,
}

impl TitleCache {
    fn new() -> Self {
        Self {
            block: IcyFormatter::metadata_block(None),
            item: None,
            stale: true,
        }
    }
}

pub struct Dispatcher {
    pipeline: EncodePipeline,
    registry: Arc<SessionRegistry>,
    player: Arc<dyn Player>,
    /// Set by the playback listener, consumed each tick.
    player_dirty: Arc<AtomicBool>,
    title: TitleCache,
    silence_samples: u32,
    silence_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        pipeline: EncodePipeline,
        registry: Arc<SessionRegistry>,
        player: Arc<dyn Player>,
        player_dirty: Arc<AtomicBool>,
        silence_samples: u32,
        silence_interval: Duration,
    ) -> Self {
        Self {
            pipeline,
            registry,
            player,
            player_dirty,
            title: TitleCache::new(),
            silence_samples,
            silence_interval,
        }
    }

    /// Renegotiates the pipeline for a new input quality.
    ///
    /// A format the pipeline cannot handle ends every session.
    pub fn on_quality(&mut self, quality: AudioQuality) {
        if self.pipeline.negotiate(quality).is_err() {
            let ended = self.registry.force_end_all();
            log::error!(
                "[Dispatcher] Input {} cannot be streamed, ended {} session(s)",
                quality,
                ended
            );
        }
    }

    /// Encodes one chunk of raw PCM.
    ///
    /// Failures only drop this chunk.
    pub fn on_ingest(&mut self, chunk: &[u8]) {
        match self.pipeline.encode(chunk) {
            Ok(_) => {}
            Err(EncodeError::Codec(e)) => {
                log::warn!("[Dispatcher] Dropping {} byte chunk: {}", chunk.len(), e)
            }
            Err(e) => log::trace!("[Dispatcher] Dropping {} byte chunk: {}", chunk.len(), e),
        }
    }

    /// Drains both channels without waiting.
    ///
    /// Pending quality changes are always applied before the next audio
    /// chunk is encoded. Returns the number of audio chunks read.
    pub fn drain(&mut self, rx: &mut IngestReceiver) -> usize {
        let mut chunks = 0;
        loop {
            while let Ok(quality) = rx.quality.try_recv() {
                self.on_quality(quality);
            }
            match rx.audio.try_recv() {
                Ok(chunk) => {
                    self.on_ingest(&chunk);
                    chunks += 1;
                }
                Err(_) => break,
            }
        }
        chunks
    }

    /// No fresh audio arrived within the silence interval.
    ///
    /// While the player is paused a silence frame is encoded so listeners keep
    /// receiving data.
    pub fn on_timeout(&mut self) {
        let status = self.player.status();
        if status.state != PlaybackState::Paused {
            return;
        }

        let quality = self.pipeline.quality();
        if quality.is_unknown() {
            return;
        }
        log::trace!("[Dispatcher] Player paused, injecting silence");
        let silence: Bytes = quality.silence_frame(self.silence_samples);
        self.on_ingest(&silence);
    }

    /// Rebuilds the ICY title if the playing item changed while someone
    /// listens with metadata.
    pub fn refresh_title(&mut self) {
        if self.player_dirty.swap(false, Ordering::AcqRel) {
            self.title.stale = true;
        }
        if !self.title.stale || self.registry.icy_count() == 0 {
            return;
        }
        self.title.stale = false;

        let item_id = self.player.status().item_id;
        if self.title.item == Some(item_id) {
            return;
        }

        let title = item_id
            .and_then(|id| self.player.queue_item(id))
            .map(|item| IcyFormatter::display_title(&item));
        log::debug!("[Icy] Title for item {:?}: {:?}", item_id, title);

        self.title.block = IcyFormatter::metadata_block(title.as_deref());
        self.title.item = Some(item_id);
    }

    /// Sends everything encoded so far to every session and empties the
    /// shared buffer.
    pub fn fan_out(&mut self) -> usize {
        if self.pipeline.encoded_len() == 0 {
            return 0;
        }
        let raw = self.pipeline.take_encoded();
        self.registry.fan_out(&raw, &self.title.block)
    }

    /// Called while disarmed: nothing from before the gap may reach
    /// listeners who join later.
    pub fn on_disarm(&mut self, rx: &mut IngestReceiver) {
        self.pipeline.clear_encoded();
        // A session may have joined since the disarm was observed
        if let Some(dropped) = self.registry.if_empty(|| rx.discard_audio()) {
            if dropped > 0 {
                log::debug!("[Dispatcher] Discarded {} stale chunk(s)", dropped);
            }
        }
    }

    /// Current ICY block.
    pub fn title_block(&self) -> &[u8] {
        &self.title.block
    }

    /// Encoded bytes waiting for fan-out.
    pub fn pending_len(&self) -> usize {
        self.pipeline.encoded_len()
    }

    /// Runs the dispatcher until `cancel` fires.
    ///
    /// While armed, waits for a quality change, ingest data, or the silence
    /// interval to elapse. While disarmed, only waits to be armed again.
    pub async fn run(
        mut self,
        mut rx: IngestReceiver,
        mut armed: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) {
        log::info!("[Dispatcher] Started");

        loop {
            if !*armed.borrow_and_update() {
                self.on_disarm(&mut rx);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = armed.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(quality) = rx.quality.recv() => {
                    self.on_quality(quality);
                    self.drain(&mut rx);
                }
                Some(chunk) = rx.audio.recv() => {
                    self.on_ingest(&chunk);
                    self.drain(&mut rx);
                }
                changed = armed.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(self.silence_interval) => {
                    self.on_timeout();
                }
            }

            self.refresh_title();
            self.fan_out();
        }

        self.pipeline.release();
        log::info!("[Dispatcher] Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{LocalPlayer, QueueItem};
    use crate::state::StreamingConfig;
    use crate::stream::session::tests::RecordingConnection;
    use crate::stream::{stream_channels, PassthroughFactory, StreamProducer, ICY_METAINT};

    struct Harness {
        dispatcher: Dispatcher,
        registry: Arc<SessionRegistry>,
        player: Arc<LocalPlayer>,
        dirty: Arc<AtomicBool>,
        not_supported: Arc<AtomicBool>,
        producer: StreamProducer,
        rx: IngestReceiver,
    }

    fn harness() -> Harness {
        let registry = Arc::new(SessionRegistry::new());
        let player = Arc::new(LocalPlayer::new());
        let dirty = Arc::new(AtomicBool::new(false));
        let not_supported = Arc::new(AtomicBool::new(false));
        let pipeline = EncodePipeline::new(
            Arc::new(PassthroughFactory),
            AudioQuality::broadcast(),
            Arc::clone(&not_supported),
        );
        let (producer, rx) = stream_channels(&StreamingConfig::default(), registry.active_counter());
        let dispatcher = Dispatcher::new(
            pipeline,
            Arc::clone(&registry),
            player.clone(),
            Arc::clone(&dirty),
            352,
            Duration::from_millis(1000),
        );
        Harness {
            dispatcher,
            registry,
            player,
            dirty,
            not_supported,
            producer,
            rx,
        }
    }

    fn cd() -> AudioQuality {
        AudioQuality::new(44_100, 16, 2)
    }

    #[test]
    fn drained_audio_reaches_plain_session_unchanged() {
        let mut h = harness();
        let listener = RecordingConnection::arc();
        h.registry.insert(listener.clone(), false);

        h.producer.on_audio_block(cd(), Bytes::from_static(&[1, 2, 3, 4]));
        h.producer.on_audio_block(cd(), Bytes::from_static(&[5, 6, 7, 8]));
        assert_eq!(h.dispatcher.drain(&mut h.rx), 2);
        h.dispatcher.fan_out();

        assert_eq!(listener.received(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(h.dispatcher.pending_len(), 0);
    }

    #[test]
    fn audio_before_negotiation_is_dropped() {
        let mut h = harness();
        let listener = RecordingConnection::arc();
        h.registry.insert(listener.clone(), false);

        h.dispatcher.on_ingest(&[1, 2, 3, 4]);
        assert_eq!(h.dispatcher.fan_out(), 0);
        assert!(listener.received().is_empty());
    }

    #[test]
    fn unsupported_quality_ends_every_session() {
        let mut h = harness();
        let listeners: Vec<_> = (0..3).map(|_| RecordingConnection::arc()).collect();
        for l in &listeners {
            h.registry.insert(l.clone(), true);
        }

        h.dispatcher.on_quality(AudioQuality::new(44_100, 8, 2));

        assert!(h.not_supported.load(Ordering::SeqCst));
        assert!(h.registry.is_empty());
        assert!(listeners.iter().all(|l| l.end_calls() == 1));
    }

    #[test]
    fn paused_timeout_injects_silence() {
        let mut h = harness();
        let listener = RecordingConnection::arc();
        h.registry.insert(listener.clone(), false);
        h.dispatcher.on_quality(cd());

        h.player.set_state(PlaybackState::Playing);
        h.dispatcher.on_timeout();
        assert_eq!(h.dispatcher.fan_out(), 0);

        h.player.set_state(PlaybackState::Paused);
        h.dispatcher.on_timeout();
        h.dispatcher.fan_out();
        let received = listener.received();
        assert_eq!(received.len(), 1408);
        assert!(received.iter().all(|&b| b == 0));
    }

    #[test]
    fn silence_uses_negotiated_input_quality() {
        let mut h = harness();
        h.registry.insert(RecordingConnection::arc(), false);
        h.dispatcher.on_quality(AudioQuality::new(48_000, 24, 1));
        h.player.set_state(PlaybackState::Paused);

        h.dispatcher.on_timeout();
        assert_eq!(h.dispatcher.pending_len(), 352 * 3);
    }

    #[test]
    fn title_follows_playing_item_for_icy_sessions() {
        let mut h = harness();
        h.player.set_queue_item(
            1,
            QueueItem {
                title: "Song".into(),
                artist: "Band".into(),
            },
        );
        h.player.set_current_item(Some(1));
        h.dirty.store(true, Ordering::SeqCst);

        // No ICY listener: title work is skipped
        h.registry.insert(RecordingConnection::arc(), false);
        h.dispatcher.refresh_title();
        assert_eq!(h.dispatcher.title_block(), &[0]);

        h.registry.insert(RecordingConnection::arc(), true);
        h.dispatcher.refresh_title();
        assert_eq!(h.dispatcher.title_block().len(), 33);

        h.player.set_current_item(Some(99));
        h.dirty.store(true, Ordering::SeqCst);
        h.dispatcher.refresh_title();
        assert_eq!(h.dispatcher.title_block(), &[0]);
    }

    #[test]
    fn icy_session_gets_block_every_metaint_bytes() {
        let mut h = harness();
        let listener = RecordingConnection::arc();
        h.registry.insert(listener.clone(), true);
        h.dispatcher.on_quality(cd());

        // 12 chunks of 1408 bytes = 16896 raw bytes, two boundaries
        let chunk: Vec<u8> = vec![0x55; 1408];
        for _ in 0..12 {
            h.dispatcher.on_ingest(&chunk);
            h.dispatcher.fan_out();
        }

        let received = listener.received();
        assert_eq!(received.len(), 16_896 + 2);
        assert_eq!(received[ICY_METAINT], 0);
        assert_eq!(received[2 * ICY_METAINT + 1], 0);
    }

    #[test]
    fn disarm_discards_stale_audio_but_keeps_quality() {
        let mut h = harness();
        let id = h.registry.insert(RecordingConnection::arc(), false);
        h.producer.on_audio_block(cd(), Bytes::from_static(&[9; 8]));
        h.dispatcher.on_quality(AudioQuality::new(48_000, 16, 2));
        h.dispatcher.on_ingest(&[1; 8]);
        h.registry.remove(id);

        h.dispatcher.on_disarm(&mut h.rx);

        assert_eq!(h.dispatcher.pending_len(), 0);
        assert!(h.rx.audio.try_recv().is_err());
        assert_eq!(h.rx.quality.try_recv().unwrap(), cd());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_streams_until_cancelled() {
        let h = harness();
        let cancel = CancellationToken::new();
        let armed = h.registry.subscribe_armed();
        let task = tokio::spawn(h.dispatcher.run(h.rx, armed, cancel.clone()));

        let listener = RecordingConnection::arc();
        h.registry.insert(listener.clone(), false);
        h.producer.on_audio_block(cd(), Bytes::from_static(&[1, 2, 3, 4]));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(listener.received(), vec![1, 2, 3, 4]);

        // Paused player keeps the stream alive with silence
        h.player.set_state(PlaybackState::Paused);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(listener.received().len(), 4 + 1408);

        cancel.cancel();
        task.await.unwrap();
    }
}
