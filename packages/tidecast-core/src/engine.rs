//! Streaming engine lifecycle.
//!
//! [`StreamingEngine`] ties the pieces together: it creates the producer
//! channels and the session registry, subscribes to the player, and runs the
//! dispatcher on its own [`StreamingRuntime`]. Listener sessions are started
//! and ended through it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{RejectReason, TidecastError, TidecastResult};
use crate::player::{ListenerId, Player};
use crate::protocol_constants::STREAM_PATH_SUFFIX;
use crate::state::StreamingConfig;
use crate::stream::{
    stream_channels, AudioQuality, Dispatcher, EncodePipeline, EncoderFactory, SessionId,
    SessionRegistry, StreamConnection, StreamProducer,
};
use crate::streaming_runtime::StreamingRuntime;

/// Returns `true` if `path` addresses the broadcast stream.
///
/// Matches the final path segment case-insensitively.
pub fn is_stream_request(path: &str) -> bool {
    path.len()
        .checked_sub(STREAM_PATH_SUFFIX.len())
        .and_then(|start| path.get(start..))
        .is_some_and(|tail| tail.eq_ignore_ascii_case(STREAM_PATH_SUFFIX))
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub sessions: usize,
    pub icy_listeners: usize,
    pub not_supported: bool,
    pub armed: bool,
}

/// State reachable from session handles.
struct EngineShared {
    registry: Arc<SessionRegistry>,
    not_supported: Arc<AtomicBool>,
    stopped: AtomicBool,
}

impl EngineShared {
    fn end_session(&self, id: SessionId) -> bool {
        match self.registry.remove(id) {
            Some(session) => {
                log::info!(
                    "[Engine] Session {} ended ({}), {} remaining",
                    id,
                    session.connection.peer(),
                    self.registry.len()
                );
                true
            }
            None => {
                log::error!("[Engine] Close for unknown session {}", id);
                false
            }
        }
    }
}

/// Ties one listener's reply body to its registry entry.
///
/// Dropping the handle is the close notification: unless the engine already
/// ended the connection, the session is removed from the registry.
pub struct SessionHandle {
    id: SessionId,
    connection: Arc<dyn StreamConnection>,
    engine: Weak<EngineShared>,
    bytes_sent: u64,
    started: Instant,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Records a chunk handed to the transport.
    pub fn record_chunk(&mut self, len: usize) {
        self.bytes_sent += len as u64;
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        log::debug!(
            "[Engine] Session {} closed after {:.1}s, {} bytes",
            self.id,
            self.started.elapsed().as_secs_f64(),
            self.bytes_sent
        );

        if self.connection.is_ended() {
            // Ended by the engine, already out of the registry
            return;
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.end_session(self.id);
        }
    }
}

/// The broadcast streaming engine.
pub struct StreamingEngine {
    shared: Arc<EngineShared>,
    producer: Arc<StreamProducer>,
    player: Arc<dyn Player>,
    listener: ListenerId,
    runtime: Mutex<Option<StreamingRuntime>>,
}

impl StreamingEngine {
    /// Creates the channels and registry, subscribes to the player and starts
    /// the dispatcher.
    pub fn start(
        config: &StreamingConfig,
        player: Arc<dyn Player>,
        factory: Arc<dyn EncoderFactory>,
    ) -> TidecastResult<Self> {
        config.validate().map_err(TidecastError::Configuration)?;

        let registry = Arc::new(SessionRegistry::new());
        let not_supported = Arc::new(AtomicBool::new(false));
        let (producer, rx) = stream_channels(config, registry.active_counter());

        let runtime = StreamingRuntime::new()
            .map_err(|e| TidecastError::Internal(format!("streaming runtime: {}", e)))?;

        // Title is built on the first tick that has an ICY listener
        let player_dirty = Arc::new(AtomicBool::new(true));
        let dirty = Arc::clone(&player_dirty);
        let listener = player.subscribe(Arc::new(move || dirty.store(true, Ordering::Release)));

        let pipeline = EncodePipeline::new(
            factory,
            AudioQuality::broadcast(),
            Arc::clone(&not_supported),
        );
        let dispatcher = Dispatcher::new(
            pipeline,
            Arc::clone(&registry),
            Arc::clone(&player),
            player_dirty,
            config.silence_frame_samples,
            Duration::from_millis(config.silence_interval_ms),
        );
        runtime.spawn(dispatcher.run(rx, registry.subscribe_armed(), runtime.child_token()));

        log::info!(
            "[Engine] Started: broadcast {}, {} kbps",
            AudioQuality::broadcast(),
            config.bitrate_kbps
        );

        Ok(Self {
            shared: Arc::new(EngineShared {
                registry,
                not_supported,
                stopped: AtomicBool::new(false),
            }),
            producer: Arc::new(producer),
            player,
            listener,
            runtime: Mutex::new(Some(runtime)),
        })
    }

    /// Registers a listener.
    ///
    /// Fails with [`RejectReason::NotSupported`] while the input format
    /// cannot be broadcast.
    pub fn start_session(
        &self,
        connection: Arc<dyn StreamConnection>,
        wants_metadata: bool,
    ) -> Result<SessionHandle, RejectReason> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(RejectReason::EngineStopped);
        }
        // Checked under the registry lock so a concurrent force-end cannot miss it
        let Some(id) = self.shared.registry.insert_unless(
            &self.shared.not_supported,
            Arc::clone(&connection),
            wants_metadata,
        ) else {
            log::warn!(
                "[Engine] Rejecting {}: input format not supported",
                connection.peer()
            );
            return Err(RejectReason::NotSupported);
        };
        log::info!(
            "[Engine] Session {} started ({}, icy={}), {} active",
            id,
            connection.peer(),
            wants_metadata,
            self.shared.registry.len()
        );

        Ok(SessionHandle {
            id,
            connection,
            engine: Arc::downgrade(&self.shared),
            bytes_sent: 0,
            started: Instant::now(),
        })
    }

    /// Removes a session after its connection closed.
    ///
    /// Returns `false` (and logs) if the session is not registered.
    pub fn end_session(&self, id: SessionId) -> bool {
        self.shared.end_session(id)
    }

    /// Ends every session and disarms the dispatcher.
    ///
    /// The dispatcher drops its encoded buffer on disarm. Returns the number
    /// of sessions ended.
    pub fn shutdown(&self) -> usize {
        let ended = self.shared.registry.force_end_all();
        if ended > 0 {
            log::info!("[Engine] Shutdown ended {} session(s)", ended);
        }
        ended
    }

    /// Stops the engine: ends sessions, unsubscribes from the player and
    /// stops the dispatcher, releasing the encoder.
    ///
    /// Only the first call has any effect.
    pub fn stop(&self) {
        if self
            .shared
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.shutdown();
        self.player.unsubscribe(self.listener);
        if let Some(mut runtime) = self.runtime.lock().take() {
            runtime.shutdown();
        }
        log::info!("[Engine] Stopped");
    }

    /// Player-facing producer.
    pub fn producer(&self) -> Arc<StreamProducer> {
        Arc::clone(&self.producer)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> EngineStats {
        let registry = &self.shared.registry;
        EngineStats {
            sessions: registry.len(),
            icy_listeners: registry.icy_count(),
            not_supported: self.shared.not_supported.load(Ordering::SeqCst),
            armed: registry.is_armed(),
        }
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
