//! Tidecast Core - live MP3 broadcast of a media player's output.
//!
//! This crate turns the PCM a player produces into one continuous MP3 stream
//! served over HTTP to any number of listeners, with optional in-band ICY
//! "now playing" metadata.
//!
//! # Architecture
//!
//! - [`stream`]: Quality negotiation, encoding, ICY splicing, session
//!   registry, producer channels and the broadcast dispatcher
//! - [`engine`]: Engine lifecycle and listener sessions
//! - [`streaming_runtime`]: Dedicated thread the dispatcher runs on
//! - [`player`]: Player collaborator interface
//! - [`api`]: HTTP entry point
//! - [`state`]: Configuration
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`Player`](player::Player): Playback status, queue metadata and change
//!   notification
//! - [`EncoderFactory`](stream::EncoderFactory) /
//!   [`AudioEncoder`](stream::AudioEncoder): The codec
//! - [`StreamConnection`](stream::StreamConnection): A listener's reply body

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod engine;
pub mod error;
pub mod player;
pub mod protocol_constants;
pub mod state;
pub mod stream;
pub mod streaming_runtime;

// Re-export commonly used types at the crate root
pub use error::{ErrorCode, RejectReason, TidecastError, TidecastResult};
pub use state::{Config, StreamingConfig};

// Re-export engine types
pub use engine::{is_stream_request, EngineStats, SessionHandle, StreamingEngine};

// Re-export player types
pub use player::{LocalPlayer, PlaybackState, Player, PlayerStatus, QueueItem};

// Re-export stream types
pub use stream::{AudioQuality, EncoderFactory, LameEncoderFactory, StreamProducer};

// Re-export streaming runtime
pub use streaming_runtime::StreamingRuntime;

// Re-export API types
pub use api::{start_server, AppState, ServerError};
