//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external conventions (ICY/Shoutcast, the MP3
//! broadcast format listeners expect) and changing them would break clients.

// ─────────────────────────────────────────────────────────────────────────────
// Broadcast Audio Format
// ─────────────────────────────────────────────────────────────────────────────

/// Sample rate of the broadcast MP3 stream (Hz).
pub const BROADCAST_SAMPLE_RATE: u32 = 44_100;

/// Bit depth the encoder is fed with.
pub const BROADCAST_BITS_PER_SAMPLE: u16 = 16;

/// Channel count of the broadcast MP3 stream.
pub const BROADCAST_CHANNELS: u16 = 2;

/// Input bit depths the PCM decoder accepts.
pub const SUPPORTED_BITS_PER_SAMPLE: [u16; 3] = [16, 24, 32];

/// Samples per channel in one nominal read chunk.
///
/// Also the size of a synthesized silence frame.
pub const READ_CHUNK_SAMPLES: u32 = 352;

// ─────────────────────────────────────────────────────────────────────────────
// ICY Protocol (Shoutcast/Icecast metadata)
// ─────────────────────────────────────────────────────────────────────────────

/// ICY metadata interval (audio bytes between metadata blocks).
///
/// Advertised to clients in the `icy-metaint` response header.
pub const ICY_METAINT: usize = 8192;

/// Maximum metadata payload (255 words of 16 bytes).
pub const ICY_METALEN_MAX: usize = 4080;

/// Size of one metadata length unit.
pub const ICY_BLOCK_UNIT: usize = 16;

/// Prefix of the metadata payload.
pub const ICY_TITLE_HEAD: &str = "StreamTitle='";

/// Suffix of the metadata payload.
pub const ICY_TITLE_TAIL: &str = "';";

/// Request header a client sets to `1` to ask for in-band metadata.
pub const ICY_REQUEST_HEADER: &str = "icy-metadata";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// Last path segment that identifies a listener stream request.
pub const STREAM_PATH_SUFFIX: &str = "/stream.mp3";

/// MIME type of the broadcast stream.
pub const STREAM_CONTENT_TYPE: &str = "audio/mpeg";

/// Fixed `Expires` header value, always in the past so nothing is cached.
pub const STREAM_EXPIRES: &str = "Mon, 31 Aug 2015 06:00:00 GMT";

/// Methods advertised in `Access-Control-Allow-Methods`.
pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Product name used in the `Server` header.
pub const APP_NAME: &str = "tidecast";

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "tidecast-stream";

/// Value of the `Server` response header.
#[must_use]
pub fn server_header() -> String {
    format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION"))
}
