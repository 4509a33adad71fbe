//! Listener connection backed by an HTTP response body.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::DeliveryError;
use crate::stream::StreamConnection;

/// Feeds an axum streaming body through an unbounded channel.
///
/// The channel is unbounded so a slow reader never causes the dispatcher to
/// drop part of a spliced chunk, which would break ICY alignment. Pacing is
/// left to the transport.
///
/// Memory is bounded only by the transport closing the connection: a client
/// that stops reading but keeps the socket open makes the queue grow until
/// the peer times out or disconnects.
pub struct ChannelConnection {
    peer: SocketAddr,
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    ended: AtomicBool,
}

impl ChannelConnection {
    /// Creates a connection and the receiver that becomes the response body.
    pub fn new(peer: SocketAddr) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            peer,
            tx: Mutex::new(Some(tx)),
            ended: AtomicBool::new(false),
        });
        (connection, rx)
    }
}

impl StreamConnection for ChannelConnection {
    fn peer(&self) -> String {
        self.peer.to_string()
    }

    fn send_chunk(&self, chunk: Bytes) -> Result<(), DeliveryError> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(chunk).map_err(|_| DeliveryError::Closed),
            None => Err(DeliveryError::Closed),
        }
    }

    fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
        // Dropping the sender finishes the body once queued chunks are read
        self.tx.lock().take();
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}
