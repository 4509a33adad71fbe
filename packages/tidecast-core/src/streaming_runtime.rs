//! Dedicated runtime for the broadcast dispatcher.
//!
//! The dispatcher owns the encode buffer and the session fan-out, and that
//! work must never run in parallel with itself. It therefore gets its own OS
//! thread driving a current-thread Tokio executor, separate from the runtime
//! that serves HTTP. Encoding on this thread also keeps CPU-heavy codec work
//! off the connection-handling workers.

use std::future::Future;
use std::thread::{self, JoinHandle};

use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;

/// Name of the dispatcher thread.
const DISPATCH_THREAD_NAME: &str = "streaming-dispatch";

/// A single-threaded runtime on a dedicated OS thread.
pub struct StreamingRuntime {
    /// Handle to spawn tasks on the runtime.
    handle: Handle,
    /// Cancellation token for graceful shutdown.
    cancel: CancellationToken,
    /// Thread join handle for cleanup (None after shutdown).
    thread: Option<JoinHandle<()>>,
}

impl StreamingRuntime {
    /// Starts the runtime thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built or the thread fails to
    /// spawn.
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        let handle = runtime.handle().clone();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let thread = thread::Builder::new()
            .name(DISPATCH_THREAD_NAME.into())
            .spawn(move || {
                // Drives every task spawned through the handle until shutdown
                runtime.block_on(async {
                    cancel_clone.cancelled().await;
                    log::info!("[Engine] Streaming runtime shutting down");
                });
            })?;

        log::info!("[Engine] Streaming runtime started on '{}'", DISPATCH_THREAD_NAME);

        Ok(Self {
            handle,
            cancel,
            thread: Some(thread),
        })
    }

    /// Token cancelled when the runtime shuts down.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Spawns a future on the runtime.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Stops the runtime and waits for its thread to exit.
    ///
    /// Tasks still running are dropped.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();

        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                log::error!("[Engine] Streaming runtime thread panicked: {:?}", e);
            } else {
                log::info!("[Engine] Streaming runtime shutdown complete");
            }
        }
    }

    /// Returns `true` until [`shutdown`](Self::shutdown) has run.
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for StreamingRuntime {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}
