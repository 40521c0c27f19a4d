//! Per-client frame handling.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::{debug, info, warn};

use bridge_config::RECEIVE_CHUNK_BYTES;
use bridge_protocol::{Envelope, FrameBuffer, FrameStatus, encode};

use super::LISTENER_TARGET;
use crate::dispatch::Dispatcher;
use crate::main_loop::MainLoopHandle;

/// Handles accepted socket connections.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Serves one client until it disconnects. Implementations should avoid
    /// panicking.
    fn handle(&self, stream: TcpStream);
}

/// Decodes command frames and defers their execution onto the main loop.
///
/// Frames from one client are scheduled in decode order. The deferred work
/// dispatches the command, then writes the encoded envelope back on the same
/// socket from the main loop thread.
pub(crate) struct CommandConnectionHandler {
    dispatcher: Dispatcher,
    main_loop: MainLoopHandle,
    running: Arc<AtomicBool>,
}

impl CommandConnectionHandler {
    pub(crate) const fn new(
        dispatcher: Dispatcher,
        main_loop: MainLoopHandle,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            dispatcher,
            main_loop,
            running,
        }
    }

    fn serve(&self, stream: &Arc<TcpStream>) {
        let mut buffer = FrameBuffer::new();
        let mut chunk = vec![0_u8; RECEIVE_CHUNK_BYTES];
        while self.running.load(Ordering::SeqCst) {
            let read = match read_chunk_with_retry(stream, &mut chunk) {
                Ok(0) => {
                    info!(target: LISTENER_TARGET, "client disconnected");
                    return;
                }
                Ok(read) => read,
                Err(error) => {
                    warn!(target: LISTENER_TARGET, error = %error, "error receiving data");
                    return;
                }
            };
            match buffer.push(chunk.get(..read).unwrap_or_default()) {
                FrameStatus::Complete(frame) => {
                    if !self.schedule(frame, Arc::clone(stream)) {
                        return;
                    }
                }
                FrameStatus::Incomplete => {}
                FrameStatus::Malformed(error) => {
                    debug!(
                        target: LISTENER_TARGET,
                        bytes = buffer.len(),
                        error = %error,
                        "buffered bytes do not parse yet"
                    );
                }
            }
        }
        debug!(target: LISTENER_TARGET, "server stopping; leaving client handler");
    }

    fn schedule(&self, frame: Value, stream: Arc<TcpStream>) -> bool {
        let dispatcher = self.dispatcher.clone();
        let deferred = self.main_loop.defer(move || {
            let envelope = dispatcher.dispatch_value(frame);
            respond(&stream, &envelope);
        });
        match deferred {
            Ok(()) => true,
            Err(error) => {
                warn!(target: LISTENER_TARGET, error = %error, "dropping command");
                false
            }
        }
    }
}

impl ConnectionHandler for CommandConnectionHandler {
    fn handle(&self, stream: TcpStream) {
        info!(target: LISTENER_TARGET, "client handler started");
        let stream = Arc::new(stream);
        self.serve(&stream);
        if let Err(error) = stream.shutdown(Shutdown::Both) {
            debug!(target: LISTENER_TARGET, error = %error, "client socket already closed");
        }
        info!(target: LISTENER_TARGET, "client handler stopped");
    }
}

/// Writes `envelope` to the client, falling back to an error envelope when
/// the result cannot be encoded. Write failures are logged and dropped.
fn respond(stream: &TcpStream, envelope: &Envelope) {
    let bytes = match encode(envelope) {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(target: LISTENER_TARGET, error = %error, "failed to encode response");
            match encode(&Envelope::error(error.to_string())) {
                Ok(bytes) => bytes,
                Err(_) => return,
            }
        }
    };
    let mut writer = stream;
    if let Err(error) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
        warn!(target: LISTENER_TARGET, error = %error, "failed to send response");
    }
}

fn read_chunk_with_retry(stream: &TcpStream, chunk: &mut [u8]) -> io::Result<usize> {
    let mut reader = stream;
    loop {
        match reader.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
}
