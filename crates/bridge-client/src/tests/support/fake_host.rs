//! Scripted host used by the client tests.
//!
//! Accepts connections on an ephemeral loopback port, records every decoded
//! command and answers each one with the next scripted [`Reply`].

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use bridge_config::SocketEndpoint;
use bridge_protocol::{FrameBuffer, FrameStatus};

const POLL: Duration = Duration::from_millis(10);

/// How the fake host answers one command.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Writes `value` as one frame.
    Json(Value),
    /// Writes raw bytes.
    Raw(Vec<u8>),
    /// Writes each chunk separately with `delay` in between.
    Chunks(Vec<Vec<u8>>, Duration),
    /// Closes the connection without answering.
    Hangup,
    /// Keeps the connection open without answering for `Duration`.
    Stall(Duration),
    /// Writes the bytes to the request's `filepath` and reports success.
    Screenshot(Vec<u8>),
}

impl Reply {
    pub(crate) fn success(result: Value) -> Self {
        Self::Json(json!({"status": "success", "result": result}))
    }

    pub(crate) fn error(message: &str) -> Self {
        Self::Json(json!({"status": "error", "message": message}))
    }
}

#[derive(Default)]
struct Shared {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Value>>,
    connections: AtomicUsize,
    stop: AtomicBool,
}

/// Loopback host answering from a script.
pub(crate) struct FakeHost {
    port: u16,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl FakeHost {
    pub(crate) fn spawn(replies: impl IntoIterator<Item = Reply>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind fake host")?;
        listener
            .set_nonblocking(true)
            .context("fake host nonblocking")?;
        let port = listener.local_addr().context("local addr")?.port();
        let shared = Arc::new(Shared {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Shared::default()
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || accept_loop(&listener, &thread_shared));
        Ok(Self {
            port,
            shared,
            handle: Some(handle),
        })
    }

    pub(crate) fn endpoint(&self) -> SocketEndpoint {
        SocketEndpoint::tcp("127.0.0.1", self.port)
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn push(&self, reply: Reply) {
        self.shared
            .replies
            .lock()
            .expect("lock replies")
            .push_back(reply);
    }

    /// Commands decoded so far, in arrival order.
    pub(crate) fn requests(&self) -> Vec<Value> {
        self.shared.requests.lock().expect("lock requests").clone()
    }

    /// Command types decoded so far, in arrival order.
    pub(crate) fn request_types(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|request| request["type"].as_str().map(str::to_owned))
            .collect()
    }

    /// Number of connections accepted so far.
    pub(crate) fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeHost {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

fn accept_loop(listener: &TcpListener, shared: &Shared) {
    while !shared.stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                shared.connections.fetch_add(1, Ordering::SeqCst);
                serve(stream, shared).ok();
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL),
            Err(_) => return,
        }
    }
}

fn serve(mut stream: TcpStream, shared: &Shared) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(POLL * 10))?;
    let mut frames = FrameBuffer::new();
    let mut chunk = [0_u8; 4096];
    loop {
        if shared.stop.load(Ordering::SeqCst) {
            return Ok(());
        }
        let read = match stream.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(error) => return Err(error),
        };
        let FrameStatus::Complete(request) = frames.push(&chunk[..read]) else {
            continue;
        };
        shared
            .requests
            .lock()
            .expect("lock requests")
            .push(request);
        let reply = shared.replies.lock().expect("lock replies").pop_front();
        let filepath = request_filepath(shared);
        match reply {
            Some(Reply::Json(value)) => {
                stream.write_all(&serde_json::to_vec(&value)?)?;
                stream.flush()?;
            }
            Some(Reply::Raw(bytes)) => {
                stream.write_all(&bytes)?;
                stream.flush()?;
            }
            Some(Reply::Chunks(chunks, delay)) => {
                for part in chunks {
                    stream.write_all(&part)?;
                    stream.flush()?;
                    thread::sleep(delay);
                }
            }
            Some(Reply::Stall(duration)) => thread::sleep(duration),
            Some(Reply::Screenshot(image)) => {
                if let Some(path) = filepath {
                    fs::write(&path, image)?;
                }
                let reply = json!({"status": "success", "result": {"success": true, "width": 4, "height": 4}});
                stream.write_all(&serde_json::to_vec(&reply)?)?;
                stream.flush()?;
            }
            Some(Reply::Hangup) | None => return Ok(()),
        }
    }
}

fn request_filepath(shared: &Shared) -> Option<String> {
    shared
        .requests
        .lock()
        .expect("lock requests")
        .last()
        .and_then(|request| request["params"]["filepath"].as_str().map(str::to_owned))
}
