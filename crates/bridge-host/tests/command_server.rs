//! End-to-end behaviour of the command server over loopback TCP.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use rstest::{fixture, rstest};
use serde::Deserialize;
use serde_json::{Value, json};

use bridge_config::{Feature, FeatureFlags, SocketEndpoint};
use bridge_host::{
    CommandServer, Dispatcher, HandlerError, InMemoryScene, Integrations, MainLoop,
    STOP_JOIN_BUDGET, ServerError, handler_fn, standard_registry,
};
use bridge_protocol::{Envelope, FrameBuffer, FrameStatus};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct RecordParams {
    label: String,
}

/// A running server whose main loop is serviced on a background thread.
struct HostWorld {
    server: CommandServer,
    flags: FeatureFlags,
    journal: Arc<Mutex<Vec<String>>>,
    stop_loop: Arc<AtomicBool>,
    loop_thread: Option<JoinHandle<()>>,
}

impl HostWorld {
    fn start() -> Self {
        let flags = FeatureFlags::new();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry =
            standard_registry(InMemoryScene::starter(), Integrations::in_memory(), &flags);

        let record_journal = Arc::clone(&journal);
        registry.register(
            "record",
            handler_fn(move |params: RecordParams| {
                record_journal
                    .lock()
                    .expect("journal lock")
                    .push(params.label.clone());
                Ok::<_, HandlerError>(json!({"recorded": params.label}))
            }),
        );
        registry.register(
            "fail",
            handler_fn(|_: Value| Err::<Value, _>(HandlerError::failed("boom"))),
        );
        registry.register(
            "explode",
            handler_fn(|_: Value| -> Result<Value, HandlerError> { panic!("kaboom") }),
        );
        registry.register(
            "stall",
            handler_fn(|_: Value| {
                thread::sleep(Duration::from_millis(300));
                Ok::<_, HandlerError>(json!({"stalled": true}))
            }),
        );

        let main_loop = MainLoop::new();
        let dispatcher = Dispatcher::new(registry, flags.clone());
        let server = CommandServer::new(
            SocketEndpoint::tcp("127.0.0.1", 0),
            dispatcher,
            main_loop.handle(),
        );
        server.start().expect("start server");

        let stop_loop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop_loop);
        let loop_thread = thread::spawn(move || main_loop.run_until(&loop_stop));

        Self {
            server,
            flags,
            journal,
            stop_loop,
            loop_thread: Some(loop_thread),
        }
    }

    fn addr(&self) -> SocketAddr {
        self.server.local_addr().expect("server bound")
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr()).expect("connect");
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("set read timeout");
        stream
    }
}

impl Drop for HostWorld {
    fn drop(&mut self) {
        self.server.stop();
        self.stop_loop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.loop_thread.take() {
            handle.join().expect("main loop thread");
        }
    }
}

#[fixture]
fn world() -> HostWorld {
    HostWorld::start()
}

fn send(stream: &mut TcpStream, command: &Value) -> Result<Envelope> {
    stream.write_all(&serde_json::to_vec(command)?)?;
    read_envelope(stream)
}

fn read_envelope(stream: &mut TcpStream) -> Result<Envelope> {
    let mut frames = FrameBuffer::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let read = stream.read(&mut chunk).context("read response")?;
        if read == 0 {
            bail!("connection closed before a response arrived");
        }
        let bytes = chunk.get(..read).context("chunk bounds")?;
        if let FrameStatus::Complete(value) = frames.push(bytes) {
            return Ok(serde_json::from_value(value)?);
        }
    }
}

#[rstest]
fn scene_info_round_trips(world: HostWorld) -> Result<()> {
    let mut stream = world.connect();
    let envelope = send(&mut stream, &json!({"type": "get_scene_info", "params": {}}))?;
    let result = envelope.into_result().map_err(anyhow::Error::msg)?;
    assert_eq!(result["name"], json!("Scene"));
    assert_eq!(result["object_count"], json!(2));
    assert_eq!(result["objects"][0]["name"], json!("Cube"));
    Ok(())
}

#[rstest]
fn unknown_command_reports_exact_message(world: HostWorld) -> Result<()> {
    let mut stream = world.connect();
    let envelope = send(&mut stream, &json!({"type": "bogus_command", "params": {}}))?;
    assert_eq!(
        envelope,
        Envelope::error("Unknown command type: bogus_command")
    );
    Ok(())
}

#[rstest]
fn connection_survives_handler_failures(world: HostWorld) -> Result<()> {
    let mut stream = world.connect();

    let failed = send(&mut stream, &json!({"type": "fail", "params": {}}))?;
    assert_eq!(failed, Envelope::error("boom"));

    let panicked = send(&mut stream, &json!({"type": "explode", "params": {}}))?;
    assert_eq!(panicked, Envelope::error("handler panicked: kaboom"));

    let next = send(
        &mut stream,
        &json!({"type": "record", "params": {"label": "after"}}),
    )?;
    assert_eq!(next, Envelope::success(json!({"recorded": "after"})));
    Ok(())
}

#[rstest]
fn frames_split_across_writes_produce_one_response(world: HostWorld) -> Result<()> {
    let mut stream = world.connect();
    stream.write_all(br#"{"type": "record", "#)?;
    stream.flush()?;
    thread::sleep(Duration::from_millis(100));
    stream.write_all(br#""params": {"label": "split"}}"#)?;

    let envelope = read_envelope(&mut stream)?;
    assert_eq!(envelope, Envelope::success(json!({"recorded": "split"})));
    assert_eq!(*world.journal.lock().expect("journal"), vec!["split"]);
    Ok(())
}

#[rstest]
fn commands_on_one_connection_run_in_order(world: HostWorld) -> Result<()> {
    let mut stream = world.connect();
    for label in ["A", "B"] {
        let envelope = send(
            &mut stream,
            &json!({"type": "record", "params": {"label": label}}),
        )?;
        assert!(!envelope.is_error());
    }
    assert_eq!(*world.journal.lock().expect("journal"), vec!["A", "B"]);
    Ok(())
}

#[rstest]
fn enabling_a_feature_applies_to_the_next_command(world: HostWorld) -> Result<()> {
    let mut stream = world.connect();
    let search = json!({"type": "search_polyhaven_assets", "params": {}});

    let before = send(&mut stream, &search)?;
    assert_eq!(
        before,
        Envelope::error("Unknown command type: search_polyhaven_assets")
    );

    world.flags.set(Feature::Polyhaven, true);
    let after = send(&mut stream, &search)?;
    let result = after.into_result().map_err(anyhow::Error::msg)?;
    assert_eq!(result["total_count"], json!(0));

    let status = send(
        &mut stream,
        &json!({"type": "get_polyhaven_status", "params": {}}),
    )?;
    let status = status.into_result().map_err(anyhow::Error::msg)?;
    assert_eq!(status["enabled"], json!(true));
    Ok(())
}

#[rstest]
fn invalid_params_are_reported(world: HostWorld) -> Result<()> {
    let mut stream = world.connect();
    let envelope = send(
        &mut stream,
        &json!({"type": "get_object_info", "params": {"nme": "Cube"}}),
    )?;
    let Envelope::Error { message } = envelope else {
        bail!("expected an error envelope");
    };
    assert!(message.starts_with("invalid parameters:"), "{message}");
    Ok(())
}

#[rstest]
fn concurrent_clients_are_both_served(world: HostWorld) -> Result<()> {
    let mut slow = world.connect();
    let mut quick = world.connect();

    slow.write_all(br#"{"type": "stall", "params": {}}"#)?;
    let quick_envelope = send(
        &mut quick,
        &json!({"type": "record", "params": {"label": "quick"}}),
    )?;
    let slow_envelope = read_envelope(&mut slow)?;

    assert_eq!(
        quick_envelope,
        Envelope::success(json!({"recorded": "quick"}))
    );
    assert_eq!(slow_envelope, Envelope::success(json!({"stalled": true})));
    Ok(())
}

#[rstest]
fn stop_unblocks_idle_clients_within_budget(world: HostWorld) -> Result<()> {
    let mut stream = world.connect();
    let ready = send(
        &mut stream,
        &json!({"type": "record", "params": {"label": "ready"}}),
    )?;
    assert!(!ready.is_error());

    let started = Instant::now();
    world.server.stop();
    assert!(started.elapsed() < STOP_JOIN_BUDGET + Duration::from_millis(500));
    assert!(!world.server.is_running());

    let mut buffer = [0_u8; 16];
    match stream.read(&mut buffer) {
        Ok(0) => {}
        Ok(read) => bail!("unexpected {read} bytes after stop"),
        Err(error) if error.kind() == ErrorKind::ConnectionReset => {}
        Err(error) => return Err(error.into()),
    }
    Ok(())
}

#[rstest]
fn start_and_stop_are_idempotent(world: HostWorld) {
    let addr = world.addr();
    world.server.start().expect("second start");
    assert_eq!(world.server.local_addr(), Some(addr));

    world.server.stop();
    world.server.stop();
    assert!(!world.server.is_running());
    assert_eq!(world.server.local_addr(), None);
}

#[test]
fn bind_failure_leaves_server_stopped() {
    let occupied = TcpListener::bind("127.0.0.1:0").expect("occupy port");
    let port = occupied.local_addr().expect("occupied addr").port();

    let flags = FeatureFlags::new();
    let registry = standard_registry(InMemoryScene::starter(), Integrations::in_memory(), &flags);
    let main_loop = MainLoop::new();
    let server = CommandServer::new(
        SocketEndpoint::tcp("127.0.0.1", port),
        Dispatcher::new(registry, flags),
        main_loop.handle(),
    );

    let error = server.start().expect_err("port is taken");
    assert!(matches!(error, ServerError::Start { .. }));
    assert!(!server.is_running());
    assert_eq!(server.local_addr(), None);
    server.stop();
}
