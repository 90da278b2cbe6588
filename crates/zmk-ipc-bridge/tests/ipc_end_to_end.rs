//! End-to-end tests: real Unix sockets, real server threads, external peers
//! implemented exactly the way a driver program would be.
//!
//! Each test binds its servers on a unique path under the system temp
//! directory, so tests run in parallel without colliding and stale sockets
//! from crashed runs are unlinked at startup.

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use prost::Message;

use zmk_ipc_bridge::hid::{ConsumerReport, KeyboardReport};
use zmk_ipc_bridge::{EgressConfig, HidReports, IngressConfig, IpcObserver, KscanIpcServer};
use zmk_ipc_core::protocol::messages::{
    key_event, zmk_event, ClientMessage, Endpoint, HidConsumerReport, HidKeyboardReport, KeyEvent,
    KscanEvent, TransportType, ZmkEvent, CLIENT_MESSAGE_MAX_SIZE, ZMK_EVENT_MAX_SIZE,
};
use zmk_ipc_core::{frame_recv, frame_write, RecvError};

// ── Harness ───────────────────────────────────────────────────────────────────

static PATH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A socket path that is unique across tests and test processes.
fn unique_socket_path(tag: &str) -> PathBuf {
    let n = PATH_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "zmk-ipc-test-{}-{tag}-{n}.sock",
        std::process::id()
    ))
}

/// Polls `predicate` until it holds or the timeout expires.
fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

/// Starts an ingress server wired to an mpsc channel and returns both, plus
/// a connected injector stream.
fn start_ingress(
    rows: u32,
    columns: u32,
) -> (KscanIpcServer, mpsc::Receiver<(u32, u32, bool)>, UnixStream) {
    let config = IngressConfig {
        socket_path: unique_socket_path("kscan"),
        rows,
        columns,
    };
    let socket_path = config.socket_path.clone();
    let server = KscanIpcServer::start(config).expect("ingress must start");

    let (tx, rx) = mpsc::channel();
    server.configure(move |row, col, pressed| {
        // The channel outlives every test body; send failures only happen
        // during teardown.
        let _ = tx.send((row, col, pressed));
    });
    server.enable();

    let injector = UnixStream::connect(&socket_path).expect("injector must connect");
    (server, rx, injector)
}

fn send_key_pos(stream: &mut UnixStream, action: key_event::Action, row: u32, col: u32) {
    let msg = ClientMessage::key_event(KeyEvent::at_key_pos(action, row, col));
    frame_write(stream, &msg.encode_to_vec()).expect("frame write");
}

fn send_position(stream: &mut UnixStream, action: key_event::Action, position: u32) {
    let msg = ClientMessage::key_event(KeyEvent::at_position(action, position));
    frame_write(stream, &msg.encode_to_vec()).expect("frame write");
}

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE: Duration = Duration::from_millis(200);

/// HID report source with settable state, standing in for the host's report
/// registers.
#[derive(Default)]
struct HostReports {
    keyboard: Mutex<KeyboardReport>,
    consumer: Mutex<ConsumerReport>,
    #[cfg(feature = "pointing")]
    mouse: Mutex<zmk_ipc_bridge::MouseReport>,
}

impl HidReports for HostReports {
    fn keyboard(&self) -> KeyboardReport {
        *self.keyboard.lock().unwrap()
    }

    fn consumer(&self) -> ConsumerReport {
        *self.consumer.lock().unwrap()
    }

    #[cfg(feature = "pointing")]
    fn mouse(&self) -> zmk_ipc_bridge::MouseReport {
        *self.mouse.lock().unwrap()
    }
}

/// Starts an observer on a unique path and returns it with its report
/// source and socket path.
fn start_egress(max_clients: usize) -> (IpcObserver, Arc<HostReports>, PathBuf) {
    let config = EgressConfig {
        socket_path: unique_socket_path("observer"),
        max_clients,
    };
    let socket_path = config.socket_path.clone();
    let reports = Arc::new(HostReports::default());
    let observer =
        IpcObserver::start(config, Arc::clone(&reports) as Arc<dyn HidReports>)
            .expect("observer must start");
    (observer, reports, socket_path)
}

/// Connects an observer client and waits for the accept thread to register
/// it.
fn connect_observer(observer: &IpcObserver, socket_path: &PathBuf, expected: usize) -> UnixStream {
    let stream = UnixStream::connect(socket_path).expect("observer client must connect");
    assert!(
        wait_until(RECV_TIMEOUT, || observer.connected_clients() == expected),
        "accept thread never registered client {expected}"
    );
    stream
}

// ── Ingress scenarios ─────────────────────────────────────────────────────────

#[test]
fn test_inject_explicit_key() {
    let (_server, rx, mut injector) = start_ingress(4, 12);

    send_key_pos(&mut injector, key_event::Action::Press, 1, 3);

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (1, 3, true));
}

#[test]
fn test_inject_linear_position() {
    let (_server, rx, mut injector) = start_ingress(4, 12);

    send_position(&mut injector, key_event::Action::Release, 25);

    // 25 / 12 = 2, 25 % 12 = 1
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (2, 1, false));
}

#[test]
fn test_press_release_sequence() {
    let (_server, rx, mut injector) = start_ingress(4, 12);

    send_key_pos(&mut injector, key_event::Action::Press, 0, 0);
    send_key_pos(&mut injector, key_event::Action::Release, 0, 0);

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (0, 0, true));
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (0, 0, false));
}

#[test]
fn test_linear_position_with_zero_columns_is_dropped() {
    let (_server, rx, mut injector) = start_ingress(4, 0);

    send_position(&mut injector, key_event::Action::Press, 5);
    assert!(rx.recv_timeout(SILENCE).is_err(), "event must be dropped");

    // The connection survives the rejected event; explicit coordinates
    // still work.
    send_key_pos(&mut injector, key_event::Action::Press, 2, 2);
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (2, 2, true));
}

#[test]
fn test_enable_gate_blocks_and_resumes_dispatch() {
    let (server, rx, mut injector) = start_ingress(4, 12);

    server.disable();
    send_key_pos(&mut injector, key_event::Action::Press, 1, 1);
    assert!(
        rx.recv_timeout(SILENCE).is_err(),
        "disabled server must not dispatch"
    );

    // Re-enabling resumes dispatch from the next frame; the frame sent
    // while disabled stays dropped.
    server.enable();
    send_key_pos(&mut injector, key_event::Action::Press, 3, 7);
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (3, 7, true));
}

#[test]
fn test_corrupt_frame_is_skipped_and_connection_survives() {
    let (_server, rx, mut injector) = start_ingress(4, 12);

    send_key_pos(&mut injector, key_event::Action::Press, 0, 1);
    // A well-framed body of garbage between two valid events.
    frame_write(&mut injector, &[0xFF; 10]).unwrap();
    send_key_pos(&mut injector, key_event::Action::Press, 0, 2);

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (0, 1, true));
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (0, 2, true));
}

#[test]
fn test_oversize_frame_disconnects_peer_and_server_recovers() {
    let (_server, rx, mut injector) = start_ingress(4, 12);
    let socket_path = injector.peer_addr().unwrap();
    let socket_path = socket_path.as_pathname().unwrap().to_path_buf();

    // A length prefix beyond the schema maximum poisons the stream; the
    // server must drop this peer.
    let oversized = (CLIENT_MESSAGE_MAX_SIZE as u32 + 1).to_be_bytes();
    use std::io::Write;
    injector.write_all(&oversized).unwrap();

    // Our end observes the close as EOF.
    injector
        .set_read_timeout(Some(RECV_TIMEOUT))
        .unwrap();
    let mut sink = [0u8; 1];
    assert_eq!(injector.read(&mut sink).unwrap(), 0, "server must close peer");

    // The reader is back in WAIT_PEER; a new injector works immediately.
    let mut second = UnixStream::connect(&socket_path).expect("reconnect must succeed");
    send_key_pos(&mut second, key_event::Action::Press, 1, 2);
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (1, 2, true));
}

#[test]
fn test_new_peer_can_connect_after_disconnect() {
    let (_server, rx, injector) = start_ingress(4, 12);
    let socket_path = injector.peer_addr().unwrap().as_pathname().unwrap().to_path_buf();

    drop(injector);

    let mut second = UnixStream::connect(&socket_path).expect("reconnect must succeed");
    send_key_pos(&mut second, key_event::Action::Release, 3, 11);
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (3, 11, false));
}

// ── Egress scenarios ──────────────────────────────────────────────────────────

#[test]
fn test_keyboard_report_fans_out_to_all_observers() {
    let (observer, reports, path) = start_egress(4);
    let first = connect_observer(&observer, &path, 1);
    let second = connect_observer(&observer, &path, 2);

    *reports.keyboard.lock().unwrap() = KeyboardReport {
        modifiers: 0x02,
        keys: [0x04, 0, 0, 0, 0, 0],
    };
    observer.notify_keyboard_report("USB");

    let expected = ZmkEvent::keyboard(HidKeyboardReport {
        endpoint: Some(Endpoint {
            transport: TransportType::Usb as i32,
            ble_profile_idx: 0,
        }),
        modifiers: 2,
        keys: vec![0x04, 0, 0, 0, 0, 0],
    });
    for client in [&first, &second] {
        let event: ZmkEvent = frame_recv(client, ZMK_EVENT_MAX_SIZE).unwrap();
        assert_eq!(event, expected);
    }
}

#[test]
fn test_fanned_out_frames_are_bit_identical() {
    let (observer, _reports, path) = start_egress(4);
    let mut first = connect_observer(&observer, &path, 1);
    let mut second = connect_observer(&observer, &path, 2);

    observer.notify_kscan(1, 33, true, 777);

    let mut read_frame = |stream: &mut UnixStream| {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).unwrap();
        let len = u32::from_be_bytes(prefix) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).unwrap();
        (prefix, body)
    };
    assert_eq!(read_frame(&mut first), read_frame(&mut second));
}

#[test]
fn test_ble_profile_parsing() {
    let (observer, _reports, path) = start_egress(4);
    let client = connect_observer(&observer, &path, 1);

    observer.notify_consumer_report("BLE:2");

    let event: ZmkEvent = frame_recv(&client, ZMK_EVENT_MAX_SIZE).unwrap();
    let Some(zmk_event::Payload::Consumer(HidConsumerReport { endpoint, .. })) = event.payload
    else {
        panic!("expected a consumer report");
    };
    let endpoint = endpoint.unwrap();
    assert_eq!(endpoint.transport, TransportType::Ble as i32);
    assert_eq!(endpoint.ble_profile_idx, 2);
}

#[test]
fn test_unknown_transport_maps_to_none() {
    let (observer, _reports, path) = start_egress(4);
    let client = connect_observer(&observer, &path, 1);

    observer.notify_keyboard_report("Foo");

    let event: ZmkEvent = frame_recv(&client, ZMK_EVENT_MAX_SIZE).unwrap();
    let Some(zmk_event::Payload::Keyboard(HidKeyboardReport { endpoint, .. })) = event.payload
    else {
        panic!("expected a keyboard report");
    };
    let endpoint = endpoint.unwrap();
    assert_eq!(endpoint.transport, TransportType::None as i32);
    assert_eq!(endpoint.ble_profile_idx, 0);
}

#[cfg(feature = "pointing")]
#[test]
fn test_mouse_report_fan_out() {
    let (observer, reports, path) = start_egress(4);
    let client = connect_observer(&observer, &path, 1);

    *reports.mouse.lock().unwrap() = zmk_ipc_bridge::MouseReport {
        buttons: 0x01,
        dx: -4,
        dy: 9,
        scroll_x: 0,
        scroll_y: -1,
    };
    observer.notify_mouse_report("USB");

    let event: ZmkEvent = frame_recv(&client, ZMK_EVENT_MAX_SIZE).unwrap();
    let Some(zmk_event::Payload::Mouse(mouse)) = event.payload else {
        panic!("expected a mouse report");
    };
    assert_eq!(mouse.buttons, 1);
    assert_eq!(mouse.dx, -4);
    assert_eq!(mouse.dy, 9);
    assert_eq!(mouse.scroll_y, -1);
}

#[test]
fn test_kscan_events_observed_in_order() {
    let (observer, _reports, path) = start_egress(4);
    let client = connect_observer(&observer, &path, 1);

    observer.notify_kscan(0, 13, true, 10);
    observer.notify_kscan(0, 13, false, 55);

    let press: ZmkEvent = frame_recv(&client, ZMK_EVENT_MAX_SIZE).unwrap();
    let release: ZmkEvent = frame_recv(&client, ZMK_EVENT_MAX_SIZE).unwrap();
    assert_eq!(
        press,
        ZmkEvent::kscan(KscanEvent {
            source: 0,
            position: 13,
            pressed: true,
            timestamp: 10,
        })
    );
    assert_eq!(
        release,
        ZmkEvent::kscan(KscanEvent {
            source: 0,
            position: 13,
            pressed: false,
            timestamp: 55,
        })
    );
}

#[test]
fn test_capacity_overflow_rejects_new_client_only() {
    let (observer, _reports, path) = start_egress(1);
    let kept = connect_observer(&observer, &path, 1);

    // The kernel accepts the second connection (it is within the listen
    // backlog), then the accept thread closes it.
    let rejected = UnixStream::connect(&path).expect("kernel must accept");
    rejected.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();
    let result: Result<ZmkEvent, _> = frame_recv(&rejected, ZMK_EVENT_MAX_SIZE);
    assert!(
        matches!(result, Err(RecvError::PeerClosed)),
        "overflow client must be closed, got {result:?}"
    );

    // The table still holds exactly the first client, which keeps
    // receiving.
    assert_eq!(observer.connected_clients(), 1);
    observer.notify_kscan(0, 3, true, 1);
    let event: ZmkEvent = frame_recv(&kept, ZMK_EVENT_MAX_SIZE).unwrap();
    assert!(matches!(
        event.payload,
        Some(zmk_event::Payload::KscanEvent(KscanEvent { position: 3, .. }))
    ));
}

#[test]
fn test_dead_client_evicted_on_next_broadcast() {
    let (observer, _reports, path) = start_egress(4);
    let kept = connect_observer(&observer, &path, 1);
    let dying = connect_observer(&observer, &path, 2);

    drop(dying);
    observer.notify_kscan(0, 1, true, 1);

    assert!(
        wait_until(RECV_TIMEOUT, || observer.connected_clients() == 1),
        "dead client must be evicted by the broadcast"
    );

    observer.notify_kscan(0, 2, true, 2);
    let _first: ZmkEvent = frame_recv(&kept, ZMK_EVENT_MAX_SIZE).unwrap();
    let second: ZmkEvent = frame_recv(&kept, ZMK_EVENT_MAX_SIZE).unwrap();
    assert!(matches!(
        second.payload,
        Some(zmk_event::Payload::KscanEvent(KscanEvent { position: 2, .. }))
    ));
}

#[test]
fn test_concurrent_broadcasts_are_serialized_consistently() {
    let (observer, _reports, path) = start_egress(2);
    let first = connect_observer(&observer, &path, 1);
    let second = connect_observer(&observer, &path, 2);

    // Two host threads broadcasting concurrently: even positions from one,
    // odd from the other.
    const PER_THREAD: u32 = 50;
    let spawn_broadcaster = |observer: IpcObserver, offset: u32| {
        thread::spawn(move || {
            for i in 0..PER_THREAD {
                observer.notify_kscan(0, i * 2 + offset, true, i);
            }
        })
    };
    let even = spawn_broadcaster(observer.clone(), 0);
    let odd = spawn_broadcaster(observer.clone(), 1);
    even.join().unwrap();
    odd.join().unwrap();

    let drain = |stream: &UnixStream| -> Vec<u32> {
        (0..PER_THREAD * 2)
            .map(|_| {
                let event: ZmkEvent = frame_recv(stream, ZMK_EVENT_MAX_SIZE)
                    .expect("every frame must arrive intact");
                let Some(zmk_event::Payload::KscanEvent(k)) = event.payload else {
                    panic!("unexpected payload");
                };
                k.position
            })
            .collect()
    };
    let seen_first = drain(&first);
    let seen_second = drain(&second);

    // Same total order on every client.
    assert_eq!(seen_first, seen_second);

    // Each event delivered exactly once, and each thread's own events stay
    // in its submission order.
    let mut sorted = seen_first.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..PER_THREAD * 2).collect::<Vec<_>>());
    let evens: Vec<u32> = seen_first.iter().copied().filter(|p| p % 2 == 0).collect();
    let odds: Vec<u32> = seen_first.iter().copied().filter(|p| p % 2 == 1).collect();
    assert!(evens.windows(2).all(|w| w[0] < w[1]));
    assert!(odds.windows(2).all(|w| w[0] < w[1]));
}

// ── Full-bridge scenario ──────────────────────────────────────────────────────

#[test]
fn test_injected_key_observed_as_kscan_event() {
    // Wire the two servers together the way the host firmware does: the
    // ingress callback feeds the host's key-scan path, which here reports
    // straight into the egress broadcaster.
    let (observer, _reports, egress_path) = start_egress(4);

    let ingress_config = IngressConfig {
        socket_path: unique_socket_path("kscan"),
        rows: 4,
        columns: 12,
    };
    let ingress_path = ingress_config.socket_path.clone();
    let server = KscanIpcServer::start(ingress_config).unwrap();
    let fanout = observer.clone();
    server.configure(move |row, col, pressed| {
        fanout.notify_kscan(0, row * 12 + col, pressed, 0);
    });
    server.enable();

    let watcher = connect_observer(&observer, &egress_path, 1);
    let mut injector = UnixStream::connect(&ingress_path).unwrap();

    send_key_pos(&mut injector, key_event::Action::Press, 2, 5);

    let event: ZmkEvent = frame_recv(&watcher, ZMK_EVENT_MAX_SIZE).unwrap();
    assert_eq!(
        event,
        ZmkEvent::kscan(KscanEvent {
            source: 0,
            position: 29,
            pressed: true,
            timestamp: 0,
        })
    );
}
