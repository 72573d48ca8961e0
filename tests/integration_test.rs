//! Integration tests for the bridge and the protocol core
//!
//! Drives a full `BridgeSession` through in-memory channels standing in for
//! the WebSocket server and a mock board, then checks the protocol core
//! properties end to end.

use bytes::Bytes;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use ublocks_bridge::bridge::{BoardLink, BridgeInstance, BridgeSession, LinkEvent, Stats};
use ublocks_bridge::error::{BridgeError, Result};
use ublocks_bridge::protocol::codec::{encode_chunk, encode_raw};
use ublocks_bridge::protocol::{
    encode, ChunkType, ControlMessage, ControlSelector, ControlSink, Frame, MessageKind,
    PayloadShape, ProtocolDispatcher, StreamAssembler, TaskError, TaskSink, TaskState, Value,
    DESCRIPTORS,
};
use ublocks_bridge::transport::{PortOpener, TransportChannels};

// =============================================================================
// Mock board
// =============================================================================

/// Board ends of the channels handed to the link
struct BoardEnd {
    to_link: mpsc::Sender<Bytes>,
    from_link: mpsc::Receiver<Bytes>,
}

#[derive(Default)]
struct MockInner {
    available: bool,
    opens: usize,
    board: Option<BoardEnd>,
}

/// Opener whose single board can be plugged and unplugged by the test
#[derive(Clone, Default)]
struct MockOpener(Arc<Mutex<MockInner>>);

impl MockOpener {
    fn plugged() -> Self {
        let opener = Self::default();
        opener.0.lock().available = true;
        opener
    }

    fn unplug(&self) {
        let mut inner = self.0.lock();
        inner.available = false;
        inner.board = None;
    }

    fn plug(&self) {
        self.0.lock().available = true;
    }

    fn opens(&self) -> usize {
        self.0.lock().opens
    }

    fn take_board(&self) -> BoardEnd {
        self.0.lock().board.take().expect("board not open")
    }
}

impl PortOpener for MockOpener {
    fn open(&self, port: &str, _shutdown: Arc<AtomicBool>) -> Result<TransportChannels> {
        let mut inner = self.0.lock();
        if !inner.available {
            return Err(BridgeError::PortUnavailable {
                port: port.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "unplugged"),
            });
        }
        let (to_link, rx) = mpsc::channel(16);
        let (tx, from_link) = mpsc::channel(16);
        inner.opens += 1;
        inner.board = Some(BoardEnd { to_link, from_link });
        Ok(TransportChannels { rx, tx })
    }

    fn available_ports(&self) -> Vec<ublocks_bridge::protocol::PortEntry> {
        vec![ublocks_bridge::protocol::PortEntry {
            path: "/dev/ttyACM0".into(),
            display_name: "Raspberry Pi".into(),
        }]
    }
}

// =============================================================================
// IDE side helpers
// =============================================================================

/// The IDE end of a running session
struct Ide {
    to_bridge: mpsc::Sender<Bytes>,
    from_bridge: mpsc::Receiver<Bytes>,
    assembler: StreamAssembler,
    frames: Vec<Frame>,
}

impl Ide {
    async fn send_control(&self, selector: ControlSelector, arguments: Vec<JsonValue>) {
        let frame = ControlMessage::new(selector, arguments).to_frame().unwrap();
        self.to_bridge.send(frame).await.unwrap();
    }

    async fn recv_raw(&mut self) -> Bytes {
        tokio::time::timeout(Duration::from_secs(2), self.from_bridge.recv())
            .await
            .expect("timeout waiting for bridge")
            .expect("bridge closed")
    }

    async fn next_frame(&mut self) -> Frame {
        while self.frames.is_empty() {
            let data = self.recv_raw().await;
            let frames = &mut self.frames;
            self.assembler.feed(&data, |f| frames.push(f)).unwrap();
        }
        self.frames.remove(0)
    }

    async fn next_control(&mut self) -> ControlMessage {
        let frame = self.next_frame().await;
        assert_eq!(frame.kind, MessageKind::JsonMessage);
        ControlMessage::from_payload(&frame.payload).unwrap()
    }
}

fn start_session(opener: MockOpener) -> (Ide, Arc<AtomicBool>, tokio::task::JoinHandle<Result<()>>) {
    let (to_bridge, ide_rx) = mpsc::channel(16);
    let (ide_tx, from_bridge) = mpsc::channel(16);
    let link = BoardLink::new(opener).with_reconnect_interval(Duration::from_millis(10));
    let session = BridgeSession::new(
        TransportChannels {
            rx: ide_rx,
            tx: ide_tx,
        },
        link,
        StreamAssembler::new(),
        Arc::new(Stats::new()),
    );
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(session.run(shutdown.clone()));
    let ide = Ide {
        to_bridge,
        from_bridge,
        assembler: StreamAssembler::new(),
        frames: Vec::new(),
    };
    (ide, shutdown, handle)
}

async fn recv_on_board(board: &mut BoardEnd) -> Bytes {
    tokio::time::timeout(Duration::from_secs(2), board.from_link.recv())
        .await
        .expect("timeout waiting for board data")
        .expect("link closed")
}

// =============================================================================
// Session tests
// =============================================================================

#[tokio::test]
async fn test_session_port_list() {
    let (mut ide, shutdown, handle) = start_session(MockOpener::plugged());

    ide.send_control(ControlSelector::GetSerialPortList, vec![])
        .await;
    let reply = ide.next_control().await;
    assert_eq!(
        reply.known_selector(),
        Some(ControlSelector::GetSerialPortListResponse)
    );
    assert_eq!(
        reply.arguments,
        vec![json!([{"path": "/dev/ttyACM0", "displayName": "Raspberry Pi"}])]
    );

    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_session_relays_both_ways() {
    let opener = MockOpener::plugged();
    let (mut ide, shutdown, handle) = start_session(opener.clone());

    ide.send_control(ControlSelector::SerialConnect, vec![json!("/dev/ttyACM0")])
        .await;
    let reply = ide.next_control().await;
    assert_eq!(reply.known_selector(), Some(ControlSelector::SerialConnectResponse));
    assert_eq!(reply.arguments, vec![json!(true), json!("/dev/ttyACM0")]);
    let mut board = opener.take_board();

    // IDE -> board, byte for byte
    let start = encode("startAll", 0, &[]).unwrap();
    ide.to_bridge.send(start.clone()).await.unwrap();
    assert_eq!(recv_on_board(&mut board).await, start);

    // board -> IDE, raw bytes forwarded even when split mid-frame
    let done = encode_raw(MessageKind::TaskDone, 4, &[]).unwrap();
    board.to_link.send(done.slice(..2)).await.unwrap();
    board.to_link.send(done.slice(2..)).await.unwrap();
    let frame = ide.next_frame().await;
    assert_eq!(frame.kind, MessageKind::TaskDone);
    assert_eq!(frame.task_id, 4);

    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_session_connect_is_idempotent() {
    let opener = MockOpener::plugged();
    let (mut ide, shutdown, handle) = start_session(opener.clone());

    for _ in 0..2 {
        ide.send_control(ControlSelector::SerialConnect, vec![json!("/dev/ttyACM0")])
            .await;
        let reply = ide.next_control().await;
        assert_eq!(reply.arguments[0], json!(true));
    }
    assert_eq!(opener.opens(), 1);

    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_session_unplug_and_reconnect_notices() {
    let opener = MockOpener::plugged();
    let (mut ide, shutdown, handle) = start_session(opener.clone());

    ide.send_control(ControlSelector::SerialConnect, vec![json!("/dev/ttyACM0")])
        .await;
    ide.next_control().await;

    opener.unplug();
    let notice = ide.next_control().await;
    assert_eq!(notice.known_selector(), Some(ControlSelector::BoardUnplugged));
    assert_eq!(notice.path_argument(), Some("/dev/ttyACM0"));

    opener.plug();
    let notice = ide.next_control().await;
    assert_eq!(notice.known_selector(), Some(ControlSelector::BoardReconnected));
    assert_eq!(opener.opens(), 2);

    // the reopened board is live
    let mut board = opener.take_board();
    let ping = encode("ping", 0, &[]).unwrap();
    ide.to_bridge.send(ping.clone()).await.unwrap();
    assert_eq!(recv_on_board(&mut board).await, ping);

    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_session_connect_while_board_unplugged() {
    let opener = MockOpener::plugged();
    let (mut ide, shutdown, handle) = start_session(opener.clone());

    ide.send_control(ControlSelector::SerialConnect, vec![json!("/dev/ttyACM0")])
        .await;
    ide.next_control().await;

    opener.unplug();
    let notice = ide.next_control().await;
    assert_eq!(notice.known_selector(), Some(ControlSelector::BoardUnplugged));

    // the IDE retries its connect while the board is still away
    ide.send_control(ControlSelector::SerialConnect, vec![json!("/dev/ttyACM0")])
        .await;
    let reply = ide.next_control().await;
    assert_eq!(reply.known_selector(), Some(ControlSelector::SerialConnectResponse));
    assert_eq!(reply.arguments, vec![json!(true), json!("/dev/ttyACM0")]);

    opener.plug();
    let notice = ide.next_control().await;
    assert_eq!(notice.known_selector(), Some(ControlSelector::BoardReconnected));
    assert_eq!(opener.opens(), 2);

    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_session_disconnect() {
    let opener = MockOpener::plugged();
    let (mut ide, shutdown, handle) = start_session(opener.clone());

    ide.send_control(ControlSelector::SerialDisconnect, vec![json!("/dev/ttyACM0")])
        .await;
    let reply = ide.next_control().await;
    assert_eq!(reply.arguments, vec![json!(false), json!("/dev/ttyACM0")]);

    ide.send_control(ControlSelector::SerialConnect, vec![json!("/dev/ttyACM0")])
        .await;
    ide.next_control().await;
    ide.send_control(ControlSelector::SerialDisconnect, vec![json!("/dev/ttyACM0")])
        .await;
    let reply = ide.next_control().await;
    assert_eq!(
        reply.known_selector(),
        Some(ControlSelector::SerialDisconnectResponse)
    );
    assert_eq!(reply.arguments, vec![json!(true), json!("/dev/ttyACM0")]);

    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();
}

// =============================================================================
// Bridge instance
// =============================================================================

#[derive(Default)]
struct TaskLog {
    events: Vec<String>,
}

impl TaskSink for TaskLog {
    type Owner = u32;

    fn task_started(&mut self, owner: &u32, task_id: u8) {
        self.events.push(format!("started {} {}", owner, task_id));
    }
    fn task_done(&mut self, owner: &u32, task_id: u8) {
        self.events.push(format!("done {} {}", owner, task_id));
    }
    fn task_value(&mut self, owner: &u32, task_id: u8, value: Value) {
        self.events.push(format!("value {} {} {}", owner, task_id, value));
    }
    fn task_error(&mut self, owner: &u32, task_id: u8, error: TaskError) {
        self.events.push(format!("error {} {} {}", owner, task_id, error));
    }
    fn debug_output(&mut self, task_id: u8, text: String) {
        self.events.push(format!("output {} {}", task_id, text));
    }
    fn task_reset(&mut self, owner: &u32, task_id: u8) {
        self.events.push(format!("reset {} {}", owner, task_id));
    }
}

#[tokio::test]
async fn test_reconnect_resets_running_tasks() {
    let opener = MockOpener::plugged();
    let link = BoardLink::new(opener.clone()).with_reconnect_interval(Duration::from_millis(10));
    let mut instance = BridgeInstance::new(
        link,
        StreamAssembler::new(),
        ProtocolDispatcher::new(TaskLog::default()),
    );
    instance.register_task(1, 100);
    instance.connect("/dev/ttyACM0").unwrap();

    let board = opener.take_board();
    board
        .to_link
        .send(encode_raw(MessageKind::TaskStarted, 1, &[]).unwrap())
        .await
        .unwrap();
    assert!(matches!(instance.step().await.unwrap(), LinkEvent::Data(_)));
    assert_eq!(instance.dispatcher().task_state(1), Some(TaskState::Running));

    drop(board);
    opener.unplug();
    assert!(matches!(
        instance.step().await.unwrap(),
        LinkEvent::Unplugged(_)
    ));

    opener.plug();
    let event = tokio::time::timeout(Duration::from_secs(2), instance.step())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, LinkEvent::Reconnected("/dev/ttyACM0".into()));
    assert_eq!(instance.dispatcher().task_state(1), Some(TaskState::Idle));
    assert_eq!(
        instance.dispatcher().sink().events,
        vec!["started 100 1", "reset 100 1"]
    );
}

// =============================================================================
// Protocol core
// =============================================================================

#[derive(Default)]
struct ControlLog {
    calls: Vec<(ControlSelector, Vec<JsonValue>)>,
}

impl ControlSink for ControlLog {
    fn on_control(&mut self, selector: ControlSelector, arguments: &[JsonValue]) {
        self.calls.push((selector, arguments.to_vec()));
    }
}

fn collect(assembler: &mut StreamAssembler, data: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    assembler.feed(data, |f| frames.push(f)).unwrap();
    frames
}

#[test]
fn test_framing_round_trip() {
    let sizes = [0usize, 1, 255, 256, 65535];
    for descriptor in DESCRIPTORS.iter() {
        if descriptor.payload == PayloadShape::None {
            continue;
        }
        for &size in &sizes {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let bytes = encode_raw(descriptor.kind, 9, &payload).unwrap();

            let mut assembler = StreamAssembler::new();
            let frames = collect(&mut assembler, &bytes);
            assert_eq!(frames.len(), 1, "{} size {}", descriptor.selector, size);
            assert_eq!(frames[0].kind, descriptor.kind);
            assert_eq!(frames[0].task_id, 9);
            assert_eq!(frames[0].payload.as_ref(), payload.as_slice());
        }
    }
}

#[test]
fn test_store_chunk_round_trip_keeps_tag() {
    let code = [0x10u8, 0x20, 0x30];
    let bytes = encode("storeChunk", 2, &code).unwrap();
    let frames = collect(&mut StreamAssembler::new(), &bytes);
    assert_eq!(frames[0].chunk(), Some((ChunkType::Command as u8, &code[..])));

    let bytes = encode_chunk(2, ChunkType::Command, &[0u8; 65534]).unwrap();
    assert_eq!(bytes.len(), 5 + 65535);
    assert!(matches!(
        encode("storeChunk", 2, &[0u8; 65535]),
        Err(BridgeError::PayloadTooLarge { .. })
    ));
}

#[test]
fn test_resync_after_garbage() {
    let mut stream = vec![0xFF, 0xFF, 0x41, 0x42];
    stream.extend_from_slice(&encode_raw(MessageKind::TaskDone, 3, &[]).unwrap());

    let frames = collect(&mut StreamAssembler::new(), &stream);
    assert_eq!(frames, vec![Frame::new(MessageKind::TaskDone, 3, Bytes::new())]);
}

#[test]
fn test_three_strings_whole_and_bytewise() {
    let mut stream = Vec::new();
    for text in ["first", "second", "third"] {
        stream.extend_from_slice(
            &encode_raw(MessageKind::OutputString, 0, text.as_bytes()).unwrap(),
        );
    }

    let whole: Vec<String> = collect(&mut StreamAssembler::new(), &stream)
        .iter()
        .map(Frame::text)
        .collect();

    let mut assembler = StreamAssembler::new();
    let bytewise: Vec<String> = stream
        .iter()
        .flat_map(|b| collect(&mut assembler, std::slice::from_ref(b)))
        .map(|f| f.text())
        .collect();

    assert_eq!(whole, vec!["first", "second", "third"]);
    assert_eq!(bytewise, whole);
}

#[test]
fn test_integer_decode() {
    let frame = Frame::new(MessageKind::TaskReturned, 0, vec![1u8, 0x01, 0x00, 0x00, 0x00]);
    assert_eq!(frame.value(), Value::Integer(1));

    let frame = Frame::new(MessageKind::TaskReturned, 0, vec![1u8, 0xFF, 0xFF, 0xFF, 0x7F]);
    assert_eq!(frame.value(), Value::Integer(2_147_483_647));
}

#[test]
fn test_json_control_multiplexing() {
    let mut dispatcher = ProtocolDispatcher::with_control(TaskLog::default(), ControlLog::default());
    dispatcher.register_task(0, 1);

    let payload = br#"{"selector":"serialConnectResponse","arguments":[true]}"#;
    let bytes = encode_raw(MessageKind::JsonMessage, 0, payload).unwrap();
    for frame in collect(&mut StreamAssembler::new(), &bytes) {
        dispatcher.handle(frame).unwrap();
    }

    assert_eq!(
        dispatcher.control().calls,
        vec![(ControlSelector::SerialConnectResponse, vec![json!(true)])]
    );
    assert!(dispatcher.sink().events.is_empty());
    assert_eq!(dispatcher.task_state(0), Some(TaskState::Idle));
}

fn board_frame() -> impl Strategy<Value = Vec<u8>> {
    let kinds = prop::sample::select(vec![
        MessageKind::TaskStarted,
        MessageKind::TaskDone,
        MessageKind::TaskReturned,
        MessageKind::OutputString,
        MessageKind::VarValue,
        MessageKind::Broadcast,
    ]);
    (kinds, any::<u8>(), prop::collection::vec(any::<u8>(), 0..300)).prop_map(
        |(kind, task, payload)| encode_raw(kind, task, &payload).unwrap().to_vec(),
    )
}

proptest! {
    #[test]
    fn prop_feeding_is_chunk_independent(
        frames in prop::collection::vec(board_frame(), 1..8),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..12),
    ) {
        let stream: Vec<u8> = frames.concat();
        let expected = collect(&mut StreamAssembler::new(), &stream);
        prop_assert_eq!(expected.len(), frames.len());

        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len() + 1)).collect();
        points.push(0);
        points.push(stream.len());
        points.sort_unstable();
        points.dedup();

        let mut assembler = StreamAssembler::new();
        let mut got = Vec::new();
        for pair in points.windows(2) {
            got.extend(collect(&mut assembler, &stream[pair[0]..pair[1]]));
        }
        prop_assert_eq!(got, expected);
        prop_assert_eq!(assembler.buffered(), 0);
    }
}
