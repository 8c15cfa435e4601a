// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! End-to-end tests driving an engine byte by byte, as a UART would.

use rmcomm::bypass::{Bypass, BypassResponse};
use rmcomm::client::{MAX_ENCODED_REQUEST, REPLY_FRAME_SIZE, Reply, Request, Value};
use rmcomm::crc;
use rmcomm::frame::{END, FrameReceiver};
use rmcomm::memory::{BufferAccessor, DataWidth};
use rmcomm::telemetry::LogTarget;
use rmcomm::{AddressWidth, Config, Engine};

const PASSKEY: u32 = 0xDEAD_BEEF;
const BASE: u32 = 0x2000_0000;
const VERSION: &[u8] = b"rmcomm test 1.0";
const TICK_MS: u32 = 10;

type Memory = BufferAccessor<256>;

#[derive(Debug, PartialEq)]
struct Frame {
    seq: u8,
    payload: Vec<u8>,
}

fn config(base: u32) -> Config {
    Config::new(PASSKEY, base, VERSION.len() as u16)
}

fn memory(base: u32) -> Memory {
    let mut memory = Memory::new(base);
    memory.load(base, VERSION).unwrap();
    memory
}

fn engine() -> Engine<Memory> {
    Engine::new(config(BASE), memory(BASE))
}

fn push_bytes<B: Bypass>(engine: &mut Engine<Memory, B>, bytes: &[u8]) {
    for &byte in bytes {
        engine.push_received_byte(byte);
    }
}

fn send<B: Bypass>(engine: &mut Engine<Memory, B>, master: u8, request: Request<'_>) {
    let mut buf = [0u8; MAX_ENCODED_REQUEST];
    let width = engine.config().address_width;
    let len = request.encode(master, width, &mut buf).unwrap();
    push_bytes(engine, &buf[..len]);
}

// Pull everything the transmitter has, decoding it as the host would.
fn drain<B: Bypass>(engine: &mut Engine<Memory, B>) -> Vec<Frame> {
    let mut rx = FrameReceiver::<REPLY_FRAME_SIZE>::new();
    let mut frames = Vec::new();
    while let Some(byte) = engine.pull_transmit_byte() {
        rx.push(byte);
        if let Some(raw) = rx.frame() {
            let reply = Reply::parse(raw).expect("device sent a bad frame");
            frames.push(Frame {
                seq: reply.seq,
                payload: reply.payload.to_vec(),
            });
            rx.clear();
        }
    }
    frames
}

fn tick_for<B: Bypass>(engine: &mut Engine<Memory, B>, ms: u32) -> Vec<Frame> {
    let mut frames = Vec::new();
    for _ in 0..ms / TICK_MS {
        engine.tick(TICK_MS);
        frames.extend(drain(engine));
    }
    frames
}

// Tick as if the UART were stalled, leaving staged frames in place.
fn tick_undrained<B: Bypass>(engine: &mut Engine<Memory, B>, ms: u32) {
    for _ in 0..ms / TICK_MS {
        engine.tick(TICK_MS);
    }
}

// Send a request, run one tick, and return whatever came back.
fn transact<B: Bypass>(
    engine: &mut Engine<Memory, B>,
    master: u8,
    request: Request<'_>,
) -> Option<Frame> {
    send(engine, master, request);
    engine.tick(TICK_MS);
    let mut frames = drain(engine);
    assert!(frames.len() <= 1);
    frames.pop()
}

fn authenticate<B: Bypass>(engine: &mut Engine<Memory, B>) {
    let reply = transact(engine, 1, Request::Authenticate(PASSKEY)).unwrap();
    assert_eq!(reply.payload, VERSION);
}

fn targets(engine: &mut Engine<Memory>, master: u8, targets: &[LogTarget]) -> Option<Frame> {
    transact(
        engine,
        master,
        Request::ConfigureLogTargets {
            start: true,
            end: true,
            targets,
        },
    )
}

#[test]
fn unauthenticated_requests_ignored() {
    let mut engine = engine();
    for request in [
        Request::StartLog,
        Request::StopLog,
        Request::SetLogPeriod(100),
        Request::DumpRegion {
            address: BASE,
            length: 4,
        },
        Request::Bypass(&[1, 2, 3]),
    ] {
        assert_eq!(transact(&mut engine, 3, request), None);
    }
    assert!(!engine.is_authenticated());
    assert!(!engine.is_connected());
    assert_eq!(engine.session().master_seq, 0);
    assert_eq!(engine.session().slave_seq, 1);
}

#[test]
fn authenticate_returns_version_block() {
    let mut engine = engine();
    let reply = transact(&mut engine, 1, Request::Authenticate(PASSKEY)).unwrap();
    assert_eq!(reply.seq, 0x12);
    assert_eq!(reply.payload, VERSION);
    assert!(engine.is_authenticated());
}

#[test]
fn wrong_passkey_deauthenticates() {
    let mut engine = engine();
    authenticate(&mut engine);
    assert_eq!(
        transact(&mut engine, 2, Request::Authenticate(0x0BAD_F00D)),
        None
    );
    assert!(!engine.is_authenticated());
    assert_eq!(transact(&mut engine, 3, Request::StopLog), None);
}

#[test]
fn sequence_accounting() {
    let mut engine = engine();
    authenticate(&mut engine);

    let mut slaves = Vec::new();
    for i in 0..16u8 {
        let master = i % 16;
        let reply = transact(&mut engine, master, Request::StopLog).unwrap();
        assert_eq!(reply.seq >> 4, master);
        slaves.push(reply.seq & 0x0F);
    }
    assert_eq!(
        slaves,
        [3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 1, 2, 3]
    );

    // A rejected request changes nothing
    assert_eq!(transact(&mut engine, 9, Request::SetLogPeriod(0)), None);
    assert_eq!(engine.session().master_seq, 0xF0);
    assert_eq!(engine.session().slave_seq, 3);

    let reply = transact(&mut engine, 4, Request::StopLog).unwrap();
    assert_eq!(reply.seq, 0x44);
}

#[test]
fn crc_error_ignored() {
    let mut engine = engine();
    let mut buf = [0u8; MAX_ENCODED_REQUEST];
    let len = Request::Authenticate(PASSKEY)
        .encode(0, AddressWidth::Four, &mut buf)
        .unwrap();
    assert_eq!(len, 8);
    buf[len - 2] ^= 0x01;
    push_bytes(&mut engine, &buf[..len]);
    engine.tick(TICK_MS);
    assert!(drain(&mut engine).is_empty());
    assert!(!engine.is_authenticated());
}

#[test]
fn noise_and_double_delimiters_tolerated() {
    let mut engine = engine();
    push_bytes(&mut engine, &[0x55, 0xAA, 0xDB, END]);
    send(&mut engine, 1, Request::Authenticate(PASSKEY));
    engine.tick(TICK_MS);
    assert_eq!(drain(&mut engine).len(), 1);
    assert!(engine.is_authenticated());
}

#[test]
fn malformed_escape_discards_frame() {
    let mut engine = engine();
    push_bytes(&mut engine, &[END, 0x06, 0xDB, 0x01]);
    send(&mut engine, 1, Request::Authenticate(PASSKEY));
    engine.tick(TICK_MS);
    assert_eq!(drain(&mut engine).len(), 1);
}

#[test]
fn stalled_frame_times_out() {
    let mut engine = engine();
    let mut buf = [0u8; MAX_ENCODED_REQUEST];
    let len = Request::Authenticate(PASSKEY)
        .encode(1, AddressWidth::Four, &mut buf)
        .unwrap();

    // Half a frame, then silence
    push_bytes(&mut engine, &buf[..4]);
    tick_for(&mut engine, 200);

    // The rest alone is not a valid frame
    push_bytes(&mut engine, &buf[4..len]);
    engine.tick(TICK_MS);
    assert!(drain(&mut engine).is_empty());
    assert!(!engine.is_authenticated());
}

#[test]
fn write_then_dump() {
    let mut engine = engine();
    authenticate(&mut engine);

    let reply = transact(
        &mut engine,
        2,
        Request::WriteValue {
            address: BASE + 0x80,
            value: Value::U32(0x1234_5678),
        },
    )
    .unwrap();
    assert!(reply.payload.is_empty());
    assert_eq!(
        engine.memory().peek(BASE + 0x80, 4).unwrap(),
        &[0x78, 0x56, 0x34, 0x12]
    );

    let reply = transact(
        &mut engine,
        3,
        Request::DumpRegion {
            address: BASE + 0x7E,
            length: 8,
        },
    )
    .unwrap();
    assert_eq!(reply.payload, [0, 0, 0x78, 0x56, 0x34, 0x12, 0, 0]);
}

#[test]
fn write_outside_memory_ignored() {
    let mut engine = engine();
    authenticate(&mut engine);
    let reply = transact(
        &mut engine,
        2,
        Request::WriteValue {
            address: 0x1000_0000,
            value: Value::U8(1),
        },
    );
    assert_eq!(reply, None);
    assert_eq!(engine.session().master_seq, 0x10);
}

#[test]
fn dump_too_large_ignored() {
    let mut engine = engine();
    authenticate(&mut engine);
    let reply = transact(
        &mut engine,
        2,
        Request::DumpRegion {
            address: BASE,
            length: 129,
        },
    );
    assert_eq!(reply, None);
}

#[test]
fn logging_end_to_end() {
    let mut engine = engine();
    authenticate(&mut engine);
    engine
        .memory_mut()
        .load(BASE + 0x40, &0xCAFE_F00Du32.to_le_bytes())
        .unwrap();

    let reply = targets(&mut engine, 2, &[LogTarget::new(DataWidth::U32, BASE + 0x40)]);
    assert!(reply.unwrap().payload.is_empty());

    let reply = transact(&mut engine, 3, Request::StartLog).unwrap();
    assert!(reply.payload.is_empty());
    assert!(engine.is_connected());

    // Already logging
    assert_eq!(transact(&mut engine, 4, Request::StartLog), None);
    assert_eq!(engine.session().master_seq, 0x40);

    let frames = tick_for(&mut engine, 500);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, [0x0D, 0xF0, 0xFE, 0xCA]);
    assert_eq!(frames[0].seq >> 4, 4);

    // Writes while logging are silent, but show up in the telemetry
    let reply = transact(
        &mut engine,
        5,
        Request::WriteValue {
            address: BASE + 0x40,
            value: Value::U8(0xAA),
        },
    );
    assert_eq!(reply, None);
    let frames = tick_for(&mut engine, 500);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, [0xAA, 0xF0, 0xFE, 0xCA]);
    assert_eq!(frames[0].seq >> 4, 5);

    assert!(transact(&mut engine, 6, Request::StopLog).is_some());
    assert!(tick_for(&mut engine, 1000).is_empty());
}

#[test]
fn telemetry_advances_slave_seq() {
    let mut engine = engine();
    authenticate(&mut engine);
    targets(&mut engine, 2, &[LogTarget::new(DataWidth::U8, BASE)]);
    assert!(transact(&mut engine, 3, Request::SetLogPeriod(100)).is_some());
    let reply = transact(&mut engine, 4, Request::StartLog).unwrap();
    assert_eq!(reply.seq, 0x45);

    let frames = tick_for(&mut engine, 300);
    let seqs: Vec<u8> = frames.iter().map(|f| f.seq).collect();
    assert_eq!(seqs, [0x46, 0x47, 0x48]);
    assert!(frames.iter().all(|f| f.payload == [VERSION[0]]));
}

#[test]
fn telemetry_skipped_while_transmitter_busy() {
    let mut engine = engine();
    authenticate(&mut engine);
    targets(&mut engine, 2, &[LogTarget::new(DataWidth::U8, BASE)]);
    assert!(transact(&mut engine, 3, Request::SetLogPeriod(100)).is_some());
    assert_eq!(transact(&mut engine, 4, Request::StartLog).unwrap().seq, 0x45);

    // Three intervals pass, but only the first sample finds the
    // transmitter free
    tick_undrained(&mut engine, 300);
    let frames = drain(&mut engine);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].seq, 0x46);
    assert_eq!(engine.session().slave_seq, 6);

    // No backlog, and no gap in the sequence
    let seqs: Vec<u8> = tick_for(&mut engine, 100).iter().map(|f| f.seq).collect();
    assert_eq!(seqs, [0x47]);
}

#[test]
fn telemetry_skipped_while_reply_pending() {
    let mut engine = engine();
    authenticate(&mut engine);
    targets(&mut engine, 2, &[LogTarget::new(DataWidth::U8, BASE)]);

    // Leave the set-log-period reply in the transmitter, so the start-log
    // reply stays pending while logging runs
    send(&mut engine, 3, Request::SetLogPeriod(100));
    engine.tick(TICK_MS);
    send(&mut engine, 4, Request::StartLog);
    tick_undrained(&mut engine, 200);
    assert!(engine.is_connected());
    assert!(engine.session().is_reply_pending);

    let frames = drain(&mut engine);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].seq, 0x34);
    assert_eq!(engine.session().slave_seq, 4);

    // The reply goes first, and takes the next sequence number
    engine.tick(TICK_MS);
    let frames = drain(&mut engine);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].seq, 0x45);
    assert!(frames[0].payload.is_empty());

    let frames = tick_for(&mut engine, 100);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].seq, 0x46);
    assert_eq!(frames[0].payload, [VERSION[0]]);
}

#[test]
fn chunked_target_configuration() {
    let mut engine = engine();
    authenticate(&mut engine);
    engine.memory_mut().load(BASE + 0x10, &[0x11]).unwrap();
    engine
        .memory_mut()
        .load(BASE + 0x20, &0x2233u16.to_le_bytes())
        .unwrap();

    let first = [LogTarget::new(DataWidth::U8, BASE + 0x10)];
    let reply = transact(
        &mut engine,
        2,
        Request::ConfigureLogTargets {
            start: true,
            end: false,
            targets: &first,
        },
    );
    assert!(reply.is_some());
    assert_eq!(engine.log_targets().committed_count(), 0);

    // Nothing committed, so nothing to log
    assert!(transact(&mut engine, 3, Request::StartLog).is_some());
    assert!(tick_for(&mut engine, 1000).is_empty());

    let second = [LogTarget::new(DataWidth::U16, BASE + 0x20)];
    let reply = transact(
        &mut engine,
        4,
        Request::ConfigureLogTargets {
            start: false,
            end: true,
            targets: &second,
        },
    );
    assert!(reply.is_some());
    assert_eq!(
        engine.log_targets().committed(),
        &[
            LogTarget::new(DataWidth::U8, BASE + 0x10),
            LogTarget::new(DataWidth::U16, BASE + 0x20)
        ]
    );

    // Configuring stopped logging
    assert!(!engine.is_connected());
    assert!(transact(&mut engine, 5, Request::StartLog).is_some());
    let frames = tick_for(&mut engine, 500);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, [0x11, 0x33, 0x22]);
}

#[test]
fn bad_configuration_discards_live_targets() {
    let mut engine = engine();
    authenticate(&mut engine);
    targets(&mut engine, 2, &[LogTarget::new(DataWidth::U8, BASE)]);
    assert_eq!(engine.log_targets().committed_count(), 1);

    // Size code 3 is not a valid width
    let a = BASE.to_le_bytes();
    let mut raw = [0x35, 0x30, 3, a[0], a[1], a[2], a[3], 0];
    raw[7] = crc::compute(&raw[..7]);
    push_bytes(&mut engine, &[END]);
    push_bytes(&mut engine, &raw);
    push_bytes(&mut engine, &[END]);
    engine.tick(TICK_MS);

    assert!(drain(&mut engine).is_empty());
    assert_eq!(engine.log_targets().committed_count(), 0);
    assert_eq!(engine.session().master_seq, 0x20);
}

#[test]
fn watchdog_stops_logging() {
    let mut engine = engine();
    authenticate(&mut engine);
    targets(&mut engine, 2, &[LogTarget::new(DataWidth::U8, BASE)]);
    assert!(transact(&mut engine, 3, Request::StartLog).is_some());

    // Telemetry flows until the host has been silent for 2s
    let frames = tick_for(&mut engine, 2500);
    assert_eq!(frames.len(), 3);
    assert!(!engine.is_connected());
    assert!(tick_for(&mut engine, 1000).is_empty());
}

#[test]
fn requests_feed_watchdog() {
    let mut engine = engine();
    authenticate(&mut engine);
    targets(&mut engine, 2, &[LogTarget::new(DataWidth::U8, BASE)]);
    assert!(transact(&mut engine, 3, Request::StartLog).is_some());

    for master in 4..10 {
        tick_for(&mut engine, 1000);
        assert_eq!(transact(&mut engine, master, Request::StartLog), None);
    }
    assert!(engine.is_connected());
}

#[test]
fn bypass_handler_replies() {
    let reverse = |payload: &[u8], reply: &mut [u8]| {
        for (out, byte) in reply.iter_mut().zip(payload.iter().rev()) {
            *out = *byte;
        }
        Ok::<_, rmcomm::Error>(BypassResponse::reply(payload.len()))
    };
    let mut engine = Engine::with_bypass(config(BASE), memory(BASE), reverse);
    authenticate(&mut engine);

    let reply = transact(&mut engine, 2, Request::Bypass(&[1, 2, 3])).unwrap();
    assert_eq!(reply.payload, [3, 2, 1]);
}

#[test]
fn bypass_without_handler_ignored() {
    let mut engine = engine();
    authenticate(&mut engine);
    assert_eq!(transact(&mut engine, 2, Request::Bypass(&[1, 2, 3])), None);
}

#[test]
fn two_byte_addressing() {
    const BASE16: u32 = 0x0100;
    let config = config(BASE16).with_address_width(AddressWidth::Two);
    let mut engine = Engine::new(config, memory(BASE16));
    authenticate(&mut engine);

    let reply = transact(
        &mut engine,
        2,
        Request::WriteValue {
            address: BASE16 + 0x80,
            value: Value::U16(0xBEEF),
        },
    );
    assert!(reply.is_some());
    assert_eq!(
        engine.memory().peek(BASE16 + 0x80, 2).unwrap(),
        &[0xEF, 0xBE]
    );

    let reply = transact(
        &mut engine,
        3,
        Request::DumpRegion {
            address: BASE16 + 0x80,
            length: 2,
        },
    )
    .unwrap();
    assert_eq!(reply.payload, [0xEF, 0xBE]);

    let reply = targets(
        &mut engine,
        4,
        &[
            LogTarget::new(DataWidth::U16, BASE16 + 0x80),
            LogTarget::new(DataWidth::U8, BASE16),
        ],
    );
    assert!(reply.is_some());
    assert!(transact(&mut engine, 5, Request::StartLog).is_some());
    let frames = tick_for(&mut engine, 500);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, [0xEF, 0xBE, VERSION[0]]);
}
