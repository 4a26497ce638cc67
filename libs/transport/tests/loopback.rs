//! Channel tests against a scripted acceptor on a loopback socket.
//!
//! The acceptor thread implements the handshake's accept side (its wire
//! behavior is specified here, in test form) and then echoes every byte
//! back, so whatever the channel sends (frames, fragments, heartbeats)
//! comes back through its own read path.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use transport::frame::{flags, FrameHeader, FRAME_HEADER_LEN};
use transport::handshake::{ConnectAck, ConnectNak, ConnectReq};
use transport::{
    Channel, ChannelState, ConnectOptions, FlushOutcome, InitStatus, PingEvent, PingManager,
    ReadEvent, TransportError, WriteArgs, WriteOutcome,
};

enum AcceptorMode {
    /// Answer with this ack, then echo all bytes back.
    Echo(ConnectAck),
    /// Refuse the session.
    Reject(&'static str),
}

fn read_frame(stream: &mut TcpStream) -> std::io::Result<(FrameHeader, Vec<u8>)> {
    let mut header_bytes = [0u8; FRAME_HEADER_LEN];
    stream.read_exact(&mut header_bytes)?;
    let header = FrameHeader::decode(&header_bytes).expect("three bytes decode");
    let mut payload = vec![0u8; header.payload_len()];
    stream.read_exact(&mut payload)?;
    Ok((header, payload))
}

fn control_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&FrameHeader::new(flags::CONTROL, payload.len()).encode());
    frame.extend_from_slice(payload);
    frame
}

fn spawn_acceptor(mode: AcceptorMode) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        stream.set_nodelay(true).ok();
        let (header, payload) = read_frame(&mut stream).expect("connect request frame");
        assert!(header.is_control());
        let req = ConnectReq::decode(&payload).expect("well-formed connect request");
        assert_eq!(req.major_version, 14);
        match mode {
            AcceptorMode::Reject(reason) => {
                let nak = ConnectNak {
                    reason: reason.as_bytes().to_vec(),
                };
                stream.write_all(&control_frame(&nak.encode())).unwrap();
            }
            AcceptorMode::Echo(ack) => {
                stream.write_all(&control_frame(&ack.encode())).unwrap();
                let mut buf = [0u8; 16 * 1024];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
    });
    (addr, handle)
}

fn default_ack() -> ConnectAck {
    ConnectAck {
        ping_timeout_secs: 30,
        major_version: 14,
        minor_version: 1,
        max_fragment_size: 1024,
    }
}

fn connect_active(addr: SocketAddr, options_tweak: impl FnOnce(&mut ConnectOptions)) -> Channel {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut options = ConnectOptions::new(addr.ip().to_string(), addr.port());
    options.component_name = "loopback-test".to_string();
    options_tweak(&mut options);
    let mut channel = Channel::connect(&options).expect("connect");
    assert_eq!(channel.state(), ChannelState::Connecting);
    init_until_active(&mut channel);
    channel
}

fn init_until_active(channel: &mut Channel) {
    for _ in 0..1000 {
        match channel.init().expect("init") {
            InitStatus::Active => return,
            InitStatus::InProgress { fd_changed } => {
                assert!(!fd_changed);
                thread::sleep(Duration::from_millis(2));
            }
        }
    }
    panic!("handshake never completed");
}

fn read_until_event(channel: &mut Channel) -> ReadEvent {
    for _ in 0..2000 {
        match channel.read().expect("read") {
            ReadEvent::WouldBlock => thread::sleep(Duration::from_millis(1)),
            event => return event,
        }
    }
    panic!("no event arrived");
}

#[test]
fn handshake_negotiates_session_parameters() {
    let (addr, acceptor) = spawn_acceptor(AcceptorMode::Echo(default_ack()));
    let mut channel = connect_active(addr, |_| {});
    let negotiated = channel.negotiated().expect("negotiated");
    assert_eq!(negotiated.ping_timeout, Duration::from_secs(30));
    assert_eq!(negotiated.max_fragment_size, 1024);
    assert_eq!(negotiated.version.major, 14);
    assert_eq!(negotiated.version.minor, 1);
    channel.close().unwrap();
    assert_eq!(channel.state(), ChannelState::Closed);
    acceptor.join().unwrap();
}

#[test]
fn handshake_rejection_closes_the_channel() {
    let (addr, acceptor) = spawn_acceptor(AcceptorMode::Reject("protocol type mismatch"));
    let mut options = ConnectOptions::new(addr.ip().to_string(), addr.port());
    options.protocol_type = 9;
    let mut channel = Channel::connect(&options).expect("connect");
    let err = loop {
        match channel.init() {
            Ok(InitStatus::Active) => panic!("activation after a nak"),
            Ok(InitStatus::InProgress { .. }) => thread::sleep(Duration::from_millis(2)),
            Err(e) => break e,
        }
    };
    match err {
        TransportError::HandshakeRejected(reason) => {
            assert_eq!(reason, "protocol type mismatch");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(channel.state(), ChannelState::Closed);
    acceptor.join().unwrap();
}

#[test]
fn small_message_round_trips_through_the_echo() {
    let (addr, acceptor) = spawn_acceptor(AcceptorMode::Echo(default_ack()));
    let mut channel = connect_active(addr, |_| {});

    let payload: Vec<u8> = (0..200u16).map(|i| (i % 256) as u8).collect();
    let handle = channel.get_buffer(payload.len()).unwrap().expect("buffer");
    channel.buffer_mut(handle).unwrap()[..payload.len()].copy_from_slice(&payload);
    let outcome = channel
        .write(handle, payload.len(), WriteArgs { direct_write: true })
        .unwrap();
    assert!(matches!(
        outcome,
        WriteOutcome::Flushed | WriteOutcome::Queued { .. }
    ));
    while channel.flush().unwrap() == FlushOutcome::MoreToFlush {
        thread::sleep(Duration::from_millis(1));
    }

    match read_until_event(&mut channel) {
        ReadEvent::Message(received) => assert_eq!(received, payload),
        other => panic!("unexpected event: {other:?}"),
    }
    channel.close().unwrap();
    acceptor.join().unwrap();
}

#[test]
fn oversized_message_fragments_and_reassembles() {
    let (addr, acceptor) = spawn_acceptor(AcceptorMode::Echo(default_ack()));
    let mut channel = connect_active(addr, |options| {
        options.guaranteed_output_buffers = 4;
    });

    // four times the negotiated fragment size
    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let handle = channel.get_buffer(payload.len()).unwrap().expect("buffer");
    assert!(handle.is_overflow());
    channel.buffer_mut(handle).unwrap()[..payload.len()].copy_from_slice(&payload);

    // resubmit the same buffer after flushing until the split completes
    let mut attempts = 0;
    loop {
        match channel
            .write(handle, payload.len(), WriteArgs { direct_write: true })
            .unwrap()
        {
            WriteOutcome::CallAgain => {
                attempts += 1;
                assert!(attempts < 100, "split never completed");
                while channel.flush().unwrap() == FlushOutcome::MoreToFlush {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            WriteOutcome::Flushed | WriteOutcome::Queued { .. } => break,
        }
    }
    while channel.flush().unwrap() == FlushOutcome::MoreToFlush {
        thread::sleep(Duration::from_millis(1));
    }

    match read_until_event(&mut channel) {
        ReadEvent::Message(received) => {
            assert_eq!(received.len(), payload.len());
            assert_eq!(received, payload);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    channel.close().unwrap();
    acceptor.join().unwrap();
}

#[test]
fn exhausted_pool_recovers_after_flush() {
    let (addr, acceptor) = spawn_acceptor(AcceptorMode::Echo(default_ack()));
    let mut channel = connect_active(addr, |options| {
        options.guaranteed_output_buffers = 1;
    });

    let handle = channel.get_buffer(512).unwrap().expect("first buffer");
    channel.buffer_mut(handle).unwrap()[..4].copy_from_slice(b"tick");
    // plain write only queues; the slot stays owned by the flush queue
    assert!(matches!(
        channel.write(handle, 4, WriteArgs::default()).unwrap(),
        WriteOutcome::Queued { .. }
    ));
    assert!(channel.get_buffer(512).unwrap().is_none());

    // the documented two-step recovery: flush, then retry
    while channel.flush().unwrap() == FlushOutcome::MoreToFlush {
        thread::sleep(Duration::from_millis(1));
    }
    let recovered = channel.get_buffer(512).unwrap();
    assert!(recovered.is_some());
    channel.release_buffer(recovered.unwrap()).unwrap();
    channel.close().unwrap();
    acceptor.join().unwrap();
}

#[test]
fn stale_handle_after_write_is_rejected() {
    let (addr, acceptor) = spawn_acceptor(AcceptorMode::Echo(default_ack()));
    let mut channel = connect_active(addr, |_| {});

    let handle = channel.get_buffer(64).unwrap().expect("buffer");
    channel.buffer_mut(handle).unwrap()[..2].copy_from_slice(b"ok");
    channel
        .write(handle, 2, WriteArgs { direct_write: true })
        .unwrap();
    while channel.flush().unwrap() == FlushOutcome::MoreToFlush {
        thread::sleep(Duration::from_millis(1));
    }
    // the flushed slot went back to the pool; the old handle is dead
    assert!(matches!(
        channel.buffer_mut(handle),
        Err(TransportError::StaleBuffer)
    ));
    channel.close().unwrap();
    acceptor.join().unwrap();
}

#[test]
fn heartbeats_flow_and_feed_liveness() {
    let (addr, acceptor) = spawn_acceptor(AcceptorMode::Echo(default_ack()));
    let mut channel = connect_active(addr, |_| {});
    let timeout = channel.negotiated().unwrap().ping_timeout;

    let start = Instant::now();
    let mut manager = PingManager::new(timeout, start);

    // a third of the window later, a heartbeat goes out
    let event = manager
        .tick(start + timeout / 3, &mut channel)
        .expect("tick");
    assert_eq!(event, PingEvent::Sent);

    // the echo returns it; reading it marks the channel as alive
    match read_until_event(&mut channel) {
        ReadEvent::Ping => {}
        other => panic!("unexpected event: {other:?}"),
    }

    // at the deadline the received heartbeat keeps the channel alive
    let event = manager.tick(start + timeout, &mut channel).expect("tick");
    assert_ne!(event, PingEvent::LivenessExpired);

    // a full silent window later, liveness fails
    let err = manager
        .tick(start + timeout + timeout, &mut channel)
        .expect_err("silence is fatal");
    assert!(matches!(err, TransportError::LivenessTimeout));
    channel.close().unwrap();
    acceptor.join().unwrap();
}

#[test]
fn operations_after_close_are_invalid() {
    let (addr, acceptor) = spawn_acceptor(AcceptorMode::Echo(default_ack()));
    let mut channel = connect_active(addr, |_| {});
    channel.close().unwrap();
    assert!(matches!(
        channel.read(),
        Err(TransportError::InvalidState(_))
    ));
    assert!(matches!(
        channel.flush(),
        Err(TransportError::InvalidState(_))
    ));
    assert!(matches!(
        channel.close(),
        Err(TransportError::InvalidState(_))
    ));
    acceptor.join().unwrap();
}
