//! Channel state machine.
//!
//! Lifecycle: `Inactive → Connecting → Active → Closed`, with `Closed`
//! reachable straight from `Connecting` on handshake rejection. Everything
//! is non-blocking and caller-driven: the application owns the readiness
//! loop and calls `init`/`read`/`write`/`flush` (and the ping manager's
//! tick) when its multiplexer says the socket is ready. No operation here
//! spawns a thread or sleeps.
//!
//! Buffer length duality: a buffer freshly acquired with [`get_buffer`]
//! exposes its *capacity*; after encoding, the length handed to [`write`]
//! means *bytes used*. The pool documents the same contract on its side.
//!
//! [`get_buffer`]: Channel::get_buffer
//! [`write`]: Channel::write

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace, warn};

use codec::WireVersion;

use crate::error::{Result, TransportError};
use crate::fragment::{FragmentSplit, Reassembly};
use crate::frame::{flags, FrameHeader, FRAME_HEADER_LEN, MAX_FRAME_LEN, PING_FRAME};
use crate::handshake::{ConnectAck, ConnectNak, ConnectReq, Opcode};
use crate::options::{CompressionMode, ConnectOptions};
use crate::pool::{BufferHandle, BufferPool};

const INITIAL_READ_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Inactive,
    Connecting,
    Active,
    /// Terminal; no further operations are valid.
    Closed,
}

/// Progress of the repeated, non-blocking `init` handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    /// Call `init` again when the socket is next ready. `fd_changed`
    /// reports a swapped descriptor: not an error, but the caller must
    /// re-register the new descriptor with its readiness multiplexer.
    InProgress { fd_changed: bool },
    Active,
}

/// Exactly one of these per successful `read` call.
#[derive(Debug)]
pub enum ReadEvent {
    /// One fully reassembled application buffer.
    Message(Vec<u8>),
    /// Heartbeat: counts as liveness, carries nothing.
    Ping,
    /// No complete frame available; wait for readiness.
    WouldBlock,
    /// The descriptor changed; re-register it. Never produced by this
    /// implementation but part of the read contract.
    FdChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Everything hit the socket.
    Flushed,
    /// Queued for a later `flush`; positive backpressure signal.
    Queued { pending: usize },
    /// The oversized buffer could not be fully queued. Call `flush`, then
    /// resubmit the *same* buffer until no longer `CallAgain`.
    CallAgain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Complete,
    MoreToFlush,
}

/// Per-write knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteArgs {
    /// Attempt to drain the queue inside `write` instead of waiting for an
    /// explicit `flush`.
    pub direct_write: bool,
}

/// Session parameters fixed by the handshake for the life of the channel.
#[derive(Debug, Clone, Copy)]
pub struct Negotiated {
    pub ping_timeout: Duration,
    pub max_fragment_size: usize,
    pub version: WireVersion,
}

#[derive(Debug)]
enum Outgoing {
    /// A pooled slot; frame header already written in front of the payload.
    Slot {
        handle: BufferHandle,
        end: usize,
        offset: usize,
    },
    Owned {
        data: Vec<u8>,
        offset: usize,
    },
}

#[derive(Debug)]
struct PendingBig {
    handle: BufferHandle,
    len: usize,
    split: FragmentSplit,
}

/// One connection's transport endpoint.
pub struct Channel {
    state: ChannelState,
    stream: TcpStream,
    requested: ConnectReq,
    guaranteed_output_buffers: usize,
    negotiated: Option<Negotiated>,
    pool: Option<BufferPool>,
    read_buf: Vec<u8>,
    read_pos: usize,
    read_len: usize,
    out_queue: VecDeque<Outgoing>,
    queue_cap: usize,
    reassembly: Option<Reassembly>,
    next_frag_id: u8,
    pending_big: Option<PendingBig>,
    connect_req_sent: bool,
    received: bool,
}

impl Channel {
    /// OS-level connection setup. Returns a channel in `Connecting`; drive
    /// [`Channel::init`] until it reports `Active`.
    pub fn connect(options: &ConnectOptions) -> Result<Channel> {
        if options.compression != CompressionMode::None {
            return Err(TransportError::UnsupportedOption(
                "compression modes other than None",
            ));
        }
        if options.guaranteed_output_buffers == 0 {
            return Err(TransportError::UnsupportedOption(
                "guaranteed_output_buffers must be nonzero",
            ));
        }
        let addr = (options.host.as_str(), options.port)
            .to_socket_addrs()
            .map_err(TransportError::ConnectFailed)?
            .next()
            .ok_or_else(|| {
                TransportError::ConnectFailed(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "host resolved to no addresses",
                ))
            })?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(TransportError::ConnectFailed)?;
        if let Some(interface) = &options.interface {
            let local: std::net::IpAddr = interface.parse().map_err(|_| {
                TransportError::ConnectFailed(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "interface is not a valid local address",
                ))
            })?;
            socket
                .bind(&std::net::SocketAddr::new(local, 0).into())
                .map_err(TransportError::ConnectFailed)?;
        }
        socket.set_nodelay(true).map_err(TransportError::ConnectFailed)?;
        socket
            .connect(&addr.into())
            .map_err(TransportError::ConnectFailed)?;
        socket
            .set_nonblocking(!options.blocking)
            .map_err(TransportError::ConnectFailed)?;
        let stream: TcpStream = socket.into();
        debug!(host = %options.host, port = options.port, "socket connected, handshake pending");

        let requested = ConnectReq {
            protocol_type: options.protocol_type,
            major_version: options.version.major,
            minor_version: options.version.minor,
            ping_timeout_secs: options.ping_timeout_secs.max(1),
            compression: options.compression,
            max_fragment_size: options.max_fragment_size,
            component_name: options.component_name.as_bytes().to_vec(),
        };

        Ok(Channel {
            state: ChannelState::Connecting,
            stream,
            requested,
            guaranteed_output_buffers: options.guaranteed_output_buffers,
            negotiated: None,
            pool: None,
            read_buf: vec![0u8; INITIAL_READ_BUFFER],
            read_pos: 0,
            read_len: 0,
            out_queue: VecDeque::new(),
            queue_cap: options.guaranteed_output_buffers.max(2),
            reassembly: None,
            next_frag_id: 1,
            pending_big: None,
            connect_req_sent: false,
            received: false,
        })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Session parameters; available once `Active`.
    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    /// Consume the "anything received since last asked" flag. The ping
    /// manager reads this at each liveness deadline.
    pub fn take_received(&mut self) -> bool {
        std::mem::replace(&mut self.received, false)
    }

    /// Drive the handshake one non-blocking step. Call until `Active` or
    /// an error; rejection closes the channel.
    pub fn init(&mut self) -> Result<InitStatus> {
        match self.state {
            ChannelState::Connecting => {}
            ChannelState::Active => return Ok(InitStatus::Active),
            _ => return Err(TransportError::InvalidState("init on a closed channel")),
        }

        if !self.connect_req_sent {
            let req = self.requested.encode();
            let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + req.len());
            frame.extend_from_slice(&FrameHeader::new(flags::CONTROL, req.len()).encode());
            frame.extend_from_slice(&req);
            self.out_queue.push_back(Outgoing::Owned {
                data: frame,
                offset: 0,
            });
            self.connect_req_sent = true;
            trace!("connect request queued");
        }
        self.flush()?;

        self.fill_read_buffer()?;
        if let Some((header, payload)) = self.take_frame()? {
            if !header.is_control() {
                return Err(TransportError::HandshakeProtocol(
                    "data frame before handshake completion",
                ));
            }
            match payload.first().copied().and_then(|op| Opcode::try_from(op).ok()) {
                Some(Opcode::ConnectAck) => {
                    let ack = ConnectAck::decode(&payload)?;
                    self.activate(ack)?;
                    return Ok(InitStatus::Active);
                }
                Some(Opcode::ConnectNak) => {
                    let nak = ConnectNak::decode(&payload)?;
                    let reason = String::from_utf8_lossy(&nak.reason).into_owned();
                    warn!(%reason, "handshake rejected");
                    self.state = ChannelState::Closed;
                    let _ = self.stream.shutdown(std::net::Shutdown::Both);
                    return Err(TransportError::HandshakeRejected(reason));
                }
                _ => {
                    return Err(TransportError::HandshakeProtocol(
                        "unexpected handshake opcode",
                    ))
                }
            }
        }
        Ok(InitStatus::InProgress { fd_changed: false })
    }

    fn activate(&mut self, ack: ConnectAck) -> Result<()> {
        let fragment_size = ack.max_fragment_size as usize;
        if fragment_size < 64 || fragment_size + FRAME_HEADER_LEN > MAX_FRAME_LEN {
            return Err(TransportError::HandshakeProtocol(
                "negotiated fragment size out of range",
            ));
        }
        let negotiated = Negotiated {
            ping_timeout: Duration::from_secs(u64::from(ack.ping_timeout_secs.max(1))),
            max_fragment_size: fragment_size,
            version: WireVersion {
                major: ack.major_version,
                minor: ack.minor_version,
            },
        };
        debug!(
            ping_timeout_secs = ack.ping_timeout_secs,
            fragment_size, "channel active"
        );
        self.pool = Some(BufferPool::new(
            self.guaranteed_output_buffers,
            fragment_size,
        ));
        self.negotiated = Some(negotiated);
        self.state = ChannelState::Active;
        Ok(())
    }

    // -- buffers ----------------------------------------------------------

    /// Acquire an output buffer of at least `size` bytes. `None` is the
    /// recoverable no-buffers condition: `flush` and retry once; a second
    /// failure is terminal for the channel.
    ///
    /// The returned buffer's length is its capacity until encoded into;
    /// afterwards pass bytes-used to [`Channel::write`].
    pub fn get_buffer(&mut self, size: usize) -> Result<Option<BufferHandle>> {
        let pool = self
            .pool
            .as_mut()
            .ok_or(TransportError::InvalidState("channel not active"))?;
        Ok(pool.acquire(size))
    }

    /// The writable payload region behind a handle; bind an encode iterator
    /// to this.
    pub fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut [u8]> {
        self.pool
            .as_mut()
            .ok_or(TransportError::InvalidState("channel not active"))?
            .payload_mut(handle)
    }

    /// Return an unused buffer to the pool. Buffers handed to `write` are
    /// released automatically once flushed.
    pub fn release_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.pool
            .as_mut()
            .ok_or(TransportError::InvalidState("channel not active"))?
            .release(handle)
    }

    // -- write path -------------------------------------------------------

    /// Hand an encoded buffer to the transport. `len` is bytes used.
    /// Fragment-sized buffers are framed in place and queued; oversized
    /// buffers are split, and `CallAgain` means the split was suspended -
    /// `flush` and resubmit the same handle.
    pub fn write(
        &mut self,
        handle: BufferHandle,
        len: usize,
        args: WriteArgs,
    ) -> Result<WriteOutcome> {
        if self.state != ChannelState::Active {
            return Err(TransportError::InvalidState("write on an inactive channel"));
        }
        let capacity = self
            .pool
            .as_ref()
            .ok_or(TransportError::InvalidState("channel not active"))?
            .capacity(handle)?;
        if len > capacity {
            return Err(TransportError::Framing("write length exceeds buffer capacity"));
        }

        if !handle.is_overflow() {
            {
                let pool = self.pool.as_mut().expect("active channel has a pool");
                let slot = pool.slot_mut(handle)?;
                FrameHeader::new(flags::DATA, len).encode_into(&mut slot[..FRAME_HEADER_LEN]);
            }
            self.out_queue.push_back(Outgoing::Slot {
                handle,
                end: FRAME_HEADER_LEN + len,
                offset: 0,
            });
            return self.finish_write(args);
        }

        // oversized: split into fragments, suspending when the queue fills
        match &self.pending_big {
            Some(pending) if pending.handle != handle => {
                return Err(TransportError::InvalidState(
                    "another fragmented write is in progress",
                ));
            }
            Some(pending) if pending.len != len => {
                return Err(TransportError::InvalidState(
                    "resubmitted buffer with a different length",
                ));
            }
            Some(_) => {}
            None => {
                let frag_id = self.next_frag_id;
                self.next_frag_id = self.next_frag_id.wrapping_add(1);
                self.pending_big = Some(PendingBig {
                    handle,
                    len,
                    split: FragmentSplit::new(len, frag_id),
                });
            }
        }

        let fragment_size = self
            .negotiated
            .as_ref()
            .expect("active channel is negotiated")
            .max_fragment_size;
        loop {
            if self.out_queue.len() >= self.queue_cap {
                if args.direct_write {
                    self.flush()?;
                }
                if self.out_queue.len() >= self.queue_cap {
                    trace!("fragment queue full, suspending oversized write");
                    return Ok(WriteOutcome::CallAgain);
                }
            }
            let frame = {
                let pending = self.pending_big.as_mut().expect("pending split");
                let pool = self.pool.as_ref().expect("active channel has a pool");
                let data = &pool.slot(handle)?[..len];
                pending.split.next_frame(data, fragment_size)
            };
            match frame {
                Some(frame) => self.out_queue.push_back(Outgoing::Owned {
                    data: frame,
                    offset: 0,
                }),
                None => {
                    let pending = self.pending_big.take().expect("pending split");
                    self.pool
                        .as_mut()
                        .expect("active channel has a pool")
                        .release(pending.handle)?;
                    return self.finish_write(args);
                }
            }
        }
    }

    fn finish_write(&mut self, args: WriteArgs) -> Result<WriteOutcome> {
        if args.direct_write {
            match self.flush()? {
                FlushOutcome::Complete => Ok(WriteOutcome::Flushed),
                FlushOutcome::MoreToFlush => Ok(WriteOutcome::Queued {
                    pending: self.out_queue.len(),
                }),
            }
        } else {
            Ok(WriteOutcome::Queued {
                pending: self.out_queue.len(),
            })
        }
    }

    /// Drain previously queued bytes without blocking.
    pub fn flush(&mut self) -> Result<FlushOutcome> {
        if self.state == ChannelState::Closed {
            return Err(TransportError::InvalidState("flush on a closed channel"));
        }
        loop {
            let write_result = match self.out_queue.front() {
                None => return Ok(FlushOutcome::Complete),
                Some(Outgoing::Owned { data, offset }) => self.stream.write(&data[*offset..]),
                Some(Outgoing::Slot { handle, end, offset }) => {
                    let pool = self
                        .pool
                        .as_ref()
                        .ok_or(TransportError::InvalidState("channel not active"))?;
                    let slot = pool.slot(*handle)?;
                    self.stream.write(&slot[*offset..*end])
                }
            };
            match write_result {
                Ok(0) => {
                    return Err(TransportError::ChannelDown(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    )))
                }
                Ok(n) => {
                    let finished = {
                        let front = self.out_queue.front_mut().expect("front exists");
                        match front {
                            Outgoing::Owned { data, offset } => {
                                *offset += n;
                                *offset >= data.len()
                            }
                            Outgoing::Slot { end, offset, .. } => {
                                *offset += n;
                                *offset >= *end
                            }
                        }
                    };
                    if finished {
                        if let Some(Outgoing::Slot { handle, .. }) = self.out_queue.pop_front() {
                            self.pool
                                .as_mut()
                                .expect("active channel has a pool")
                                .release(handle)?;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushOutcome::MoreToFlush)
                }
                Err(e) => return Err(TransportError::ChannelDown(e)),
            }
        }
    }

    /// Heartbeat-send primitive. A bare header goes out only when nothing
    /// else is queued: queued data already signals liveness.
    pub fn ping(&mut self) -> Result<()> {
        if self.state != ChannelState::Active {
            return Err(TransportError::InvalidState("ping on an inactive channel"));
        }
        if self.out_queue.is_empty() {
            self.out_queue.push_back(Outgoing::Owned {
                data: PING_FRAME.to_vec(),
                offset: 0,
            });
            trace!("heartbeat queued");
        }
        self.flush()?;
        Ok(())
    }

    // -- read path --------------------------------------------------------

    /// Pull the next inbound event. Fragmented messages surface only when
    /// fully reassembled; mid-message fragments are absorbed here.
    pub fn read(&mut self) -> Result<ReadEvent> {
        if self.state != ChannelState::Active {
            return Err(TransportError::InvalidState("read on an inactive channel"));
        }
        loop {
            if let Some((header, payload)) = self.take_frame()? {
                if header.is_control() {
                    return Err(TransportError::Framing(
                        "control frame on an active channel",
                    ));
                }
                self.received = true;
                if header.is_ping() {
                    trace!("heartbeat received");
                    return Ok(ReadEvent::Ping);
                }
                if header.flags & flags::FIRST_FRAGMENT != 0 {
                    if self.reassembly.is_some() {
                        return Err(TransportError::Framing(
                            "first fragment while reassembly in progress",
                        ));
                    }
                    let mut reassembly = Reassembly::start(&payload)?;
                    if let Some(done) = reassembly.try_complete() {
                        return Ok(ReadEvent::Message(done));
                    }
                    self.reassembly = Some(reassembly);
                    continue;
                }
                if header.flags & flags::FRAGMENT != 0 {
                    let reassembly = self.reassembly.as_mut().ok_or(TransportError::Framing(
                        "continuation fragment without reassembly",
                    ))?;
                    if let Some(done) = reassembly.feed(&payload)? {
                        self.reassembly = None;
                        trace!(len = done.len(), "message reassembled");
                        return Ok(ReadEvent::Message(done));
                    }
                    continue;
                }
                if header.flags & flags::DATA != 0 {
                    return Ok(ReadEvent::Message(payload));
                }
                return Err(TransportError::Framing("unknown frame flags"));
            }
            if self.fill_read_buffer()? == 0 {
                return Ok(ReadEvent::WouldBlock);
            }
        }
    }

    /// Pop one whole frame out of the read buffer, or `None` when more
    /// bytes are needed.
    fn take_frame(&mut self) -> Result<Option<(FrameHeader, Vec<u8>)>> {
        let available = &self.read_buf[self.read_pos..self.read_len];
        let Some(header) = FrameHeader::decode(available) else {
            return Ok(None);
        };
        let frame_len = usize::from(header.length);
        if frame_len < FRAME_HEADER_LEN {
            return Err(TransportError::Framing("frame length below header size"));
        }
        if available.len() < frame_len {
            return Ok(None);
        }
        let payload = available[FRAME_HEADER_LEN..frame_len].to_vec();
        self.read_pos += frame_len;
        Ok(Some((header, payload)))
    }

    /// Compact and refill the read buffer from the socket. Returns bytes
    /// newly read; zero means would-block.
    fn fill_read_buffer(&mut self) -> Result<usize> {
        if self.read_pos > 0 {
            self.read_buf.copy_within(self.read_pos..self.read_len, 0);
            self.read_len -= self.read_pos;
            self.read_pos = 0;
        }
        if self.read_len == self.read_buf.len() {
            // a frame larger than the current buffer; frames are bounded by
            // the u16 length field plus header
            let new_len = (self.read_buf.len() * 2).min(MAX_FRAME_LEN + FRAME_HEADER_LEN);
            if new_len == self.read_buf.len() {
                return Err(TransportError::Framing("frame exceeds maximum size"));
            }
            self.read_buf.resize(new_len, 0);
        }
        match self.stream.read(&mut self.read_buf[self.read_len..]) {
            Ok(0) => Err(TransportError::ChannelDown(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "peer closed the connection",
            ))),
            Ok(n) => {
                self.read_len += n;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(TransportError::ChannelDown(e)),
        }
    }

    // -- teardown ---------------------------------------------------------

    /// Release all pooled buffers and transition to `Closed`. In-flight
    /// partial reads and writes are discarded.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Err(TransportError::InvalidState("channel already closed"));
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.out_queue.clear();
        self.pending_big = None;
        self.reassembly = None;
        self.pool = None;
        self.state = ChannelState::Closed;
        debug!("channel closed");
        Ok(())
    }
}
