//! Wire-level packet framing.
//!
//! Every packet starts with a three-byte header: total length (header
//! included, big-endian) and a flags byte. A bare DATA header with no
//! payload is a heartbeat. Fragmented messages carry a reassembly preamble
//! after the header: the first fragment announces the total payload length
//! and a fragment id; continuations repeat the id.

use byteorder::{BigEndian, ByteOrder};

pub const FRAME_HEADER_LEN: usize = 3;

/// Largest whole frame the length field can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

pub mod flags {
    /// Handshake traffic.
    pub const CONTROL: u8 = 0x01;
    /// Application data (a bare header is a heartbeat).
    pub const DATA: u8 = 0x02;
    /// First fragment of a multi-packet message.
    pub const FIRST_FRAGMENT: u8 = 0x04;
    /// Continuation fragment.
    pub const FRAGMENT: u8 = 0x08;
}

/// A heartbeat is a header-only DATA frame.
pub const PING_FRAME: [u8; FRAME_HEADER_LEN] = [0x00, 0x03, flags::DATA];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total packet length, header included.
    pub length: u16,
    pub flags: u8,
}

impl FrameHeader {
    pub fn new(flags: u8, payload_len: usize) -> Self {
        debug_assert!(payload_len + FRAME_HEADER_LEN <= MAX_FRAME_LEN);
        FrameHeader {
            length: (payload_len + FRAME_HEADER_LEN) as u16,
            flags,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= FRAME_HEADER_LEN);
        BigEndian::write_u16(&mut buf[0..2], self.length);
        buf[2] = self.flags;
    }

    /// `None` when fewer than three bytes are available.
    pub fn decode(buf: &[u8]) -> Option<FrameHeader> {
        if buf.len() < FRAME_HEADER_LEN {
            return None;
        }
        Some(FrameHeader {
            length: BigEndian::read_u16(&buf[0..2]),
            flags: buf[2],
        })
    }

    pub fn payload_len(&self) -> usize {
        usize::from(self.length).saturating_sub(FRAME_HEADER_LEN)
    }

    pub fn is_ping(&self) -> bool {
        self.flags == flags::DATA && usize::from(self.length) == FRAME_HEADER_LEN
    }

    pub fn is_control(&self) -> bool {
        self.flags & flags::CONTROL != 0
    }
}
