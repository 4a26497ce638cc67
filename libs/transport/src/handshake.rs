//! Connection handshake messages.
//!
//! Carried in CONTROL frames. The initiator sends a connect request; the
//! acceptor answers with an ack (negotiated values) or a nak (reason text).
//! Negotiation is take-it-or-leave-it: the ack's ping timeout and fragment
//! size are final for the life of the channel.

use byteorder::{BigEndian, ByteOrder};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Result, TransportError};
use crate::options::CompressionMode;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Opcode {
    ConnectReq = 1,
    ConnectAck = 2,
    ConnectNak = 3,
}

/// Initiator's half of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReq {
    pub protocol_type: u8,
    pub major_version: u8,
    pub minor_version: u8,
    /// Seconds; the acceptor may lower it.
    pub ping_timeout_secs: u8,
    pub compression: CompressionMode,
    pub max_fragment_size: u32,
    pub component_name: Vec<u8>,
}

impl ConnectReq {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10 + self.component_name.len());
        out.push(Opcode::ConnectReq.into());
        out.push(self.protocol_type);
        out.push(self.major_version);
        out.push(self.minor_version);
        out.push(self.ping_timeout_secs);
        out.push(self.compression.into());
        let mut frag = [0u8; 4];
        BigEndian::write_u32(&mut frag, self.max_fragment_size);
        out.extend_from_slice(&frag);
        out.push(self.component_name.len().min(255) as u8);
        out.extend_from_slice(&self.component_name[..self.component_name.len().min(255)]);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<ConnectReq> {
        if payload.len() < 11 || payload[0] != u8::from(Opcode::ConnectReq) {
            return Err(TransportError::HandshakeProtocol("malformed connect request"));
        }
        let compression = CompressionMode::try_from(payload[5])
            .map_err(|_| TransportError::HandshakeProtocol("unknown compression mode"))?;
        let name_len = usize::from(payload[10]);
        if payload.len() < 11 + name_len {
            return Err(TransportError::HandshakeProtocol("truncated component name"));
        }
        Ok(ConnectReq {
            protocol_type: payload[1],
            major_version: payload[2],
            minor_version: payload[3],
            ping_timeout_secs: payload[4],
            compression,
            max_fragment_size: BigEndian::read_u32(&payload[6..10]),
            component_name: payload[11..11 + name_len].to_vec(),
        })
    }
}

/// Acceptor's positive answer with the negotiated session parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectAck {
    pub ping_timeout_secs: u8,
    pub major_version: u8,
    pub minor_version: u8,
    pub max_fragment_size: u32,
}

impl ConnectAck {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        out.push(Opcode::ConnectAck.into());
        out.push(self.ping_timeout_secs);
        out.push(self.major_version);
        out.push(self.minor_version);
        let mut frag = [0u8; 4];
        BigEndian::write_u32(&mut frag, self.max_fragment_size);
        out.extend_from_slice(&frag);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<ConnectAck> {
        if payload.len() < 8 || payload[0] != u8::from(Opcode::ConnectAck) {
            return Err(TransportError::HandshakeProtocol("malformed connect ack"));
        }
        Ok(ConnectAck {
            ping_timeout_secs: payload[1],
            major_version: payload[2],
            minor_version: payload[3],
            max_fragment_size: BigEndian::read_u32(&payload[4..8]),
        })
    }
}

/// Acceptor's rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectNak {
    pub reason: Vec<u8>,
}

impl ConnectNak {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.reason.len());
        out.push(Opcode::ConnectNak.into());
        let mut len = [0u8; 2];
        BigEndian::write_u16(&mut len, self.reason.len().min(0xFFFF) as u16);
        out.extend_from_slice(&len);
        out.extend_from_slice(&self.reason[..self.reason.len().min(0xFFFF)]);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<ConnectNak> {
        if payload.len() < 3 || payload[0] != u8::from(Opcode::ConnectNak) {
            return Err(TransportError::HandshakeProtocol("malformed connect nak"));
        }
        let len = usize::from(BigEndian::read_u16(&payload[1..3]));
        if payload.len() < 3 + len {
            return Err(TransportError::HandshakeProtocol("truncated nak reason"));
        }
        Ok(ConnectNak {
            reason: payload[3..3 + len].to_vec(),
        })
    }
}
