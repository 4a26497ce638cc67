//! Message fragmentation and reassembly.
//!
//! Payloads larger than the negotiated fragment size are split across
//! packets: the first fragment announces the total payload length and a
//! rolling fragment id, continuations repeat the id, and reassembly
//! completes when the accumulated bytes reach the announced total. One
//! reassembly is in progress per channel at a time; it persists across
//! `read` calls until the terminating fragment arrives.

use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::frame::{flags, FrameHeader, FRAME_HEADER_LEN, MAX_FRAME_LEN};

/// First-fragment preamble: total length (u32) + fragment id (u8).
pub(crate) const FIRST_FRAG_OVERHEAD: usize = 5;
/// Continuation preamble: fragment id (u8).
pub(crate) const NEXT_FRAG_OVERHEAD: usize = 1;

/// Splits one oversized payload into wire frames.
///
/// Stateful so a split can be suspended when the outbound queue fills and
/// resumed on the next `write` call with the same buffer.
#[derive(Debug)]
pub(crate) struct FragmentSplit {
    frag_id: u8,
    total: usize,
    offset: usize,
    first_sent: bool,
}

impl FragmentSplit {
    pub fn new(total: usize, frag_id: u8) -> Self {
        FragmentSplit {
            frag_id,
            total,
            offset: 0,
            first_sent: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.first_sent && self.offset >= self.total
    }

    /// Build the next wire frame from `payload`, or `None` when the split
    /// is complete. `fragment_size` bounds the payload bytes per frame
    /// (preamble included).
    pub fn next_frame(&mut self, payload: &[u8], fragment_size: usize) -> Option<Vec<u8>> {
        debug_assert_eq!(payload.len(), self.total);
        debug_assert!(fragment_size + FRAME_HEADER_LEN <= MAX_FRAME_LEN);
        if self.is_done() {
            return None;
        }
        let (overhead, flag) = if !self.first_sent {
            (FIRST_FRAG_OVERHEAD, flags::DATA | flags::FIRST_FRAGMENT)
        } else {
            (NEXT_FRAG_OVERHEAD, flags::DATA | flags::FRAGMENT)
        };
        let room = fragment_size.saturating_sub(overhead);
        debug_assert!(room > 0, "fragment size too small for preambles");
        let take = room.min(self.total - self.offset);

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + overhead + take);
        frame.extend_from_slice(&FrameHeader::new(flag, overhead + take).encode());
        if !self.first_sent {
            let mut total = [0u8; 4];
            BigEndian::write_u32(&mut total, self.total as u32);
            frame.extend_from_slice(&total);
        }
        frame.push(self.frag_id);
        frame.extend_from_slice(&payload[self.offset..self.offset + take]);

        self.offset += take;
        self.first_sent = true;
        trace!(
            frag_id = self.frag_id,
            offset = self.offset,
            total = self.total,
            "built fragment frame"
        );
        Some(frame)
    }
}

/// The single in-progress reassembly slot of a channel.
#[derive(Debug)]
pub(crate) struct Reassembly {
    frag_id: u8,
    total: usize,
    acc: Vec<u8>,
}

impl Reassembly {
    /// Start from a first-fragment payload (preamble included).
    pub fn start(payload: &[u8]) -> Result<Reassembly> {
        if payload.len() < FIRST_FRAG_OVERHEAD {
            return Err(TransportError::Framing("short first fragment"));
        }
        let total = BigEndian::read_u32(&payload[0..4]) as usize;
        let frag_id = payload[4];
        let mut acc = Vec::with_capacity(total);
        acc.extend_from_slice(&payload[FIRST_FRAG_OVERHEAD..]);
        if acc.len() > total {
            return Err(TransportError::Framing("fragment overruns announced total"));
        }
        Ok(Reassembly {
            frag_id,
            total,
            acc,
        })
    }

    /// Feed a continuation payload (preamble included). Returns the whole
    /// logical message when the announced total is reached.
    pub fn feed(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        if payload.is_empty() {
            return Err(TransportError::Framing("empty continuation fragment"));
        }
        if payload[0] != self.frag_id {
            return Err(TransportError::Framing("fragment id mismatch"));
        }
        self.acc.extend_from_slice(&payload[NEXT_FRAG_OVERHEAD..]);
        if self.acc.len() > self.total {
            return Err(TransportError::Framing("fragment overruns announced total"));
        }
        if self.acc.len() == self.total {
            return Ok(Some(std::mem::take(&mut self.acc)));
        }
        Ok(None)
    }

    /// Degenerate case: the first fragment already carries everything.
    pub fn try_complete(&mut self) -> Option<Vec<u8>> {
        if self.acc.len() == self.total {
            Some(std::mem::take(&mut self.acc))
        } else {
            None
        }
    }
}
