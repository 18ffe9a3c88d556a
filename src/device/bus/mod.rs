//! Split-transaction memory bus.
//!
//! The bus has a read side and a write side, each split into independent
//! phases gated by ready/valid handshakes:
//!
//! ```text
//!   requester (engine)                       responder (memory)
//!   ──────────────────                       ──────────────────
//!   read request  {addr, beats, size, mode} ──►  accepted when ready
//!   read data     ◄── {word, last, status}       one beat per handshake
//!
//!   write request {addr, beats, size, mode} ──►  accepted when ready
//!   write data    {word, last}              ──►  one beat per handshake
//!   write response ◄── {status}                  once per burst
//! ```
//!
//! A handshake that does not complete in a cycle is a stall: the requester
//! retries the same call on the next cycle. Those calls are the only points
//! where the engine can block.

pub mod responder;
pub mod timing;

pub use responder::{BusEvent, FaultChannel, FaultWindow, MemoryResponder, ResponderStats};
pub use timing::BusTiming;

use thiserror::Error;

use super::bus_spec::{BURST_BOUNDARY_BYTES, MAX_BURST_BEATS, WORD_BYTES, WORD_SIZE_ENCODING};

/// Address sequencing within a burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BurstMode {
    /// Every beat targets the same address
    Fixed,
    /// Each beat advances the address by the element size
    #[default]
    Incrementing,
}

/// Per-beat or per-burst completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusStatus {
    #[default]
    Okay,
    /// The responder could not complete the access
    SlaveError,
}

impl BusStatus {
    pub fn is_ok(self) -> bool {
        self == BusStatus::Okay
    }
}

/// Burst request, shared by both sides of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstRequest {
    /// Byte address of the first beat
    pub address: u64,
    /// Number of beats (1..=256)
    pub beats: u16,
    /// log2 of bytes per beat
    pub size: u8,
    pub mode: BurstMode,
}

impl BurstRequest {
    /// Incrementing burst of 32-bit words.
    pub fn words(address: u64, beats: u16) -> Self {
        Self {
            address,
            beats,
            size: WORD_SIZE_ENCODING,
            mode: BurstMode::Incrementing,
        }
    }

    pub fn bytes_per_beat(&self) -> u64 {
        1u64 << self.size
    }

    /// Total bytes moved by the burst.
    pub fn byte_len(&self) -> u64 {
        self.beats as u64 * self.bytes_per_beat()
    }

    /// Address of beat `index`.
    pub fn beat_address(&self, index: u16) -> u64 {
        match self.mode {
            BurstMode::Fixed => self.address,
            BurstMode::Incrementing => self.address + index as u64 * self.bytes_per_beat(),
        }
    }

    /// Check the request against the burst rules.
    pub fn check(&self) -> Result<(), BusError> {
        if self.beats == 0 {
            return Err(BusError::EmptyBurst { address: self.address });
        }
        if self.beats > MAX_BURST_BEATS {
            return Err(BusError::BurstTooLong { beats: self.beats });
        }
        if self.bytes_per_beat() != WORD_BYTES {
            return Err(BusError::UnsupportedSize { size: self.size });
        }
        if self.address % WORD_BYTES != 0 {
            return Err(BusError::Misaligned { address: self.address });
        }
        if self.mode == BurstMode::Incrementing {
            let last_byte = self.address + self.byte_len() - 1;
            if self.address / BURST_BOUNDARY_BYTES != last_byte / BURST_BOUNDARY_BYTES {
                return Err(BusError::BoundaryCrossing {
                    address: self.address,
                    beats: self.beats,
                });
            }
        }
        Ok(())
    }
}

pub type ReadRequest = BurstRequest;
pub type WriteRequest = BurstRequest;

/// One beat on the read data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBeat {
    pub data: u32,
    /// Final beat of the burst
    pub last: bool,
    pub status: BusStatus,
}

/// One beat on the write data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBeat {
    pub data: u32,
    /// Final beat of the burst
    pub last: bool,
}

/// Protocol violations observed by a responder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("zero-length burst at 0x{address:x}")]
    EmptyBurst { address: u64 },

    #[error("burst of {beats} beats exceeds the 256-beat limit")]
    BurstTooLong { beats: u16 },

    #[error("unsupported beat size encoding {size}")]
    UnsupportedSize { size: u8 },

    #[error("address 0x{address:x} is not word aligned")]
    Misaligned { address: u64 },

    #[error("burst at 0x{address:x} with {beats} beats crosses a 4 KiB boundary")]
    BoundaryCrossing { address: u64, beats: u16 },

    #[error("write beat {beat} of {beats} has last={last}")]
    LastMismatch { beat: u16, beats: u16, last: bool },
}

/// Responder side of the bus.
///
/// Each method is one handshake attempt for the current cycle. A `false` or
/// `None` return means the responder was not ready and the requester must
/// hold its request and try again after [`tick`](Self::tick).
pub trait BusResponder {
    /// Offer a read request. Returns true if it was accepted this cycle.
    fn try_read_request(&mut self, request: ReadRequest) -> bool;

    /// Take the next read beat if one is valid this cycle.
    fn poll_read_beat(&mut self) -> Option<ReadBeat>;

    /// Offer a write request. Returns true if it was accepted this cycle.
    fn try_write_request(&mut self, request: WriteRequest) -> bool;

    /// Offer a write beat. Returns true if it was accepted this cycle.
    fn try_write_beat(&mut self, beat: WriteBeat) -> bool;

    /// Take the write response if one is valid this cycle.
    fn poll_write_response(&mut self) -> Option<BusStatus>;

    /// Advance the responder by one cycle.
    fn tick(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_request_fields() {
        let req = BurstRequest::words(0x1000, 8);
        assert_eq!(req.bytes_per_beat(), 4);
        assert_eq!(req.byte_len(), 32);
        assert_eq!(req.beat_address(3), 0x100C);
        assert!(req.check().is_ok());
    }

    #[test]
    fn test_fixed_burst_addresses() {
        let req = BurstRequest {
            mode: BurstMode::Fixed,
            ..BurstRequest::words(0x2000, 4)
        };
        assert_eq!(req.beat_address(0), 0x2000);
        assert_eq!(req.beat_address(3), 0x2000);
    }

    #[test]
    fn test_boundary_crossing_rejected() {
        // Two words before the boundary, four beats requested
        let req = BurstRequest::words(0x0FF8, 4);
        assert_eq!(
            req.check(),
            Err(BusError::BoundaryCrossing { address: 0x0FF8, beats: 4 })
        );

        // Ending exactly on the boundary is fine
        assert!(BurstRequest::words(0x0FF8, 2).check().is_ok());
    }

    #[test]
    fn test_invalid_requests() {
        assert!(matches!(BurstRequest::words(0, 0).check(), Err(BusError::EmptyBurst { .. })));
        assert!(matches!(BurstRequest::words(0, 257).check(), Err(BusError::BurstTooLong { .. })));
        assert!(matches!(BurstRequest::words(2, 1).check(), Err(BusError::Misaligned { .. })));

        let wide = BurstRequest { size: 3, ..BurstRequest::words(0, 1) };
        assert_eq!(wide.check(), Err(BusError::UnsupportedSize { size: 3 }));
    }
}
