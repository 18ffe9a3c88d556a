//! Mirror-padding DMA engine.
//!
//! The engine copies a `width × width` matrix of 32-bit words into a
//! `(width+2) × (width+2)` destination whose border reflects the second
//! row/column inward:
//!
//! ```text
//!   source (4×4)          destination (6×6)
//!                          6  5  6  7  8  7     <- mirrors source row 1
//!    1  2  3  4            2  1  2  3  4  3
//!    5  6  7  8    ──►     6  5  6  7  8  7
//!    9 10 11 12           10  9 10 11 12 11
//!   13 14 15 16           14 13 14 15 16 15
//!                         10  9 10 11 12 11     <- mirrors source row 2
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      DmaEngine (sequencer)                    │
//! │                                                              │
//! │  ┌──────────────┐   ┌───────────────┐   ┌────────────────┐   │
//! │  │ ReadChannel  ├──►│ ScratchBuffer ├──►│ WriteChannel   │   │
//! │  │ (burst read) │   │ (row window)  │   │ (burst write)  │   │
//! │  └──────┬───────┘   └───────▲───────┘   └───────┬────────┘   │
//! │         │                   │ CoordinateMapper  │            │
//! └─────────┼───────────────────┼───────────────────┼────────────┘
//!           ▼                                       ▼
//!      bus read side                          bus write side
//! ```
//!
//! Only one of fetching, writing or waiting for a write acknowledgment is
//! active in any cycle, so the scratch buffer needs no locking.
//!
//! # Usage
//!
//! ```
//! use mirror_dma::device::bus::{BusResponder, BusTiming, MemoryResponder};
//! use mirror_dma::device::dma::{DmaEngine, EngineConfig, TransferConfig};
//! use mirror_dma::device::BackingMemory;
//!
//! let mut memory = BackingMemory::new();
//! memory.write_words(0x1000, &(1..=16).collect::<Vec<u32>>());
//! let mut bus = MemoryResponder::new(memory, BusTiming::instant());
//!
//! let mut engine = DmaEngine::new(EngineConfig::default());
//! engine.start(TransferConfig::new(0x1000, 0x8000, 4)).unwrap();
//! while !engine.done() {
//!     engine.step(&mut bus);
//!     bus.tick();
//! }
//! assert_eq!(bus.memory().read_words(0x8000, 6), vec![6, 5, 6, 7, 8, 7]);
//! ```

pub mod mapper;
pub mod scratch;
pub mod burst;
pub mod read_channel;
pub mod write_channel;
pub mod transfer;
pub mod engine;

pub use mapper::{map_axis, CoordinateMapper, SourceCoord};
pub use scratch::{ScratchBuffer, ScratchGranularity};
pub use burst::next_burst_beats;
pub use read_channel::ReadChannel;
pub use write_channel::WriteChannel;
pub use transfer::{ActiveTransfer, OutputCursor, OutputRun, TransferConfig, TransferState};
pub use engine::{DmaEngine, EngineStats};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::bus_spec::{DEFAULT_MAX_BURST_BEATS, MAX_BURST_BEATS};

/// Engine tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on beats per burst, on both channels (1..=256)
    pub max_burst_beats: u16,

    /// Scratch buffer capacity policy
    pub scratch: ScratchGranularity,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_burst_beats: DEFAULT_MAX_BURST_BEATS,
            scratch: ScratchGranularity::default(),
        }
    }
}

impl EngineConfig {
    /// Clamp fields into their legal ranges.
    pub fn normalized(self) -> Self {
        Self {
            max_burst_beats: self.max_burst_beats.clamp(1, MAX_BURST_BEATS),
            scratch: self.scratch.normalized(),
        }
    }
}

/// Why a transfer configuration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidConfig {
    #[error("matrix width is zero")]
    ZeroWidth,

    #[error("width {0} is below the mirror-padding minimum of 3")]
    BelowMirrorMinimum(usize),

    #[error("{which} base 0x{address:x} is not word aligned")]
    Misaligned { which: &'static str, address: u64 },

    #[error("{which} region starting at 0x{address:x} wraps the address space")]
    AddressOverflow { which: &'static str, address: u64 },
}

/// DMA engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaError {
    /// Rejected at the start edge; nothing was put on the bus
    #[error("invalid configuration: {0}")]
    ConfigInvalid(#[from] InvalidConfig),

    /// The read side signalled an error for a burst
    #[error("read fault on burst at 0x{address:x} ({beats} beats)")]
    ReadFault { address: u64, beats: u16 },

    /// The write side acknowledged a burst with an error
    #[error("write fault on burst at 0x{address:x} ({beats} beats)")]
    WriteFault { address: u64, beats: u16 },

    /// Internal invariant broken; a defect, never a runtime condition
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Scratch buffer lookup for a coordinate that was never fetched
    #[error("source ({row}, {col}) is not staged")]
    NotStaged { row: usize, col: usize },
}

impl DmaError {
    /// Error code reported in the STATUS register.
    pub fn code(&self) -> u32 {
        match self {
            DmaError::ConfigInvalid(_) => 1,
            DmaError::ReadFault { .. } => 2,
            DmaError::WriteFault { .. } => 3,
            DmaError::ProtocolViolation(_) | DmaError::NotStaged { .. } => 4,
        }
    }
}

/// Outcome of stepping a channel controller for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPoll {
    /// No burst outstanding
    Idle,
    /// A handshake completed; the burst is still running
    Progress,
    /// The responder was not ready
    Stalled,
    /// The burst finished successfully this cycle
    Done,
}

/// Outcome of one engine cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmaResult {
    /// No transfer in flight
    Idle,
    /// Transfer in progress
    InProgress,
    /// Waiting on a bus handshake this cycle
    Stalled,
    /// The final write acknowledgment arrived this cycle
    Complete,
    /// The transfer was aborted this cycle
    Error(DmaError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.max_burst_beats, 256);
        assert_eq!(config.scratch, ScratchGranularity::Rows(2));
    }

    #[test]
    fn test_engine_config_normalized() {
        let config = EngineConfig { max_burst_beats: 0, scratch: ScratchGranularity::Rows(0) }.normalized();
        assert_eq!(config.max_burst_beats, 1);
        assert_eq!(config.scratch, ScratchGranularity::Rows(1));

        let config = EngineConfig { max_burst_beats: 4096, ..Default::default() }.normalized();
        assert_eq!(config.max_burst_beats, 256);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DmaError::from(InvalidConfig::ZeroWidth).code(), 1);
        assert_eq!(DmaError::ReadFault { address: 0, beats: 1 }.code(), 2);
        assert_eq!(DmaError::WriteFault { address: 0, beats: 1 }.code(), 3);
        assert_eq!(DmaError::NotStaged { row: 0, col: 0 }.code(), 4);
    }

    #[test]
    fn test_error_display() {
        let err = DmaError::from(InvalidConfig::BelowMirrorMinimum(2));
        assert_eq!(
            err.to_string(),
            "invalid configuration: width 2 is below the mirror-padding minimum of 3"
        );
    }
}
