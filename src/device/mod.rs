//! Device model: the padding DMA engine, its bus and its registers.
//!
//! This module provides:
//! - The split-transaction bus protocol and a memory-backed responder
//! - The mirror-padding DMA engine (mapper, scratch buffer, channels, sequencer)
//! - The control register block
//! - [`PadDevice`], which clocks all of the above together
//!
//! # Overview
//!
//! ```text
//!   host writes          ┌──────────────────────────────┐
//!  ─────────────────────►│ ControlRegisters             │
//!   SRC / DST / WIDTH    │   START ─┐      ▲ DONE/ERROR │
//!   CTRL.START           └──────────┼──────┼────────────┘
//!                                   ▼      │
//!                        ┌──────────────────────────────┐
//!                        │ DmaEngine                    │
//!                        │  read channel  write channel │
//!                        └──────┬──────────────┬────────┘
//!                               ▼              ▼
//!                        ┌──────────────────────────────┐
//!                        │ BusResponder (MemoryResponder│
//!                        │  over BackingMemory)         │
//!                        └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use mirror_dma::device::{BackingMemory, PadDevice};
//! use mirror_dma::device::bus::{BusTiming, MemoryResponder};
//! use mirror_dma::device::dma::{EngineConfig, TransferConfig};
//!
//! let mut memory = BackingMemory::new();
//! memory.write_words(0x0, &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
//!
//! let bus = MemoryResponder::new(memory, BusTiming::default());
//! let mut device = PadDevice::new(EngineConfig::default(), bus);
//! device.registers_mut().program(&TransferConfig::new(0x0, 0x100, 3));
//! device.run_until_done(10_000).unwrap();
//!
//! // Output row 0 mirrors source row 1
//! assert_eq!(device.bus().memory().read_words(0x100, 5), vec![5, 4, 5, 6, 5]);
//! ```

pub mod bus_spec;
pub mod memory;
pub mod bus;
pub mod dma;
pub mod registers;
pub mod pad;

pub use memory::{BackingMemory, MemoryError, MemoryRegion};
pub use bus::{BusResponder, BusTiming, MemoryResponder};
pub use dma::{
    CoordinateMapper, DmaEngine, DmaError, DmaResult, EngineConfig, EngineStats,
    InvalidConfig, ScratchBuffer, ScratchGranularity, TransferConfig, TransferState,
};
pub use registers::{ControlRegisters, Register};
pub use pad::{DeviceError, PadDevice};
