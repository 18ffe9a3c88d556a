//! Control register block.
//!
//! The engine is programmed through a small memory-mapped register file:
//!
//! ```text
//! offset  name     access  bits
//! 0x00    CTRL     W       [0] START (self-clearing)
//! 0x04    STATUS   R       [0] DONE  [1] ERROR  [11:8] error code
//! 0x08    SRC_LO   RW      source base [31:0]
//! 0x0C    SRC_HI   RW      source base [63:32]
//! 0x10    DST_LO   RW      destination base [31:0]
//! 0x14    DST_HI   RW      destination base [63:32]
//! 0x18    WIDTH    RW      matrix width
//! ```
//!
//! Writing START latches a pulse that the device consumes on its next cycle.
//! The address and width registers may be rewritten while a transfer runs;
//! the engine captured its own copy at the start edge.

use std::fmt;

use super::dma::{DmaError, TransferConfig};

pub const CTRL: u32 = 0x00;
pub const STATUS: u32 = 0x04;
pub const SRC_LO: u32 = 0x08;
pub const SRC_HI: u32 = 0x0C;
pub const DST_LO: u32 = 0x10;
pub const DST_HI: u32 = 0x14;
pub const WIDTH: u32 = 0x18;

pub const CTRL_START: u32 = 1 << 0;

pub const STATUS_DONE: u32 = 1 << 0;
pub const STATUS_ERROR: u32 = 1 << 1;
pub const STATUS_CODE_SHIFT: u32 = 8;
pub const STATUS_CODE_MASK: u32 = 0xF << STATUS_CODE_SHIFT;

/// Named register in the control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Ctrl,
    Status,
    SrcLo,
    SrcHi,
    DstLo,
    DstHi,
    Width,
}

impl Register {
    pub fn from_offset(offset: u32) -> Option<Self> {
        match offset {
            CTRL => Some(Register::Ctrl),
            STATUS => Some(Register::Status),
            SRC_LO => Some(Register::SrcLo),
            SRC_HI => Some(Register::SrcHi),
            DST_LO => Some(Register::DstLo),
            DST_HI => Some(Register::DstHi),
            WIDTH => Some(Register::Width),
            _ => None,
        }
    }

    pub fn offset(&self) -> u32 {
        match self {
            Register::Ctrl => CTRL,
            Register::Status => STATUS,
            Register::SrcLo => SRC_LO,
            Register::SrcHi => SRC_HI,
            Register::DstLo => DST_LO,
            Register::DstHi => DST_HI,
            Register::Width => WIDTH,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Register::Ctrl => "CTRL",
            Register::Status => "STATUS",
            Register::SrcLo => "SRC_LO",
            Register::SrcHi => "SRC_HI",
            Register::DstLo => "DST_LO",
            Register::DstHi => "DST_HI",
            Register::Width => "WIDTH",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ 0x{:02X}", self.name(), self.offset())
    }
}

/// Register file backing the configuration port.
#[derive(Debug, Clone)]
pub struct ControlRegisters {
    source_base: u64,
    dest_base: u64,
    width: u32,
    start_pending: bool,
    status: u32,
}

impl Default for ControlRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlRegisters {
    /// Power-on state: everything zero except STATUS.DONE.
    pub fn new() -> Self {
        Self {
            source_base: 0,
            dest_base: 0,
            width: 0,
            start_pending: false,
            status: STATUS_DONE,
        }
    }

    pub fn write(&mut self, offset: u32, value: u32) {
        let Some(reg) = Register::from_offset(offset) else {
            log::warn!("registers: write 0x{:08X} to unknown offset 0x{:02X} ignored", value, offset);
            return;
        };
        log::trace!("registers: {} <- 0x{:08X}", reg, value);

        match reg {
            Register::Ctrl => {
                if value & CTRL_START != 0 {
                    self.start_pending = true;
                }
            }
            Register::Status => log::warn!("registers: STATUS is read-only"),
            Register::SrcLo => self.source_base = set_lo(self.source_base, value),
            Register::SrcHi => self.source_base = set_hi(self.source_base, value),
            Register::DstLo => self.dest_base = set_lo(self.dest_base, value),
            Register::DstHi => self.dest_base = set_hi(self.dest_base, value),
            Register::Width => self.width = value,
        }
    }

    pub fn read(&self, offset: u32) -> u32 {
        let Some(reg) = Register::from_offset(offset) else {
            log::warn!("registers: read of unknown offset 0x{:02X}", offset);
            return 0;
        };

        match reg {
            Register::Ctrl => 0,
            Register::Status => self.status,
            Register::SrcLo => self.source_base as u32,
            Register::SrcHi => (self.source_base >> 32) as u32,
            Register::DstLo => self.dest_base as u32,
            Register::DstHi => (self.dest_base >> 32) as u32,
            Register::Width => self.width,
        }
    }

    /// Program a whole transfer and pulse START.
    pub fn program(&mut self, config: &TransferConfig) {
        self.write(SRC_LO, config.source_base as u32);
        self.write(SRC_HI, (config.source_base >> 32) as u32);
        self.write(DST_LO, config.dest_base as u32);
        self.write(DST_HI, (config.dest_base >> 32) as u32);
        self.write(WIDTH, config.width.min(u32::MAX as usize) as u32);
        self.write(CTRL, CTRL_START);
    }

    /// Consume the latched START pulse.
    pub fn take_start(&mut self) -> bool {
        std::mem::take(&mut self.start_pending)
    }

    /// Transfer described by the current register contents.
    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig::new(self.source_base, self.dest_base, self.width as usize)
    }

    /// Mirror engine state into STATUS.
    pub fn update_status(&mut self, done: bool, error: Option<&DmaError>) {
        let mut status = 0;
        if done {
            status |= STATUS_DONE;
        }
        if let Some(error) = error {
            status |= STATUS_ERROR | ((error.code() << STATUS_CODE_SHIFT) & STATUS_CODE_MASK);
        }
        self.status = status;
    }

    pub fn done(&self) -> bool {
        self.status & STATUS_DONE != 0
    }

    /// Error code from STATUS, if ERROR is set.
    pub fn error_code(&self) -> Option<u32> {
        (self.status & STATUS_ERROR != 0).then(|| (self.status & STATUS_CODE_MASK) >> STATUS_CODE_SHIFT)
    }
}

fn set_lo(current: u64, value: u32) -> u64 {
    (current & !0xFFFF_FFFF) | value as u64
}

fn set_hi(current: u64, value: u32) -> u64 {
    (current & 0xFFFF_FFFF) | ((value as u64) << 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_on_state() {
        let regs = ControlRegisters::new();
        assert_eq!(regs.read(STATUS), STATUS_DONE);
        assert!(regs.done());
        assert_eq!(regs.error_code(), None);
        assert_eq!(regs.read(WIDTH), 0);
    }

    #[test]
    fn test_address_halves() {
        let mut regs = ControlRegisters::new();
        regs.write(SRC_LO, 0x8000_1000);
        regs.write(SRC_HI, 0x2);
        regs.write(DST_HI, 0x1);

        assert_eq!(regs.transfer_config().source_base, 0x2_8000_1000);
        assert_eq!(regs.transfer_config().dest_base, 0x1_0000_0000);
        assert_eq!(regs.read(SRC_LO), 0x8000_1000);
        assert_eq!(regs.read(SRC_HI), 0x2);
    }

    #[test]
    fn test_start_is_self_clearing() {
        let mut regs = ControlRegisters::new();
        assert!(!regs.take_start());

        regs.write(CTRL, CTRL_START);
        assert_eq!(regs.read(CTRL), 0);
        assert!(regs.take_start());
        assert!(!regs.take_start());

        // Other CTRL bits do not start anything
        regs.write(CTRL, 0x10);
        assert!(!regs.take_start());
    }

    #[test]
    fn test_program() {
        let mut regs = ControlRegisters::new();
        let config = TransferConfig::new(0x1000, 0x8000, 16);
        regs.program(&config);

        assert_eq!(regs.transfer_config(), config);
        assert!(regs.take_start());
    }

    #[test]
    fn test_status_reflects_error() {
        let mut regs = ControlRegisters::new();
        regs.update_status(false, None);
        assert_eq!(regs.read(STATUS), 0);

        regs.update_status(true, Some(&DmaError::WriteFault { address: 0x40, beats: 2 }));
        assert_eq!(regs.read(STATUS), STATUS_DONE | STATUS_ERROR | (3 << 8));
        assert_eq!(regs.error_code(), Some(3));
    }

    #[test]
    fn test_status_is_read_only() {
        let mut regs = ControlRegisters::new();
        regs.write(STATUS, 0);
        assert_eq!(regs.read(STATUS), STATUS_DONE);
    }

    #[test]
    fn test_unknown_offset() {
        let mut regs = ControlRegisters::new();
        regs.write(0x40, 0xFFFF_FFFF);
        assert_eq!(regs.read(0x40), 0);
        assert_eq!(Register::from_offset(0x1C), None);
        assert_eq!(Register::Width.to_string(), "WIDTH @ 0x18");
    }
}
