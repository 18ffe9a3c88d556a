//! Register-programmed padding device.
//!
//! Glues the control registers, the DMA engine and a bus responder into one
//! clocked unit. Each [`PadDevice::step`] is one cycle:
//!
//! 1. a latched START pulse is handed to the engine with the register contents
//! 2. the engine performs at most one bus handshake
//! 3. the responder advances its wait states
//! 4. DONE / ERROR are mirrored back into STATUS

use thiserror::Error;

use super::bus::{BusResponder, MemoryResponder};
use super::dma::{DmaEngine, DmaError, DmaResult, EngineConfig, EngineStats};
use super::registers::ControlRegisters;

/// Failure of a driven transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Transfer(#[from] DmaError),

    #[error("transfer still running after {cycles} cycles")]
    Timeout { cycles: u64 },
}

/// DMA engine behind its register block, attached to a bus.
#[derive(Debug)]
pub struct PadDevice<B: BusResponder = MemoryResponder> {
    registers: ControlRegisters,
    engine: DmaEngine,
    bus: B,
    cycle: u64,
}

impl<B: BusResponder> PadDevice<B> {
    pub fn new(config: EngineConfig, bus: B) -> Self {
        Self {
            registers: ControlRegisters::new(),
            engine: DmaEngine::new(config),
            bus,
            cycle: 0,
        }
    }

    pub fn registers(&self) -> &ControlRegisters {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut ControlRegisters {
        &mut self.registers
    }

    pub fn engine(&self) -> &DmaEngine {
        &self.engine
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Detach the bus, e.g. to inspect its memory after a run.
    pub fn into_bus(self) -> B {
        self.bus
    }

    pub fn stats(&self) -> &EngineStats {
        self.engine.stats()
    }

    /// Cycles stepped since creation.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Register write from the host side.
    pub fn write_register(&mut self, offset: u32, value: u32) {
        self.registers.write(offset, value);
    }

    pub fn read_register(&self, offset: u32) -> u32 {
        self.registers.read(offset)
    }

    /// Advance one cycle.
    pub fn step(&mut self) -> DmaResult {
        if self.registers.take_start() {
            let config = self.registers.transfer_config();
            match self.engine.start(config) {
                Ok(true) => log::debug!("cycle {}: transfer started", self.cycle),
                Ok(false) => log::debug!("cycle {}: START ignored while busy", self.cycle),
                Err(e) => log::debug!("cycle {}: START refused ({})", self.cycle, e),
            }
        }

        let result = self.engine.step(&mut self.bus);
        self.bus.tick();
        self.cycle += 1;
        self.registers.update_status(self.engine.done(), self.engine.error());
        result
    }

    /// Step until the current transfer finishes.
    ///
    /// Returns the cycles spent. A START still latched in the registers is
    /// consumed by the first cycle.
    pub fn run_until_done(&mut self, max_cycles: u64) -> Result<u64, DeviceError> {
        let mut cycles = 0;
        while cycles < max_cycles {
            let result = self.step();
            cycles += 1;

            match result {
                DmaResult::Complete => return Ok(cycles),
                DmaResult::Error(e) => return Err(e.into()),
                _ => {}
            }
            if self.engine.done() {
                return match self.engine.error() {
                    Some(e) => Err(e.clone().into()),
                    None => Ok(cycles),
                };
            }
        }

        log::warn!("device: transfer not done after {} cycles", max_cycles);
        Err(DeviceError::Timeout { cycles })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::bus::BusTiming;
    use crate::device::dma::{InvalidConfig, TransferConfig};
    use crate::device::registers::{CTRL, CTRL_START, STATUS, STATUS_DONE, STATUS_ERROR, WIDTH};
    use crate::device::BackingMemory;

    fn make_device(width: usize) -> PadDevice {
        let mut memory = BackingMemory::new();
        memory.write_words(0x1000, &(1..=(width * width) as u32).collect::<Vec<_>>());
        PadDevice::new(EngineConfig::default(), MemoryResponder::new(memory, BusTiming::default()))
    }

    #[test]
    fn test_register_driven_transfer() {
        let mut device = make_device(4);
        device.registers_mut().program(&TransferConfig::new(0x1000, 0x8000, 4));

        let cycles = device.run_until_done(10_000).unwrap();
        assert!(cycles > 0);
        assert_eq!(device.read_register(STATUS), STATUS_DONE);
        assert_eq!(device.bus().memory().read_words(0x8000, 6), vec![6, 5, 6, 7, 8, 7]);
        assert_eq!(device.bus().memory().read_words(0x8000 + 5 * 24, 6), vec![10, 9, 10, 11, 12, 11]);
    }

    #[test]
    fn test_status_done_low_while_running() {
        let mut device = make_device(4);
        device.registers_mut().program(&TransferConfig::new(0x1000, 0x8000, 4));

        assert_eq!(device.step(), DmaResult::InProgress);
        assert_eq!(device.read_register(STATUS) & STATUS_DONE, 0);
    }

    #[test]
    fn test_invalid_width_sets_error_status() {
        let mut device = make_device(4);
        device.registers_mut().program(&TransferConfig::new(0x1000, 0x8000, 2));

        let result = device.run_until_done(100);
        assert_eq!(
            result,
            Err(DeviceError::Transfer(DmaError::ConfigInvalid(InvalidConfig::BelowMirrorMinimum(2))))
        );
        let status = device.read_register(STATUS);
        assert_eq!(status & (STATUS_DONE | STATUS_ERROR), STATUS_DONE | STATUS_ERROR);
        assert_eq!(device.registers().error_code(), Some(1));
        assert!(device.bus().events().is_empty());
    }

    #[test]
    fn test_width_rewrite_mid_transfer_is_ignored() {
        let mut device = make_device(8);
        device.registers_mut().program(&TransferConfig::new(0x1000, 0x8000, 8));
        for _ in 0..20 {
            device.step();
        }

        device.write_register(WIDTH, 3);
        device.write_register(CTRL, CTRL_START);
        device.run_until_done(100_000).unwrap();

        assert_eq!(device.stats().ignored_starts, 1);
        assert_eq!(device.stats().words_written, 100);
    }

    #[test]
    fn test_timeout() {
        let mut device = make_device(8);
        device.registers_mut().program(&TransferConfig::new(0x1000, 0x8000, 8));
        assert_eq!(device.run_until_done(5), Err(DeviceError::Timeout { cycles: 5 }));
    }
}
