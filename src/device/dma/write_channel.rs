//! Write channel controller.
//!
//! ```text
//!  ┌──────┐ request_write ┌────────────┐ accepted ┌───────────┐ last beat ┌──────────────────┐ ack ┌──────┐
//!  │ Idle ├──────────────►│ Requesting ├─────────►│ Streaming ├──────────►│ AwaitingResponse ├────►│ Idle │
//!  └──────┘               └────────────┘          └───────────┘           └──────────────────┘     └──────┘
//! ```
//!
//! The channel does not own any data. Each beat's word is pulled from the
//! caller through a `FnMut(beat_index) -> Result<u32, DmaError>` at the
//! moment the beat is offered, so the sequencer can map it straight out of
//! the scratch buffer.

use super::{ChannelPoll, DmaError};
use crate::device::bus::{BurstRequest, BusResponder, BusStatus, WriteBeat, WriteRequest};

#[derive(Debug, Clone, Copy)]
enum WritePhase {
    Idle,
    Requesting { request: WriteRequest },
    Streaming { request: WriteRequest, sent: u16 },
    AwaitingResponse { request: WriteRequest },
}

/// Write channel controller with a single outstanding burst.
#[derive(Debug, Clone)]
pub struct WriteChannel {
    phase: WritePhase,
    bursts_completed: u64,
    words_acknowledged: u64,
    stall_cycles: u64,
}

impl Default for WriteChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteChannel {
    pub fn new() -> Self {
        Self {
            phase: WritePhase::Idle,
            bursts_completed: 0,
            words_acknowledged: 0,
            stall_cycles: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, WritePhase::Idle)
    }

    /// All beats sent; only the acknowledgment is outstanding.
    pub fn awaiting_response(&self) -> bool {
        matches!(self.phase, WritePhase::AwaitingResponse { .. })
    }

    pub fn bursts_completed(&self) -> u64 {
        self.bursts_completed
    }

    /// Words belonging to bursts acknowledged with `Okay`.
    pub fn words_acknowledged(&self) -> u64 {
        self.words_acknowledged
    }

    pub fn stall_cycles(&self) -> u64 {
        self.stall_cycles
    }

    /// Begin a burst of `beats` words at `address`.
    pub fn request_write(&mut self, address: u64, beats: u16) -> Result<(), DmaError> {
        if !self.is_idle() {
            return Err(DmaError::ProtocolViolation(format!(
                "write burst at 0x{:x} issued while another is outstanding",
                address
            )));
        }
        if beats == 0 {
            return Err(DmaError::ProtocolViolation(format!("empty write burst at 0x{:x}", address)));
        }

        log::trace!("write: burst 0x{:x} x{}", address, beats);
        self.phase = WritePhase::Requesting { request: BurstRequest::words(address, beats) };
        Ok(())
    }

    /// Drop any outstanding burst.
    pub fn reset(&mut self) {
        self.phase = WritePhase::Idle;
    }

    /// Advance one cycle: attempt at most one handshake.
    ///
    /// `next_word` is asked for the word of beat `i` (0-based within the
    /// burst) whenever that beat is offered; it may be called again for the
    /// same beat if the responder stalls.
    pub fn step<B, F>(&mut self, bus: &mut B, mut next_word: F) -> Result<ChannelPoll, DmaError>
    where
        B: BusResponder + ?Sized,
        F: FnMut(u16) -> Result<u32, DmaError>,
    {
        match self.phase {
            WritePhase::Idle => Ok(ChannelPoll::Idle),

            WritePhase::Requesting { request } => {
                if bus.try_write_request(request) {
                    self.phase = WritePhase::Streaming { request, sent: 0 };
                    Ok(ChannelPoll::Progress)
                } else {
                    self.stall_cycles += 1;
                    Ok(ChannelPoll::Stalled)
                }
            }

            WritePhase::Streaming { request, sent } => {
                if sent >= request.beats {
                    return Err(DmaError::ProtocolViolation(format!(
                        "write burst 0x{:x} overran {} beats",
                        request.address, request.beats
                    )));
                }

                let data = next_word(sent)?;
                let last = sent + 1 == request.beats;
                if !bus.try_write_beat(WriteBeat { data, last }) {
                    self.stall_cycles += 1;
                    return Ok(ChannelPoll::Stalled);
                }

                self.phase = if last {
                    WritePhase::AwaitingResponse { request }
                } else {
                    WritePhase::Streaming { request, sent: sent + 1 }
                };
                Ok(ChannelPoll::Progress)
            }

            WritePhase::AwaitingResponse { request } => match bus.poll_write_response() {
                None => {
                    self.stall_cycles += 1;
                    Ok(ChannelPoll::Stalled)
                }
                Some(BusStatus::Okay) => {
                    self.phase = WritePhase::Idle;
                    self.bursts_completed += 1;
                    self.words_acknowledged += request.beats as u64;
                    Ok(ChannelPoll::Done)
                }
                Some(BusStatus::SlaveError) => {
                    log::error!("write: burst 0x{:x} x{} acknowledged with error", request.address, request.beats);
                    self.phase = WritePhase::Idle;
                    Err(DmaError::WriteFault { address: request.address, beats: request.beats })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::bus::{BusTiming, FaultChannel, FaultWindow, MemoryResponder};
    use crate::device::BackingMemory;

    fn make_bus(timing: BusTiming) -> MemoryResponder {
        MemoryResponder::new(BackingMemory::new(), timing)
    }

    /// Run the current burst to its acknowledgment, feeding `base + beat`.
    fn run_burst(channel: &mut WriteChannel, bus: &mut MemoryResponder, base: u32) -> Result<u32, DmaError> {
        let mut cycles = 0;
        loop {
            let poll = channel.step(bus, |beat| Ok(base + beat as u32))?;
            bus.tick();
            cycles += 1;
            if poll == ChannelPoll::Done {
                return Ok(cycles);
            }
            assert!(cycles < 500, "write burst never completed");
        }
    }

    #[test]
    fn test_burst_reaches_memory() {
        let mut bus = make_bus(BusTiming::instant());
        let mut channel = WriteChannel::new();

        channel.request_write(0x400, 4).unwrap();
        run_burst(&mut channel, &mut bus, 10).unwrap();

        assert!(channel.is_idle());
        assert_eq!(bus.memory().read_words(0x400, 4), vec![10, 11, 12, 13]);
        assert_eq!(channel.bursts_completed(), 1);
        assert_eq!(channel.words_acknowledged(), 4);
        assert!(bus.violations().is_empty());
    }

    #[test]
    fn test_awaiting_response_after_last_beat() {
        let timing = BusTiming { write_response_cycles: 3, ..BusTiming::instant() };
        let mut bus = make_bus(timing);
        let mut channel = WriteChannel::new();

        channel.request_write(0x0, 1).unwrap();
        assert_eq!(channel.step(&mut bus, |_| Ok(5)), Ok(ChannelPoll::Progress));
        bus.tick();
        assert!(!channel.awaiting_response());

        assert_eq!(channel.step(&mut bus, |_| Ok(5)), Ok(ChannelPoll::Progress));
        bus.tick();
        assert!(channel.awaiting_response());

        let mut stalls = 0;
        loop {
            match channel.step(&mut bus, |_| Ok(5)).unwrap() {
                ChannelPoll::Stalled => stalls += 1,
                ChannelPoll::Done => break,
                other => panic!("unexpected poll {:?}", other),
            }
            bus.tick();
        }
        assert_eq!(stalls, 3);
    }

    #[test]
    fn test_single_outstanding_burst() {
        let mut channel = WriteChannel::new();
        channel.request_write(0x0, 2).unwrap();
        assert!(matches!(channel.request_write(0x100, 2), Err(DmaError::ProtocolViolation(_))));
    }

    #[test]
    fn test_error_response_is_write_fault() {
        let mut bus = make_bus(BusTiming::instant())
            .with_fault(FaultWindow::new(0x800, 0x10, FaultChannel::Write));
        let mut channel = WriteChannel::new();

        channel.request_write(0x7F8, 4).unwrap();
        let result = run_burst(&mut channel, &mut bus, 0);

        assert_eq!(result, Err(DmaError::WriteFault { address: 0x7F8, beats: 4 }));
        assert!(channel.is_idle());
        assert_eq!(channel.words_acknowledged(), 0);
    }

    #[test]
    fn test_word_source_error_propagates() {
        let mut bus = make_bus(BusTiming::instant());
        let mut channel = WriteChannel::new();

        channel.request_write(0x0, 2).unwrap();
        channel.step(&mut bus, |_| Ok(0)).unwrap();
        bus.tick();

        let result = channel.step(&mut bus, |_| Err(DmaError::NotStaged { row: 3, col: 1 }));
        assert_eq!(result, Err(DmaError::NotStaged { row: 3, col: 1 }));
    }

    #[test]
    fn test_stalled_beat_is_offered_again() {
        let timing = BusTiming { beat_gap_cycles: 2, ..BusTiming::instant() };
        let mut bus = make_bus(timing);
        let mut channel = WriteChannel::new();

        channel.request_write(0x40, 3).unwrap();
        let cycles = run_burst(&mut channel, &mut bus, 100).unwrap();

        assert_eq!(bus.memory().read_words(0x40, 3), vec![100, 101, 102]);
        // request + 3 beats + 2 gaps of 2 + response
        assert_eq!(cycles, 1 + 3 + 4 + 1);
        assert_eq!(channel.stall_cycles(), 4);
    }
}
