//! Read channel controller.
//!
//! Drives one burst at a time through the read side of the bus:
//!
//! ```text
//!  ┌──────┐ request_read ┌────────────┐ accepted ┌───────────┐ last beat ┌──────┐
//!  │ Idle ├─────────────►│ Requesting ├─────────►│ Receiving ├──────────►│ Idle │
//!  └──────┘              └────────────┘          └───────────┘           └──────┘
//!                           (stall while            (stall while
//!                            not ready)              no beat valid)
//! ```
//!
//! Beats are held in the channel until the final one arrives. Only a burst
//! whose every beat reported `Okay` is committed to the scratch buffer, so a
//! faulted burst leaves no trace in it.

use smallvec::SmallVec;

use super::scratch::ScratchBuffer;
use super::{ChannelPoll, DmaError};
use crate::device::bus::{BurstRequest, BusResponder, ReadRequest};

/// Where a read burst lands in the scratch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTarget {
    /// Source row
    pub row: usize,
    /// Column of the first beat
    pub start_col: usize,
}

#[derive(Debug, Clone)]
enum ReadPhase {
    Idle,
    Requesting {
        request: ReadRequest,
        target: FetchTarget,
    },
    Receiving {
        request: ReadRequest,
        target: FetchTarget,
        received: SmallVec<[u32; 16]>,
        faulted: bool,
    },
}

/// Read channel controller with a single outstanding burst.
#[derive(Debug, Clone)]
pub struct ReadChannel {
    phase: ReadPhase,
    bursts_completed: u64,
    beats_received: u64,
    words_committed: u64,
    stall_cycles: u64,
}

impl Default for ReadChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadChannel {
    pub fn new() -> Self {
        Self {
            phase: ReadPhase::Idle,
            bursts_completed: 0,
            beats_received: 0,
            words_committed: 0,
            stall_cycles: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, ReadPhase::Idle)
    }

    pub fn bursts_completed(&self) -> u64 {
        self.bursts_completed
    }

    pub fn beats_received(&self) -> u64 {
        self.beats_received
    }

    /// Words written into the scratch buffer by clean bursts.
    pub fn words_committed(&self) -> u64 {
        self.words_committed
    }

    pub fn stall_cycles(&self) -> u64 {
        self.stall_cycles
    }

    /// Begin a burst of `beats` words at `address`, landing at `target`.
    pub fn request_read(&mut self, address: u64, beats: u16, target: FetchTarget) -> Result<(), DmaError> {
        if !self.is_idle() {
            return Err(DmaError::ProtocolViolation(format!(
                "read burst at 0x{:x} issued while another is outstanding",
                address
            )));
        }

        log::trace!("read: burst 0x{:x} x{} -> row {} col {}", address, beats, target.row, target.start_col);
        self.phase = ReadPhase::Requesting {
            request: BurstRequest::words(address, beats),
            target,
        };
        Ok(())
    }

    /// Drop any outstanding burst.
    pub fn reset(&mut self) {
        self.phase = ReadPhase::Idle;
    }

    /// Advance one cycle: attempt at most one handshake.
    pub fn step<B>(&mut self, bus: &mut B, scratch: &mut ScratchBuffer) -> Result<ChannelPoll, DmaError>
    where
        B: BusResponder + ?Sized,
    {
        match &mut self.phase {
            ReadPhase::Idle => Ok(ChannelPoll::Idle),

            ReadPhase::Requesting { request, target } => {
                if bus.try_read_request(*request) {
                    self.phase = ReadPhase::Receiving {
                        request: *request,
                        target: *target,
                        received: SmallVec::new(),
                        faulted: false,
                    };
                    Ok(ChannelPoll::Progress)
                } else {
                    self.stall_cycles += 1;
                    Ok(ChannelPoll::Stalled)
                }
            }

            ReadPhase::Receiving { request, target, received, faulted } => {
                let beat = match bus.poll_read_beat() {
                    Some(beat) => beat,
                    None => {
                        self.stall_cycles += 1;
                        return Ok(ChannelPoll::Stalled);
                    }
                };

                self.beats_received += 1;
                received.push(beat.data);
                if !beat.status.is_ok() {
                    *faulted = true;
                }

                let expected = request.beats as usize;
                if !beat.last && received.len() < expected {
                    return Ok(ChannelPoll::Progress);
                }

                let (request, target) = (*request, *target);
                let complete = beat.last && received.len() == expected;
                if !complete {
                    log::error!(
                        "read: burst 0x{:x} ended after {} of {} beats (last={})",
                        request.address,
                        received.len(),
                        expected,
                        beat.last
                    );
                }

                if *faulted || !complete {
                    self.phase = ReadPhase::Idle;
                    return Err(DmaError::ReadFault { address: request.address, beats: request.beats });
                }

                scratch.put_run(target.row, target.start_col, received);
                self.words_committed += received.len() as u64;
                self.phase = ReadPhase::Idle;
                self.bursts_completed += 1;
                Ok(ChannelPoll::Done)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::bus::{BusTiming, FaultChannel, FaultWindow, MemoryResponder};
    use crate::device::dma::ScratchGranularity;
    use crate::device::BackingMemory;

    fn make_bus(timing: BusTiming) -> MemoryResponder {
        let mut memory = BackingMemory::new();
        memory.write_words(0x100, &[1, 2, 3, 4, 5, 6, 7, 8]);
        MemoryResponder::new(memory, timing)
    }

    fn run_burst(
        channel: &mut ReadChannel,
        bus: &mut MemoryResponder,
        scratch: &mut ScratchBuffer,
    ) -> Result<u32, DmaError> {
        let mut cycles = 0;
        loop {
            let poll = channel.step(bus, scratch)?;
            bus.tick();
            cycles += 1;
            if poll == ChannelPoll::Done {
                return Ok(cycles);
            }
            assert!(cycles < 500, "read burst never completed");
        }
    }

    #[test]
    fn test_burst_lands_in_scratch() {
        let mut bus = make_bus(BusTiming::instant());
        let mut scratch = ScratchBuffer::new(4, ScratchGranularity::Rows(2));
        let mut channel = ReadChannel::new();

        channel.request_read(0x110, 4, FetchTarget { row: 1, start_col: 0 }).unwrap();
        run_burst(&mut channel, &mut bus, &mut scratch).unwrap();

        assert!(channel.is_idle());
        assert!(scratch.row_complete(1));
        assert_eq!(scratch.get(1, 0), Ok(5));
        assert_eq!(scratch.get(1, 3), Ok(8));
        assert_eq!(channel.bursts_completed(), 1);
        assert_eq!(channel.beats_received(), 4);
        assert_eq!(channel.words_committed(), 4);
    }

    #[test]
    fn test_partial_row_target() {
        let mut bus = make_bus(BusTiming::instant());
        let mut scratch = ScratchBuffer::new(4, ScratchGranularity::Rows(1));
        let mut channel = ReadChannel::new();

        channel.request_read(0x108, 2, FetchTarget { row: 0, start_col: 2 }).unwrap();
        run_burst(&mut channel, &mut bus, &mut scratch).unwrap();

        assert!(!scratch.has(0, 0));
        assert_eq!(scratch.get(0, 2), Ok(3));
        assert_eq!(scratch.get(0, 3), Ok(4));
    }

    #[test]
    fn test_single_outstanding_burst() {
        let mut channel = ReadChannel::new();
        channel.request_read(0x100, 4, FetchTarget { row: 0, start_col: 0 }).unwrap();

        let second = channel.request_read(0x200, 4, FetchTarget { row: 1, start_col: 0 });
        assert!(matches!(second, Err(DmaError::ProtocolViolation(_))));
    }

    #[test]
    fn test_stalls_are_counted() {
        let mut bus = make_bus(BusTiming::sluggish());
        let mut scratch = ScratchBuffer::new(4, ScratchGranularity::Rows(2));
        let mut channel = ReadChannel::new();

        channel.request_read(0x100, 4, FetchTarget { row: 0, start_col: 0 }).unwrap();
        let cycles = run_burst(&mut channel, &mut bus, &mut scratch).unwrap();

        // 1 request + 7 latency + 4 beats + 3 gaps of 2
        assert_eq!(cycles, 1 + 7 + 4 + 6);
        assert_eq!(channel.stall_cycles(), 7 + 6);
    }

    #[test]
    fn test_faulted_burst_not_staged() {
        let mut bus = make_bus(BusTiming::instant())
            .with_fault(FaultWindow::new(0x104, 4, FaultChannel::Read));
        let mut scratch = ScratchBuffer::new(4, ScratchGranularity::Rows(2));
        let mut channel = ReadChannel::new();

        channel.request_read(0x100, 4, FetchTarget { row: 0, start_col: 0 }).unwrap();
        let result = run_burst(&mut channel, &mut bus, &mut scratch);

        assert_eq!(result, Err(DmaError::ReadFault { address: 0x100, beats: 4 }));
        assert!(channel.is_idle());
        assert!(!scratch.holds_row(0), "faulted data must not be staged");
        assert_eq!(channel.words_committed(), 0);
    }
}
