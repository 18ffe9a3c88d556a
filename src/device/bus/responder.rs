//! Memory-backed bus responder.
//!
//! Serves burst reads and writes from a [`BackingMemory`], inserting the
//! wait states described by [`BusTiming`]. Address windows can be marked as
//! faulty so that accesses touching them complete with
//! [`BusStatus::SlaveError`]. Every accepted request is logged, which lets
//! tests check exactly what the engine put on the bus.

use super::{BusError, BusResponder, BusStatus, BusTiming, ReadBeat, ReadRequest, WriteBeat, WriteRequest};
use crate::device::memory::BackingMemory;

/// Which side of the bus a fault window applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultChannel {
    Read,
    Write,
    Both,
}

/// Address range that answers with a slave error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultWindow {
    pub base: u64,
    /// Length in bytes
    pub len: u64,
    pub channel: FaultChannel,
}

impl FaultWindow {
    pub fn new(base: u64, len: u64, channel: FaultChannel) -> Self {
        Self { base, len, channel }
    }

    fn hits(&self, addr: u64, is_read: bool) -> bool {
        let channel_match = match self.channel {
            FaultChannel::Read => is_read,
            FaultChannel::Write => !is_read,
            FaultChannel::Both => true,
        };
        channel_match && addr >= self.base && addr < self.base.saturating_add(self.len)
    }
}

/// Accepted request, in acceptance order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Read(ReadRequest),
    Write(WriteRequest),
}

/// Responder-side counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponderStats {
    pub read_requests: u64,
    pub write_requests: u64,
    pub read_beats: u64,
    pub write_beats: u64,
    /// Beats or responses that carried a slave error
    pub error_responses: u64,
}

#[derive(Debug, Clone, Copy)]
enum ReadSide {
    Idle { cooldown: u32 },
    Streaming {
        request: ReadRequest,
        next_beat: u16,
        wait: u32,
        rejected: bool,
    },
}

#[derive(Debug, Clone, Copy)]
enum WriteSide {
    Idle { cooldown: u32 },
    Accepting {
        request: WriteRequest,
        next_beat: u16,
        wait: u32,
        status: BusStatus,
    },
    Responding { status: BusStatus, wait: u32 },
}

/// Bus responder backed by sparse memory.
#[derive(Debug)]
pub struct MemoryResponder {
    memory: BackingMemory,
    timing: BusTiming,
    read: ReadSide,
    write: WriteSide,
    faults: Vec<FaultWindow>,
    events: Vec<BusEvent>,
    violations: Vec<BusError>,
    stats: ResponderStats,
}

impl MemoryResponder {
    pub fn new(memory: BackingMemory, timing: BusTiming) -> Self {
        Self {
            memory,
            timing,
            read: ReadSide::Idle { cooldown: 0 },
            write: WriteSide::Idle { cooldown: 0 },
            faults: Vec::new(),
            events: Vec::new(),
            violations: Vec::new(),
            stats: ResponderStats::default(),
        }
    }

    /// Add a fault window (builder form).
    pub fn with_fault(mut self, window: FaultWindow) -> Self {
        self.faults.push(window);
        self
    }

    pub fn add_fault(&mut self, window: FaultWindow) {
        self.faults.push(window);
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    pub fn memory(&self) -> &BackingMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut BackingMemory {
        &mut self.memory
    }

    pub fn into_memory(self) -> BackingMemory {
        self.memory
    }

    pub fn timing(&self) -> &BusTiming {
        &self.timing
    }

    pub fn events(&self) -> &[BusEvent] {
        &self.events
    }

    /// Accepted read requests, in order.
    pub fn read_requests(&self) -> impl Iterator<Item = &ReadRequest> {
        self.events.iter().filter_map(|e| match e {
            BusEvent::Read(r) => Some(r),
            BusEvent::Write(_) => None,
        })
    }

    /// Accepted write requests, in order.
    pub fn write_requests(&self) -> impl Iterator<Item = &WriteRequest> {
        self.events.iter().filter_map(|e| match e {
            BusEvent::Write(w) => Some(w),
            BusEvent::Read(_) => None,
        })
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Protocol violations seen so far.
    pub fn violations(&self) -> &[BusError] {
        &self.violations
    }

    pub fn stats(&self) -> &ResponderStats {
        &self.stats
    }

    /// True when no burst is in flight on either side.
    pub fn is_idle(&self) -> bool {
        matches!(self.read, ReadSide::Idle { .. }) && matches!(self.write, WriteSide::Idle { .. })
    }

    fn faulted(&self, addr: u64, is_read: bool) -> bool {
        self.faults.iter().any(|f| f.hits(addr, is_read))
    }

    fn record_violation(&mut self, error: BusError) {
        log::error!("bus protocol violation: {}", error);
        self.violations.push(error);
    }
}

impl BusResponder for MemoryResponder {
    fn try_read_request(&mut self, request: ReadRequest) -> bool {
        match self.read {
            ReadSide::Idle { cooldown: 0 } => {}
            _ => return false,
        }

        let rejected = match request.check() {
            Ok(()) => false,
            Err(e) => {
                self.record_violation(e);
                true
            }
        };

        log::trace!("bus: read request 0x{:x} x{}", request.address, request.beats);
        self.events.push(BusEvent::Read(request));
        self.stats.read_requests += 1;
        self.memory.record_bus_read(request.address, request.byte_len() as usize);

        self.read = ReadSide::Streaming {
            request,
            next_beat: 0,
            wait: self.timing.read_latency_cycles + 1,
            rejected,
        };
        true
    }

    fn poll_read_beat(&mut self) -> Option<ReadBeat> {
        let (request, next_beat, rejected) = match self.read {
            ReadSide::Streaming { request, next_beat, wait: 0, rejected } => (request, next_beat, rejected),
            _ => return None,
        };

        let addr = request.beat_address(next_beat);
        let status = if rejected || self.faulted(addr, true) {
            BusStatus::SlaveError
        } else {
            BusStatus::Okay
        };
        let data = if status.is_ok() { self.memory.read_u32(addr) } else { 0 };

        let beats = request.beats.max(1);
        let last = next_beat + 1 >= beats;

        self.stats.read_beats += 1;
        if !status.is_ok() {
            self.stats.error_responses += 1;
        }

        self.read = if last {
            ReadSide::Idle { cooldown: self.timing.request_wait_cycles + 1 }
        } else {
            ReadSide::Streaming {
                request,
                next_beat: next_beat + 1,
                wait: self.timing.beat_gap_cycles + 1,
                rejected,
            }
        };

        Some(ReadBeat { data, last, status })
    }

    fn try_write_request(&mut self, request: WriteRequest) -> bool {
        match self.write {
            WriteSide::Idle { cooldown: 0 } => {}
            _ => return false,
        }

        let status = match request.check() {
            Ok(()) => BusStatus::Okay,
            Err(e) => {
                self.record_violation(e);
                BusStatus::SlaveError
            }
        };

        log::trace!("bus: write request 0x{:x} x{}", request.address, request.beats);
        self.events.push(BusEvent::Write(request));
        self.stats.write_requests += 1;
        self.memory.record_bus_write(request.address, request.byte_len() as usize);

        self.write = WriteSide::Accepting { request, next_beat: 0, wait: 0, status };
        true
    }

    fn try_write_beat(&mut self, beat: WriteBeat) -> bool {
        let (request, next_beat, mut status) = match self.write {
            WriteSide::Accepting { request, next_beat, wait: 0, status } => (request, next_beat, status),
            _ => return false,
        };

        let beats = request.beats.max(1);
        let expected_last = next_beat + 1 >= beats;
        if beat.last != expected_last {
            self.record_violation(BusError::LastMismatch {
                beat: next_beat,
                beats: request.beats,
                last: beat.last,
            });
            status = BusStatus::SlaveError;
        }

        let addr = request.beat_address(next_beat);
        if self.faulted(addr, false) {
            status = BusStatus::SlaveError;
        }
        if status.is_ok() {
            self.memory.write_u32(addr, beat.data);
        }
        self.stats.write_beats += 1;

        self.write = if beat.last || expected_last {
            WriteSide::Responding { status, wait: self.timing.write_response_cycles + 1 }
        } else {
            WriteSide::Accepting {
                request,
                next_beat: next_beat + 1,
                wait: self.timing.beat_gap_cycles + 1,
                status,
            }
        };
        true
    }

    fn poll_write_response(&mut self) -> Option<BusStatus> {
        match self.write {
            WriteSide::Responding { status, wait: 0 } => {
                if !status.is_ok() {
                    self.stats.error_responses += 1;
                }
                self.write = WriteSide::Idle { cooldown: self.timing.request_wait_cycles + 1 };
                Some(status)
            }
            _ => None,
        }
    }

    fn tick(&mut self) {
        match &mut self.read {
            ReadSide::Idle { cooldown } => *cooldown = cooldown.saturating_sub(1),
            ReadSide::Streaming { wait, .. } => *wait = wait.saturating_sub(1),
        }
        match &mut self.write {
            WriteSide::Idle { cooldown } => *cooldown = cooldown.saturating_sub(1),
            WriteSide::Accepting { wait, .. } | WriteSide::Responding { wait, .. } => {
                *wait = wait.saturating_sub(1)
            }
        }
    }
}
