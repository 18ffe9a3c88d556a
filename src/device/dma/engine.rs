//! DMA engine (sequencer).
//!
//! The engine owns both channel controllers and the scratch buffer and moves
//! a transfer through [`TransferState`] one cycle at a time. Each call to
//! [`DmaEngine::step`] performs at most one bus handshake, on whichever
//! channel the current state drives; the caller ticks the responder
//! afterwards.
//!
//! Row fetches are planned against the output cursor. Before a fetch, rows
//! that no later output row reads are dropped from the scratch buffer. If it
//! is still full, the staged row whose next use lies furthest ahead is
//! evicted. With a window of two rows this fetches every source row exactly
//! once, including the mirror rows 1 and `width - 2`.
//!
//! # Usage
//!
//! ```ignore
//! let mut engine = DmaEngine::new(EngineConfig::default());
//! engine.start(TransferConfig::new(src, dst, width))?;
//! while !engine.done() {
//!     engine.step(&mut bus);
//!     bus.tick();
//! }
//! ```

use std::mem;

use super::burst::next_burst_beats;
use super::read_channel::{FetchTarget, ReadChannel};
use super::scratch::ScratchBuffer;
use super::transfer::{ActiveTransfer, TransferConfig, TransferState};
use super::write_channel::WriteChannel;
use super::{ChannelPoll, DmaError, DmaResult, EngineConfig};
use crate::device::bus::BusResponder;

/// Engine counters, accumulated across transfers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub transfers_completed: u64,
    pub transfers_faulted: u64,
    /// Read bursts committed to the scratch buffer
    pub read_bursts: u64,
    /// Write bursts acknowledged with `Okay`
    pub write_bursts: u64,
    pub words_read: u64,
    pub words_written: u64,
    /// Source rows fully staged
    pub rows_fetched: u64,
    /// Start edges dropped because a transfer was in flight
    pub ignored_starts: u64,
    /// Cycles spent with a transfer in flight
    pub busy_cycles: u64,
    /// Busy cycles in which the responder held off a handshake
    pub stall_cycles: u64,
}

/// Mirror-padding DMA engine.
#[derive(Debug)]
pub struct DmaEngine {
    config: EngineConfig,
    state: TransferState,
    read: ReadChannel,
    write: WriteChannel,
    scratch: ScratchBuffer,
    /// Sticky error of the last transfer attempt
    error: Option<DmaError>,
    stats: EngineStats,
}

impl DmaEngine {
    pub fn new(config: EngineConfig) -> Self {
        let config = config.normalized();
        log::debug!(
            "DmaEngine::new max_burst_beats={} scratch={:?}",
            config.max_burst_beats,
            config.scratch
        );
        Self {
            config,
            state: TransferState::Idle,
            read: ReadChannel::new(),
            write: WriteChannel::new(),
            scratch: ScratchBuffer::new(0, config.scratch),
            error: None,
            stats: EngineStats::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    /// High whenever no transfer is in flight.
    pub fn done(&self) -> bool {
        !self.state.is_active()
    }

    /// Sticky error from the most recent transfer attempt.
    pub fn error(&self) -> Option<&DmaError> {
        self.error.as_ref()
    }

    pub fn scratch(&self) -> &ScratchBuffer {
        &self.scratch
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Start edge.
    ///
    /// Returns `Ok(true)` when the transfer was accepted and `Ok(false)` when
    /// the edge was ignored because a transfer is already in flight. An
    /// invalid configuration is refused without touching the bus and is
    /// latched as the sticky error.
    pub fn start(&mut self, config: TransferConfig) -> Result<bool, DmaError> {
        if self.state.is_active() {
            self.stats.ignored_starts += 1;
            log::warn!(
                "DMA start ignored: transfer in flight (state {})",
                self.state.name()
            );
            return Ok(false);
        }

        let mapper = match config.validate() {
            Ok(mapper) => mapper,
            Err(e) => {
                log::warn!("DMA start refused: {}", e);
                self.error = Some(e.clone());
                return Err(e);
            }
        };

        log::info!(
            "DMA start: src=0x{:x} dst=0x{:x} width={} ({}x{} out)",
            config.source_base,
            config.dest_base,
            config.width,
            mapper.padded_width(),
            mapper.padded_width()
        );
        log::debug!("DMA source row order: {:?}", mapper.fetch_order());

        self.error = None;
        self.read.reset();
        self.write.reset();
        self.scratch = ScratchBuffer::new(config.width, self.config.scratch);
        self.state = self.plan(ActiveTransfer::new(config, mapper));
        Ok(true)
    }

    /// Return to `Idle` and clear the sticky error. Statistics survive.
    ///
    /// Refused while a transfer is in flight, since the responder may still
    /// be serving one of its bursts. Returns whether the reset took effect.
    pub fn reset(&mut self) -> bool {
        if self.state.is_active() {
            log::warn!("DMA reset refused while {}", self.state.name());
            return false;
        }

        self.state = TransferState::Idle;
        self.read.reset();
        self.write.reset();
        self.scratch.clear();
        self.error = None;
        true
    }

    /// Advance one cycle.
    ///
    /// # Panics
    ///
    /// On a [`DmaError::ProtocolViolation`] or a scratch miss while writing.
    /// Both are engine defects, not bus conditions.
    pub fn step<B>(&mut self, bus: &mut B) -> DmaResult
    where
        B: BusResponder + ?Sized,
    {
        let state = mem::take(&mut self.state);
        if state.is_active() {
            self.stats.busy_cycles += 1;
        }
        let from = state.name();

        let (next, result) = match state {
            TransferState::Idle => (TransferState::Idle, DmaResult::Idle),

            TransferState::Complete => {
                log::debug!("DMA: Complete -> Idle");
                (TransferState::Idle, DmaResult::Idle)
            }

            TransferState::Fetching { xfer, row, next_col } => self.step_fetch(bus, xfer, row, next_col),

            TransferState::Staging { xfer } => self.step_stage(xfer),

            TransferState::Writing { xfer, run } => {
                let scratch = &self.scratch;
                let poll = self.write.step(bus, |beat| xfer.word_at(scratch, beat as usize));
                match poll {
                    Ok(ChannelPoll::Stalled) => (TransferState::Writing { xfer, run }, DmaResult::Stalled),
                    Ok(_) if self.write.awaiting_response() => {
                        (TransferState::AwaitingAck { xfer, run }, DmaResult::InProgress)
                    }
                    Ok(_) => (TransferState::Writing { xfer, run }, DmaResult::InProgress),
                    Err(e) => self.fail(e),
                }
            }

            TransferState::AwaitingAck { mut xfer, run } => {
                let poll = self.write.step(bus, |beat| {
                    Err(DmaError::ProtocolViolation(format!("beat {} requested after the last beat", beat)))
                });
                match poll {
                    Ok(ChannelPoll::Done) => {
                        self.stats.write_bursts += 1;
                        self.stats.words_written += run.len as u64;
                        xfer.cursor.advance(run.len as usize);
                        log::trace!(
                            "DMA: run ({}, {}) x{} acknowledged, cursor ({}, {})",
                            run.row,
                            run.col,
                            run.len,
                            xfer.cursor.row(),
                            xfer.cursor.col()
                        );

                        let next = self.plan(xfer);
                        if matches!(next, TransferState::Complete) {
                            self.stats.transfers_completed += 1;
                            log::info!(
                                "DMA complete: {} rows fetched, {} evictions",
                                self.stats.rows_fetched,
                                self.scratch.evictions()
                            );
                            (next, DmaResult::Complete)
                        } else {
                            (next, DmaResult::InProgress)
                        }
                    }
                    Ok(ChannelPoll::Stalled) => (TransferState::AwaitingAck { xfer, run }, DmaResult::Stalled),
                    Ok(_) => (TransferState::AwaitingAck { xfer, run }, DmaResult::InProgress),
                    Err(e) => self.fail(e),
                }
            }
        };

        if matches!(result, DmaResult::Stalled) {
            self.stats.stall_cycles += 1;
        }
        if next.name() != from {
            log::debug!("DMA: {} -> {}", from, next.name());
        }
        self.state = next;
        result
    }

    fn step_fetch<B>(
        &mut self,
        bus: &mut B,
        xfer: ActiveTransfer,
        row: usize,
        mut next_col: usize,
    ) -> (TransferState, DmaResult)
    where
        B: BusResponder + ?Sized,
    {
        let width = xfer.config.width;

        if self.read.is_idle() && next_col < width {
            let address = xfer.config.source_addr(row, next_col);
            let beats = next_burst_beats(address, width - next_col, self.config.max_burst_beats);
            let target = FetchTarget { row, start_col: next_col };
            if let Err(e) = self.read.request_read(address, beats, target) {
                return self.fail(e);
            }
            next_col += beats as usize;
        }

        let committed = self.read.words_committed();
        match self.read.step(bus, &mut self.scratch) {
            Ok(ChannelPoll::Done) => {
                self.stats.read_bursts += 1;
                self.stats.words_read += self.read.words_committed() - committed;

                if next_col >= width {
                    self.stats.rows_fetched += 1;
                    log::debug!("DMA: source row {} staged", row);
                    (TransferState::Staging { xfer }, DmaResult::InProgress)
                } else {
                    (TransferState::Fetching { xfer, row, next_col }, DmaResult::InProgress)
                }
            }
            Ok(ChannelPoll::Stalled) => (TransferState::Fetching { xfer, row, next_col }, DmaResult::Stalled),
            Ok(_) => (TransferState::Fetching { xfer, row, next_col }, DmaResult::InProgress),
            Err(e) => self.fail(e),
        }
    }

    fn step_stage(&mut self, xfer: ActiveTransfer) -> (TransferState, DmaResult) {
        let run = match xfer.next_run(&self.scratch, self.config.max_burst_beats) {
            Some(run) => run,
            None => {
                let (row, col) = xfer.cursor.position().unwrap_or_default();
                return self.fail(DmaError::ProtocolViolation(format!(
                    "no staged data for output ({}, {})",
                    row, col
                )));
            }
        };

        if let Err(e) = self.write.request_write(run.address, run.len) {
            return self.fail(e);
        }
        (TransferState::Writing { xfer, run }, DmaResult::InProgress)
    }

    /// Decide what follows once the cursor has moved (or at start).
    fn plan(&mut self, xfer: ActiveTransfer) -> TransferState {
        let needed = match xfer.needed_row() {
            Some(row) => row,
            None => return TransferState::Complete,
        };

        let cursor_row = xfer.cursor.row();
        for row in self.scratch.staged_rows() {
            if xfer.mapper.next_use(row, cursor_row).is_none() {
                self.scratch.evict(row);
            }
        }

        if self.scratch.row_complete(needed) {
            return TransferState::Staging { xfer };
        }

        if self.scratch.is_full() {
            let victim = self
                .scratch
                .staged_rows()
                .into_iter()
                .max_by_key(|&row| xfer.mapper.next_use(row, cursor_row).unwrap_or(usize::MAX));
            if let Some(victim) = victim {
                log::trace!("DMA: evicting row {} to fetch row {}", victim, needed);
                self.scratch.evict(victim);
            }
        }

        TransferState::Fetching { xfer, row: needed, next_col: 0 }
    }

    /// Handle a channel error: abort on bus faults, panic on defects.
    fn fail(&mut self, error: DmaError) -> (TransferState, DmaResult) {
        match error {
            DmaError::ReadFault { .. } | DmaError::WriteFault { .. } => {
                log::error!("DMA transfer aborted: {}", error);
                self.read.reset();
                self.write.reset();
                self.scratch.clear();
                self.stats.transfers_faulted += 1;
                self.error = Some(error.clone());
                (TransferState::Idle, DmaResult::Error(error))
            }
            other => {
                log::error!("DMA protocol violation: {}", other);
                panic!("mirror-dma protocol violation: {}", other);
            }
        }
    }
}
