//! Transfer configuration, output cursor and sequencer states.
//!
//! # Transfer Lifecycle
//!
//! ```text
//!              start
//! ┌──────┐  (valid cfg)  ┌──────────┐ row staged ┌─────────┐  run   ┌─────────┐
//! │ Idle ├──────────────►│ Fetching ├───────────►│ Staging ├───────►│ Writing │
//! └──▲───┘               └────▲─────┘            └────▲────┘        └────┬────┘
//!    │                        │ next run needs        │ next run         │ last beat
//!    │                        │ an unstaged row       │ is staged        ▼
//!    │   next cycle   ┌───────┴──┐                ┌───┴──────────────────────┐
//!    └────────────────┤ Complete │◄───────────────┤       AwaitingAck        │
//!                     └──────────┘ cursor exhausted└──────────────────────────┘
//! ```
//!
//! Every non-idle state owns the [`ActiveTransfer`], so the configuration
//! and cursor exist exactly as long as a transfer is in flight.

use super::burst::next_burst_beats;
use super::mapper::CoordinateMapper;
use super::scratch::ScratchBuffer;
use super::{DmaError, InvalidConfig};
use crate::device::bus_spec::{PADDING, WORD_BYTES};

/// Parameters of one transfer, captured at the start edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferConfig {
    /// Byte address of source element (0, 0)
    pub source_base: u64,
    /// Byte address of destination element (0, 0)
    pub dest_base: u64,
    /// Source matrix width (and height)
    pub width: usize,
}

impl TransferConfig {
    pub fn new(source_base: u64, dest_base: u64, width: usize) -> Self {
        Self { source_base, dest_base, width }
    }

    /// Check the configuration and build its coordinate mapper.
    pub fn validate(&self) -> Result<CoordinateMapper, DmaError> {
        let mapper = CoordinateMapper::new(self.width)?;

        for (which, address) in [("source", self.source_base), ("destination", self.dest_base)] {
            if address % WORD_BYTES != 0 {
                return Err(InvalidConfig::Misaligned { which, address }.into());
            }
        }

        let regions = [
            ("source", self.source_base, self.source_words()),
            ("destination", self.dest_base, self.dest_words()),
        ];
        for (which, address, words) in regions {
            let fits = (words as u64)
                .checked_mul(WORD_BYTES)
                .and_then(|bytes| address.checked_add(bytes));
            if fits.is_none() {
                return Err(InvalidConfig::AddressOverflow { which, address }.into());
            }
        }

        Ok(mapper)
    }

    pub fn padded_width(&self) -> usize {
        self.width + PADDING
    }

    /// Words in the source matrix.
    pub fn source_words(&self) -> usize {
        self.width.saturating_mul(self.width)
    }

    /// Words in the padded destination matrix.
    pub fn dest_words(&self) -> usize {
        self.padded_width().saturating_mul(self.padded_width())
    }

    /// Byte address of source element (row, col).
    pub fn source_addr(&self, row: usize, col: usize) -> u64 {
        self.source_base + ((row * self.width + col) as u64) * WORD_BYTES
    }

    /// Byte address of destination element (row, col).
    pub fn dest_addr(&self, row: usize, col: usize) -> u64 {
        self.dest_base + ((row * self.padded_width() + col) as u64) * WORD_BYTES
    }
}

/// Row-major position in the padded output. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputCursor {
    row: usize,
    col: usize,
    padded_width: usize,
}

impl OutputCursor {
    pub fn new(padded_width: usize) -> Self {
        Self { row: 0, col: 0, padded_width }
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    /// Current (row, col), or `None` once every element has been written.
    pub fn position(&self) -> Option<(usize, usize)> {
        (!self.is_exhausted()).then_some((self.row, self.col))
    }

    pub fn is_exhausted(&self) -> bool {
        self.row >= self.padded_width
    }

    /// Elements produced so far.
    pub fn linear(&self) -> usize {
        self.row * self.padded_width + self.col
    }

    /// Elements still to be produced.
    pub fn remaining(&self) -> usize {
        (self.padded_width * self.padded_width).saturating_sub(self.linear())
    }

    /// Output coordinate `offset` elements past the cursor.
    pub fn coord_at(&self, offset: usize) -> (usize, usize) {
        let linear = self.linear() + offset;
        (linear / self.padded_width, linear % self.padded_width)
    }

    /// Move past `n` elements.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining(), "cursor advanced past the end");
        let (row, col) = self.coord_at(n.min(self.remaining()));
        self.row = row;
        self.col = col;
    }
}

/// A contiguous run of output elements written by one burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRun {
    /// Output coordinate of the first element
    pub row: usize,
    pub col: usize,
    /// Elements in the run (one per beat)
    pub len: u16,
    /// Destination byte address of the first element
    pub address: u64,
}

/// State owned by a transfer in flight.
#[derive(Debug, Clone)]
pub struct ActiveTransfer {
    pub config: TransferConfig,
    pub mapper: CoordinateMapper,
    pub cursor: OutputCursor,
}

impl ActiveTransfer {
    pub fn new(config: TransferConfig, mapper: CoordinateMapper) -> Self {
        Self {
            config,
            mapper,
            cursor: OutputCursor::new(mapper.padded_width()),
        }
    }

    /// Source row needed by the output row under the cursor.
    pub fn needed_row(&self) -> Option<usize> {
        self.cursor.position().map(|(row, _)| self.mapper.source_row(row))
    }

    /// Longest run starting at the cursor that is fully staged and fits in
    /// one legal burst. Runs may continue into following output rows while
    /// their source rows are staged too.
    pub fn next_run(&self, scratch: &ScratchBuffer, max_beats: u16) -> Option<OutputRun> {
        let (row, col) = self.cursor.position()?;
        let address = self.config.dest_addr(row, col);
        let limit = next_burst_beats(address, self.cursor.remaining(), max_beats) as usize;
        let padded = self.mapper.padded_width();

        let (mut len, mut out_row, mut out_col) = (0, row, col);
        while len < limit && out_row < padded && scratch.row_complete(self.mapper.source_row(out_row)) {
            len += (padded - out_col).min(limit - len);
            out_row += 1;
            out_col = 0;
        }

        (len > 0).then_some(OutputRun { row, col, len: len as u16, address })
    }

    /// Word for output element `offset` elements past the cursor.
    pub fn word_at(&self, scratch: &ScratchBuffer, offset: usize) -> Result<u32, DmaError> {
        let (row, col) = self.cursor.coord_at(offset);
        let source = self.mapper.map(row, col);
        scratch.get(source.row(), source.col())
    }
}

/// Sequencer state. Each variant carries only what is valid in it.
#[derive(Debug, Clone, Default)]
pub enum TransferState {
    #[default]
    Idle,
    /// Reading source `row`; `next_col` is the first column not yet requested
    Fetching {
        xfer: ActiveTransfer,
        row: usize,
        next_col: usize,
    },
    /// Choosing the next output run
    Staging { xfer: ActiveTransfer },
    /// Streaming `run` on the write channel
    Writing { xfer: ActiveTransfer, run: OutputRun },
    /// Waiting for the write acknowledgment of `run`
    AwaitingAck { xfer: ActiveTransfer, run: OutputRun },
    /// Finished; returns to `Idle` on the next cycle
    Complete,
}

impl TransferState {
    pub fn name(&self) -> &'static str {
        match self {
            TransferState::Idle => "Idle",
            TransferState::Fetching { .. } => "Fetching",
            TransferState::Staging { .. } => "Staging",
            TransferState::Writing { .. } => "Writing",
            TransferState::AwaitingAck { .. } => "AwaitingAck",
            TransferState::Complete => "Complete",
        }
    }

    /// True while a transfer is in flight.
    pub fn is_active(&self) -> bool {
        !matches!(self, TransferState::Idle | TransferState::Complete)
    }

    pub fn transfer(&self) -> Option<&ActiveTransfer> {
        match self {
            TransferState::Fetching { xfer, .. }
            | TransferState::Staging { xfer }
            | TransferState::Writing { xfer, .. }
            | TransferState::AwaitingAck { xfer, .. } => Some(xfer),
            TransferState::Idle | TransferState::Complete => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dma::ScratchGranularity;

    fn make_transfer(width: usize) -> ActiveTransfer {
        let config = TransferConfig::new(0x1000, 0x8000, width);
        let mapper = config.validate().unwrap();
        ActiveTransfer::new(config, mapper)
    }

    fn stage_rows(scratch: &mut ScratchBuffer, rows: &[usize]) {
        let width = scratch.width();
        for &row in rows {
            let words: Vec<u32> = (0..width).map(|c| (row * width + c) as u32).collect();
            scratch.put_run(row, 0, &words);
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(TransferConfig::new(0x0, 0x100, 3).validate().is_ok());
        assert_eq!(
            TransferConfig::new(0x0, 0x100, 0).validate(),
            Err(DmaError::ConfigInvalid(InvalidConfig::ZeroWidth))
        );
        assert_eq!(
            TransferConfig::new(0x2, 0x100, 4).validate(),
            Err(DmaError::ConfigInvalid(InvalidConfig::Misaligned { which: "source", address: 0x2 }))
        );
        assert_eq!(
            TransferConfig::new(0x0, 0x101, 4).validate(),
            Err(DmaError::ConfigInvalid(InvalidConfig::Misaligned { which: "destination", address: 0x101 }))
        );
    }

    #[test]
    fn test_config_rejects_wrapping_region() {
        let config = TransferConfig::new(0x0, u64::MAX - 3, 4);
        assert!(matches!(
            config.validate(),
            Err(DmaError::ConfigInvalid(InvalidConfig::AddressOverflow { which: "destination", .. }))
        ));
    }

    #[test]
    fn test_addresses() {
        let config = TransferConfig::new(0x1000, 0x8000, 4);
        assert_eq!(config.source_addr(1, 2), 0x1000 + 6 * 4);
        assert_eq!(config.dest_addr(1, 0), 0x8000 + 6 * 4);
        assert_eq!(config.dest_words(), 36);
    }

    #[test]
    fn test_cursor_advance_wraps_rows() {
        let mut cursor = OutputCursor::new(6);
        cursor.advance(4);
        assert_eq!(cursor.position(), Some((0, 4)));
        cursor.advance(4);
        assert_eq!(cursor.position(), Some((1, 2)));
        assert_eq!(cursor.remaining(), 36 - 8);

        cursor.advance(28);
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.position(), None);
    }

    #[test]
    fn test_run_stops_at_unstaged_row() {
        let xfer = make_transfer(4);
        let mut scratch = ScratchBuffer::new(4, ScratchGranularity::Rows(2));
        stage_rows(&mut scratch, &[1]);

        // Output row 0 reads source row 1; output row 1 needs row 0
        let run = xfer.next_run(&scratch, 256).unwrap();
        assert_eq!(run, OutputRun { row: 0, col: 0, len: 6, address: 0x8000 });
    }

    #[test]
    fn test_run_spans_staged_rows() {
        let xfer = make_transfer(4);
        let mut scratch = ScratchBuffer::new(4, ScratchGranularity::WholeMatrix);
        stage_rows(&mut scratch, &[0, 1, 2, 3]);

        let run = xfer.next_run(&scratch, 256).unwrap();
        assert_eq!(run.len, 36);

        let run = xfer.next_run(&scratch, 8).unwrap();
        assert_eq!(run.len, 8);
    }

    #[test]
    fn test_no_run_without_data() {
        let xfer = make_transfer(4);
        let scratch = ScratchBuffer::new(4, ScratchGranularity::Rows(2));
        assert_eq!(xfer.next_run(&scratch, 256), None);
    }

    #[test]
    fn test_word_at_applies_mirror() {
        let mut xfer = make_transfer(4);
        let mut scratch = ScratchBuffer::new(4, ScratchGranularity::WholeMatrix);
        stage_rows(&mut scratch, &[0, 1, 2, 3]);

        // Output (0, 0) copies source (1, 1)
        assert_eq!(xfer.word_at(&scratch, 0), Ok(5));
        // Output (0, 5) copies source (1, 2)
        assert_eq!(xfer.word_at(&scratch, 5), Ok(6));

        xfer.cursor.advance(30);
        // Output (5, 0) copies source (2, 1)
        assert_eq!(xfer.word_at(&scratch, 0), Ok(9));
    }

    #[test]
    fn test_state_names() {
        let xfer = make_transfer(3);
        assert_eq!(TransferState::Idle.name(), "Idle");
        assert!(!TransferState::Complete.is_active());

        let staging = TransferState::Staging { xfer };
        assert!(staging.is_active());
        assert!(staging.transfer().is_some());
    }
}
