//! Scratch buffer for fetched source words.
//!
//! The buffer holds a window of whole source rows. Each slot tracks which
//! columns of its row have arrived, so partially fetched rows (a row split
//! over several bursts) are never read past what was staged.
//!
//! [`ScratchGranularity::Rows`] keeps a sliding window of `n` rows and
//! [`ScratchGranularity::WholeMatrix`] keeps everything. A window of two rows is enough for each source row to be
//! fetched exactly once.
//!
//! Claiming a row with no free slot evicts the oldest row; every coordinate
//! in it becomes unstaged. The sequencer evicts explicitly before fetching,
//! so this only happens when the caller skipped that.

use serde::{Deserialize, Serialize};

use super::DmaError;
use crate::device::bus_spec::DEFAULT_SCRATCH_ROWS;

/// Scratch capacity policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScratchGranularity {
    /// Sliding window of this many source rows
    Rows(usize),
    /// The entire source matrix
    WholeMatrix,
}

impl Default for ScratchGranularity {
    fn default() -> Self {
        ScratchGranularity::Rows(DEFAULT_SCRATCH_ROWS)
    }
}

impl ScratchGranularity {
    pub fn normalized(self) -> Self {
        match self {
            ScratchGranularity::Rows(0) => ScratchGranularity::Rows(1),
            other => other,
        }
    }

    /// Number of row slots needed for a matrix of `width` rows.
    pub fn rows_for(&self, width: usize) -> usize {
        match *self {
            ScratchGranularity::Rows(n) => n.clamp(1, width.max(1)),
            ScratchGranularity::WholeMatrix => width.max(1),
        }
    }
}

#[derive(Debug, Clone)]
struct StagedRow {
    row: usize,
    words: Vec<u32>,
    valid: Vec<bool>,
    /// Claim order, for the fallback eviction
    stamp: u64,
}

impl StagedRow {
    fn new(row: usize, width: usize, stamp: u64) -> Self {
        Self {
            row,
            words: vec![0; width],
            valid: vec![false; width],
            stamp,
        }
    }
}

/// Window of staged source words, addressed by source coordinate.
#[derive(Debug, Clone)]
pub struct ScratchBuffer {
    width: usize,
    slots: Vec<Option<StagedRow>>,
    next_stamp: u64,
    evictions: u64,
}

impl ScratchBuffer {
    /// Create a buffer for a `width`-column source matrix.
    pub fn new(width: usize, granularity: ScratchGranularity) -> Self {
        let rows = granularity.normalized().rows_for(width);
        Self {
            width,
            slots: vec![None; rows],
            next_stamp: 0,
            evictions: 0,
        }
    }

    /// Source row width this buffer was sized for.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of row slots.
    pub fn capacity_rows(&self) -> usize {
        self.slots.len()
    }

    /// Rows evicted so far.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    fn slot(&self, row: usize) -> Option<&StagedRow> {
        self.slots.iter().flatten().find(|s| s.row == row)
    }

    /// True if the word at (row, col) has been staged.
    pub fn has(&self, row: usize, col: usize) -> bool {
        self.slot(row)
            .and_then(|s| s.valid.get(col).copied())
            .unwrap_or(false)
    }

    /// Staged word at (row, col).
    pub fn get(&self, row: usize, col: usize) -> Result<u32, DmaError> {
        match self.slot(row) {
            Some(s) if s.valid.get(col).copied().unwrap_or(false) => Ok(s.words[col]),
            _ => Err(DmaError::NotStaged { row, col }),
        }
    }

    /// Stage a word, overwriting any previous value at the same coordinate.
    pub fn put(&mut self, row: usize, col: usize, word: u32) {
        if col >= self.width {
            debug_assert!(false, "scratch column {} outside width {}", col, self.width);
            log::warn!("scratch: dropping word for column {} (width {})", col, self.width);
            return;
        }

        let idx = self.claim(row);
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.words[col] = word;
            slot.valid[col] = true;
        }
    }

    /// Stage consecutive words of one row starting at `start_col`.
    pub fn put_run(&mut self, row: usize, start_col: usize, words: &[u32]) {
        for (offset, &word) in words.iter().enumerate() {
            self.put(row, start_col + offset, word);
        }
    }

    /// True when every column of `row` is staged.
    pub fn row_complete(&self, row: usize) -> bool {
        self.slot(row).is_some_and(|s| s.valid.iter().all(|&v| v))
    }

    /// True when `row` occupies a slot, even partially.
    pub fn holds_row(&self, row: usize) -> bool {
        self.slot(row).is_some()
    }

    /// Rows currently occupying slots, in slot order.
    pub fn staged_rows(&self) -> Vec<usize> {
        self.slots.iter().flatten().map(|s| s.row).collect()
    }

    /// True when claiming a new row would evict one.
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Drop `row` from the buffer. Returns false if it was not present.
    pub fn evict(&mut self, row: usize) -> bool {
        match self.slots.iter_mut().find(|s| s.as_ref().is_some_and(|s| s.row == row)) {
            Some(slot) => {
                *slot = None;
                self.evictions += 1;
                log::trace!("scratch: evicted row {}", row);
                true
            }
            None => false,
        }
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.next_stamp = 0;
    }

    /// Slot index holding `row`, claiming one if needed.
    fn claim(&mut self, row: usize) -> usize {
        if let Some(idx) = self.slots.iter().position(|s| s.as_ref().is_some_and(|s| s.row == row)) {
            return idx;
        }

        let idx = match self.slots.iter().position(Option::is_none) {
            Some(free) => free,
            None => {
                let oldest = self
                    .slots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, s)| s.as_ref().map(|s| (i, s.stamp)))
                    .min_by_key(|&(_, stamp)| stamp)
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                if let Some(victim) = &self.slots[oldest] {
                    log::trace!("scratch: row {} displaces row {}", row, victim.row);
                }
                self.evictions += 1;
                oldest
            }
        };

        self.slots[idx] = Some(StagedRow::new(row, self.width, self.next_stamp));
        self.next_stamp += 1;
        idx
    }
}
