//! Harness for running padding transfers end to end.
//!
//! This module provides:
//! - [`reference_pad`], a direct software rendition of reflect padding
//! - [`seeded_matrix`], deterministic input matrices
//! - [`run_padding`], which drives a [`PadDevice`] through one transfer and
//!   checks the result against the reference
//!
//! # Usage
//!
//! ```
//! use mirror_dma::device::bus::BusTiming;
//! use mirror_dma::device::dma::EngineConfig;
//! use mirror_dma::testing::{run_padding, seeded_matrix};
//!
//! let input = seeded_matrix(8, 42);
//! let run = run_padding(&input, 8, EngineConfig::default(), BusTiming::default()).unwrap();
//! assert!(run.outcome.is_pass());
//! ```

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::device::bus::{BusTiming, MemoryResponder, ResponderStats};
use crate::device::bus_spec::PADDING;
use crate::device::dma::{map_axis, EngineConfig, EngineStats, TransferConfig};
use crate::device::{BackingMemory, DeviceError, PadDevice};

/// Source matrix base used by [`run_padding`].
pub const SOURCE_BASE: u64 = 0x0001_0000;

/// Destination matrix base used by [`run_padding`].
pub const DEST_BASE: u64 = 0x1000_0000;

/// Cycle budget per output word before a run is declared hung.
const CYCLES_PER_WORD: u64 = 1_000;

/// Reflect-pad a row-major `width × width` matrix.
///
/// # Panics
///
/// If `width < 3` or `input` is not `width * width` long.
pub fn reference_pad(input: &[u32], width: usize) -> Vec<u32> {
    assert!(width >= 3, "reflect padding needs width >= 3, got {}", width);
    assert_eq!(input.len(), width * width, "input is not {}x{}", width, width);

    let padded = width + PADDING;
    let mut output = Vec::with_capacity(padded * padded);
    for row in 0..padded {
        let src_row = map_axis(row, width);
        for col in 0..padded {
            output.push(input[src_row * width + map_axis(col, width)]);
        }
    }
    output
}

/// Deterministic pseudo-random `width × width` matrix.
pub fn seeded_matrix(width: usize, seed: u64) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..width * width).map(|_| rng.gen()).collect()
}

/// Result of a single padding run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Output matched the reference.
    Pass,
    /// Transfer completed but the output differs.
    Mismatch {
        /// Index of the first wrong output word
        index: usize,
        expected: u32,
        actual: u32,
    },
    /// The device reported an error or never finished.
    Failed(DeviceError),
}

impl RunOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, RunOutcome::Pass)
    }
}

/// Everything observed during one run.
#[derive(Debug, Clone)]
pub struct PadRun {
    pub width: usize,
    pub outcome: RunOutcome,
    /// Padded output as read back from memory
    pub output: Vec<u32>,
    pub cycles: u64,
    pub engine: EngineStats,
    pub bus: ResponderStats,
    /// Memory after the run, with `source` and `destination` regions
    pub memory: BackingMemory,
}

impl PadRun {
    /// Padded output row `row`.
    pub fn output_row(&self, row: usize) -> &[u32] {
        let padded = self.width + PADDING;
        &self.output[row * padded..(row + 1) * padded]
    }

    /// Source matrix as an aligned text grid.
    pub fn format_source(&self) -> String {
        self.memory.format_matrix(SOURCE_BASE, self.width, self.width)
    }

    /// Padded output as an aligned text grid.
    pub fn format_output(&self) -> String {
        let padded = self.width + PADDING;
        self.memory.format_matrix(DEST_BASE, padded, padded)
    }
}

/// Pad `input` through a freshly built device and compare with the reference.
///
/// Errors only for unusable arguments; transfer failures are reported in
/// [`PadRun::outcome`].
pub fn run_padding(input: &[u32], width: usize, engine: EngineConfig, timing: BusTiming) -> Result<PadRun> {
    if width < 3 {
        bail!("width {} is below the mirror-padding minimum of 3", width);
    }
    if input.len() != width * width {
        bail!("input has {} words, expected {}x{} = {}", input.len(), width, width, width * width);
    }

    let padded = width + PADDING;
    let mut memory = BackingMemory::new();
    memory.allocate_region("source", SOURCE_BASE, input.len() * 4)?;
    memory.allocate_region("destination", DEST_BASE, padded * padded * 4)?;
    memory.write_words(SOURCE_BASE, input);

    let mut device = PadDevice::new(engine, MemoryResponder::new(memory, timing));
    device
        .registers_mut()
        .program(&TransferConfig::new(SOURCE_BASE, DEST_BASE, width));

    let budget = CYCLES_PER_WORD * (padded * padded) as u64;
    let result = device.run_until_done(budget);
    let output = device.bus().memory().read_words(DEST_BASE, padded * padded);

    let outcome = match result {
        Err(e) => RunOutcome::Failed(e),
        Ok(_) => {
            let expected = reference_pad(input, width);
            match expected.iter().zip(&output).position(|(e, a)| e != a) {
                Some(index) => RunOutcome::Mismatch {
                    index,
                    expected: expected[index],
                    actual: output[index],
                },
                None => RunOutcome::Pass,
            }
        }
    };

    let cycles = device.cycle();
    log::debug!("run_padding width={} outcome={:?} cycles={}", width, outcome, cycles);

    let engine = device.stats().clone();
    let bus = device.into_bus();
    Ok(PadRun {
        width,
        outcome,
        output,
        cycles,
        engine,
        bus: bus.stats().clone(),
        memory: bus.into_memory(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dma::ScratchGranularity;
    use proptest::prelude::*;

    #[test]
    fn test_reference_width_four() {
        let input: Vec<u32> = (1..=16).collect();
        let output = reference_pad(&input, 4);

        assert_eq!(output.len(), 36);
        assert_eq!(&output[0..6], &[6, 5, 6, 7, 8, 7]);
        assert_eq!(&output[30..36], &[10, 9, 10, 11, 12, 11]);
    }

    #[test]
    fn test_seeded_matrix_is_deterministic() {
        assert_eq!(seeded_matrix(5, 7), seeded_matrix(5, 7));
        assert_ne!(seeded_matrix(5, 7), seeded_matrix(5, 8));
        assert_eq!(seeded_matrix(5, 7).len(), 25);
    }

    #[test]
    fn test_run_padding_passes() {
        for width in [8, 16, 32] {
            let input = seeded_matrix(width, width as u64);
            let run = run_padding(&input, width, EngineConfig::default(), BusTiming::default()).unwrap();

            assert!(run.outcome.is_pass(), "width {}: {:?}", width, run.outcome);
            assert_eq!(run.engine.rows_fetched, width as u64);
            assert_eq!(run.engine.words_written, ((width + 2) * (width + 2)) as u64);
            assert_eq!(run.bus.error_responses, 0);
        }
    }

    #[test]
    fn test_corners() {
        let width = 8;
        let input = seeded_matrix(width, 3);
        let run = run_padding(&input, width, EngineConfig::default(), BusTiming::instant()).unwrap();
        assert!(run.outcome.is_pass());

        let at = |r: usize, c: usize| input[r * width + c];
        let last = width + 1;
        assert_eq!(run.output_row(0)[0], at(1, 1));
        assert_eq!(run.output_row(0)[last], at(1, width - 2));
        assert_eq!(run.output_row(last)[0], at(width - 2, 1));
        assert_eq!(run.output_row(last)[last], at(width - 2, width - 2));
    }

    #[test]
    fn test_formatted_output() {
        let input: Vec<u32> = (1..=9).collect();
        let run = run_padding(&input, 3, EngineConfig::default(), BusTiming::instant()).unwrap();

        assert_eq!(run.format_source(), "1 2 3\n4 5 6\n7 8 9\n");
        assert!(run.format_output().starts_with("5 4 5 6 5\n2 1 2 3 2\n"));
    }

    #[test]
    fn test_rejects_bad_arguments() {
        let config = EngineConfig::default();
        assert!(run_padding(&[0; 4], 2, config, BusTiming::instant()).is_err());
        assert!(run_padding(&[0; 8], 3, config, BusTiming::instant()).is_err());
    }

    #[test]
    fn test_region_traffic_is_attributed() {
        let input = seeded_matrix(4, 1);
        let run = run_padding(&input, 4, EngineConfig::default(), BusTiming::instant()).unwrap();
        assert!(run.outcome.is_pass());
        assert_eq!(run.bus.read_beats, 16);
        assert_eq!(run.bus.write_beats, 36);

        let source = run.memory.region("source").unwrap();
        let dest = run.memory.region("destination").unwrap();
        assert_eq!(source.bus_reads, run.engine.read_bursts);
        assert_eq!(source.bus_writes, 0);
        assert_eq!(dest.bus_writes, run.engine.write_bursts);
    }

    proptest! {
        #[test]
        fn property_any_width_and_window_matches_reference(
            width in 3usize..24,
            seed in any::<u64>(),
            max_burst in 1u16..=256,
            rows in 0usize..4,
        ) {
            let scratch = if rows == 0 { ScratchGranularity::WholeMatrix } else { ScratchGranularity::Rows(rows) };
            let engine = EngineConfig { max_burst_beats: max_burst, scratch };
            let input = seeded_matrix(width, seed);

            let run = run_padding(&input, width, engine, BusTiming::instant()).unwrap();
            prop_assert!(run.outcome.is_pass(), "{:?}", run.outcome);
            if rows != 1 {
                prop_assert_eq!(run.engine.rows_fetched, width as u64);
            }
        }
    }
}
