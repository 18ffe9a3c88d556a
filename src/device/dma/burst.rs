//! Splitting contiguous word runs into legal bursts.
//!
//! A run of `n` words starting at `address` is issued as a sequence of
//! bursts, each limited by the configured beat cap and cut at every 4 KiB boundary:
//!
//! ```text
//! address 0x0FF0, 10 words, cap 256:
//!
//!   0x0FF0 ─ 4 words ─┤ 0x1000 boundary ├─ 6 words ─
//!   burst 0: 0x0FF0 x4     burst 1: 0x1000 x6
//! ```

use crate::device::bus_spec::{BURST_BOUNDARY_BYTES, WORD_BYTES};

/// Beats of the next burst for a run starting at `address`.
///
/// `address` must be word aligned; returns 0 only if `remaining` is 0.
pub fn next_burst_beats(address: u64, remaining: usize, max_beats: u16) -> u16 {
    let to_boundary = (BURST_BOUNDARY_BYTES - address % BURST_BOUNDARY_BYTES) / WORD_BYTES;
    let beats = (remaining as u64)
        .min(max_beats.max(1) as u64)
        .min(to_boundary.max(1));
    beats as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Split a run the way the channels do, one burst at a time.
    fn split(mut address: u64, mut words: usize, max_beats: u16) -> Vec<(u64, u16)> {
        let mut bursts = Vec::new();
        while words > 0 {
            let beats = next_burst_beats(address, words, max_beats);
            bursts.push((address, beats));
            address += beats as u64 * WORD_BYTES;
            words -= beats as usize;
        }
        bursts
    }

    #[test]
    fn test_short_run_single_burst() {
        assert_eq!(split(0x1000, 6, 256), vec![(0x1000, 6)]);
    }

    #[test]
    fn test_split_at_beat_cap() {
        assert_eq!(split(0x0, 10, 4), vec![(0x0, 4), (0x10, 4), (0x20, 2)]);
    }

    #[test]
    fn test_split_at_4k_boundary() {
        assert_eq!(split(0x0FF0, 10, 256), vec![(0x0FF0, 4), (0x1000, 6)]);
    }

    #[test]
    fn test_long_run_respects_both_limits() {
        // 1000 words from an unaligned-to-page start
        let bursts = split(0x0F00, 1000, 256);

        let total: usize = bursts.iter().map(|&(_, beats)| beats as usize).sum();
        assert_eq!(total, 1000);
        for &(address, beats) in &bursts {
            assert!((1..=256).contains(&beats));
            let last_byte = address + beats as u64 * 4 - 1;
            assert_eq!(address / 4096, last_byte / 4096, "burst at 0x{:X} crosses 4 KiB", address);
        }
    }

    #[test]
    fn test_next_burst_beats() {
        assert_eq!(next_burst_beats(0x0FFC, 8, 256), 1);
        assert_eq!(next_burst_beats(0x0, 8, 0), 1);
        assert_eq!(next_burst_beats(0x0, 0, 16), 0);
    }
}
