//! Responder timing model.
//!
//! The memory responder inserts wait states on every phase of a burst:
//!
//! ```text
//! read:   ┌──────────┐  ┌─────────────┐  ┌─────────────────────────┐
//!         │ request  │─►│ read        │─►│ beats (1 + gap cycles   │
//!         │ accepted │  │ latency     │  │  between each beat)     │
//!         └──────────┘  └─────────────┘  └────────────┬────────────┘
//!                                                      ▼
//!                                        not ready for request_wait
//!
//! write:  ┌──────────┐  ┌─────────────────────────┐  ┌──────────────┐
//!         │ request  │─►│ beats (1 + gap cycles)  │─►│ response     │
//!         │ accepted │  │                         │  │ latency      │
//!         └──────────┘  └─────────────────────────┘  └──────────────┘
//! ```
//!
//! Every count is a number of idle cycles between two handshakes, so a
//! value of 0 means the next handshake can happen on the following cycle.

use serde::{Deserialize, Serialize};

use crate::device::bus_spec;

/// Wait-state configuration for [`MemoryResponder`](super::MemoryResponder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusTiming {
    /// Cycles the request channels stay not-ready after a burst completes
    pub request_wait_cycles: u32,

    /// Cycles from read request acceptance to the first data beat
    pub read_latency_cycles: u32,

    /// Idle cycles between consecutive beats on either data channel
    pub beat_gap_cycles: u32,

    /// Cycles from the last write beat to the write response
    pub write_response_cycles: u32,
}

impl Default for BusTiming {
    fn default() -> Self {
        Self {
            request_wait_cycles: bus_spec::DEFAULT_REQUEST_WAIT_CYCLES,
            read_latency_cycles: bus_spec::DEFAULT_READ_LATENCY_CYCLES,
            beat_gap_cycles: bus_spec::DEFAULT_BEAT_GAP_CYCLES,
            write_response_cycles: bus_spec::DEFAULT_WRITE_RESPONSE_CYCLES,
        }
    }
}

impl BusTiming {
    /// No wait states at all.
    pub fn instant() -> Self {
        Self {
            request_wait_cycles: 0,
            read_latency_cycles: 0,
            beat_gap_cycles: 0,
            write_response_cycles: 0,
        }
    }

    /// A deliberately slow bus, useful for exercising stalls.
    pub fn sluggish() -> Self {
        Self {
            request_wait_cycles: 3,
            read_latency_cycles: 7,
            beat_gap_cycles: 2,
            write_response_cycles: 5,
        }
    }

    /// Minimum responder-side cycles for a read burst, excluding request wait.
    pub fn read_burst_cycles(&self, beats: u16) -> u64 {
        let beats = beats as u64;
        self.read_latency_cycles as u64 + beats + beats.saturating_sub(1) * self.beat_gap_cycles as u64
    }

    /// Minimum responder-side cycles for a write burst including its response.
    pub fn write_burst_cycles(&self, beats: u16) -> u64 {
        let beats = beats as u64;
        beats + beats.saturating_sub(1) * self.beat_gap_cycles as u64 + self.write_response_cycles as u64 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let timing = BusTiming::default();
        assert_eq!(timing.read_latency_cycles, bus_spec::DEFAULT_READ_LATENCY_CYCLES);
        assert_eq!(timing.write_response_cycles, bus_spec::DEFAULT_WRITE_RESPONSE_CYCLES);
    }

    #[test]
    fn test_burst_cycle_estimates() {
        let timing = BusTiming {
            request_wait_cycles: 0,
            read_latency_cycles: 4,
            beat_gap_cycles: 1,
            write_response_cycles: 2,
        };

        // 4 latency + 8 beats + 7 gaps
        assert_eq!(timing.read_burst_cycles(8), 19);
        // 8 beats + 7 gaps + 2 response wait + the response handshake
        assert_eq!(timing.write_burst_cycles(8), 18);
    }

    #[test]
    fn test_instant_timing() {
        let timing = BusTiming::instant();
        assert_eq!(timing.read_burst_cycles(16), 16);
        assert_eq!(timing.write_burst_cycles(1), 2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let timing: BusTiming = toml::from_str("read_latency_cycles = 9").unwrap();
        assert_eq!(timing.read_latency_cycles, 9);
        assert_eq!(timing.beat_gap_cycles, bus_spec::DEFAULT_BEAT_GAP_CYCLES);
    }
}
