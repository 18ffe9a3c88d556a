//! Bus and engine constants.
//!
//! The bus follows AXI4-style burst rules: incrementing bursts of at most
//! 256 beats that never cross a 4 KiB address boundary. Every beat moves one
//! 32-bit word.

// ============================================================================
// Data path
// ============================================================================

/// Bytes per element / per beat.
pub const WORD_BYTES: u64 = 4;

/// Encoded beat size field for 4-byte beats (log2 of the byte count).
pub const WORD_SIZE_ENCODING: u8 = 2;

// ============================================================================
// Burst rules
// ============================================================================

/// Longest incrementing burst the bus accepts.
pub const MAX_BURST_BEATS: u16 = 256;

/// Bursts must not straddle this address boundary.
pub const BURST_BOUNDARY_BYTES: u64 = 4096;

/// Default burst cap used by the engine.
pub const DEFAULT_MAX_BURST_BEATS: u16 = MAX_BURST_BEATS;

// ============================================================================
// Mirror padding
// ============================================================================

/// Smallest width the reflect-padding formula supports.
///
/// Width 1 and 2 have no second row to mirror from both edges.
pub const MIN_MIRROR_WIDTH: usize = 3;

/// Border cells added on each axis (one per side).
pub const PADDING: usize = 2;

/// Default scratch window, in source rows.
///
/// Two rows is the smallest window that lets rows 0 and `width+1` of the
/// output reuse rows 1 and `width-2` without refetching.
pub const DEFAULT_SCRATCH_ROWS: usize = 2;

// ============================================================================
// Responder timing defaults (cycles)
// ============================================================================

/// Cycles the responder stays not-ready after finishing a burst.
pub const DEFAULT_REQUEST_WAIT_CYCLES: u32 = 1;

/// Cycles from read request acceptance to the first data beat.
pub const DEFAULT_READ_LATENCY_CYCLES: u32 = 4;

/// Idle cycles inserted between consecutive beats.
pub const DEFAULT_BEAT_GAP_CYCLES: u32 = 0;

/// Cycles from the last write beat to the write response.
pub const DEFAULT_WRITE_RESPONSE_CYCLES: u32 = 2;
