//! mirror-dma library
//!
//! Cycle-stepped model of a memory-to-memory DMA engine that writes the
//! reflect-padded enlargement of a square matrix of 32-bit words.

pub mod config;
pub mod device;
pub mod testing;
