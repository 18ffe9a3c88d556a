//! Sparse backing memory behind the bus responder.
//!
//! The source and destination matrices live here. Storage is allocated in
//! 4 KiB pages on first write, so tests can place matrices anywhere in the
//! 64-bit address space without allocating it.
//!
//! # Usage
//!
//! ```
//! use mirror_dma::device::BackingMemory;
//!
//! let mut mem = BackingMemory::new();
//! mem.allocate_region("source", 0x1000_0000, 64).unwrap();
//!
//! mem.write_words(0x1000_0000, &[1, 2, 3, 4]);
//! assert_eq!(mem.read_words(0x1000_0000, 4), vec![1, 2, 3, 4]);
//! ```

use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeMap;
use thiserror::Error;

/// A named memory region, tracked for debugging and bus statistics.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    /// Human-readable name (e.g. "source", "dest")
    pub name: String,
    /// Base byte address
    pub base_address: u64,
    /// Size in bytes
    pub size: usize,
    /// Bus read bursts that touched this region
    pub bus_reads: u64,
    /// Bus write bursts that touched this region
    pub bus_writes: u64,
}

impl MemoryRegion {
    pub fn new(name: impl Into<String>, base_address: u64, size: usize) -> Self {
        Self {
            name: name.into(),
            base_address,
            size,
            bus_reads: 0,
            bus_writes: 0,
        }
    }

    /// Check if an address falls within this region.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base_address && addr < self.base_address.saturating_add(self.size as u64)
    }

    /// Check if an address range overlaps this region.
    #[inline]
    pub fn overlaps(&self, addr: u64, len: usize) -> bool {
        let end = addr.saturating_add(len as u64);
        let region_end = self.base_address.saturating_add(self.size as u64);
        addr < region_end && end > self.base_address
    }
}

/// Errors from region bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// A new region overlaps one that is already registered
    #[error("region at 0x{new_base:016x} overlaps with '{existing_name}'")]
    RegionOverlap { new_base: u64, existing_name: String },
    /// Lookup by name failed
    #[error("region '{0}' not found")]
    RegionNotFound(String),
}

/// Sparse little-endian byte-addressed memory.
#[derive(Clone)]
pub struct BackingMemory {
    /// page_address -> page_data
    pages: BTreeMap<u64, Box<[u8; Self::PAGE_SIZE]>>,

    regions: Vec<MemoryRegion>,

    total_bytes_written: u64,
    total_bytes_read: u64,
}

impl BackingMemory {
    /// Page size for sparse storage.
    pub const PAGE_SIZE: usize = 4096;

    const PAGE_MASK: u64 = !(Self::PAGE_SIZE as u64 - 1);

    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            regions: Vec::new(),
            total_bytes_written: 0,
            total_bytes_read: 0,
        }
    }

    /// Register a named region.
    ///
    /// Pages are still allocated on demand; the region only drives
    /// bookkeeping and lookups.
    pub fn allocate_region(
        &mut self,
        name: impl Into<String>,
        base_address: u64,
        size: usize,
    ) -> Result<(), MemoryError> {
        if let Some(existing) = self.regions.iter().find(|r| r.overlaps(base_address, size)) {
            return Err(MemoryError::RegionOverlap {
                new_base: base_address,
                existing_name: existing.name.clone(),
            });
        }

        self.regions.push(MemoryRegion::new(name, base_address, size));
        Ok(())
    }

    pub fn region(&self, name: &str) -> Result<&MemoryRegion, MemoryError> {
        self.regions
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| MemoryError::RegionNotFound(name.to_string()))
    }

    /// Find the region containing an address.
    pub fn region_at(&self, addr: u64) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    fn get_or_create_page(&mut self, addr: u64) -> &mut [u8; Self::PAGE_SIZE] {
        let page_addr = addr & Self::PAGE_MASK;
        self.pages
            .entry(page_addr)
            .or_insert_with(|| Box::new([0u8; Self::PAGE_SIZE]))
    }

    fn get_page(&self, addr: u64) -> Option<&[u8; Self::PAGE_SIZE]> {
        self.pages.get(&(addr & Self::PAGE_MASK)).map(|b| b.as_ref())
    }

    /// Write a 32-bit word (little-endian).
    #[inline]
    pub fn write_u32(&mut self, addr: u64, value: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_bytes(addr, &buf);
    }

    /// Read a 32-bit word (little-endian). Unwritten memory reads as zero.
    #[inline]
    pub fn read_u32(&mut self, addr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf);
        LittleEndian::read_u32(&buf)
    }

    /// Read a word without touching the statistics.
    pub fn peek_u32(&self, addr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.copy_out(addr, &mut buf);
        LittleEndian::read_u32(&buf)
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        let mut current_addr = addr;
        let mut remaining = data;

        while !remaining.is_empty() {
            let page = self.get_or_create_page(current_addr);
            let offset = (current_addr & !Self::PAGE_MASK) as usize;
            let to_write = remaining.len().min(Self::PAGE_SIZE - offset);

            page[offset..offset + to_write].copy_from_slice(&remaining[..to_write]);

            current_addr = current_addr.wrapping_add(to_write as u64);
            remaining = &remaining[to_write..];
        }

        self.total_bytes_written += data.len() as u64;
    }

    pub fn read_bytes(&mut self, addr: u64, buf: &mut [u8]) {
        self.copy_out(addr, buf);
        self.total_bytes_read += buf.len() as u64;
    }

    fn copy_out(&self, addr: u64, buf: &mut [u8]) {
        let mut current_addr = addr;
        let mut filled = 0;

        while filled < buf.len() {
            let page_offset = (current_addr & !Self::PAGE_MASK) as usize;
            let to_read = (buf.len() - filled).min(Self::PAGE_SIZE - page_offset);

            match self.get_page(current_addr) {
                Some(page) => buf[filled..filled + to_read]
                    .copy_from_slice(&page[page_offset..page_offset + to_read]),
                None => buf[filled..filled + to_read].fill(0),
            }

            current_addr = current_addr.wrapping_add(to_read as u64);
            filled += to_read;
        }
    }

    /// Store consecutive words starting at `addr`.
    pub fn write_words(&mut self, addr: u64, words: &[u32]) {
        let mut bytes = vec![0u8; words.len() * 4];
        LittleEndian::write_u32_into(words, &mut bytes);
        self.write_bytes(addr, &bytes);
    }

    /// Load `count` consecutive words starting at `addr`.
    pub fn read_words(&self, addr: u64, count: usize) -> Vec<u32> {
        let mut bytes = vec![0u8; count * 4];
        self.copy_out(addr, &mut bytes);
        let mut words = vec![0u32; count];
        LittleEndian::read_u32_into(&bytes, &mut words);
        words
    }

    /// Record a bus read burst (called by the responder).
    pub fn record_bus_read(&mut self, addr: u64, len: usize) {
        if let Some(region) = self.regions.iter_mut().find(|r| r.overlaps(addr, len)) {
            region.bus_reads += 1;
        }
    }

    /// Record a bus write burst (called by the responder).
    pub fn record_bus_write(&mut self, addr: u64, len: usize) {
        if let Some(region) = self.regions.iter_mut().find(|r| r.overlaps(addr, len)) {
            region.bus_writes += 1;
        }
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read
    }

    pub fn allocated_pages(&self) -> usize {
        self.pages.len()
    }

    /// Drop all pages and regions.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.regions.clear();
        self.total_bytes_written = 0;
        self.total_bytes_read = 0;
    }

    /// Render a `rows` x `cols` word matrix stored row-major at `addr`.
    pub fn format_matrix(&self, addr: u64, rows: usize, cols: usize) -> String {
        let words = self.read_words(addr, rows * cols);
        let cell = words.iter().map(|w| w.to_string().len()).max().unwrap_or(1);

        let mut out = String::new();
        for row in words.chunks(cols.max(1)) {
            let line: Vec<String> = row.iter().map(|w| format!("{:>cell$}", w)).collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out
    }
}

impl Default for BackingMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackingMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingMemory")
            .field("allocated_pages", &self.pages.len())
            .field("regions", &self.regions.len())
            .field("total_bytes_written", &self.total_bytes_written)
            .field("total_bytes_read", &self.total_bytes_read)
            .finish()
    }
}
