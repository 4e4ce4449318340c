// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! System memory counters, expressed in pages.

mod meminfo;
mod page_size;
mod vmstat;

use std::io;
use std::path::PathBuf;

use log::debug;
use thiserror::Error;

pub use self::meminfo::MemInfo;
pub use self::page_size::get_page_size_kb;
pub use self::vmstat::Vmstat;

const VMSTAT_PATH: &str = "proc/vmstat";
const MEMINFO_PATH: &str = "proc/meminfo";

#[derive(Debug, Error)]
pub enum Error {
    #[error("load vmstat: {0}")]
    Vmstat(#[source] io::Error),
    #[error("load meminfo: {0}")]
    MemInfo(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A point-in-time view of the global page counters.
///
/// The fields are read independently, so the snapshot is only advisory and may
/// be stale by the time a decision based on it is applied.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub free_pages: u64,
    /// File backed page cache, excluding shared memory.
    pub file_pages: u64,
    pub active_file_pages: u64,
    pub inactive_file_pages: u64,
    pub active_anon_pages: u64,
    pub inactive_anon_pages: u64,
    pub free_swap_pages: u64,
}

fn clamp_counter(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl MemorySnapshot {
    /// Builds a snapshot from raw counters. Negative counters from a racy read
    /// are clamped to zero.
    pub fn from_counters(vmstat: &Vmstat, swap_free_kb: u64, page_size_kb: u64) -> Self {
        let file = clamp_counter(vmstat.nr_file_pages);
        let shmem = clamp_counter(vmstat.nr_shmem);
        Self {
            free_pages: clamp_counter(vmstat.nr_free_pages),
            file_pages: file.saturating_sub(shmem),
            active_file_pages: clamp_counter(vmstat.nr_active_file),
            inactive_file_pages: clamp_counter(vmstat.nr_inactive_file),
            active_anon_pages: clamp_counter(vmstat.nr_active_anon),
            inactive_anon_pages: clamp_counter(vmstat.nr_inactive_anon),
            free_swap_pages: swap_free_kb / std::cmp::max(page_size_kb, 1),
        }
    }

    pub fn lru_file_pages(&self) -> u64 {
        self.active_file_pages
            .saturating_add(self.inactive_file_pages)
    }

    /// All pages on the anon and file LRU lists.
    pub fn lru_pages(&self) -> u64 {
        self.lru_file_pages()
            .saturating_add(self.active_anon_pages)
            .saturating_add(self.inactive_anon_pages)
    }

    /// File pages credited with at most `swap_fudge_pages` of free swap.
    pub fn effective_file_pages(&self, swap_fudge_pages: u64) -> u64 {
        self.file_pages
            .saturating_add(std::cmp::min(self.free_swap_pages, swap_fudge_pages))
    }
}

/// Source of [MemorySnapshot]s. Implementations must return in bounded time.
pub trait SnapshotProvider: Send + Sync {
    fn snapshot(&self) -> Result<MemorySnapshot>;
}

/// Reads the counters from procfs under `root` (normally "/").
#[derive(Debug, Clone)]
pub struct ProcfsSnapshotProvider {
    root: PathBuf,
}

impl ProcfsSnapshotProvider {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/"))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Default for ProcfsSnapshotProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotProvider for ProcfsSnapshotProvider {
    fn snapshot(&self) -> Result<MemorySnapshot> {
        let vmstat = Vmstat::load(&self.root.join(VMSTAT_PATH)).map_err(Error::Vmstat)?;
        // Swap accounting is optional. Without it no swap is credited.
        let swap_free_kb = match MemInfo::load(&self.root.join(MEMINFO_PATH)) {
            Ok(meminfo) => meminfo.swap_free,
            Err(e) => {
                debug!("{}", Error::MemInfo(e));
                0
            }
        };
        Ok(MemorySnapshot::from_counters(
            &vmstat,
            swap_free_kb,
            get_page_size_kb(),
        ))
    }
}
