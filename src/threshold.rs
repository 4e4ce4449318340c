// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Threshold tiers and the pressure evaluation over them.

use log::debug;
use log::warn;

use crate::memory::MemorySnapshot;

/// Minimum process priority (oom_score_adj) that is eligible to be killed.
pub type PriorityCutoff = i32;

// A quarter of the default lowest tier: 2 MiB with 4 KiB pages.
const DEFAULT_SWAP_FUDGE_PAGES: u64 = 512;

/// One threshold level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub priority_cutoff: PriorityCutoff,
    pub min_free_pages: u64,
    /// Minimum LRU file pages. Only consulted when
    /// [TableOptions::check_file_pages] is set. `None` disables the gate for
    /// this tier.
    pub min_file_pages: Option<u64>,
}

/// Scalars that apply to the whole table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    /// Also treat a tier as breached when the LRU file pages drop below its
    /// `min_file_pages`, even if page cache looks plentiful.
    pub check_file_pages: bool,
    /// How much free swap may be credited toward the file pages.
    pub swap_fudge_pages: u64,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            check_file_pages: false,
            swap_fudge_pages: DEFAULT_SWAP_FUDGE_PAGES,
        }
    }
}

/// An immutable, ordered set of tiers.
///
/// Tiers are kept sorted ascending by `min_free_pages` so that the first
/// breached tier is always the one with the lowest threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThresholdTable {
    tiers: Vec<Tier>,
    options: TableOptions,
}

impl ThresholdTable {
    pub fn new(mut tiers: Vec<Tier>, options: TableOptions) -> Self {
        if tiers
            .windows(2)
            .any(|w| w[0].min_free_pages > w[1].min_free_pages)
        {
            warn!("Threshold tiers are not ascending by min free pages, sorting them");
        }
        // Stable, so equal thresholds keep their configured order.
        tiers.sort_by_key(|tier| tier.min_free_pages);
        Self { tiers, options }
    }

    /// Builds a table from parallel columns as they are configured.
    ///
    /// The table has as many tiers as the shorter of `priorities` and
    /// `min_free`; extra entries are dropped. `min_file` may be shorter, the
    /// tiers past its end have no file page gate.
    pub fn from_columns(
        priorities: &[PriorityCutoff],
        min_free: &[u64],
        min_file: &[u64],
        options: TableOptions,
    ) -> Self {
        let len = std::cmp::min(priorities.len(), min_free.len());
        if priorities.len() != min_free.len() {
            debug!(
                "Mismatched threshold columns ({} priorities, {} minfree), using {} tiers",
                priorities.len(),
                min_free.len(),
                len
            );
        }
        let tiers = priorities
            .iter()
            .zip(min_free)
            .enumerate()
            .map(|(i, (&priority_cutoff, &min_free_pages))| Tier {
                priority_cutoff,
                min_free_pages,
                min_file_pages: min_file.get(i).copied(),
            })
            .collect::<Vec<_>>();
        debug_assert_eq!(tiers.len(), len);
        Self::new(tiers, options)
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn options(&self) -> TableOptions {
        self.options
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

fn tier_is_breached(snapshot: &MemorySnapshot, tier: &Tier, options: &TableOptions) -> bool {
    if snapshot.free_pages >= tier.min_free_pages {
        return false;
    }
    if snapshot.effective_file_pages(options.swap_fudge_pages) < tier.min_free_pages {
        return true;
    }
    options.check_file_pages
        && tier
            .min_file_pages
            .is_some_and(|min_file| snapshot.lru_file_pages() < min_file)
}

/// Returns the priority cutoff of the lowest breached tier, or `None` when the
/// system is not under pressure.
///
/// A tier is breached when free pages are below its `min_free_pages` and
/// either the effective file pages are also below it, or the file page gate is
/// enabled and the LRU file pages are below its `min_file_pages`.
pub fn evaluate_pressure(
    snapshot: &MemorySnapshot,
    table: &ThresholdTable,
) -> Option<PriorityCutoff> {
    table
        .tiers
        .iter()
        .find(|tier| tier_is_breached(snapshot, tier, &table.options))
        .map(|tier| tier.priority_cutoff)
}

/// Estimates how many pages killing could make reclaimable: every LRU page
/// when a tier is breached, otherwise nothing.
pub fn estimate_reclaimable_pages(snapshot: &MemorySnapshot, table: &ThresholdTable) -> u64 {
    match evaluate_pressure(snapshot, table) {
        Some(_) => snapshot.lru_pages(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(free: u64, file: u64, lru_file: u64) -> MemorySnapshot {
        MemorySnapshot {
            free_pages: free,
            file_pages: file,
            active_file_pages: lru_file / 2,
            inactive_file_pages: lru_file - lru_file / 2,
            ..MemorySnapshot::default()
        }
    }

    fn two_tier_table(check_file_pages: bool) -> ThresholdTable {
        ThresholdTable::from_columns(
            &[0, 8],
            &[768, 4096],
            &[1536, 8192],
            TableOptions {
                check_file_pages,
                swap_fudge_pages: 0,
            },
        )
    }

    #[test]
    fn test_no_pressure_when_free_is_above_every_tier() {
        let table = two_tier_table(true);
        for free in [4096, 5000, u64::MAX] {
            assert_eq!(evaluate_pressure(&snapshot(free, 0, 0), &table), None);
        }
    }

    #[test]
    fn test_plentiful_cache_hides_low_free() {
        // Free is below tier 1 but file cache is above its threshold, and the
        // LRU file pages are above the file gate.
        let table = two_tier_table(true);
        assert_eq!(
            evaluate_pressure(&snapshot(2000, 5000, 10000), &table),
            None
        );
    }

    #[test]
    fn test_low_cache_breaches_tier() {
        let table = two_tier_table(false);
        assert_eq!(
            evaluate_pressure(&snapshot(2000, 3000, 10000), &table),
            Some(8)
        );
    }

    #[test]
    fn test_file_page_gate() {
        let low_lru = snapshot(2000, 5000, 4000);
        assert_eq!(evaluate_pressure(&low_lru, &two_tier_table(false)), None);
        assert_eq!(evaluate_pressure(&low_lru, &two_tier_table(true)), Some(8));
    }

    #[test]
    fn test_lowest_breached_tier_wins() {
        // Both tiers are breached, tier 0 has the lower threshold.
        let table = two_tier_table(false);
        assert_eq!(evaluate_pressure(&snapshot(100, 100, 0), &table), Some(0));
    }

    #[test]
    fn test_unsorted_tiers_are_sorted() {
        let table = ThresholdTable::from_columns(
            &[8, 0],
            &[4096, 768],
            &[],
            TableOptions::default(),
        );
        assert_eq!(table.tiers()[0].priority_cutoff, 0);
        assert_eq!(table.tiers()[1].priority_cutoff, 8);
        assert_eq!(evaluate_pressure(&snapshot(100, 100, 0), &table), Some(0));
    }

    #[test]
    fn test_swap_fudge_credits_file_pages() {
        let mut s = snapshot(2000, 4000, 0);
        s.free_swap_pages = 1000;
        let mut table = ThresholdTable::from_columns(
            &[0],
            &[4096],
            &[],
            TableOptions {
                check_file_pages: false,
                swap_fudge_pages: 0,
            },
        );
        assert_eq!(evaluate_pressure(&s, &table), Some(0));

        table.options.swap_fudge_pages = 96;
        assert_eq!(evaluate_pressure(&s, &table), None);

        // Credit is capped by the free swap.
        s.free_swap_pages = 50;
        table.options.swap_fudge_pages = 512;
        assert_eq!(evaluate_pressure(&s, &table), Some(0));
    }

    #[test]
    fn test_mismatched_columns_are_truncated() {
        let table = ThresholdTable::from_columns(
            &[0, 1, 2, 4, 6, 15],
            &[1536, 2048, 3072, 4096],
            &[1536, 2048, 4096, 8192, 12288, 16384],
            TableOptions::default(),
        );
        assert_eq!(table.tiers().len(), 4);
        assert_eq!(table.tiers()[3].priority_cutoff, 4);
        // Pressure above the 4th threshold does not reach the dropped tiers.
        assert_eq!(evaluate_pressure(&snapshot(5000, 0, 0), &table), None);
        assert_eq!(evaluate_pressure(&snapshot(4000, 0, 0), &table), Some(4));
    }

    #[test]
    fn test_short_min_file_column_disables_gate() {
        let table = ThresholdTable::from_columns(
            &[0, 8],
            &[768, 4096],
            &[1536],
            TableOptions {
                check_file_pages: true,
                swap_fudge_pages: 0,
            },
        );
        assert_eq!(table.tiers().len(), 2);
        assert_eq!(table.tiers()[1].min_file_pages, None);
        assert_eq!(evaluate_pressure(&snapshot(2000, 5000, 0), &table), None);
    }

    #[test]
    fn test_empty_table() {
        let table = ThresholdTable::from_columns(&[], &[1, 2], &[], TableOptions::default());
        assert!(table.is_empty());
        assert_eq!(evaluate_pressure(&snapshot(0, 0, 0), &table), None);
        assert_eq!(estimate_reclaimable_pages(&snapshot(0, 0, 0), &table), 0);
    }

    #[test]
    fn test_estimate_reclaimable_pages() {
        let table = two_tier_table(false);
        let mut s = snapshot(100, 100, 1000);
        s.active_anon_pages = 300;
        s.inactive_anon_pages = 200;
        assert_eq!(estimate_reclaimable_pages(&s, &table), 1500);

        s.free_pages = 10000;
        assert_eq!(estimate_reclaimable_pages(&s, &table), 0);
    }
}
