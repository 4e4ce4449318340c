// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Victim selection and the evaluation entry point.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use log::debug;
use log::error;
use log::info;
use log::trace;
use log::warn;

use crate::cooldown::CooldownState;
use crate::memory::MemorySnapshot;
use crate::memory::SnapshotProvider;
use crate::process::ProcessCandidate;
use crate::process::ProcessController;
use crate::process::ProcessSource;
use crate::sync::NoPoison;
use crate::table_manager::TableManager;
use crate::threshold::estimate_reclaimable_pages;
use crate::threshold::evaluate_pressure;
use crate::threshold::PriorityCutoff;
use crate::threshold::ThresholdTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// No tier is breached.
    NoActionNeeded,
    /// A previous victim is still exiting, or another evaluation is running.
    DeferredCooldownActive,
    /// `pid` was signalled. `freed_pages` is its resident size when selected.
    Killed { pid: u32, freed_pages: u64 },
    /// A tier is breached but nothing is eligible at its cutoff.
    NoEligibleVictim,
}

fn is_eligible(candidate: &ProcessCandidate, cutoff: PriorityCutoff) -> bool {
    !candidate.is_kernel_helper
        && !candidate.is_exiting_with_grace_period
        && candidate.priority >= cutoff
        && candidate.resident_pages > 0
}

/// Picks the most disposable eligible candidate: the highest priority, then
/// the largest resident size. On a full tie the first one listed wins.
pub fn select_victim(
    candidates: &[ProcessCandidate],
    cutoff: PriorityCutoff,
) -> Option<&ProcessCandidate> {
    let mut selected: Option<&ProcessCandidate> = None;
    for candidate in candidates.iter().filter(|c| is_eligible(c, cutoff)) {
        if let Some(best) = selected {
            if candidate.priority < best.priority
                || (candidate.priority == best.priority
                    && candidate.resident_pages <= best.resident_pages)
            {
                continue;
            }
        }
        debug!(
            "Select {} ({}), adj {}, size {}, to kill",
            candidate.name, candidate.pid, candidate.priority, candidate.resident_pages
        );
        selected = Some(candidate);
    }
    selected
}

/// Returns true if the kill in flight has to be waited for.
fn must_defer(
    candidates: &[ProcessCandidate],
    cooldown: &CooldownState,
    controller: &dyn ProcessController,
    now: Instant,
) -> bool {
    let Some(victim) = cooldown.pending_victim(now) else {
        return false;
    };
    if let Some(dying) = candidates.iter().find(|c| c.is_exiting_with_grace_period) {
        trace!("{} ({}) is still exiting, waiting for it", dying.name, dying.pid);
        return true;
    }
    if controller.confirm_exited(victim) {
        cooldown.confirm_exited(victim);
        false
    } else {
        trace!("Process {} has not exited yet", victim);
        true
    }
}

/// Runs one kill decision over already captured inputs and signals at most one
/// process.
pub fn select_and_kill(
    snapshot: &MemorySnapshot,
    table: &ThresholdTable,
    candidates: &[ProcessCandidate],
    cooldown: &CooldownState,
    controller: &dyn ProcessController,
    now: Instant,
) -> KillOutcome {
    if must_defer(candidates, cooldown, controller, now) {
        return KillOutcome::DeferredCooldownActive;
    }

    let Some(cutoff) = evaluate_pressure(snapshot, table) else {
        return KillOutcome::NoActionNeeded;
    };
    debug!(
        "Memory pressure: free {}, file {}, cutoff adj {}",
        snapshot.free_pages, snapshot.file_pages, cutoff
    );

    let Some(victim) = select_victim(candidates, cutoff) else {
        debug!("No process with adj >= {} to kill", cutoff);
        return KillOutcome::NoEligibleVictim;
    };

    let Some(deadline) = cooldown.try_begin(victim.pid, now) else {
        return KillOutcome::DeferredCooldownActive;
    };

    info!(
        "Killing {} ({}), adj {}, to free {} pages: free {} pages, file {} pages",
        victim.name,
        victim.pid,
        victim.priority,
        victim.resident_pages,
        snapshot.free_pages,
        snapshot.file_pages
    );
    // The grace period stays in force even if the signal fails, the process
    // may be exiting already.
    if let Err(e) = controller.signal_termination(victim.pid) {
        warn!("Failed to kill {} ({}): {}", victim.name, victim.pid, e);
    }
    controller.mark_grace_period(victim.pid, deadline);

    KillOutcome::Killed {
        pid: victim.pid,
        freed_pages: victim.resident_pages,
    }
}

/// Ties the collaborators together behind a single [Reclaimer::evaluate] call
/// that is safe to invoke from any trigger.
pub struct Reclaimer {
    snapshot_provider: Arc<dyn SnapshotProvider>,
    process_source: Arc<dyn ProcessSource>,
    controller: Arc<dyn ProcessController>,
    tables: Arc<TableManager>,
    cooldown: CooldownState,
    evaluating: Mutex<()>,
}

impl Reclaimer {
    pub fn new(
        snapshot_provider: Arc<dyn SnapshotProvider>,
        process_source: Arc<dyn ProcessSource>,
        controller: Arc<dyn ProcessController>,
        tables: Arc<TableManager>,
        cooldown: CooldownState,
    ) -> Self {
        Self {
            snapshot_provider,
            process_source,
            controller,
            tables,
            cooldown,
            evaluating: Mutex::new(()),
        }
    }

    pub fn cooldown(&self) -> &CooldownState {
        &self.cooldown
    }

    pub fn tables(&self) -> &Arc<TableManager> {
        &self.tables
    }

    /// Evaluates the current memory state and kills at most one process.
    ///
    /// Never blocks on another evaluation: if one is running, this returns
    /// [KillOutcome::DeferredCooldownActive] right away. Collaborator failures
    /// are logged and reported as [KillOutcome::NoActionNeeded].
    pub fn evaluate(&self, now: Instant) -> KillOutcome {
        let Some(_evaluating) = self.evaluating.do_try_lock() else {
            trace!("Evaluation already in progress");
            return KillOutcome::DeferredCooldownActive;
        };

        let table = self.tables.current();
        let snapshot = match self.snapshot_provider.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to get memory snapshot: {}", e);
                return KillOutcome::NoActionNeeded;
            }
        };

        let reclaimable = estimate_reclaimable_pages(&snapshot, &table);
        trace!("Reclaimable estimate {} pages", reclaimable);
        if evaluate_pressure(&snapshot, &table).is_none() && !self.cooldown.is_active(now) {
            return KillOutcome::NoActionNeeded;
        }

        let mut candidates = match self.process_source.list_candidates() {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Failed to list processes: {}", e);
                return KillOutcome::NoActionNeeded;
            }
        };
        if let Some(pending) = self.cooldown.pending_victim(now) {
            for candidate in candidates.iter_mut().filter(|c| c.pid == pending) {
                candidate.is_exiting_with_grace_period = true;
            }
        }

        let outcome = select_and_kill(
            &snapshot,
            &table,
            &candidates,
            &self.cooldown,
            self.controller.as_ref(),
            now,
        );
        if let KillOutcome::Killed { freed_pages, .. } = outcome {
            trace!(
                "Reclaimable estimate after kill {} pages",
                reclaimable.saturating_sub(freed_pages)
            );
        }
        outcome
    }
}
