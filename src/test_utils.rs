// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Instant;

use crate::memory;
use crate::memory::MemorySnapshot;
use crate::memory::SnapshotProvider;
use crate::process;
use crate::process::ProcessCandidate;
use crate::process::ProcessController;
use crate::process::ProcessSource;
use crate::process::SignalError;
use crate::sync::NoPoison;

/// A killable candidate with the given priority and resident size.
pub fn candidate(pid: u32, priority: i32, resident_pages: u64) -> ProcessCandidate {
    ProcessCandidate {
        pid,
        name: format!("proc{}", pid),
        priority,
        resident_pages,
        is_kernel_helper: false,
        is_exiting_with_grace_period: false,
    }
}

pub fn snapshot(free_pages: u64, file_pages: u64, lru_file_pages: u64) -> MemorySnapshot {
    MemorySnapshot {
        free_pages,
        file_pages,
        active_file_pages: lru_file_pages,
        ..MemorySnapshot::default()
    }
}

/// Returns the stored snapshot, or a vmstat error when none is set.
#[derive(Debug, Default)]
pub struct FakeSnapshotProvider {
    snapshot: Mutex<Option<MemorySnapshot>>,
}

impl FakeSnapshotProvider {
    pub fn new(snapshot: MemorySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
        }
    }

    pub fn set(&self, snapshot: Option<MemorySnapshot>) {
        *self.snapshot.do_lock() = snapshot;
    }
}

impl SnapshotProvider for FakeSnapshotProvider {
    fn snapshot(&self) -> memory::Result<MemorySnapshot> {
        let snapshot = *self.snapshot.do_lock();
        snapshot.ok_or_else(|| memory::Error::Vmstat(io::Error::from(io::ErrorKind::NotFound)))
    }
}

/// Returns the stored candidates and counts how often it was asked.
#[derive(Debug, Default)]
pub struct FakeProcessSource {
    candidates: Mutex<Option<Vec<ProcessCandidate>>>,
    calls: AtomicUsize,
}

impl FakeProcessSource {
    pub fn new(candidates: Vec<ProcessCandidate>) -> Self {
        Self {
            candidates: Mutex::new(Some(candidates)),
            calls: AtomicUsize::new(0),
        }
    }

    /// `None` makes enumeration fail.
    pub fn set(&self, candidates: Option<Vec<ProcessCandidate>>) {
        *self.candidates.do_lock() = candidates;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProcessSource for FakeProcessSource {
    fn list_candidates(&self) -> process::Result<Vec<ProcessCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.candidates
            .do_lock()
            .clone()
            .ok_or(process::Error::Procfs(procfs::ProcError::NotFound(None)))
    }
}

/// Records signals instead of sending them.
#[derive(Debug, Default)]
pub struct FakeProcessController {
    signalled: Mutex<Vec<u32>>,
    grace_periods: Mutex<Vec<(u32, Instant)>>,
    exited: Mutex<HashSet<u32>>,
    fail_signals: Mutex<bool>,
}

impl FakeProcessController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signalled(&self) -> Vec<u32> {
        self.signalled.do_lock().clone()
    }

    pub fn grace_periods(&self) -> Vec<(u32, Instant)> {
        self.grace_periods.do_lock().clone()
    }

    pub fn set_exited(&self, pid: u32) {
        self.exited.do_lock().insert(pid);
    }

    pub fn set_fail_signals(&self, fail: bool) {
        *self.fail_signals.do_lock() = fail;
    }
}

impl ProcessController for FakeProcessController {
    fn signal_termination(&self, pid: u32) -> Result<(), SignalError> {
        self.signalled.do_lock().push(pid);
        if *self.fail_signals.do_lock() {
            Err(SignalError::PermissionDenied(pid))
        } else {
            Ok(())
        }
    }

    fn mark_grace_period(&self, pid: u32, deadline: Instant) {
        self.grace_periods.do_lock().push((pid, deadline));
    }

    fn confirm_exited(&self, pid: u32) -> bool {
        self.exited.do_lock().contains(&pid)
    }
}
