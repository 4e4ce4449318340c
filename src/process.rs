// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Kill candidates and the collaborators that enumerate and signal them.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use log::debug;
use log::trace;
use log::warn;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use thiserror::Error;

use crate::sync::NoPoison;

// From include/linux/sched.h.
const PF_KTHREAD: u32 = 0x0020_0000;

#[derive(Debug, Error)]
pub enum Error {
    #[error("enumerate processes: {0}")]
    Procfs(#[from] procfs::ProcError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("process {0} not found")]
    NotFound(u32),
    #[error("no permission to signal process {0}")]
    PermissionDenied(u32),
    #[error("failed to signal process {0}: {1}")]
    Os(u32, Errno),
}

/// A process that may be killed to reclaim memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCandidate {
    pub pid: u32,
    pub name: String,
    /// oom_score_adj, higher is more disposable.
    pub priority: i32,
    pub resident_pages: u64,
    /// Kernel threads are never killed.
    pub is_kernel_helper: bool,
    /// The process was already killed and is still within its grace period.
    /// Procfs does not report this, the reclaimer sets it from its cooldown.
    pub is_exiting_with_grace_period: bool,
}

/// Enumerates the current processes. The list may be stale but must be
/// produced in bounded time.
pub trait ProcessSource: Send + Sync {
    fn list_candidates(&self) -> Result<Vec<ProcessCandidate>>;
}

/// Delivers termination requests and tracks the processes asked to die.
pub trait ProcessController: Send + Sync {
    /// Requests termination. Returning Ok does not mean the process is gone.
    fn signal_termination(&self, pid: u32) -> std::result::Result<(), SignalError>;

    /// Starts tracking `pid`, which is expected to exit before `deadline`.
    fn mark_grace_period(&self, pid: u32, deadline: Instant);

    /// Returns true once `pid` no longer has to be waited for: it exited, its
    /// grace deadline passed, or it is not tracked.
    fn confirm_exited(&self, pid: u32) -> bool;
}

// Dead and zombie tasks have released their memory and are not candidates.
fn build_candidate(
    pid: u32,
    name: String,
    state: char,
    flags: u32,
    rss_pages: u64,
    oom_score_adj: i32,
) -> Option<ProcessCandidate> {
    if is_dead_state(state) {
        return None;
    }
    Some(ProcessCandidate {
        pid,
        name,
        priority: oom_score_adj,
        resident_pages: rss_pages,
        is_kernel_helper: flags & PF_KTHREAD != 0,
        is_exiting_with_grace_period: false,
    })
}

fn is_dead_state(state: char) -> bool {
    matches!(state, 'Z' | 'X' | 'x')
}

fn read_oom_score_adj(path: PathBuf) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Lists the processes in /proc.
#[derive(Debug, Default)]
pub struct ProcfsProcessSource {}

impl ProcfsProcessSource {
    pub fn new() -> Self {
        Self {}
    }
}

impl ProcessSource for ProcfsProcessSource {
    fn list_candidates(&self) -> Result<Vec<ProcessCandidate>> {
        let own_pid = std::process::id();
        let mut candidates = Vec::new();
        for process in procfs::process::all_processes()? {
            // Processes exit while being enumerated, skip those.
            let Ok(process) = process else {
                continue;
            };
            let Ok(stat) = process.stat() else {
                continue;
            };
            let Ok(pid) = u32::try_from(stat.pid) else {
                continue;
            };
            if pid == own_pid {
                continue;
            }
            let Some(oom_score_adj) =
                read_oom_score_adj(PathBuf::from(format!("/proc/{}/oom_score_adj", pid)))
            else {
                continue;
            };
            candidates.extend(build_candidate(
                pid,
                stat.comm,
                stat.state,
                stat.flags,
                u64::try_from(stat.rss).unwrap_or(0),
                oom_score_adj,
            ));
        }
        trace!("Enumerated {} processes", candidates.len());
        Ok(candidates)
    }
}

fn to_nix_pid(pid: u32) -> Option<Pid> {
    // 0 and negative pids address process groups.
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

/// Kills with SIGKILL and tracks the killed processes until they exit or
/// their grace deadline passes.
#[derive(Debug, Default)]
pub struct SignalProcessController {
    pending: Mutex<HashMap<u32, Instant>>,
}

impl SignalProcessController {
    pub fn new() -> Self {
        Self::default()
    }

    fn has_exited(pid: u32) -> bool {
        let Some(nix_pid) = to_nix_pid(pid) else {
            return true;
        };
        match kill(nix_pid, None) {
            Err(Errno::ESRCH) => true,
            // A zombie can still be signalled but holds no memory.
            _ => procfs::process::Process::new(nix_pid.as_raw())
                .and_then(|process| process.stat())
                .map_or(true, |stat| is_dead_state(stat.state)),
        }
    }
}

impl ProcessController for SignalProcessController {
    fn signal_termination(&self, pid: u32) -> std::result::Result<(), SignalError> {
        let nix_pid = to_nix_pid(pid).ok_or(SignalError::NotFound(pid))?;
        kill(nix_pid, Signal::SIGKILL).map_err(|e| match e {
            Errno::ESRCH => SignalError::NotFound(pid),
            Errno::EPERM => SignalError::PermissionDenied(pid),
            e => SignalError::Os(pid, e),
        })
    }

    fn mark_grace_period(&self, pid: u32, deadline: Instant) {
        let mut pending = self.pending.do_lock();
        let now = Instant::now();
        pending.retain(|_, pending_deadline| *pending_deadline >= now);
        pending.insert(pid, deadline);
    }

    fn confirm_exited(&self, pid: u32) -> bool {
        let mut pending = self.pending.do_lock();
        let Some(&deadline) = pending.get(&pid) else {
            return true;
        };
        if Self::has_exited(pid) {
            debug!("Process {} exited", pid);
        } else if Instant::now() > deadline {
            warn!("Process {} did not exit within its grace period", pid);
        } else {
            return false;
        }
        pending.remove(&pid);
        true
    }
}
