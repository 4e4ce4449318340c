// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crate::sync::NoPoison;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownPhase {
    Idle,
    /// `pid` was signalled and is given until `deadline` to exit.
    GracePeriod { pid: u32, deadline: Instant },
}

#[derive(Debug)]
struct Inner {
    phase: CooldownPhase,
    grace_period: Duration,
}

/// The global kill cooldown: at most one victim is in flight at a time.
///
/// `Idle -> GracePeriod` happens through [CooldownState::try_begin], which only
/// one caller can win. The grace period ends when the deadline passes or the
/// victim is confirmed to have exited.
#[derive(Debug)]
pub struct CooldownState {
    inner: Mutex<Inner>,
}

impl Default for CooldownState {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl CooldownState {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: CooldownPhase::Idle,
                grace_period,
            }),
        }
    }

    pub fn phase(&self) -> CooldownPhase {
        self.inner.do_lock().phase
    }

    pub fn grace_period(&self) -> Duration {
        self.inner.do_lock().grace_period
    }

    /// Applies to grace periods started after the call.
    pub fn set_grace_period(&self, grace_period: Duration) {
        self.inner.do_lock().grace_period = grace_period;
    }

    /// The victim still within its grace period at `now`, if any.
    pub fn pending_victim(&self, now: Instant) -> Option<u32> {
        match self.inner.do_lock().phase {
            CooldownPhase::GracePeriod { pid, deadline } if now <= deadline => Some(pid),
            _ => None,
        }
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.pending_victim(now).is_some()
    }

    /// Enters the grace period for `pid` unless one is already active at
    /// `now`. Returns the new deadline, or `None` if another victim is still in
    /// flight.
    pub fn try_begin(&self, pid: u32, now: Instant) -> Option<Instant> {
        let mut inner = self.inner.do_lock();
        if let CooldownPhase::GracePeriod { deadline, .. } = inner.phase {
            if now <= deadline {
                return None;
            }
        }
        let deadline = now + inner.grace_period;
        inner.phase = CooldownPhase::GracePeriod { pid, deadline };
        Some(deadline)
    }

    /// Ends the grace period early because `pid` has exited. Returns false if
    /// `pid` is not the victim in flight.
    pub fn confirm_exited(&self, pid: u32) -> bool {
        let mut inner = self.inner.do_lock();
        match inner.phase {
            CooldownPhase::GracePeriod { pid: victim, .. } if victim == pid => {
                inner.phase = CooldownPhase::Idle;
                true
            }
            _ => false,
        }
    }
}
