// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Pressure stall information (PSI) triggers.
//!
//! PSI documentation: https://docs.kernel.org/accounting/psi.html

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

pub const MEMORY_PRESSURE_PATH: &str = "/proc/pressure/memory";

/// The target of the PSI. Either "some" or "full".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Some,
    Full,
}

impl Target {
    fn to_str(self) -> &'static str {
        match self {
            Target::Some => "some",
            Target::Full => "full",
        }
    }
}

/// Fires when tasks stall on memory for `stall` within any `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub target: Target,
    pub stall: Duration,
    pub window: Duration,
}

impl Default for Trigger {
    fn default() -> Self {
        Self {
            target: Target::Some,
            stall: Duration::from_millis(150),
            window: Duration::from_secs(1),
        }
    }
}

impl Trigger {
    // The kernel expects microseconds and a NUL terminated string.
    fn to_config(self) -> String {
        format!(
            "{} {} {}\0",
            self.target.to_str(),
            self.stall.as_micros(),
            self.window.as_micros()
        )
    }
}

/// Waits for PSI events on a pressure file.
pub struct PsiWatcher {
    fd: AsyncFd<File>,
}

impl PsiWatcher {
    /// Must be called within a tokio runtime.
    pub fn new_memory_pressure(trigger: Trigger) -> io::Result<Self> {
        Self::new(Path::new(MEMORY_PRESSURE_PATH), trigger)
    }

    fn new(path: &Path, trigger: Trigger) -> io::Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        file.write_all(trigger.to_config().as_bytes())?;

        // PSI events are reported as POLLPRI.
        // SAFETY: `file` is owned by the AsyncFd, so its fd stays open and
        // unchanged for the AsyncFd's lifetime.
        let fd = unsafe { AsyncFd::register_with_interest(file, Interest::PRIORITY)? };

        Ok(Self { fd })
    }

    pub async fn wait(&mut self) -> io::Result<()> {
        self.fd.readable().await?.clear_ready();
        Ok(())
    }
}
