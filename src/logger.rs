// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Sends log records to syslog, or to stderr when running in the foreground.

use anyhow::Context;
use anyhow::Result;
use log::warn;
use log::Level;
use log::LevelFilter;
use syslog::BasicLogger;
use syslog::Facility;
use syslog::Formatter3164;

/// Maps the `debug_level` knob (0 to 6) to a log level. Higher levels expose
/// more of the kill decision: kills at 1, victim selection at 2, deferrals
/// waiting for a dying process at 6.
pub fn level_filter_for_debug_level(debug_level: u32) -> LevelFilter {
    match debug_level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2..=5 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn set_debug_level(debug_level: u32) {
    log::set_max_level(level_filter_for_debug_level(debug_level));
}

fn init_stderr(ident: &str) -> Result<()> {
    stderrlog::new()
        .module(ident)
        .verbosity(Level::Trace)
        .init()
        .context("Failed to initialize stderr logger")
}

/// Installs the global logger. Falls back to stderr when syslog can not be
/// reached.
pub fn init(ident: &str, log_to_stderr: bool, debug_level: u32) -> Result<()> {
    if log_to_stderr {
        init_stderr(ident)?;
    } else {
        let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: ident.into(),
            pid: std::process::id(),
        };
        match syslog::unix(formatter) {
            Ok(logger) => log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
                .context("Failed to set syslog logger")?,
            Err(e) => {
                init_stderr(ident)?;
                warn!("Failed to connect to syslog, logging to stderr: {}", e);
            }
        }
    }
    set_debug_level(debug_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_for_debug_level() {
        assert_eq!(level_filter_for_debug_level(0), LevelFilter::Warn);
        assert_eq!(level_filter_for_debug_level(1), LevelFilter::Info);
        assert_eq!(level_filter_for_debug_level(2), LevelFilter::Debug);
        assert_eq!(level_filter_for_debug_level(5), LevelFilter::Debug);
        assert_eq!(level_filter_for_debug_level(6), LevelFilter::Trace);
        assert_eq!(level_filter_for_debug_level(u32::MAX), LevelFilter::Trace);
    }
}
