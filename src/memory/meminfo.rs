// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

/// Free swap from /proc/meminfo, in KiB.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemInfo {
    pub swap_free: u64,
}

impl MemInfo {
    /// Load a meminfo file (normally /proc/meminfo) and parse it.
    pub fn load(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Self::parse(reader)
    }

    pub(crate) fn parse<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut result = Self::default();
        for line in reader.lines() {
            let line = line?;
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else {
                continue;
            };
            if key != "SwapFree:" {
                continue;
            }
            if let Some(Ok(value)) = tokens.next().map(str::parse::<u64>) {
                result.swap_free = value;
            }
        }
        Ok(result)
    }
}
