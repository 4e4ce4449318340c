// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

/// Global page counters from /proc/vmstat, only contains used fields.
///
/// The kernel folds per-cpu deltas into these counters lazily, so a racy read
/// can observe a transiently negative value. They are kept signed here and
/// clamped when a [crate::memory::MemorySnapshot] is built.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Vmstat {
    pub nr_free_pages: i64,
    pub nr_file_pages: i64,
    pub nr_shmem: i64,
    pub nr_active_file: i64,
    pub nr_inactive_file: i64,
    pub nr_active_anon: i64,
    pub nr_inactive_anon: i64,
}

impl Vmstat {
    /// Load a vmstat file (normally /proc/vmstat) and parse it.
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
            let field = match key {
                "nr_free_pages" => &mut result.nr_free_pages,
                "nr_file_pages" => &mut result.nr_file_pages,
                "nr_shmem" => &mut result.nr_shmem,
                "nr_active_file" => &mut result.nr_active_file,
                "nr_inactive_file" => &mut result.nr_inactive_file,
                "nr_active_anon" => &mut result.nr_active_anon,
                "nr_inactive_anon" => &mut result.nr_inactive_anon,
                _ => continue,
            };
            let Some(value) = tokens.next() else {
                continue;
            };
            let Ok(value) = value.parse::<i64>() else {
                continue;
            };
            *field = value;
        }
        Ok(result)
    }
}
