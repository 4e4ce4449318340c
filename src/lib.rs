// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod config;
pub mod cooldown;
pub mod logger;
pub mod memory;
pub mod process;
pub mod psi;
pub mod reclaimer;
mod sync;
pub mod table_manager;
pub mod threshold;

#[cfg(test)]
mod test_utils;
