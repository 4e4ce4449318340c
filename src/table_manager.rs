// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Holds the active threshold table and the named profiles it can be switched
//! between.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use log::info;
use log::warn;

use crate::sync::NoPoison;
use crate::threshold::ThresholdTable;

pub const DEFAULT_PROFILE: &str = "default";
pub const SCREEN_OFF_PROFILE: &str = "screen_off";

/// Owns the active [ThresholdTable].
///
/// Readers take a reference counted snapshot with [TableManager::current], so
/// a replacement never affects an evaluation that already holds the old
/// table. Locks are only held for the pointer swap.
///
/// Lock order: `profiles` before `active`.
pub struct TableManager {
    active: Mutex<Arc<ThresholdTable>>,
    profiles: Mutex<HashMap<String, Arc<ThresholdTable>>>,
}

impl TableManager {
    pub fn new(table: ThresholdTable) -> Self {
        Self {
            active: Mutex::new(Arc::new(table)),
            profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a manager with a profile set, activating `profile`. Falls back
    /// to [DEFAULT_PROFILE] if `profile` is not in the set, and to an empty
    /// table if neither is.
    pub fn with_profiles(profiles: HashMap<String, ThresholdTable>, profile: &str) -> Self {
        let manager = Self::new(ThresholdTable::default());
        manager.replace_profiles(profiles);
        if !manager.activate_profile(profile) {
            warn!(
                "Unknown threshold profile {}, using {}",
                profile, DEFAULT_PROFILE
            );
            if !manager.activate_profile(DEFAULT_PROFILE) {
                warn!("No {} threshold profile, no tiers are active", DEFAULT_PROFILE);
            }
        }
        manager
    }

    pub fn current(&self) -> Arc<ThresholdTable> {
        self.active.do_lock().clone()
    }

    /// Replaces the whole active table.
    pub fn replace_table(&self, table: ThresholdTable) {
        self.swap_active(Arc::new(table));
    }

    fn swap_active(&self, table: Arc<ThresholdTable>) {
        *self.active.do_lock() = table;
    }

    /// Replaces the set of known profiles. The active table is not changed.
    pub fn replace_profiles(&self, profiles: HashMap<String, ThresholdTable>) {
        let profiles = profiles
            .into_iter()
            .map(|(name, table)| (name, Arc::new(table)))
            .collect();
        *self.profiles.do_lock() = profiles;
    }

    /// Makes the table of the profile `name` active. Returns false, leaving
    /// the active table alone, when the profile is unknown.
    pub fn activate_profile(&self, name: &str) -> bool {
        let profiles = self.profiles.do_lock();
        match profiles.get(name) {
            Some(table) => {
                self.swap_active(table.clone());
                info!(
                    "Activated threshold profile {} ({} tiers)",
                    name,
                    table.tiers().len()
                );
                true
            }
            None => false,
        }
    }
}
