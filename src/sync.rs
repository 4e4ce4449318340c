// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::TryLockError;

/// lowmemd is compiled to abort on panic, so its Mutexes can never be
/// poisoned. This helper discards the LockResult in one place instead of
/// calling unwrap()/expect() wherever a lock is taken.
pub trait NoPoison<T: ?Sized> {
    fn do_lock(&self) -> MutexGuard<'_, T>;

    /// Takes the lock if it is free, returns `None` if another thread holds it.
    fn do_try_lock(&self) -> Option<MutexGuard<'_, T>>;
}

impl<T: ?Sized> NoPoison<T> for Mutex<T> {
    fn do_lock(&self) -> MutexGuard<'_, T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(_) => unreachable!("lowmemd aborts on panic"),
        }
    }

    fn do_try_lock(&self) -> Option<MutexGuard<'_, T>> {
        match self.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(_)) => unreachable!("lowmemd aborts on panic"),
        }
    }
}
