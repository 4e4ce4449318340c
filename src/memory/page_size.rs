// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use once_cell::sync::Lazy;

static PAGE_SIZE_KB: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf is memory safe.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    // sysconf returns -1 on failure, assume 4 KiB pages then.
    u64::try_from(page_size).map_or(4, |bytes| std::cmp::max(bytes / 1024, 1))
});

/// The system page size in KiB.
pub fn get_page_size_kb() -> u64 {
    *PAGE_SIZE_KB
}
