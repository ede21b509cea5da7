// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A read-mostly lock that de-duplicates concurrent writers.
//!
//! [`RoutingTable::is_stale_for`](crate::routing::table::RoutingTable::is_stale_for) is cheap and
//! called on every acquisition, but refreshing the table is expensive (it makes network calls).
//! [`MostlyRLock`] lets many concurrent readers check staleness under a read lock, and guarantees
//! that when several of them simultaneously decide a refresh is needed, exactly one of them
//! performs it while the rest simply wait for the read lock to become available again and observe
//! its result.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;

#[derive(Debug)]
pub(crate) struct MostlyRLock<T: Debug> {
    inner: RwLock<T>,
    updating: AtomicBool,
    // Bumped once per successful `updater` application, so `update()` can tell whether *some*
    // update ran while it was waiting, as opposed to a plain `RefCell<bool>` local to its own
    // call, which only ever tracks whether *it itself* ran the update and would otherwise run a
    // second, redundant update right after losing the race to another concurrent `update()` call.
    version: AtomicU64,
}

impl<T: Debug> MostlyRLock<T> {
    pub(crate) fn new(inner: T) -> Self {
        Self {
            inner: RwLock::new(inner),
            updating: AtomicBool::new(false),
            version: AtomicU64::new(0),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    /// Applies `updater` at most once across all concurrently racing callers whose `needs_update`
    /// evaluates to `true`. Every caller - the one that ran the update and every one that found
    /// another caller already updating - returns a fresh read guard taken after the update (if
    /// any) completed.
    pub(crate) fn maybe_write<'a, Check, Update>(
        &'a self,
        mut needs_update: Check,
        mut updater: Update,
    ) -> Result<RwLockReadGuard<'a, T>>
    where
        Check: FnMut(&RwLockReadGuard<'a, T>) -> bool,
        Update: FnMut(RwLockWriteGuard<'a, T>) -> Result<()>,
    {
        loop {
            {
                let r_lock = self.inner.read();
                if !needs_update(&r_lock) {
                    return Ok(r_lock);
                }
                // avoid drowning the writer: release before contending for the write lock
                RwLockReadGuard::unlock_fair(r_lock);
            }
            let already_updating = self.updating.swap(true, Ordering::SeqCst);
            if !already_updating {
                let w_lock = self.inner.write();
                let result = updater(w_lock);
                self.updating.store(false, Ordering::SeqCst);
                if result.is_ok() {
                    self.version.fetch_add(1, Ordering::SeqCst);
                }
                result?;
                return Ok(self.inner.read());
            }
            // another thread is performing the update; loop back and re-check once it is done
            std::thread::yield_now();
        }
    }

    /// Convenience wrapper around [`Self::maybe_write`] for callers that always want to update,
    /// at most once, regardless of current state (used to force a refresh).
    ///
    /// Shares the "at most once across racing callers" guarantee with `maybe_write` via
    /// `version`: a caller that loses the race for `updating` re-checks `version` rather than a
    /// call-local flag, so it recognizes that some other concurrent `update()` call already ran
    /// the update it wanted and does not redundantly run its own.
    pub(crate) fn update<'a, Update>(&'a self, mut updater: Update) -> Result<RwLockReadGuard<'a, T>>
    where
        Update: FnMut(RwLockWriteGuard<'a, T>) -> Result<()>,
    {
        let start_version = self.version.load(Ordering::SeqCst);
        self.maybe_write(
            move |_| self.version.load(Ordering::SeqCst) == start_version,
            move |lock| updater(lock),
        )
    }
}
