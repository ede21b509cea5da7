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

//! Mockable time. Nothing in this crate is allowed to read [`std::time::Instant::now`] directly;
//! everything routes through a [`Clock`] so tests can freeze and tick time deterministically.

use std::fmt::Debug;
use std::time::{Duration, Instant as StdInstant};

/// Capability injected into [`crate::routing::table::RoutingTable`] (for expiry) and
/// [`crate::routing::rediscovery::Rediscovery`] (for backoff bookkeeping).
///
/// Production code uses [`SystemClock`]; tests use [`FrozenClock`].
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> Instant;

    /// Suspends the calling thread for `duration`. The default blocking core calls this from
    /// [`crate::routing::rediscovery::Rediscovery::lookup`] between attempts.
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(StdInstant);

impl Instant {
    #[inline]
    pub fn from_std(inner: StdInstant) -> Self {
        Self(inner)
    }

    #[inline]
    pub fn raw(&self) -> StdInstant {
        self.0
    }

    #[inline]
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        self.0.checked_add(duration).map(Self)
    }

    #[inline]
    pub fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

/// Real wall-clock time. The only [`Clock`] implementation used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant(StdInstant::now())
    }

    #[inline]
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}
