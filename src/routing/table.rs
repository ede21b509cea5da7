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

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::address::ServerAddress;
use crate::routing::composition::{AddressSet, ClusterComposition};
use crate::time::Clock;

/// Which role a caller wants a connection for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
}

/// The ordering [`crate::routing::rediscovery::Rediscovery`] should try candidate routers in on
/// its next attempt. Set to `BootstrapFirst` when a composition without writers is observed;
/// stays sticky until a composition *with* writers is accepted (spec §9 "Open question").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextStrategy {
    KnownFirst,
    BootstrapFirst,
}

struct State {
    composition: ClusterComposition,
    strategy: NextStrategy,
}

impl Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("composition", &self.composition)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// A cached view of the cluster's router/reader/writer sets, with a TTL and per-role staleness
/// tests.
///
/// A single [`parking_lot::Mutex`] protects the current composition; `readers()`/`writers()`/
/// `routers()` take a lock-free-after-the-fact snapshot ([`AddressSet`] clones are `Arc::clone`)
/// so callers never hold the table's lock while using the addresses they got back.
pub struct RoutingTable {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTable")
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl RoutingTable {
    /// A table that is stale for every mode until the first successful rediscovery: it is seeded
    /// with an already-expired, reader-less and writer-less composition whose sole router is
    /// `bootstrap`, mirroring the teacher's `RoutingTable::new` seeding its router set with the
    /// initial address so [`crate::routing::rediscovery::Rediscovery`]'s first "known routers"
    /// pass has something to try before a real composition exists.
    pub fn new(clock: Arc<dyn Clock>, bootstrap: Arc<ServerAddress>) -> Self {
        let empty_expiry = clock.now();
        let seed = AddressSet::new([bootstrap]);
        let composition = ClusterComposition::new(
            empty_expiry,
            AddressSet::empty(),
            AddressSet::empty(),
            seed,
        );
        Self {
            clock,
            state: Mutex::new(State {
                composition,
                strategy: NextStrategy::KnownFirst,
            }),
        }
    }

    /// See spec §3: stale iff the TTL has elapsed, there are no routers, there are no addresses
    /// for the requested mode, or there are no writers at all (even for reads — a writer-less
    /// composition is itself a symptom of an in-progress failover, so read-only workloads are
    /// deliberately made to pay for a refresh too; see spec §9 "Writers-empty staleness").
    pub fn is_stale_for(&self, mode: AccessMode) -> bool {
        let state = self.state.lock();
        let composition = &state.composition;
        if composition.routers().is_empty() {
            debug!("routing table stale: no routers left");
            return true;
        }
        if composition.writers().is_empty() {
            debug!("routing table stale: no writers left");
            return true;
        }
        let servers_for_mode = match mode {
            AccessMode::Read => composition.readers(),
            AccessMode::Write => composition.writers(),
        };
        if servers_for_mode.is_empty() {
            debug!("routing table stale: no servers for {mode:?}");
            return true;
        }
        if self.clock.now() >= composition.expires_at {
            debug!("routing table stale: ttl expired");
            return true;
        }
        false
    }

    /// Atomically replaces readers/writers/routers with `composition`'s. Returns every address
    /// that was present in any role before but is absent from all roles after — candidates for
    /// `pool.purge`.
    ///
    /// The sticky bootstrap-first flag (see [`NextStrategy`]) is only cleared here when the
    /// incoming composition has writers; a writer-less composition leaves it untouched, per spec
    /// §9's sticky interpretation of the "Open question".
    pub fn update(&self, composition: ClusterComposition) -> HashSet<Arc<ServerAddress>> {
        let mut state = self.state.lock();
        let before: HashSet<Arc<ServerAddress>> = state
            .composition
            .readers()
            .snapshot()
            .iter()
            .chain(state.composition.writers().snapshot().iter())
            .chain(state.composition.routers().snapshot().iter())
            .cloned()
            .collect();
        let has_writers = composition.has_writers();
        let after: HashSet<Arc<ServerAddress>> = composition
            .readers()
            .snapshot()
            .iter()
            .chain(composition.writers().snapshot().iter())
            .chain(composition.routers().snapshot().iter())
            .cloned()
            .collect();
        let removed = before.difference(&after).cloned().collect();
        debug!("storing new routing table: {composition:?}");
        state.composition = composition;
        if has_writers {
            state.strategy = NextStrategy::KnownFirst;
        }
        removed
    }

    /// Removes `address` from the reader and writer sets; it is kept in the router set since a
    /// router can remain reachable even after dropping out of the data plane.
    pub fn forget(&self, address: &ServerAddress) {
        let mut state = self.state.lock();
        debug!("forgetting address: {address}");
        state.composition.readers = state.composition.readers.without(address);
        state.composition.writers = state.composition.writers.without(address);
    }

    /// Removes `address` from the writer set only (used after a write-rejection failure).
    pub fn forget_writer(&self, address: &ServerAddress) {
        let mut state = self.state.lock();
        debug!("forgetting writer: {address}");
        state.composition.writers = state.composition.writers.without(address);
    }

    pub fn readers(&self) -> AddressSet {
        self.state.lock().composition.readers().clone()
    }

    pub fn writers(&self) -> AddressSet {
        self.state.lock().composition.writers().clone()
    }

    pub fn routers(&self) -> AddressSet {
        self.state.lock().composition.routers().clone()
    }

    pub(crate) fn servers_for_mode(&self, mode: AccessMode) -> AddressSet {
        match mode {
            AccessMode::Read => self.readers(),
            AccessMode::Write => self.writers(),
        }
    }

    pub(crate) fn next_strategy(&self) -> NextStrategy {
        self.state.lock().strategy
    }

    /// Marks the table as preferring the bootstrap router on the next rediscovery attempt.
    /// Idempotent; sticky until [`Self::update`] stores a composition with at least one writer.
    pub(crate) fn set_bootstrap_first(&self) {
        self.state.lock().strategy = NextStrategy::BootstrapFirst;
    }
}
