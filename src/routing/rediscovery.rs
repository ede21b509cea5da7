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
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::address::resolution::HostNameResolver;
use crate::address::ServerAddress;
use crate::error::{Result, RoutingError};
use crate::pool::ConnectionPool;
use crate::routing::composition::ClusterComposition;
use crate::routing::provider::ClusterCompositionProvider;
use crate::routing::table::{NextStrategy, RoutingTable};
use crate::time::Clock;

/// Bounds on how hard [`Rediscovery::lookup`] tries before giving up.
///
/// Both fields are validated at construction (spec §4.2 acceptance rules): neither may be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingSettings {
    max_routing_failures: u32,
    retry_timeout_delay_ms: u64,
}

impl RoutingSettings {
    pub fn new(max_routing_failures: u32, retry_timeout_delay_ms: u64) -> Result<Self> {
        if max_routing_failures == 0 {
            return Err(RoutingError::configuration_error(
                "max_routing_failures must be greater than zero",
            ));
        }
        if retry_timeout_delay_ms == 0 {
            return Err(RoutingError::configuration_error(
                "retry_timeout_delay_ms must be greater than zero",
            ));
        }
        Ok(Self {
            max_routing_failures,
            retry_timeout_delay_ms,
        })
    }

    fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_delay_ms)
    }
}

/// Drives the "contact a router, ask for a routing table" protocol described in spec §4.2.
///
/// Candidate ordering and failure bookkeeping live here; parsing the server's reply is
/// [`ClusterCompositionProvider`]'s job, and staleness/storage is [`RoutingTable`]'s. Grounded on
/// the teacher's `update_routing_table` loop in `neo4j/src/driver/io/pool/routing.rs`, which
/// interleaves the same known-routers/bootstrap ordering with per-address forgetting.
#[derive(Debug)]
pub struct Rediscovery {
    bootstrap: Arc<ServerAddress>,
    resolver: Arc<dyn HostNameResolver>,
    provider: ClusterCompositionProvider,
    settings: RoutingSettings,
    clock: Arc<dyn Clock>,
}

enum Attempt {
    Success(ClusterComposition),
    Fatal(RoutingError),
    Exhausted,
}

impl Rediscovery {
    pub fn new(
        bootstrap: Arc<ServerAddress>,
        resolver: Arc<dyn HostNameResolver>,
        provider: ClusterCompositionProvider,
        settings: RoutingSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bootstrap,
            resolver,
            provider,
            settings,
            clock,
        }
    }

    /// Looks up a fresh [`ClusterComposition`], retrying with exponentially growing delay up to
    /// `max_routing_failures` rounds. Each round tries every known router (or, once the table's
    /// [`NextStrategy`] has flipped, the re-resolved bootstrap address first), skipping addresses
    /// already tried earlier in the same round.
    ///
    /// An [`RoutingError::AuthenticationError`] from any candidate aborts immediately without
    /// retrying (spec §4.2: "never retried, never swallowed"); any other per-candidate failure
    /// forgets that address and moves to the next one. Exhausting every candidate in every round
    /// yields [`RoutingError::ServiceUnavailable`].
    pub fn lookup(
        &self,
        table: &RoutingTable,
        pool: &dyn ConnectionPool,
    ) -> Result<ClusterComposition> {
        let mut failures = 0u32;
        let mut delay = self.settings.initial_delay();
        loop {
            match self.attempt(table, pool) {
                Attempt::Success(composition) => {
                    if !composition.has_writers() {
                        table.set_bootstrap_first();
                    }
                    return Ok(composition);
                }
                Attempt::Fatal(err) => return Err(err),
                Attempt::Exhausted => {
                    failures += 1;
                    if failures >= self.settings.max_routing_failures {
                        warn!("rediscovery exhausted after {failures} failed round(s)");
                        return Err(RoutingError::service_unavailable(
                            "No routing servers available",
                        ));
                    }
                    debug!("rediscovery round {failures} found no usable router, retrying in {delay:?}");
                    self.clock.sleep(delay);
                    delay = (delay * 2).max(self.settings.initial_delay());
                }
            }
        }
    }

    fn attempt(&self, table: &RoutingTable, pool: &dyn ConnectionPool) -> Attempt {
        for address in self.candidates(table) {
            let mut connection = match pool.acquire(&address) {
                Ok(connection) => connection,
                Err(err) => {
                    if err.fatal_during_discovery() {
                        return Attempt::Fatal(err);
                    }
                    debug!("forgetting {address}: failed to acquire connection: {err}");
                    table.forget(&address);
                    continue;
                }
            };
            match self
                .provider
                .get_cluster_composition(connection.as_mut(), self.clock.as_ref())
            {
                Ok(composition) => return Attempt::Success(composition),
                Err(err) => {
                    if err.fatal_during_discovery() {
                        return Attempt::Fatal(err);
                    }
                    debug!("forgetting {address}: not a usable router: {err}");
                    table.forget(&address);
                }
            }
        }
        Attempt::Exhausted
    }

    /// Builds this round's candidate order: known routers and the re-resolved bootstrap address,
    /// in the order [`NextStrategy`] prescribes, each address appearing at most once (first
    /// occurrence wins, so a bootstrap address that's also a known router is only tried once, in
    /// whichever group comes first).
    fn candidates(&self, table: &RoutingTable) -> Vec<Arc<ServerAddress>> {
        let known = table.routers().snapshot();
        let resolved: Vec<Arc<ServerAddress>> = self
            .resolver
            .resolve(&self.bootstrap)
            .into_iter()
            .map(Arc::new)
            .collect();

        let ordered: Vec<Arc<ServerAddress>> = match table.next_strategy() {
            NextStrategy::BootstrapFirst => resolved
                .into_iter()
                .chain(known.iter().cloned())
                .collect(),
            NextStrategy::KnownFirst => known
                .iter()
                .cloned()
                .chain(resolved)
                .collect(),
        };

        let mut seen = HashSet::with_capacity(ordered.len());
        ordered
            .into_iter()
            .filter(|a| seen.insert(Arc::clone(a)))
            .collect()
    }
}
