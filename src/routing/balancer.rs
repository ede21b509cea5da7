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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;

use crate::address::resolution::HostNameResolver;
use crate::address::ServerAddress;
use crate::error::{FailureKind, Result, RoutingError};
use crate::pool::ConnectionPool;
use crate::routing::connection::RoutingConnection;
use crate::routing::provider::ClusterCompositionProvider;
use crate::routing::rediscovery::{Rediscovery, RoutingSettings};
use crate::routing::table::{AccessMode, RoutingTable};
use crate::sync::MostlyRLock;
use crate::time::Clock;

/// The public façade of this crate (spec §2 "LoadBalancer").
///
/// Owns the [`RoutingTable`] and the [`Rediscovery`] that refreshes it, selects a connection by
/// [`AccessMode`] with least-connected-plus-round-robin scoring, and is the sole recipient of
/// failure reports forwarded by every [`RoutingConnection`] it hands out.
#[derive(Debug)]
pub struct LoadBalancer {
    table: RoutingTable,
    rediscovery: Rediscovery,
    pool: Arc<dyn ConnectionPool>,
    // Guards nothing but the "is a refresh in flight" question; RoutingTable has its own lock for
    // its actual data. See `neo4j/src/driver/io/pool.rs`'s `routing_tables: MostlyRLock<..>`.
    refresh: MostlyRLock<()>,
    read_cursor: AtomicUsize,
    write_cursor: AtomicUsize,
}

/// Outcome of one [`LoadBalancer::acquire_pass`] over the candidate set for a mode.
enum AcquirePass {
    Connected(RoutingConnection),
    /// The candidate set was already empty before any `pool.acquire` was attempted.
    NoCandidates,
    /// Every candidate was tried and forgotten; the set is now empty.
    Exhausted,
}

impl LoadBalancer {
    /// Builds a balancer and performs the initial synchronous `ensure_routing(READ)` (spec §4.4
    /// "Initial refresh") so a bad bootstrap address is reported from this call rather than from
    /// the first `acquire`.
    ///
    /// # Errors
    /// [`RoutingError::ConfigurationError`] if `bootstrap`'s host is empty (spec §7).
    pub fn new(
        bootstrap: ServerAddress,
        resolver: Arc<dyn HostNameResolver>,
        provider: ClusterCompositionProvider,
        settings: RoutingSettings,
        pool: Arc<dyn ConnectionPool>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        if bootstrap.host().is_empty() {
            return Err(RoutingError::configuration_error(
                "bootstrap address must not have an empty host",
            ));
        }
        let bootstrap = Arc::new(bootstrap);
        let table = RoutingTable::new(Arc::clone(&clock), Arc::clone(&bootstrap));
        let rediscovery = Rediscovery::new(bootstrap, resolver, provider, settings, clock);
        let balancer = Arc::new(Self {
            table,
            rediscovery,
            pool,
            refresh: MostlyRLock::new(()),
            read_cursor: AtomicUsize::new(0),
            write_cursor: AtomicUsize::new(0),
        });
        balancer.ensure_routing(AccessMode::Read)?;
        Ok(balancer)
    }

    /// Selects a connection for `mode`, refreshing the routing table first if it's stale (spec
    /// §4.4 "Acquisition algorithm").
    ///
    /// A `pool.acquire(selected)` failure forgets and purges `selected` and retries with the next
    /// least-loaded candidate. If a whole pass over the candidate set is exhausted this way, the
    /// routing table is force-refreshed once (bypassing the staleness check, since the table may
    /// still look fresh by TTL even though every server it names is unreachable) and one more pass
    /// is attempted before giving up. Grounded on the teacher's `RoutingPool::acquire`
    /// (`neo4j/src/driver/io/pool.rs:338-366`), whose `'target: for target in &targets { ... continue
    /// 'target }` loop is the same "forget and move to the next candidate" shape.
    pub fn acquire(self: &Arc<Self>, mode: AccessMode) -> Result<RoutingConnection> {
        self.ensure_routing(mode)?;
        match self.acquire_pass(mode)? {
            AcquirePass::Connected(connection) => return Ok(connection),
            // Step 2: the candidate set was empty before any attempt. Fail immediately, no retry.
            AcquirePass::NoCandidates => {
                return Err(RoutingError::session_expired(format!(
                    "Failed to obtain connection towards {mode:?} server"
                )))
            }
            // Step 4: every candidate was tried and forgotten. Force one more rediscovery.
            AcquirePass::Exhausted => {}
        }
        self.force_refresh()?;
        match self.acquire_pass(mode)? {
            AcquirePass::Connected(connection) => Ok(connection),
            _ => Err(RoutingError::session_expired(format!(
                "Failed to obtain connection towards {mode:?} server"
            ))),
        }
    }

    /// One pass over the current candidate set for `mode`: select, try to acquire, and on failure
    /// forget + purge the selected address and re-select from the (now smaller) candidate set.
    /// Returns [`AcquirePass::NoCandidates`] if the set was empty before any attempt, or
    /// [`AcquirePass::Exhausted`] if every candidate failed in turn.
    fn acquire_pass(self: &Arc<Self>, mode: AccessMode) -> Result<AcquirePass> {
        let mut attempted = false;
        loop {
            let candidates = self.table.servers_for_mode(mode).snapshot();
            if candidates.is_empty() {
                return Ok(if attempted {
                    AcquirePass::Exhausted
                } else {
                    AcquirePass::NoCandidates
                });
            }
            attempted = true;
            let address = self.select(mode, &candidates);
            match self.pool.acquire(&address) {
                Ok(connection) => {
                    return Ok(AcquirePass::Connected(RoutingConnection::new(
                        connection,
                        address,
                        mode,
                        Arc::clone(self),
                    )))
                }
                Err(err) => {
                    debug!("forgetting {address}: failed to acquire connection: {err}");
                    self.table.forget(&address);
                    self.pool.purge(&address);
                }
            }
        }
    }

    /// Reported by a [`RoutingConnection`] at most once per failure. A transport failure forgets
    /// the address from both readers and writers and drops any pooled connections to it; a
    /// write-rejection only drops it from the writer set, since the server is presumably still a
    /// perfectly good reader (or will be re-discovered as the new leader on the next refresh).
    pub(crate) fn on_connection_failure(&self, address: &ServerAddress, kind: FailureKind) {
        debug!("{address} reported {kind}");
        match kind {
            FailureKind::Connection => {
                self.table.forget(address);
                self.pool.purge(address);
            }
            FailureKind::WriteRejected => self.table.forget_writer(address),
        }
    }

    #[cfg(test)]
    pub(crate) fn table(&self) -> &RoutingTable {
        &self.table
    }

    fn ensure_routing(&self, mode: AccessMode) -> Result<()> {
        self.refresh
            .maybe_write(|_| self.table.is_stale_for(mode), |_| self.refresh_table())
            .map(|_| ())
    }

    /// Unconditionally refreshes the routing table once, bypassing [`RoutingTable::is_stale_for`]
    /// (spec §4.4 point 4: "re-run step 1 forcing staleness"). Still single-flighted through
    /// [`MostlyRLock::update`], so concurrent callers exhausting the same candidate set share one
    /// forced refresh rather than each triggering their own.
    fn force_refresh(&self) -> Result<()> {
        self.refresh.update(|_| self.refresh_table()).map(|_| ())
    }

    fn refresh_table(&self) -> Result<()> {
        let composition = self.rediscovery.lookup(&self.table, self.pool.as_ref())?;
        let removed = self.table.update(composition);
        for address in removed {
            self.pool.purge(&address);
        }
        Ok(())
    }

    /// Least-connected selection with round-robin tiebreak (spec §4.4 point 3): starting from the
    /// per-role cursor's current position, scan every candidate once and keep the one with the
    /// smallest `active_connections`; ties go to whichever was scanned first, i.e. whichever was
    /// closer to the cursor. The cursor then advances by one regardless of outcome, so a
    /// zero-load cluster is visited in pure round-robin order. Generalizes the teacher's
    /// usage-sorted `servers_by_usage` (`neo4j/src/driver/io/pool.rs`) with the rotating start
    /// point the spec requires.
    fn select(&self, mode: AccessMode, candidates: &[Arc<ServerAddress>]) -> Arc<ServerAddress> {
        let cursor = match mode {
            AccessMode::Read => &self.read_cursor,
            AccessMode::Write => &self.write_cursor,
        };
        let n = candidates.len();
        let start = cursor.fetch_add(1, Ordering::Relaxed) % n;

        let mut best = start;
        let mut best_load = self.pool.active_connections(&candidates[start]);
        for offset in 1..n {
            let idx = (start + offset) % n;
            let load = self.pool.active_connections(&candidates[idx]);
            if load < best_load {
                best_load = load;
                best = idx;
            }
        }
        Arc::clone(&candidates[best])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::resolution::MockHostNameResolver;
    use crate::pool::{Connection, MockConnection, MockConnectionPool};
    use crate::time::mock::FrozenClock;
    use mockall::predicate::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    fn routing_connection(address: &str, readers: &[&str], writers: &[&str]) -> MockConnection {
        let addr = ServerAddress::from(address);
        let readers: Vec<String> = readers.iter().map(|s| s.to_string()).collect();
        let writers: Vec<String> = writers.iter().map(|s| s.to_string()).collect();
        let mut conn = MockConnection::new();
        conn.expect_address().return_const(addr);
        conn.expect_server_version().return_const((5u8, 5u8));
        conn.expect_run_procedure().returning(move |_, _| {
            let mut fields = HashMap::new();
            fields.insert(String::from("ttl"), crate::value::Value::Integer(60));
            let role = |role: &str, addrs: &[String]| {
                let mut m = HashMap::new();
                m.insert(String::from("role"), crate::value::Value::from(role));
                m.insert(
                    String::from("addresses"),
                    crate::value::Value::from(addrs.to_vec()),
                );
                crate::value::Value::Map(m)
            };
            fields.insert(
                String::from("servers"),
                crate::value::Value::List(vec![
                    role("READ", &readers),
                    role("WRITE", &writers),
                    role("ROUTE", &[String::from("bootstrap:7687")]),
                ]),
            );
            Ok(crate::value::Record::new(fields))
        });
        conn
    }

    fn balancer_with(
        readers: &'static [&'static str],
        writers: &'static [&'static str],
        active: HashMap<ServerAddress, usize>,
    ) -> (Arc<LoadBalancer>, Arc<StdMutex<HashMap<ServerAddress, usize>>>) {
        let clock = Arc::new(FrozenClock::new());
        let mut resolver = MockHostNameResolver::new();
        resolver
            .expect_resolve()
            .return_const(vec![ServerAddress::from("bootstrap:7687")]);

        let active = Arc::new(StdMutex::new(active));
        let mut pool = MockConnectionPool::new();
        pool.expect_acquire()
            .returning(move |_| Ok(Box::new(routing_connection("bootstrap:7687", readers, writers)) as Box<dyn Connection>));
        {
            let active = Arc::clone(&active);
            pool.expect_active_connections()
                .returning(move |addr| *active.lock().unwrap().get(addr).unwrap_or(&0));
        }
        pool.expect_purge().returning(|_| {});

        let balancer = LoadBalancer::new(
            ServerAddress::from("bootstrap:7687"),
            Arc::new(resolver),
            ClusterCompositionProvider::new(HashMap::new()).unwrap(),
            RoutingSettings::new(3, 10).unwrap(),
            Arc::new(pool),
            clock,
        )
        .unwrap();
        (balancer, active)
    }

    #[test]
    fn initial_construction_performs_synchronous_refresh() {
        let (balancer, _active) =
            balancer_with(&["r1:1", "r2:1"], &["w1:1"], HashMap::new());
        assert!(!balancer.table.is_stale_for(AccessMode::Read));
    }

    #[test]
    fn least_connected_is_preferred_over_round_robin_order() {
        let mut active = HashMap::new();
        active.insert(ServerAddress::from("r1:1"), 5);
        active.insert(ServerAddress::from("r2:1"), 0);
        let (balancer, _active) = balancer_with(&["r1:1", "r2:1"], &["w1:1"], active);
        let connection = balancer.acquire(AccessMode::Read).unwrap();
        assert_eq!(connection.address(), &ServerAddress::from("r2:1"));
    }

    #[test]
    fn round_robin_rotates_under_equal_load() {
        let (balancer, _active) = balancer_with(&["r1:1", "r2:1"], &["w1:1"], HashMap::new());
        let first = balancer.acquire(AccessMode::Read).unwrap().address().clone();
        let second = balancer.acquire(AccessMode::Read).unwrap().address().clone();
        assert_ne!(first, second);
    }

    /// Scenario 2 from spec §8: forgetting a bad reader and retrying the next candidate happens
    /// inside a single `acquire()` call, not by propagating the first failure to the caller.
    #[test]
    fn failed_candidate_is_forgotten_and_the_next_one_is_tried_within_one_acquire() {
        let _ = env_logger::builder().is_test(true).try_init();

        let clock = Arc::new(FrozenClock::new());
        let mut resolver = MockHostNameResolver::new();
        resolver
            .expect_resolve()
            .return_const(vec![ServerAddress::from("bootstrap:7687")]);

        let mut pool = MockConnectionPool::new();
        pool.expect_acquire().returning(|address| {
            if address == &ServerAddress::from("r1:1") {
                Err(RoutingError::service_unavailable("down"))
            } else {
                Ok(Box::new(routing_connection("bootstrap:7687", &["r1:1", "r2:1"], &["w1:1"]))
                    as Box<dyn Connection>)
            }
        });
        pool.expect_purge().returning(|_| {});
        pool.expect_active_connections().returning(|_| 0);

        let balancer = LoadBalancer::new(
            ServerAddress::from("bootstrap:7687"),
            Arc::new(resolver),
            ClusterCompositionProvider::new(HashMap::new()).unwrap(),
            RoutingSettings::new(3, 10).unwrap(),
            Arc::new(pool),
            clock,
        )
        .unwrap();

        let connection = balancer.acquire(AccessMode::Read).unwrap();
        assert_eq!(connection.address(), &ServerAddress::from("r2:1"));
        assert!(!balancer.table().readers().contains(&ServerAddress::from("r1:1")));
    }

    /// Spec §4.4 point 4: exhausting every candidate in one pass forces a fresh rediscovery
    /// (bypassing the staleness check) and retries once before the whole `acquire()` gives up.
    #[test]
    fn exhausting_every_candidate_forces_a_refresh_and_retries_once() {
        let clock = Arc::new(FrozenClock::new());
        let mut resolver = MockHostNameResolver::new();
        resolver
            .expect_resolve()
            .return_const(vec![ServerAddress::from("bootstrap:7687")]);

        let rediscovery_round = Arc::new(AtomicUsize::new(0));
        let mut pool = MockConnectionPool::new();
        {
            let rediscovery_round = Arc::clone(&rediscovery_round);
            pool.expect_acquire().returning(move |address| {
                if address == &ServerAddress::from("bootstrap:7687") {
                    let round = rediscovery_round.fetch_add(1, Ordering::SeqCst);
                    let readers: &[&str] = if round == 0 { &["bad:1"] } else { &["good:1"] };
                    Ok(Box::new(routing_connection("bootstrap:7687", readers, &["w1:1"]))
                        as Box<dyn Connection>)
                } else if address == &ServerAddress::from("bad:1") {
                    Err(RoutingError::service_unavailable("down"))
                } else {
                    Ok(Box::new(routing_connection("good:1", &["good:1"], &["w1:1"]))
                        as Box<dyn Connection>)
                }
            });
        }
        pool.expect_purge().returning(|_| {});
        pool.expect_active_connections().returning(|_| 0);

        let balancer = LoadBalancer::new(
            ServerAddress::from("bootstrap:7687"),
            Arc::new(resolver),
            ClusterCompositionProvider::new(HashMap::new()).unwrap(),
            RoutingSettings::new(3, 10).unwrap(),
            Arc::new(pool),
            clock,
        )
        .unwrap();

        let connection = balancer.acquire(AccessMode::Read).unwrap();
        assert_eq!(connection.address(), &ServerAddress::from("good:1"));
    }

    #[test]
    fn empty_candidate_set_fails_with_session_expired() {
        let clock = Arc::new(FrozenClock::new());
        let mut resolver = MockHostNameResolver::new();
        resolver
            .expect_resolve()
            .return_const(vec![ServerAddress::from("bootstrap:7687")]);

        let mut pool = MockConnectionPool::new();
        pool.expect_acquire().returning(|_| {
            Ok(Box::new(routing_connection("bootstrap:7687", &[], &["w1:1"])) as Box<dyn Connection>)
        });
        pool.expect_purge().returning(|_| {});
        pool.expect_active_connections().returning(|_| 0);

        let balancer = LoadBalancer::new(
            ServerAddress::from("bootstrap:7687"),
            Arc::new(resolver),
            ClusterCompositionProvider::new(HashMap::new()).unwrap(),
            RoutingSettings::new(3, 10).unwrap(),
            Arc::new(pool),
            clock,
        )
        .unwrap();

        let err = balancer.acquire(AccessMode::Read).unwrap_err();
        assert!(matches!(err, RoutingError::SessionExpired { .. }));
    }

    #[test]
    fn empty_bootstrap_host_is_a_configuration_error() {
        let clock = Arc::new(FrozenClock::new());
        let resolver = MockHostNameResolver::new();
        let pool = MockConnectionPool::new();
        let err = LoadBalancer::new(
            ServerAddress::from(("", 7687u16)),
            Arc::new(resolver),
            ClusterCompositionProvider::new(HashMap::new()).unwrap(),
            RoutingSettings::new(3, 10).unwrap(),
            Arc::new(pool),
            clock,
        )
        .unwrap_err();
        assert!(matches!(err, RoutingError::ConfigurationError { .. }));
    }

    #[test]
    fn connection_failure_forgets_address_and_purges_pool() {
        let (balancer, _active) = balancer_with(&["r1:1"], &["w1:1"], HashMap::new());
        balancer.on_connection_failure(&ServerAddress::from("r1:1"), FailureKind::Connection);
        assert!(!balancer.table.readers().contains(&ServerAddress::from("r1:1")));
    }

    #[test]
    fn write_rejection_only_forgets_writer() {
        let (balancer, _active) = balancer_with(&["a:1"], &["a:1"], HashMap::new());
        balancer.on_connection_failure(&ServerAddress::from("a:1"), FailureKind::WriteRejected);
        assert!(balancer.table.readers().contains(&ServerAddress::from("a:1")));
        assert!(!balancer.table.writers().contains(&ServerAddress::from("a:1")));
    }
}
