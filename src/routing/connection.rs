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

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::address::ServerAddress;
use crate::error::{FailureKind, Result, RoutingError};
use crate::pool::Connection;
use crate::routing::balancer::LoadBalancer;
use crate::routing::table::AccessMode;
use crate::value::{Record, Value};

/// A thin delegate over a pooled connection that classifies its failures and reports them to the
/// owning [`LoadBalancer`] (spec §4.5).
///
/// Holds a non-owning `Arc<LoadBalancer>` rather than a back-reference the balancer would need to
/// keep alive itself: the cycle this would otherwise create (balancer hands out connections that
/// point back at the balancer) is resolved per spec §9 by simply letting the wrapper share
/// ownership of the balancer instead of the other way around (see spec's "Cyclic reference"
/// REDESIGN FLAG).
#[derive(Debug)]
pub struct RoutingConnection {
    inner: Box<dyn Connection>,
    address: Arc<ServerAddress>,
    mode: AccessMode,
    balancer: Arc<LoadBalancer>,
    notified: AtomicBool,
}

impl RoutingConnection {
    pub(crate) fn new(
        inner: Box<dyn Connection>,
        address: Arc<ServerAddress>,
        mode: AccessMode,
        balancer: Arc<LoadBalancer>,
    ) -> Self {
        Self {
            inner,
            address,
            mode,
            balancer,
            notified: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Delegates to the wrapped connection; on failure, classifies and reports it to the
    /// balancer (at most once for this wrapper's lifetime) and rethrows a
    /// [`RoutingError::SessionExpired`] caused-by the original, per spec §4.5. Errors that are
    /// neither a transport failure nor an in-write-mode write rejection propagate unchanged.
    pub fn run_procedure(&mut self, name: &str, params: HashMap<String, Value>) -> Result<Record> {
        match self.inner.run_procedure(name, params) {
            Ok(record) => Ok(record),
            Err(err) => Err(self.handle_failure(err)),
        }
    }

    fn handle_failure(&self, err: RoutingError) -> RoutingError {
        let kind = match &err {
            RoutingError::ServiceUnavailable { .. } => Some(FailureKind::Connection),
            RoutingError::WriteRejected { .. } if self.mode == AccessMode::Write => {
                Some(FailureKind::WriteRejected)
            }
            _ => None,
        };
        let Some(kind) = kind else {
            return err;
        };
        if !self.notified.swap(true, Ordering::SeqCst) {
            self.balancer.on_connection_failure(&self.address, kind);
        }
        RoutingError::for_unreachable_address(&self.address, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::resolution::MockHostNameResolver;
    use crate::pool::{MockConnection, MockConnectionPool};
    use crate::routing::provider::ClusterCompositionProvider;
    use crate::routing::rediscovery::RoutingSettings;
    use crate::time::mock::FrozenClock;

    fn bootstrap_connection() -> MockConnection {
        let mut conn = MockConnection::new();
        conn.expect_address()
            .return_const(ServerAddress::from("bootstrap:7687"));
        conn.expect_server_version().return_const((5u8, 5u8));
        conn.expect_run_procedure().returning(|_, _| {
            let mut fields = HashMap::new();
            fields.insert(String::from("ttl"), Value::Integer(60));
            let mut router = HashMap::new();
            router.insert(String::from("role"), Value::from("ROUTE"));
            router.insert(
                String::from("addresses"),
                Value::from(vec![String::from("bootstrap:7687")]),
            );
            fields.insert(
                String::from("servers"),
                Value::List(vec![Value::Map(router)]),
            );
            Ok(Record::new(fields))
        });
        conn
    }

    fn balancer() -> Arc<LoadBalancer> {
        let clock = Arc::new(FrozenClock::new());
        let mut resolver = MockHostNameResolver::new();
        resolver
            .expect_resolve()
            .return_const(vec![ServerAddress::from("bootstrap:7687")]);
        let mut pool = MockConnectionPool::new();
        pool.expect_acquire()
            .returning(|_| Ok(Box::new(bootstrap_connection()) as Box<dyn Connection>));
        pool.expect_purge().returning(|_| {});
        pool.expect_active_connections().returning(|_| 0);
        LoadBalancer::new(
            ServerAddress::from("bootstrap:7687"),
            Arc::new(resolver),
            ClusterCompositionProvider::new(HashMap::new()).unwrap(),
            RoutingSettings::new(3, 10).unwrap(),
            Arc::new(pool),
            clock,
        )
        .unwrap()
    }

    #[test]
    fn transport_failure_notifies_balancer_once_and_rethrows_session_expired() {
        let balancer = balancer();
        let mut conn = MockConnection::new();
        conn.expect_run_procedure()
            .returning(|_, _| Err(RoutingError::service_unavailable("broken socket")));
        let mut wrapper = RoutingConnection::new(
            Box::new(conn),
            Arc::new(ServerAddress::from("a:1")),
            AccessMode::Read,
            Arc::clone(&balancer),
        );
        let err = wrapper
            .run_procedure("whatever", HashMap::new())
            .unwrap_err();
        assert!(matches!(err, RoutingError::SessionExpired { .. }));
        assert!(!balancer.table().readers().contains(&ServerAddress::from("a:1")));
    }

    #[test]
    fn other_errors_propagate_unchanged() {
        let balancer = balancer();
        let mut conn = MockConnection::new();
        conn.expect_run_procedure()
            .returning(|_, _| Err(RoutingError::protocol_error("malformed record")));
        let mut wrapper = RoutingConnection::new(
            Box::new(conn),
            Arc::new(ServerAddress::from("a:1")),
            AccessMode::Read,
            balancer,
        );
        let err = wrapper
            .run_procedure("whatever", HashMap::new())
            .unwrap_err();
        assert!(matches!(err, RoutingError::ProtocolError { .. }));
    }

    #[test]
    fn write_rejection_is_ignored_outside_write_mode() {
        let balancer = balancer();
        let mut conn = MockConnection::new();
        conn.expect_run_procedure()
            .returning(|_, _| Err(RoutingError::write_rejected("not the leader")));
        let mut wrapper = RoutingConnection::new(
            Box::new(conn),
            Arc::new(ServerAddress::from("a:1")),
            AccessMode::Read,
            balancer,
        );
        let err = wrapper
            .run_procedure("whatever", HashMap::new())
            .unwrap_err();
        assert!(matches!(err, RoutingError::WriteRejected { .. }));
    }
}
