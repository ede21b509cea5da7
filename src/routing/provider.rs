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
use std::time::Duration;

use log::warn;

use crate::address::ServerAddress;
use crate::error::{Result, RoutingError};
use crate::pool::Connection;
use crate::routing::composition::{AddressSet, ClusterComposition};
use crate::time::Clock;
use crate::value::{Record, Value};

const LEGACY_PROCEDURE: &str = "dbms.cluster.routing.getServers";
const CURRENT_PROCEDURE: &str = "dbms.cluster.routing.getRoutingTable";
/// Servers at this version or newer understand the parameterized `getRoutingTable` procedure.
const FIRST_VERSION_WITH_ROUTING_CONTEXT: (u8, u8) = (3, 2);

/// Invokes the server's "get routing table" procedure and turns the result into a
/// [`ClusterComposition`].
///
/// A server rejecting the call with a "procedure not found" error (i.e. it isn't a cluster
/// member capable of routing) is expected to surface through
/// [`Connection::run_procedure`](crate::pool::Connection::run_procedure) as a
/// [`RoutingError::ProtocolError`] — the wire-level classification of that server error is a
/// transport concern out of this crate's scope (spec §1), and rediscovery already treats every
/// non-authentication failure identically (forget the address, try the next candidate), so no
/// separate "not a router" error kind is needed here.
#[derive(Debug, Clone)]
pub struct ClusterCompositionProvider {
    routing_context: HashMap<String, String>,
}

impl ClusterCompositionProvider {
    /// # Errors
    /// Returns [`RoutingError::ConfigurationError`] if `routing_context` contains the *reserved*
    /// key `"address"`, mirroring the teacher's `ConnectionConfig::with_routing_context`
    /// (`neo4j/src/driver/config.rs:463-472`), which rejects that same key for the same reason:
    /// the core fills it in itself from the address actually connected to.
    pub fn new(routing_context: HashMap<String, String>) -> Result<Self> {
        if routing_context.contains_key("address") {
            return Err(RoutingError::configuration_error(
                "routing context must not contain the reserved key \"address\"",
            ));
        }
        Ok(Self { routing_context })
    }

    pub(crate) fn get_cluster_composition(
        &self,
        connection: &mut dyn Connection,
        clock: &dyn Clock,
    ) -> Result<ClusterComposition> {
        let record = if connection.server_version() >= FIRST_VERSION_WITH_ROUTING_CONTEXT {
            let context = self
                .routing_context
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect();
            let mut params = HashMap::with_capacity(1);
            params.insert(String::from("context"), Value::Map(context));
            connection.run_procedure(CURRENT_PROCEDURE, params)?
        } else {
            connection.run_procedure(LEGACY_PROCEDURE, HashMap::new())?
        };
        Self::parse(record, clock)
    }

    fn parse(mut record: Record, clock: &dyn Clock) -> Result<ClusterComposition> {
        let ttl = record
            .remove("ttl")
            .ok_or_else(|| RoutingError::protocol_error("routing record missing \"ttl\""))?
            .try_into_integer()
            .map_err(|_| RoutingError::protocol_error("\"ttl\" was not an integer"))?;
        let expires_at = clock
            .now()
            .checked_add(Duration::from_secs(ttl.max(0) as u64))
            .ok_or_else(|| RoutingError::protocol_error("\"ttl\" overflowed"))?;

        let servers = record
            .remove("servers")
            .ok_or_else(|| RoutingError::protocol_error("routing record missing \"servers\""))?
            .try_into_list()
            .map_err(|_| RoutingError::protocol_error("\"servers\" was not a list"))?;

        let mut readers = Vec::new();
        let mut writers = Vec::new();
        let mut routers = Vec::new();
        for server in servers {
            let (role, addresses) = Self::parse_server(server)?;
            match role {
                ServerRole::Reader => readers = addresses,
                ServerRole::Writer => writers = addresses,
                ServerRole::Router => routers = addresses,
                ServerRole::Unknown => {}
            }
        }

        if routers.is_empty() {
            return Err(RoutingError::protocol_error(
                "routing record contained no ROUTE servers",
            ));
        }

        Ok(ClusterComposition::new(
            expires_at,
            AddressSet::from_iter(readers),
            AddressSet::from_iter(writers),
            AddressSet::from_iter(routers),
        ))
    }

    fn parse_server(
        server: Value,
    ) -> Result<(ServerRole, Vec<ServerAddress>)> {
        let mut server = server
            .try_into_map()
            .map_err(|_| RoutingError::protocol_error("\"servers\" entry was not a map"))?;
        let role: String = server
            .remove("role")
            .ok_or_else(|| RoutingError::protocol_error("\"servers\" entry missing \"role\""))?
            .try_into_string()
            .map_err(|_| RoutingError::protocol_error("\"role\" was not a string"))?;
        let role = ServerRole::from(role.as_str());
        if matches!(role, ServerRole::Unknown) {
            warn!("ignoring unknown server role {role}", role = role_name(&role));
        }
        let addresses = server
            .remove("addresses")
            .ok_or_else(|| {
                RoutingError::protocol_error("\"servers\" entry missing \"addresses\"")
            })?
            .try_into_list()
            .map_err(|_| RoutingError::protocol_error("\"addresses\" was not a list"))?
            .into_iter()
            .map(|a| {
                a.try_into_string()
                    .map(|s| ServerAddress::from(s.as_str()))
                    .map_err(|_| RoutingError::protocol_error("address entry was not a string"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((role, addresses))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerRole {
    Reader,
    Writer,
    Router,
    Unknown,
}

impl From<&str> for ServerRole {
    fn from(s: &str) -> Self {
        match s {
            "READ" => ServerRole::Reader,
            "WRITE" => ServerRole::Writer,
            "ROUTE" => ServerRole::Router,
            _ => ServerRole::Unknown,
        }
    }
}

fn role_name(role: &ServerRole) -> &'static str {
    match role {
        ServerRole::Reader => "READ",
        ServerRole::Writer => "WRITE",
        ServerRole::Router => "ROUTE",
        ServerRole::Unknown => "<unknown>",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ServerAddress;
    use crate::time::mock::FrozenClock;
    use mockall::predicate::*;
    use std::collections::HashMap as Map;

    fn servers_value(roles: &[(&str, &[&str])]) -> Value {
        Value::List(
            roles
                .iter()
                .map(|(role, addrs)| {
                    let mut m = Map::new();
                    m.insert(String::from("role"), Value::from(*role));
                    m.insert(
                        String::from("addresses"),
                        Value::from(addrs.iter().map(|a| a.to_string()).collect::<Vec<_>>()),
                    );
                    Value::Map(m)
                })
                .collect(),
        )
    }

    fn record(ttl: i64, roles: &[(&str, &[&str])]) -> Record {
        let mut fields = Map::new();
        fields.insert(String::from("ttl"), Value::Integer(ttl));
        fields.insert(String::from("servers"), servers_value(roles));
        Record::new(fields)
    }

    #[test]
    fn parses_full_composition() {
        let clock = FrozenClock::new();
        let rec = record(
            60,
            &[
                ("READ", &["r1:1", "r2:1"]),
                ("WRITE", &["w1:1"]),
                ("ROUTE", &["router:1"]),
            ],
        );
        let composition = ClusterCompositionProvider::parse(rec, &clock).unwrap();
        assert_eq!(composition.readers().len(), 2);
        assert_eq!(composition.writers().len(), 1);
        assert_eq!(composition.routers().len(), 1);
    }

    #[test]
    fn unknown_roles_are_ignored() {
        let clock = FrozenClock::new();
        let rec = record(
            60,
            &[("ROUTE", &["router:1"]), ("SPARE", &["extra:1"])],
        );
        let composition = ClusterCompositionProvider::parse(rec, &clock).unwrap();
        assert_eq!(composition.routers().len(), 1);
        assert!(composition.readers().is_empty());
    }

    #[test]
    fn reserved_routing_context_key_is_rejected() {
        let mut context = Map::new();
        context.insert(String::from("address"), String::from("a:1"));
        let err = ClusterCompositionProvider::new(context).unwrap_err();
        assert!(matches!(err, RoutingError::ConfigurationError { .. }));
    }

    #[test]
    fn empty_routers_is_a_protocol_error() {
        let clock = FrozenClock::new();
        let rec = record(60, &[("READ", &["r1:1"])]);
        let err = ClusterCompositionProvider::parse(rec, &clock).unwrap_err();
        assert!(matches!(err, RoutingError::ProtocolError { .. }));
    }

    #[test]
    fn empty_writers_is_accepted() {
        let clock = FrozenClock::new();
        let rec = record(60, &[("READ", &["r1:1"]), ("ROUTE", &["router:1"])]);
        let composition = ClusterCompositionProvider::parse(rec, &clock).unwrap();
        assert!(!composition.has_writers());
    }

    #[test]
    fn missing_ttl_is_a_protocol_error() {
        let clock = FrozenClock::new();
        let mut fields = Map::new();
        fields.insert(
            String::from("servers"),
            servers_value(&[("ROUTE", &["router:1"])]),
        );
        let err = ClusterCompositionProvider::parse(Record::new(fields), &clock).unwrap_err();
        assert!(matches!(err, RoutingError::ProtocolError { .. }));
    }

    #[test]
    fn negative_ttl_is_treated_as_zero() {
        let clock = FrozenClock::new();
        let rec = record(-5, &[("ROUTE", &["router:1"])]);
        let composition = ClusterCompositionProvider::parse(rec, &clock).unwrap();
        assert_eq!(composition.expires_at, clock.now());
    }

    #[test]
    fn uses_current_procedure_for_recent_servers() {
        let mut conn = crate::pool::MockConnection::new();
        conn.expect_server_version().return_const((5u8, 5u8));
        conn.expect_run_procedure()
            .with(eq(CURRENT_PROCEDURE), always())
            .returning(|_, _| Ok(record(60, &[("ROUTE", &["router:1"])])));
        let provider = ClusterCompositionProvider::new(HashMap::new()).unwrap();
        let clock = FrozenClock::new();
        assert!(provider
            .get_cluster_composition(&mut conn, &clock)
            .is_ok());
    }

    #[test]
    fn uses_legacy_procedure_for_old_servers() {
        let mut conn = crate::pool::MockConnection::new();
        conn.expect_server_version().return_const((3u8, 1u8));
        conn.expect_run_procedure()
            .with(eq(LEGACY_PROCEDURE), always())
            .returning(|_, _| Ok(record(60, &[("ROUTE", &["router:1"])])));
        let provider = ClusterCompositionProvider::new(HashMap::new()).unwrap();
        let clock = FrozenClock::new();
        assert!(provider
            .get_cluster_composition(&mut conn, &clock)
            .is_ok());
    }
}
