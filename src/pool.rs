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

//! External collaborators consumed, but not implemented, by this crate: the pooled transport
//! connection and the pool that hands them out. See spec §6 "External Interfaces".

use std::collections::HashMap;
use std::fmt::Debug;

use crate::address::ServerAddress;
use crate::error::Result;
use crate::value::{Record, Value};

/// An open connection to a single cluster member.
///
/// The binary wire protocol, session/transaction state machine, record streaming and
/// authentication handshake behind this trait are out of scope for this crate (spec §1); only
/// the single RPC-shaped operation rediscovery needs is exposed.
#[cfg_attr(test, mockall::automock)]
pub trait Connection: Debug + Send {
    /// Invokes a remote procedure and returns its single result record.
    ///
    /// Implementations must fail if the server returns anything other than exactly one record
    /// (see [`crate::routing::provider::ClusterCompositionProvider`]).
    fn run_procedure(&mut self, name: &str, params: HashMap<String, Value>) -> Result<Record>;

    /// `(major, minor)` of the server's negotiated protocol/DBMS version, used to choose between
    /// the legacy and parameterized routing procedures.
    fn server_version(&self) -> (u8, u8);

    /// The address this connection is attached to.
    fn address(&self) -> &ServerAddress;
}

/// The connection pool the [`crate::routing::balancer::LoadBalancer`] draws connections from.
///
/// Assumed thread-safe by the core; `purge` must be safe to call concurrently with `acquire`.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionPool: Debug + Send + Sync {
    /// Acquires (opening if necessary) a connection to `address`. May block.
    fn acquire(&self, address: &ServerAddress) -> Result<Box<dyn Connection>>;

    /// Drops any idle/open connections to `address`. Safe to call concurrently; a no-op if none
    /// exist.
    fn purge(&self, address: &ServerAddress);

    /// Best-effort count of connections currently checked out against `address`. Need not be
    /// linearizable with concurrent `acquire`/release activity.
    fn active_connections(&self, address: &ServerAddress) -> usize;
}
