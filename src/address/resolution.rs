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

use std::fmt::Debug;
use std::net::ToSocketAddrs;

use log::debug;

use super::ServerAddress;

/// Expands a bootstrap hostname into zero or more resolved addresses.
///
/// Used exclusively by [`crate::routing::rediscovery::Rediscovery`] to expand the configured
/// bootstrap router before trying it. Implementations may return an empty `Vec` (e.g. a hostname
/// that currently resolves to nothing); they must not panic on resolution failure.
#[cfg_attr(test, mockall::automock)]
pub trait HostNameResolver: Debug + Send + Sync {
    fn resolve(&self, address: &ServerAddress) -> Vec<ServerAddress>;
}

/// Default resolver: delegates to the OS (`getaddrinfo` via [`std::net::ToSocketAddrs`]).
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

impl HostNameResolver for DnsResolver {
    fn resolve(&self, address: &ServerAddress) -> Vec<ServerAddress> {
        match address.to_socket_addrs() {
            Ok(resolved) => resolved.map(ServerAddress::from).collect(),
            Err(err) => {
                debug!("dns resolution of {address} failed: {err}");
                Vec::new()
            }
        }
    }
}
