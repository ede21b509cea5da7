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

use crate::address::ServerAddress;
use crate::time::Instant;

/// An ordered set of server addresses with a cheap snapshot-to-array operation.
///
/// Backed by a single `Arc`-allocated slice: the whole set is replaced on every mutation
/// ([`AddressSet::from_iter`]-style construction), so a [`AddressSet::snapshot`] is just an
/// `Arc::clone` and never blocks a concurrent reader.
#[derive(Debug, Clone)]
pub struct AddressSet {
    // Order = insertion order; de-duplicated on construction.
    addresses: Arc<[Arc<ServerAddress>]>,
}

impl AddressSet {
    pub fn new(addresses: impl IntoIterator<Item = Arc<ServerAddress>>) -> Self {
        let mut seen = HashSet::new();
        let deduped: Vec<_> = addresses
            .into_iter()
            .filter(|a| seen.insert(Arc::clone(a)))
            .collect();
        Self {
            addresses: Arc::from(deduped),
        }
    }

    pub fn empty() -> Self {
        Self {
            addresses: Arc::from(Vec::new()),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    #[inline]
    pub fn contains(&self, address: &ServerAddress) -> bool {
        self.addresses.iter().any(|a| a.as_ref() == address)
    }

    /// A cheap, point-in-time view of the set as an ordered slice. Cloning the returned `Arc`
    /// slice is O(1); the caller may hold it after the owning [`crate::routing::table::RoutingTable`]
    /// has moved on.
    #[inline]
    pub fn snapshot(&self) -> Arc<[Arc<ServerAddress>]> {
        Arc::clone(&self.addresses)
    }

    /// Returns a new set with `address` removed, or `self` unchanged (cheaply cloned) if it
    /// wasn't present.
    pub fn without(&self, address: &ServerAddress) -> Self {
        if !self.contains(address) {
            return self.clone();
        }
        Self::new(
            self.addresses
                .iter()
                .filter(|a| a.as_ref() != address)
                .cloned(),
        )
    }
}

impl FromIterator<ServerAddress> for AddressSet {
    fn from_iter<I: IntoIterator<Item = ServerAddress>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Arc::new))
    }
}

/// An immutable snapshot of the cluster's reader/writer/router sets with a TTL, as accepted from
/// [`crate::routing::provider::ClusterCompositionProvider`].
///
/// Never mutated after construction; superseded compositions are simply dropped by
/// [`crate::routing::table::RoutingTable::update`].
#[derive(Debug, Clone)]
pub struct ClusterComposition {
    pub(crate) expires_at: Instant,
    pub(crate) readers: AddressSet,
    pub(crate) writers: AddressSet,
    pub(crate) routers: AddressSet,
}

impl ClusterComposition {
    /// `routers` must be non-empty; the provider is responsible for enforcing that before
    /// constructing a composition (spec §4.1 acceptance rules).
    pub(crate) fn new(
        expires_at: Instant,
        readers: AddressSet,
        writers: AddressSet,
        routers: AddressSet,
    ) -> Self {
        debug_assert!(
            !routers.is_empty(),
            "ClusterComposition must not be constructed with empty routers"
        );
        Self {
            expires_at,
            readers,
            writers,
            routers,
        }
    }

    pub fn readers(&self) -> &AddressSet {
        &self.readers
    }

    pub fn writers(&self) -> &AddressSet {
        &self.writers
    }

    pub fn routers(&self) -> &AddressSet {
        &self.routers
    }

    pub fn has_writers(&self) -> bool {
        !self.writers.is_empty()
    }
}
