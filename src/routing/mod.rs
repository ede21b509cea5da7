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

//! Client-side cluster routing: a cached [`table::RoutingTable`], the
//! [`rediscovery::Rediscovery`] protocol that refreshes it, and the [`balancer::LoadBalancer`]
//! façade that ties them together with connection selection and failure reporting.

pub mod balancer;
pub mod composition;
pub mod connection;
pub mod provider;
pub mod rediscovery;
pub mod table;

pub use balancer::LoadBalancer;
pub use composition::{AddressSet, ClusterComposition};
pub use connection::RoutingConnection;
pub use provider::ClusterCompositionProvider;
pub use rediscovery::{Rediscovery, RoutingSettings};
pub use table::{AccessMode, RoutingTable};
