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

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! # Graph Routing Core
//!
//! Client-side cluster routing for a driver talking to a replicated graph database: a cached
//! routing table, the rediscovery protocol that keeps it fresh, and a load balancer that selects
//! connections by access mode.
//!
//! The binary wire protocol, the connection pool's internals, and authentication are out of
//! scope; this crate only consumes them through the [`pool::Connection`] and
//! [`pool::ConnectionPool`] traits (see [`pool`]). A driver wires a pool implementation in and
//! gets back a [`routing::LoadBalancer`] to acquire connections from.
//!
//! ## Basic usage
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use graph_routing_core::address::ServerAddress;
//! use graph_routing_core::address::resolution::DnsResolver;
//! use graph_routing_core::routing::{
//!     AccessMode, ClusterCompositionProvider, LoadBalancer, RoutingSettings,
//! };
//! use graph_routing_core::time::SystemClock;
//!
//! let balancer = LoadBalancer::new(
//!     ServerAddress::from("cluster.example.com:7687"),
//!     Arc::new(DnsResolver),
//!     ClusterCompositionProvider::new(Default::default())?,
//!     RoutingSettings::new(3, 1_000)?,
//!     my_connection_pool(),
//!     Arc::new(SystemClock),
//! )?;
//!
//! let connection = balancer.acquire(AccessMode::Read)?;
//! # Ok::<(), graph_routing_core::error::RoutingError>(())
//! ```

pub mod address;
pub mod error;
pub mod pool;
pub mod routing;
pub mod time;

mod sync;
mod value;

pub use value::{Record, Value};
