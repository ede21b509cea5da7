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

use std::fmt;

use thiserror::Error;

use crate::address::ServerAddress;

/// Errors surfaced by the routing core.
///
/// **Note on usage:** error messages are not part of the API's semver contract; match on the
/// variant, not on `to_string()`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RoutingError {
    /// Rediscovery exhausted all known routers and the bootstrap address without producing a
    /// usable composition. The caller decides whether and when to retry.
    #[error("{message}")]
    #[non_exhaustive]
    ServiceUnavailable { message: String },

    /// The server previously selected for this operation stopped being suitable: its connection
    /// broke, it rejected a write, or routing went stale mid-operation. The routing table has
    /// already been updated; the caller should re-enter acquisition.
    #[error("{message}{}", source.as_ref().map(|s| format!(" caused by: {s}")).unwrap_or_default())]
    #[non_exhaustive]
    SessionExpired {
        message: String,
        source: Option<Box<RoutingError>>,
    },

    /// Surfaced immediately from within rediscovery; never retried, never swallowed.
    #[error("authentication failed: {message}")]
    #[non_exhaustive]
    AuthenticationError { message: String },

    /// A malformed or rejected routing table record. Treated as "this router is unusable"
    /// during rediscovery (forget + continue) but surfaced verbatim if it is the sole router.
    #[error("protocol error: {message}")]
    #[non_exhaustive]
    ProtocolError { message: String },

    /// The server rejected a write because it isn't the leader (or the database is read-only).
    /// Surfaced by [`crate::pool::Connection`] implementations; translated by
    /// [`crate::routing::connection::RoutingConnection`] into a writer-forgetting notification
    /// (spec §4.5) rather than propagated as-is.
    #[error("write rejected: {message}")]
    #[non_exhaustive]
    WriteRejected { message: String },

    /// Detected at construction: an empty bootstrap address or non-positive
    /// [`crate::routing::RoutingSettings`] field.
    #[error("invalid configuration: {message}")]
    #[non_exhaustive]
    ConfigurationError { message: String },
}

impl RoutingError {
    pub(crate) fn service_unavailable<S: Into<String>>(message: S) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    pub(crate) fn session_expired<S: Into<String>>(message: S) -> Self {
        Self::SessionExpired {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn session_expired_because(message: impl Into<String>, source: RoutingError) -> Self {
        Self::SessionExpired {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn protocol_error<S: Into<String>>(message: S) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    pub(crate) fn configuration_error<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    pub(crate) fn write_rejected<S: Into<String>>(message: S) -> Self {
        Self::WriteRejected {
            message: message.into(),
        }
    }

    /// True for errors that abort rediscovery outright rather than being recovered by forgetting
    /// the offending address and trying the next candidate.
    pub(crate) fn fatal_during_discovery(&self) -> bool {
        matches!(self, Self::AuthenticationError { .. })
    }

    pub(crate) fn for_unreachable_address(address: &ServerAddress, source: RoutingError) -> Self {
        Self::session_expired_because(format!("{address} is no longer reachable"), source)
    }
}

/// Distinguishes the two ways a [`crate::routing::connection::RoutingConnection`] can trigger a
/// failure report to the [`crate::routing::balancer::LoadBalancer`]; see
/// [`crate::routing::balancer::LoadBalancer::on_connection_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport-level failure: broken socket, connect failure, I/O error.
    Connection,
    /// Server rejected a write ("not a leader" / "forbidden on read-only database").
    WriteRejected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection failure"),
            Self::WriteRejected => write!(f, "write rejected"),
        }
    }
}

pub type Result<T> = std::result::Result<T, RoutingError>;
