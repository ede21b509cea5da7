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

pub mod resolution;

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::vec::IntoIter;

pub(crate) const DEFAULT_PORT: u16 = 7687;
const COLON_BYTES: usize = ':'.len_utf8();

/// A cluster member's (host, port) pair.
///
/// Equality and hashing are defined over the host/port pair only, so a custom resolver that
/// rewrites the host is expected to be applied consistently before an address is ever stored in
/// an [`crate::routing::AddressSet`].
///
/// # Example
/// ```
/// use graph_routing_core::address::ServerAddress;
///
/// let address = ServerAddress::from(("localhost", 1234));
/// assert_eq!(address.host(), "localhost");
/// assert_eq!(address.port(), 1234);
///
/// let address = ServerAddress::from("example.com:5678");
/// assert_eq!(address.host(), "example.com");
/// assert_eq!(address.port(), 5678);
///
/// // missing port falls back to the default Bolt-like port
/// let address = ServerAddress::from("example.com");
/// assert_eq!(address.port(), 7687);
///
/// // IPv6 literals are bracketed
/// let address = ServerAddress::from("[::1]:4321");
/// assert_eq!(address.host(), "::1");
/// assert_eq!(address.port(), 4321);
/// ```
#[derive(Debug, Clone)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl PartialEq for ServerAddress {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for ServerAddress {}

impl Hash for ServerAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl ServerAddress {
    pub fn host(&self) -> &str {
        self.host.as_str()
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Display for ServerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<(String, u16)> for ServerAddress {
    fn from((host, port): (String, u16)) -> Self {
        Self { host, port }
    }
}

impl From<(&str, u16)> for ServerAddress {
    fn from((host, port): (&str, u16)) -> Self {
        Self {
            host: String::from(host),
            port,
        }
    }
}

/// Splits `host[:port]` on the final unbracketed colon, defaulting the port when absent.
/// IPv6 literals (`[::1]:1234` or bare `::1`) are recognized by their colon count/brackets.
fn parse(host: &str) -> (String, u16) {
    if let Some(pos_colon) = host.rfind(':') {
        if let Some(pos_bracket) = host.rfind(']') {
            return if pos_bracket < pos_colon {
                // [IPv6]:port
                let host_part = &host[1..pos_bracket];
                let port = host[pos_colon + COLON_BYTES..]
                    .parse()
                    .unwrap_or(DEFAULT_PORT);
                (String::from(host_part), port)
            } else {
                // [IPv6] without port
                (String::from(&host[1..pos_bracket]), DEFAULT_PORT)
            };
        }
        if host[..pos_colon].rfind(':').is_some() {
            // bare IPv6 (multiple colons, no brackets) => no port to extract
            return (String::from(host), DEFAULT_PORT);
        }
        // host:port
        let port = host[pos_colon + COLON_BYTES..]
            .parse()
            .unwrap_or(DEFAULT_PORT);
        (String::from(&host[..pos_colon]), port)
    } else {
        (String::from(host), DEFAULT_PORT)
    }
}

impl From<&str> for ServerAddress {
    fn from(host: &str) -> Self {
        let (host, port) = parse(host);
        Self { host, port }
    }
}

impl From<SocketAddr> for ServerAddress {
    fn from(addr: SocketAddr) -> Self {
        let host = match addr.ip() {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => ip.to_string(),
        };
        Self::from((host, addr.port()))
    }
}

impl FromStr for ServerAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl ToSocketAddrs for ServerAddress {
    type Iter = IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        (self.host.as_str(), self.port).to_socket_addrs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("localhost", "localhost", DEFAULT_PORT)]
    #[case("localhost:1234", "localhost", 1234)]
    #[case("127.0.0.1:1234", "127.0.0.1", 1234)]
    #[case("[::1]:4321", "::1", 4321)]
    #[case("::1", "::1", DEFAULT_PORT)]
    fn parses_host_port(#[case] input: &str, #[case] host: &str, #[case] port: u16) {
        let addr = ServerAddress::from(input);
        assert_eq!(addr.host(), host);
        assert_eq!(addr.port(), port);
    }

    #[test]
    fn equality_ignores_resolution_history() {
        let a = ServerAddress::from("a:1");
        let b = ServerAddress::from(("a", 1u16));
        assert_eq!(a, b);
    }

    #[test]
    fn display_brackets_ipv6() {
        let addr = ServerAddress::from("[::1]:7687");
        assert_eq!(addr.to_string(), "[::1]:7687");
    }
}
