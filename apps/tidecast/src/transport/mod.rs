//! Transport adapters. The core only requires two entry points — spawning a
//! client program and the engine's input handle — so adapters stay thin:
//! resolve an identity, bridge frames in and out, and tie the session token
//! to the connection's lifetime.

pub mod websocket;

use std::net::SocketAddr;

/// Resolves who is on the other end of a new connection. Stands in for an
/// external identity service; implementations must not block.
pub trait Identity: Send + Sync + 'static {
    fn resolve(&self, remote: SocketAddr, query: Option<&str>) -> String;
}

/// Reads the login from the handshake query string (`?login=NAME`), falling
/// back to a fixed guest name.
pub struct QueryIdentity {
    pub fallback: String,
}

impl Default for QueryIdentity {
    fn default() -> Self {
        Self {
            fallback: "guest".to_string(),
        }
    }
}

impl Identity for QueryIdentity {
    fn resolve(&self, _remote: SocketAddr, query: Option<&str>) -> String {
        query
            .and_then(|q| {
                q.split('&')
                    .find_map(|pair| pair.strip_prefix("login="))
                    .filter(|login| !login.is_empty())
            })
            .map(str::to_string)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "100.64.1.2:52011".parse().expect("addr")
    }

    #[test]
    fn login_comes_from_the_query() {
        let identity = QueryIdentity::default();
        assert_eq!(
            identity.resolve(addr(), Some("login=alice@example.com&x=1")),
            "alice@example.com"
        );
    }

    #[test]
    fn missing_or_empty_login_falls_back() {
        let identity = QueryIdentity::default();
        assert_eq!(identity.resolve(addr(), None), "guest");
        assert_eq!(identity.resolve(addr(), Some("login=")), "guest");
        assert_eq!(identity.resolve(addr(), Some("other=1")), "guest");
    }
}
