//! Per-connection session facts handed over by the transport adapter.

use chrono::{DateTime, Utc};

use crate::message::SessionId;

pub const FOOTER_LINES: usize = 5;

/// What the transport knows about a connection: resolved identity, terminal
/// kind and size, plus the server clock as of the last tick.
#[derive(Clone, Debug)]
pub struct ClientInfo {
    pub login: String,
    pub remote: String,
    pub term: String,
    pub cols: u16,
    pub rows: u16,
    pub time: DateTime<Utc>,
}

impl ClientInfo {
    /// Defaults for a browser terminal attached over WebSocket.
    pub fn webtty(login: &str, remote: &str) -> Self {
        Self {
            login: login.to_string(),
            remote: remote.to_string(),
            term: "webtty".to_string(),
            cols: 80,
            rows: 40,
            time: Utc::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        SessionId::new(&self.login, &self.remote)
    }

    /// The session facts block rendered under the chat view.
    pub fn footer(&self) -> String {
        format!(
            "  who: {}\nraddr: {}\n term: {}\n size: ({},{})\n time: {}\n",
            self.login,
            self.remote,
            self.term,
            self.cols,
            self.rows,
            self.time.to_rfc2822(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_has_the_documented_line_count() {
        let info = ClientInfo::webtty("alice@example.com", "100.64.1.2:52011");
        assert_eq!(info.footer().lines().count(), FOOTER_LINES);
    }

    #[test]
    fn id_joins_login_and_remote() {
        let info = ClientInfo::webtty("alice@example.com", "100.64.1.2:52011");
        assert_eq!(info.id().as_str(), "alice@example.com 100.64.1.2:52011");
    }
}
