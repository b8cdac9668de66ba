//! The message vocabulary shared by the authoritative engine, the broadcast
//! bus, and the per-session client programs.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::record::{CodecError, Recordable};
use crate::world::chat::{ChatMsg, CHAT_MSG_TYPE};
use crate::world::stackfall::GameReq;

/// Identity of one live transport connection: `"<login> <remote-addr>"`.
///
/// The login half groups sessions belonging to the same user; the remote
/// address half disambiguates concurrent sessions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(login: &str, remote: &str) -> Self {
        Self(Arc::from(format!("{login} {remote}").as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The login-name half of the id.
    pub fn login(&self) -> &str {
        self.0.split_once(' ').map_or(&*self.0, |(login, _)| login)
    }

    /// The remote-address half of the id.
    pub fn session(&self) -> &str {
        self.0.split_once(' ').map_or("", |(_, sess)| sess)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages that fan out over the broadcast bus. Everything here is cheap to
/// clone; one copy is handed to every live subscriber.
#[derive(Clone, Debug)]
pub enum Event {
    /// 1 Hz liveness pulse. Drives UI clocks and guarantees quiescent
    /// subscribers wake often enough to observe cancellation.
    Tick(DateTime<Utc>),
    Connected(SessionId),
    Disconnected(SessionId),
    /// A persisted message, id already assigned by the store.
    Record(Record),
    Names(NamesReply),
    Whois(WhoisReply),
    /// Rendered shared game board; `None` announces teardown.
    Board(Option<Arc<str>>),
    /// Final sentinel written when the engine exits.
    Shutdown(String),
}

/// Messages addressed to the authoritative engine's shared-state world,
/// produced by client sessions and by the engine's own timers.
#[derive(Clone, Debug)]
pub enum WorldMsg {
    Tick(DateTime<Utc>),
    Connected(SessionId),
    Disconnected(SessionId),
    Chat(ChatMsg),
    Names { requestor: SessionId },
    Whois { requestor: SessionId, user: String },
    Game(GameReq),
}

/// The durable subset of bus traffic. Anything not representable here flows
/// through the bus but never reaches the event log.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Chat(ChatMsg),
}

impl Recordable for Record {
    fn type_name(&self) -> &'static str {
        match self {
            Record::Chat(_) => CHAT_MSG_TYPE,
        }
    }

    fn ts(&self) -> Option<DateTime<Utc>> {
        match self {
            Record::Chat(msg) => msg.at,
        }
    }

    fn id(&self) -> Option<u64> {
        match self {
            Record::Chat(msg) => msg.rec_id,
        }
    }

    fn with_id(mut self, id: u64) -> Self {
        match &mut self {
            Record::Chat(msg) => msg.rec_id = Some(id),
        }
        self
    }

    fn payload(&self) -> Result<Value, CodecError> {
        match self {
            Record::Chat(msg) => serde_json::to_value(msg).map_err(CodecError::Encode),
        }
    }
}

impl From<ChatMsg> for Record {
    fn from(msg: ChatMsg) -> Self {
        Record::Chat(msg)
    }
}

#[derive(Clone, Debug)]
pub struct NamesReply {
    pub requestor: SessionId,
    /// Display nicks of connected logins, lexicographic by login.
    pub names: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct WhoisReply {
    pub requestor: SessionId,
    pub user: String,
    /// One line per matching session.
    pub results: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_splits_on_first_space() {
        let id = SessionId::new("alice@example.com", "100.64.1.2:52011");
        assert_eq!(id.login(), "alice@example.com");
        assert_eq!(id.session(), "100.64.1.2:52011");
        assert_eq!(id.to_string(), "alice@example.com 100.64.1.2:52011");
    }

    #[test]
    fn session_id_without_remote_half() {
        let id = SessionId(Arc::from("solo"));
        assert_eq!(id.login(), "solo");
        assert_eq!(id.session(), "");
    }
}
