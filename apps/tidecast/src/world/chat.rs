//! The chat-room world: roster of connected logins, message fan-out, and the
//! `/names` and `/whois` queries. Composes the shared falling-block game so
//! both ride on one authoritative loop.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::message::{Event, NamesReply, Record, WhoisReply, WorldMsg};
use crate::world::stackfall::MultiModel;
use crate::world::{World, WorldCx};

/// Stable wire name of the chat message record.
pub const CHAT_MSG_TYPE: &str = "chat.message";

pub const SYS_NICK: &str = "system";
pub const HELP_NICK: &str = "help";
pub const INFO_NICK: &str = "info";
pub const ERR_NICK: &str = "error";

/// One chat line. `who`/`sess` identify the producing session; `at` is the
/// producer's clock and `server_at` the authoritative receipt time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMsg {
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub server_at: Option<DateTime<Utc>>,
    pub who: String,
    pub sess: String,
    pub text: String,
    /// Display-name override; derived from `who` when unset.
    #[serde(skip)]
    pub nick: Option<String>,
    /// Store id, assigned on first save.
    #[serde(skip)]
    pub rec_id: Option<u64>,
}

impl ChatMsg {
    pub fn user(at: DateTime<Utc>, who: &str, sess: &str, text: &str) -> Self {
        Self {
            at: Some(at),
            who: who.to_string(),
            sess: sess.to_string(),
            text: text.to_string(),
            ..Self::default()
        }
    }

    fn tagged(at: DateTime<Utc>, nick: &str, text: String) -> Self {
        Self {
            at: Some(at),
            who: nick.to_string(),
            nick: Some(nick.to_string()),
            text,
            ..Self::default()
        }
    }

    pub fn system(at: DateTime<Utc>, text: String) -> Self {
        Self::tagged(at, SYS_NICK, text)
    }

    pub fn info(at: DateTime<Utc>, text: String) -> Self {
        Self::tagged(at, INFO_NICK, text)
    }

    pub fn help(at: DateTime<Utc>, text: String) -> Self {
        Self::tagged(at, HELP_NICK, text)
    }

    pub fn error(at: DateTime<Utc>, text: String) -> Self {
        Self::tagged(at, ERR_NICK, text)
    }

    pub fn nick(&self) -> &str {
        match &self.nick {
            Some(nick) => nick,
            None => nick_from_login(&self.who),
        }
    }
}

/// Display name for a login: everything before the first `@`.
pub fn nick_from_login(login: &str) -> &str {
    match login.split_once('@') {
        Some((nick, _)) => nick,
        None => login,
    }
}

/// `now - t` formatted for the whois listing: seconds below a minute, then
/// minutes, hours, days, weeks.
pub fn format_age(t: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(t).num_milliseconds() as f64 / 1000.0;
    let mins = secs / 60.0;
    let hours = mins / 60.0;
    let days = hours / 24.0;
    if secs < 1.0 {
        "0 s".to_string()
    } else if mins < 1.0 {
        format!("{secs:.0} s")
    } else if hours < 1.0 {
        format!("{mins:.0} m")
    } else if days < 1.0 {
        format!("{hours:.0} h")
    } else if days < 7.0 {
        format!("{days:.0} d")
    } else {
        format!("{:.0} w", days / 7.0)
    }
}

pub struct ChatWorld {
    /// Last liveness tick; roster join times and system lines use it.
    tick: DateTime<Utc>,
    /// `login -> session -> join time`. A session is present iff a connect
    /// was observed with no matching disconnect since.
    names: BTreeMap<String, HashMap<String, DateTime<Utc>>>,
    game: MultiModel,
}

impl Default for ChatWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatWorld {
    pub fn new() -> Self {
        Self {
            tick: Utc::now(),
            names: BTreeMap::new(),
            game: MultiModel::new(),
        }
    }

    fn whois(&self, requestor: crate::message::SessionId, user: String) -> WhoisReply {
        let mut results = Vec::new();
        if let Some(sessions) = self.names.get(&user) {
            let mut sess: Vec<&String> = sessions.keys().collect();
            sess.sort();
            for s in sess {
                results.push(format!("{user} {s}"));
            }
        } else {
            for (login, sessions) in &self.names {
                if !login.starts_with(&user) {
                    continue;
                }
                let mut entries: Vec<(&String, &DateTime<Utc>)> = sessions.iter().collect();
                entries.sort_by_key(|(s, _)| s.as_str());
                for (s, since) in entries {
                    results.push(format!("{login} {s} ({})", format_age(*since, self.tick)));
                }
            }
        }
        WhoisReply {
            requestor,
            user,
            results,
        }
    }

    #[cfg(test)]
    pub(crate) fn roster_sessions(&self, login: &str) -> usize {
        self.names.get(login).map_or(0, HashMap::len)
    }
}

impl World for ChatWorld {
    fn update(&mut self, msg: WorldMsg, cx: &WorldCx) {
        match msg {
            WorldMsg::Tick(t) => {
                self.tick = t;
            }

            WorldMsg::Chat(msg) => {
                let lag = msg.at.map(|at| Utc::now().signed_duration_since(at));
                debug!(
                    target = "world::chat",
                    who = %msg.who,
                    sess = %msg.sess,
                    lag = ?lag,
                    "chat"
                );
                cx.broadcast(Event::Record(Record::Chat(msg)));
            }

            WorldMsg::Names { requestor } => {
                let names = self
                    .names
                    .keys()
                    .map(|login| nick_from_login(login).to_string())
                    .collect();
                cx.broadcast(Event::Names(NamesReply { requestor, names }));
            }

            WorldMsg::Whois { requestor, user } => {
                cx.broadcast(Event::Whois(self.whois(requestor, user)));
            }

            WorldMsg::Connected(id) => {
                self.names
                    .entry(id.login().to_string())
                    .or_default()
                    .insert(id.session().to_string(), self.tick);
                cx.broadcast(Event::Record(Record::Chat(ChatMsg::system(
                    self.tick,
                    format!("{id} connected"),
                ))));
            }

            WorldMsg::Disconnected(id) => {
                if let Some(sessions) = self.names.get_mut(id.login()) {
                    sessions.remove(id.session());
                    if sessions.is_empty() {
                        self.names.remove(id.login());
                    }
                }
                cx.broadcast(Event::Record(Record::Chat(ChatMsg::system(
                    self.tick,
                    format!("{id} disconnected"),
                ))));
                self.game.disconnect(&id, cx);
            }

            WorldMsg::Game(req) => self.game.handle(req, cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SessionId;
    use crate::program::engine::Request;
    use chrono::TimeZone;
    use ringcast::{Broadcast, CancelToken, SubscribeOpts, Subscriber};
    use tokio::sync::mpsc;

    fn cx_with_tap() -> (WorldCx, Subscriber<Event>, mpsc::Receiver<Request>) {
        let bus = Broadcast::new(64);
        let sub = bus.subscribe(SubscribeOpts {
            name: "tap".to_string(),
            start_behind: 0,
            max_behind: u64::MAX,
            token: CancelToken::new(),
        });
        let (tx, rx) = mpsc::channel(16);
        (WorldCx::new(bus, tx, CancelToken::new()), sub, rx)
    }

    fn sid(login: &str, sess: &str) -> SessionId {
        SessionId::new(login, sess)
    }

    #[tokio::test]
    async fn roster_tracks_connects_and_disconnects() {
        let (cx, _tap, _rx) = cx_with_tap();
        let mut world = ChatWorld::new();

        world.update(WorldMsg::Connected(sid("alice@a", "s1")), &cx);
        world.update(WorldMsg::Connected(sid("alice@a", "s2")), &cx);
        world.update(WorldMsg::Connected(sid("bob@b", "s3")), &cx);
        assert_eq!(world.roster_sessions("alice@a"), 2);
        assert_eq!(world.roster_sessions("bob@b"), 1);

        world.update(WorldMsg::Disconnected(sid("alice@a", "s1")), &cx);
        assert_eq!(world.roster_sessions("alice@a"), 1);
        world.update(WorldMsg::Disconnected(sid("alice@a", "s2")), &cx);
        assert_eq!(world.roster_sessions("alice@a"), 0);
        // Reconnect after full removal works.
        world.update(WorldMsg::Connected(sid("alice@a", "s4")), &cx);
        assert_eq!(world.roster_sessions("alice@a"), 1);
    }

    #[tokio::test]
    async fn names_lists_one_nick_per_login_sorted() {
        let (cx, mut tap, _rx) = cx_with_tap();
        let mut world = ChatWorld::new();
        world.update(WorldMsg::Connected(sid("bob@b", "s1")), &cx);
        world.update(WorldMsg::Connected(sid("alice@a", "s2")), &cx);
        // Same nick on a second domain is a distinct login and lists again.
        world.update(WorldMsg::Connected(sid("alice@b", "s3")), &cx);

        let requestor = sid("alice@a", "s2");
        world.update(
            WorldMsg::Names {
                requestor: requestor.clone(),
            },
            &cx,
        );

        loop {
            match tap.next().await.expect("event") {
                Event::Names(reply) => {
                    assert_eq!(reply.requestor, requestor);
                    assert_eq!(reply.names, vec!["alice", "alice", "bob"]);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn whois_exact_match_lists_sessions_without_age() {
        let (cx, mut tap, _rx) = cx_with_tap();
        let mut world = ChatWorld::new();
        world.update(WorldMsg::Connected(sid("alice@a", "s1")), &cx);

        world.update(
            WorldMsg::Whois {
                requestor: sid("bob@b", "s9"),
                user: "alice@a".to_string(),
            },
            &cx,
        );

        loop {
            match tap.next().await.expect("event") {
                Event::Whois(reply) => {
                    assert_eq!(reply.results, vec!["alice@a s1"]);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn whois_prefix_match_includes_age() {
        let (cx, mut tap, _rx) = cx_with_tap();
        let mut world = ChatWorld::new();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        world.update(WorldMsg::Tick(t0), &cx);
        world.update(WorldMsg::Connected(sid("alice@a", "s1")), &cx);
        world.update(WorldMsg::Tick(t0 + chrono::Duration::seconds(90)), &cx);

        world.update(
            WorldMsg::Whois {
                requestor: sid("bob@b", "s9"),
                user: "ali".to_string(),
            },
            &cx,
        );

        loop {
            match tap.next().await.expect("event") {
                Event::Whois(reply) => {
                    assert_eq!(reply.results, vec!["alice@a s1 (2 m)"]);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[test]
    fn age_formatting_thresholds() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let ago = |secs: i64| now - chrono::Duration::seconds(secs);
        assert_eq!(format_age(now, now), "0 s");
        assert_eq!(format_age(ago(30), now), "30 s");
        assert_eq!(format_age(ago(120), now), "2 m");
        assert_eq!(format_age(ago(3 * 3600), now), "3 h");
        assert_eq!(format_age(ago(2 * 86_400), now), "2 d");
        assert_eq!(format_age(ago(21 * 86_400), now), "3 w");
    }

    #[test]
    fn nick_strips_domain() {
        assert_eq!(nick_from_login("alice@example.com"), "alice");
        assert_eq!(nick_from_login("plain"), "plain");
    }
}
