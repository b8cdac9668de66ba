//! The per-session chat UI model: a ring of recent chat lines, a one-line
//! command input, and an optional shared game board overlay. Renders to a
//! plain string; layout widgets and styling stay in the transport layer.

pub mod palette;

use std::sync::Arc;

use chrono::Utc;
use ringcast::Ring;
use tracing::warn;

use crate::message::{Event, Record, SessionId, WorldMsg};
use crate::program::client::{ClientCx, ClientError, ClientModel, ClientMsg, Key};
use crate::session::ClientInfo;
use crate::world::chat::{ChatMsg, SYS_NICK};
use crate::world::stackfall::{GameMode, GameReq, PieceCmd};

use palette::{game_help, CmdId, Palette};

/// Chat lines kept per session.
pub const CHAT_HISTORY: usize = 300;

struct ChatLine {
    msg: ChatMsg,
    nick: String,
}

/// Bounded chat backlog with the widest-nick measurement the view needs to
/// right-align the nick column.
struct ChatHistory {
    lines: Ring<ChatLine>,
    nick_width: usize,
}

impl ChatHistory {
    fn new(capacity: usize) -> Self {
        Self {
            lines: Ring::new(capacity),
            nick_width: 0,
        }
    }

    fn push(&mut self, msg: ChatMsg) {
        let nick = msg.nick().to_string();
        self.lines.push(ChatLine { msg, nick });
        self.nick_width = self
            .lines
            .iter()
            .map(|l| l.nick.chars().count())
            .max()
            .unwrap_or(0);
    }

    fn recent(&self, n: usize) -> impl Iterator<Item = &ChatLine> {
        self.lines.iter_recent(n)
    }

    fn len(&self) -> usize {
        self.lines.len()
    }
}

/// Minimal one-line editor for the command input.
struct LineEdit {
    prompt: String,
    placeholder: String,
    value: String,
    focused: bool,
}

impl LineEdit {
    fn new() -> Self {
        Self {
            prompt: "> ".to_string(),
            placeholder: "/help".to_string(),
            value: String::new(),
            focused: true,
        }
    }

    fn insert(&mut self, c: char) {
        self.value.push(c);
    }

    fn backspace(&mut self) {
        self.value.pop();
    }

    fn take(&mut self) -> String {
        std::mem::take(&mut self.value)
    }

    fn focus(&mut self) {
        self.focused = true;
    }

    fn blur(&mut self) {
        self.focused = false;
    }

    fn focused(&self) -> bool {
        self.focused
    }

    fn view(&self) -> String {
        if self.value.is_empty() {
            format!("{}{}", self.prompt, self.placeholder)
        } else {
            format!("{}{}", self.prompt, self.value)
        }
    }
}

pub struct ChatClient {
    info: ClientInfo,
    engine_ready: bool,
    history: ChatHistory,
    input: LineEdit,
    palette: Palette,
    board: Option<Arc<str>>,
    in_game: bool,
    quiet: bool,
    show_timestamp: bool,
    debug: bool,
    err: Option<ClientError>,
}

impl ChatClient {
    pub fn new(info: ClientInfo) -> Self {
        Self {
            info,
            engine_ready: false,
            history: ChatHistory::new(CHAT_HISTORY),
            input: LineEdit::new(),
            palette: Palette::new(),
            board: None,
            in_game: false,
            quiet: false,
            show_timestamp: false,
            debug: false,
            err: None,
        }
    }

    fn push_info(&mut self, text: String) {
        self.history.push(ChatMsg::info(self.info.time, text));
    }

    fn fatal(&mut self, err: ClientError, cx: &mut ClientCx) {
        warn!(
            target = "client::chat",
            id = %self.id(),
            error = %err,
            "client fatal"
        );
        self.err = Some(err);
        cx.quit();
    }

    fn apply_event(&mut self, ev: Event, cx: &mut ClientCx) {
        match ev {
            Event::Tick(t) => self.info.time = t,

            Event::Record(Record::Chat(msg)) => {
                if self.quiet && msg.who == SYS_NICK {
                    return;
                }
                self.history.push(msg);
            }

            Event::Names(reply) => {
                if reply.requestor == self.id() {
                    let line = format!(
                        "-> {} connected: {}",
                        reply.names.len(),
                        reply.names.join(", ")
                    );
                    self.history.push(ChatMsg::system(self.info.time, line));
                }
            }

            Event::Whois(reply) => {
                if reply.requestor == self.id() {
                    if reply.results.is_empty() {
                        self.push_info("user not found".to_string());
                    } else {
                        self.push_info(format!("\n{}", reply.results.join("\n")));
                    }
                }
            }

            Event::Board(view) => self.board = view,

            Event::Connected(_) | Event::Disconnected(_) => {}

            Event::Shutdown(reason) => self.fatal(ClientError::Shutdown(reason), cx),
        }
    }

    fn handle_key(&mut self, key: Key, cx: &mut ClientCx) {
        match key {
            Key::CtrlC => cx.quit(),
            Key::Enter => self.execute_command_line(cx),
            Key::Esc => {
                if self.in_game {
                    self.input.blur();
                }
            }
            Key::Backspace => {
                if self.input.focused() {
                    self.input.backspace();
                }
            }
            Key::Char(c) => {
                if self.in_game && !self.input.focused() {
                    if c == '/' {
                        self.input.focus();
                    } else if let Some(cmd) = PieceCmd::from_key(c) {
                        cx.send(WorldMsg::Game(GameReq::Input {
                            player: self.id(),
                            cmd,
                        }));
                    }
                } else if self.input.focused() {
                    self.input.insert(c);
                }
            }
        }
    }

    fn execute_command_line(&mut self, cx: &mut ClientCx) {
        if !self.input.focused() {
            return;
        }
        let value = self.input.take();
        if self.in_game {
            self.input.blur();
        }
        if value.is_empty() {
            return;
        }

        if !value.starts_with('/') {
            self.send_chat(&value, cx);
            return;
        }

        // Echo the command into the local backlog like a sent line.
        self.history.push(ChatMsg::user(
            self.info.time,
            &self.info.login,
            &self.info.remote,
            &value,
        ));

        let mut parts = value[1..].split_whitespace();
        let Some(word) = parts.next() else { return };
        let args: Vec<&str> = parts.collect();
        match self.palette.find(word) {
            Some(id) => self.run_command(id, &args, cx),
            None => self.push_info(format!("unknown command: /{word}")),
        }
    }

    fn send_chat(&mut self, text: &str, cx: &mut ClientCx) {
        if !self.engine_ready {
            return;
        }
        cx.send(WorldMsg::Chat(ChatMsg::user(
            Utc::now(),
            &self.info.login,
            &self.info.remote,
            text,
        )));
    }

    fn run_command(&mut self, cmd: CmdId, args: &[&str], cx: &mut ClientCx) {
        match cmd {
            CmdId::Help => {
                let text = if self.in_game {
                    game_help().to_string()
                } else {
                    self.palette.usage()
                };
                self.history.push(ChatMsg::help(self.info.time, text));
            }

            CmdId::Exit => {
                if self.in_game {
                    self.leave_game(cx);
                } else {
                    cx.quit();
                }
            }

            CmdId::Names => cx.send(WorldMsg::Names {
                requestor: self.id(),
            }),

            CmdId::Whois => match args.first() {
                Some(user) => cx.send(WorldMsg::Whois {
                    requestor: self.id(),
                    user: user.to_string(),
                }),
                None => self.push_info("argument required: /whois <USER>".to_string()),
            },

            CmdId::Quiet => {
                self.quiet = !self.quiet;
                self.push_info(format!("Quiet mode toggled {}", toggle_label(self.quiet)));
            }

            CmdId::Timestamp => {
                self.show_timestamp = !self.show_timestamp;
                self.push_info(format!(
                    "Timestamp is toggled {}",
                    toggle_label(self.show_timestamp)
                ));
            }

            CmdId::Debug => {
                self.debug = !self.debug;
                self.palette.show_hidden = self.debug;
                self.push_info(format!("Debug is toggled {}", toggle_label(self.debug)));
            }

            CmdId::Flood => match args.first().and_then(|s| s.parse::<u32>().ok()) {
                Some(n) => {
                    for v in 0..n {
                        cx.send(WorldMsg::Chat(ChatMsg::user(
                            Utc::now(),
                            &self.info.login,
                            &self.info.remote,
                            &v.to_string(),
                        )));
                    }
                }
                None => self.push_info("argument required: /flood <INT>".to_string()),
            },

            CmdId::Fall => self.run_fall(args, cx),
        }
    }

    fn run_fall(&mut self, args: &[&str], cx: &mut ClientCx) {
        match args.first().copied() {
            None => {
                if self.in_game {
                    return;
                }
                self.in_game = true;
                self.input.prompt = "stackfall> ".to_string();
                self.input.placeholder = "/ to open the command line".to_string();
                self.input.blur();
                cx.send(WorldMsg::Game(GameReq::Join(self.id())));
            }
            Some("exit") => self.leave_game(cx),
            Some("reset") => cx.send(WorldMsg::Game(GameReq::Reset { level: 0 })),
            Some("level") => match args.get(1).and_then(|s| s.parse::<u8>().ok()) {
                Some(level) => cx.send(WorldMsg::Game(GameReq::Reset { level })),
                None => self.history.push(ChatMsg::error(
                    self.info.time,
                    "usage: /fall level <INT>".to_string(),
                )),
            },
            Some("coop") => cx.send(WorldMsg::Game(GameReq::SetMode(GameMode::Coop))),
            Some("free") => cx.send(WorldMsg::Game(GameReq::SetMode(GameMode::Free))),
            Some("debug") => cx.send(WorldMsg::Game(GameReq::ToggleDebug)),
            Some(other) => self.push_info(format!("unknown: /fall {other}")),
        }
    }

    fn leave_game(&mut self, cx: &mut ClientCx) {
        if !self.in_game {
            return;
        }
        self.in_game = false;
        self.input.prompt = "> ".to_string();
        self.input.placeholder = String::new();
        self.input.focus();
        cx.send(WorldMsg::Game(GameReq::Leave(self.id())));
    }
}

impl ClientModel for ChatClient {
    fn id(&self) -> SessionId {
        self.info.id()
    }

    fn update(&mut self, msg: ClientMsg, cx: &mut ClientCx) {
        match msg {
            ClientMsg::Engine(_) => self.engine_ready = true,

            ClientMsg::Bootstrap(records) => {
                for rec in records {
                    let Record::Chat(msg) = rec;
                    self.history.push(msg);
                }
            }

            ClientMsg::Batch(items) => {
                for item in items {
                    match item {
                        Ok(ev) => self.apply_event(ev, cx),
                        Err(err) => {
                            self.fatal(ClientError::Bus(err), cx);
                            return;
                        }
                    }
                }
            }

            ClientMsg::Key(key) => self.handle_key(key, cx),

            ClientMsg::Resize { cols, rows } => {
                self.info.cols = cols;
                self.info.rows = rows;
            }
        }
    }

    fn view(&mut self) -> String {
        let nick_width = self.history.nick_width;
        let rows = self.info.rows as usize;
        let board_lines = self
            .board
            .as_ref()
            .map(|b| b.lines().count() + 1)
            .unwrap_or(0);
        let reserved = board_lines + crate::session::FOOTER_LINES + 1;
        let visible = rows.saturating_sub(reserved).max(1);

        let mut out = String::new();
        for line in self.history.recent(visible) {
            if self.debug {
                let id = line
                    .msg
                    .rec_id
                    .map(|id| id.to_string())
                    .unwrap_or_default();
                out.push_str(&format!("{id:>4} "));
            }
            if self.show_timestamp {
                match line.msg.at {
                    Some(t) => out.push_str(&t.format("%H:%M:%S ").to_string()),
                    None => out.push_str("         "),
                }
            }
            out.push_str(&format!(
                "{:>nick_width$} │ {}\n",
                line.nick, line.msg.text
            ));
        }
        if let Some(board) = &self.board {
            out.push_str(board);
            out.push('\n');
        }
        out.push_str(&self.info.footer());
        out.push_str(&self.input.view());
        out
    }

    fn err(&self) -> Option<ClientError> {
        self.err.clone()
    }
}

fn toggle_label(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}
