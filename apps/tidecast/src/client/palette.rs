//! The `/`-leader command palette for the chat client.

use std::fmt::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdId {
    Help,
    Exit,
    Names,
    Whois,
    Quiet,
    Timestamp,
    Debug,
    Flood,
    Fall,
}

pub struct CmdSpec {
    pub id: CmdId,
    /// Usage line; the first word is the command name.
    pub usage: &'static str,
    pub short: &'static str,
    pub aliases: &'static [&'static str],
    pub hidden: bool,
}

impl CmdSpec {
    fn name(&self) -> &'static str {
        self.usage.split(' ').next().unwrap_or(self.usage)
    }
}

pub struct Palette {
    leader: char,
    cmds: Vec<CmdSpec>,
    pub show_hidden: bool,
}

impl Default for Palette {
    fn default() -> Self {
        Self::new()
    }
}

impl Palette {
    pub fn new() -> Self {
        Self {
            leader: '/',
            cmds: vec![
                CmdSpec {
                    id: CmdId::Help,
                    usage: "help",
                    short: "",
                    aliases: &[],
                    hidden: false,
                },
                CmdSpec {
                    id: CmdId::Exit,
                    usage: "exit",
                    short: "Exit the chat, ctrl+c will also exit",
                    aliases: &["quit", "q"],
                    hidden: false,
                },
                CmdSpec {
                    id: CmdId::Names,
                    usage: "names",
                    short: "List users who are connected.",
                    aliases: &[],
                    hidden: false,
                },
                CmdSpec {
                    id: CmdId::Whois,
                    usage: "whois <USER>",
                    short: "Information about USER",
                    aliases: &[],
                    hidden: false,
                },
                CmdSpec {
                    id: CmdId::Quiet,
                    usage: "quiet",
                    short: "Toggle system announcements.",
                    aliases: &[],
                    hidden: false,
                },
                CmdSpec {
                    id: CmdId::Timestamp,
                    usage: "timestamp",
                    short: "Toggle chat timestamps.",
                    aliases: &[],
                    hidden: false,
                },
                CmdSpec {
                    id: CmdId::Debug,
                    usage: "debug",
                    short: "Toggle debugging mode.",
                    aliases: &[],
                    hidden: true,
                },
                CmdSpec {
                    id: CmdId::Flood,
                    usage: "flood <INT>",
                    short: "Send <INT> numbered messages in a loop",
                    aliases: &[],
                    hidden: true,
                },
                CmdSpec {
                    id: CmdId::Fall,
                    usage: "fall [coop|free|reset|level <INT>|debug|exit]",
                    short: "Start/Join the shared falling-block game.",
                    aliases: &[],
                    hidden: false,
                },
            ],
            show_hidden: false,
        }
    }

    pub fn find(&self, word: &str) -> Option<CmdId> {
        self.cmds
            .iter()
            .find(|c| c.name() == word || c.aliases.contains(&word))
            .map(|c| c.id)
    }

    /// Palette suggestions for an empty leader, visible commands only.
    pub fn suggestions(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .cmds
            .iter()
            .filter(|c| !c.hidden)
            .map(|c| format!("{}{}", self.leader, c.name()))
            .collect();
        out.sort();
        out
    }

    pub fn usage(&self) -> String {
        let mut b = String::from(
            "Type out a message and press <enter> or use a command\n\n-> Available commands:\n",
        );
        self.usage_section(&mut b, false);
        if self.show_hidden {
            b.push_str("\n-> Hidden commands:\n");
            self.usage_section(&mut b, true);
        }
        b
    }

    fn usage_section(&self, b: &mut String, hidden: bool) {
        let mut cmds: Vec<&CmdSpec> = self
            .cmds
            .iter()
            .filter(|c| c.hidden == hidden && c.id != CmdId::Help)
            .collect();
        cmds.sort_by_key(|c| c.name());
        for cmd in cmds {
            let _ = write!(b, "{}{:<42} - {}", self.leader, cmd.usage, cmd.short);
            if !cmd.aliases.is_empty() {
                let _ = write!(b, " (aliases: {})", cmd.aliases.join(", "));
            }
            b.push('\n');
        }
    }
}

/// Shown for `/help` while in the game.
pub fn game_help() -> &'static str {
    "Each player controls a single piece. Pieces don't collide until they are\n\
     locked into the board, so they can be woven together mid-air.\n\
     In co-op mode everyone steers one piece; inputs merge by vote.\n\
     \n\
         [ d ]  [ f ]   [ g ]     [ j ]  [ k ]\n\
        ←move    move→  soft↓     ↶ CCW   CW ↷\n\
     \n\
                  [__ space __]\n\
                  ⤓ hard drop ⤓\n\
     \n\
     -> Available commands:\n\
     /exit                      - Leave the game\n\
     /fall reset                - Reset the board\n\
     /fall coop | free          - Switch input mode\n\
     /fall level <INT>          - Set the game level (speed)\n\
     /fall debug                - Toggle debugging mode"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_commands_and_aliases() {
        let palette = Palette::new();
        assert_eq!(palette.find("names"), Some(CmdId::Names));
        assert_eq!(palette.find("exit"), Some(CmdId::Exit));
        assert_eq!(palette.find("q"), Some(CmdId::Exit));
        assert_eq!(palette.find("nope"), None);
    }

    #[test]
    fn usage_hides_hidden_commands_by_default() {
        let mut palette = Palette::new();
        let usage = palette.usage();
        assert!(usage.contains("/names"));
        assert!(usage.contains("aliases: quit, q"));
        assert!(!usage.contains("/flood"));

        palette.show_hidden = true;
        assert!(palette.usage().contains("/flood"));
    }

    #[test]
    fn suggestions_are_sorted_and_visible_only() {
        let palette = Palette::new();
        let suggestions = palette.suggestions();
        assert!(suggestions.contains(&"/names".to_string()));
        assert!(!suggestions.contains(&"/debug".to_string()));
        let mut sorted = suggestions.clone();
        sorted.sort();
        assert_eq!(suggestions, sorted);
    }
}
