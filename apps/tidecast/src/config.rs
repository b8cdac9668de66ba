use std::env;
use std::path::PathBuf;

/// Server configuration: CLI flags override environment variables, which
/// override the defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the WebSocket terminal listener binds.
    pub listen: String,
    /// Path of the append-only event log.
    pub store_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let listen =
            env::var("TIDECAST_LISTEN").unwrap_or_else(|_| "127.0.0.1:8089".to_string());
        let store_path = env::var("TIDECAST_STORE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("tidecast.events.jsonl"));
        Self { listen, store_path }
    }

    pub fn apply(mut self, listen: Option<String>, store_path: Option<PathBuf>) -> Self {
        if let Some(listen) = listen {
            self.listen = listen;
        }
        if let Some(store_path) = store_path {
            self.store_path = store_path;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8089".to_string(),
            store_path: PathBuf::from("tidecast.events.jsonl"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let config = Config::default().apply(Some("0.0.0.0:9000".to_string()), None);
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.store_path, PathBuf::from("tidecast.events.jsonl"));
    }
}
