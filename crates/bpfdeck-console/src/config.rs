use bpfdeck_client::SyncConfig;
use bpfdeck_core::{DEFAULT_PIN_ROOT, MAX_CHART_WINDOW};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";
pub const HISTORY_DB_FILE: &str = "history.sqlite";
pub const LOG_FILE: &str = "bpfdeck.log";

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Base URL of the control API.
    #[arg(long, env = "BPFDECK_SERVER", default_value = DEFAULT_SERVER, global = true)]
    pub server: String,
    #[arg(long, env = "BPFDECK_POLL_INTERVAL_MS", default_value_t = 2000, global = true)]
    pub poll_interval_ms: u64,
    #[arg(long, env = "BPFDECK_CHART_WINDOW", default_value_t = 15, global = true)]
    pub chart_window: usize,
    /// Directory derived pin paths are placed under.
    #[arg(long, env = "BPFDECK_PIN_ROOT", default_value = DEFAULT_PIN_ROOT, global = true)]
    pub pin_root: String,
    #[arg(long, default_value_t = 10, global = true)]
    pub request_timeout_secs: u64,
    /// Where stream history, dumps and the log file live.
    #[arg(long, env = "BPFDECK_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: String,
    pub pin_root: String,
    pub poll_interval: Duration,
    pub chart_window: usize,
    pub request_timeout: Duration,
    pub state_dir: PathBuf,
    pub debug: bool,
}

impl Config {
    pub fn from_args(args: &GlobalArgs) -> Self {
        Self {
            server: args.server.trim().trim_end_matches('/').to_string(),
            pin_root: args.pin_root.trim().trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(args.poll_interval_ms.max(100)),
            chart_window: args.chart_window.clamp(1, MAX_CHART_WINDOW),
            request_timeout: Duration::from_secs(args.request_timeout_secs.max(1)),
            state_dir: args.state_dir.clone().unwrap_or_else(resolve_state_dir),
            debug: args.debug,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: self.poll_interval,
            chart_window: self.chart_window,
        }
    }

    pub fn history_db_path(&self) -> PathBuf {
        self.state_dir.join(HISTORY_DB_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join(LOG_FILE)
    }

    pub fn log_level(&self) -> String {
        if self.debug {
            return "debug".to_string();
        }
        std::env::var("BPFDECK_LOG_LEVEL")
            .ok()
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| "info".to_string())
    }
}

pub fn resolve_state_dir() -> PathBuf {
    if let Ok(value) = std::env::var("XDG_STATE_HOME") {
        if !value.trim().is_empty() {
            return PathBuf::from(value).join("bpfdeck");
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        if !home.trim().is_empty() {
            return PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("bpfdeck");
        }
    }
    PathBuf::from(".bpfdeck").join("state")
}
