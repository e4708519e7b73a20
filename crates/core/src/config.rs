use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        None => default,
    }
}

/// Process-wide runtime settings, set once at startup and shared via `Arc`.
///
/// `operator` feeds `:operator` SQL substitution, the `{{.operator}}`
/// template token, and the `operator` filter token. `allow_exec` gates both
/// exec-typed sources and exec custom actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Operator identity (defaults to `$USER`).
    pub operator: String,
    /// Whether exec sources and exec actions may run at all.
    pub allow_exec: bool,
    /// Directory for the schedule runner's persisted state.
    pub state_dir: Option<PathBuf>,
    /// Scheduler tick interval in seconds.
    pub tick_interval_secs: u64,
}

impl RuntimeConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            operator: env_or("LIVEMARK_OPERATOR", &env_or("USER", "")),
            allow_exec: env_bool("LIVEMARK_ALLOW_EXEC", false),
            state_dir: env_opt("LIVEMARK_STATE_DIR").map(PathBuf::from),
            tick_interval_secs: env_opt("LIVEMARK_TICK_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  operator:   {}",
            if self.operator.is_empty() { "(none)" } else { self.operator.as_str() }
        );
        tracing::info!("  allow_exec: {}", self.allow_exec);
        tracing::info!(
            "  state_dir:  {}",
            self.state_dir
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        );
        tracing::info!("  tick:       {}s", self.tick_interval_secs);
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            operator: String::new(),
            allow_exec: false,
            state_dir: None,
            tick_interval_secs: 60,
        }
    }
}
