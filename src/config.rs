//! Layered configuration: built-in defaults, optional TOML file, environment
//! overrides for the handful of values worth tuning without a file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Minimum pane size the PTY manager will honor (see §4.4 of the spec).
pub const MIN_COLS: u16 = 10;
pub const MIN_ROWS: u16 = 5;

/// Tunables for the PTY session manager, tmux controller, and bootstrap
/// hydration pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default PTY column count for newly spawned sessions.
    pub default_cols: u16,
    /// Default PTY row count for newly spawned sessions.
    pub default_rows: u16,
    /// Shell override; falls back to `$SHELL` then a hardcoded chain.
    pub shell_override: Option<String>,
    /// tmux binary path override; defaults to `tmux` on `$PATH`.
    pub tmux_binary: String,
    /// In-band `%begin`/`%end` transaction timeout, in milliseconds.
    pub transaction_timeout_ms: u64,
    /// Bootstrap buffer flush deadline, in milliseconds.
    pub bootstrap_flush_deadline_ms: u64,
    /// Bootstrap buffer cap, in bytes.
    pub bootstrap_buffer_cap_bytes: usize,
    /// Retries waiting for `socket_path` to become known before an
    /// out-of-band capture, spaced `socket_wait_backoff_ms` apart.
    pub socket_wait_retries: u32,
    pub socket_wait_backoff_ms: u64,
    /// Retries for an out-of-band capture that returned empty, spaced
    /// `capture_retry_backoff_ms` apart.
    pub capture_retries: u32,
    pub capture_retry_backoff_ms: u64,
    /// Soft cap on the per-pane history replay cache, in bytes.
    pub pane_history_cache_cap_bytes: usize,
    /// Shell probe timeout, in milliseconds (§6 shell-probe protocol).
    pub shell_probe_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_cols: 120,
            default_rows: 35,
            shell_override: None,
            tmux_binary: "tmux".to_string(),
            transaction_timeout_ms: 5_000,
            bootstrap_flush_deadline_ms: 15_000,
            bootstrap_buffer_cap_bytes: 512 * 1024,
            socket_wait_retries: 10,
            socket_wait_backoff_ms: 150,
            capture_retries: 4,
            capture_retry_backoff_ms: 250,
            pane_history_cache_cap_bytes: 2 * 1024 * 1024,
            shell_probe_timeout_ms: 2_200,
        }
    }
}

impl Config {
    /// Build the effective configuration: defaults, then an optional TOML
    /// file at the platform config dir, then environment overrides.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(path) = Self::config_file_path()
            && let Ok(contents) = std::fs::read_to_string(&path)
        {
            match toml::from_str::<Config>(&contents) {
                Ok(parsed) => config = parsed,
                Err(e) => {
                    log::warn!("failed to parse config at {}: {}", path.display(), e);
                }
            }
        }

        config.apply_env_overrides();
        config.clamp();
        config
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tmux-core").join("config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(shell) = std::env::var("TMUX_CORE_SHELL") {
            self.shell_override = Some(shell);
        }
        if let Ok(tmux) = std::env::var("TMUX_CORE_TMUX_BIN") {
            self.tmux_binary = tmux;
        }
    }

    /// Clamp out-of-range values to the spec's documented minimums rather
    /// than rejecting them, matching §4.4's size-clamping behavior.
    fn clamp(&mut self) {
        self.default_cols = self.default_cols.max(MIN_COLS);
        self.default_rows = self.default_rows.max(MIN_ROWS);
        self.transaction_timeout_ms = self.transaction_timeout_ms.max(1);
        self.bootstrap_flush_deadline_ms = self.bootstrap_flush_deadline_ms.max(1);
        self.bootstrap_buffer_cap_bytes = self.bootstrap_buffer_cap_bytes.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_numbers() {
        let c = Config::default();
        assert_eq!(c.default_cols, 120);
        assert_eq!(c.default_rows, 35);
        assert_eq!(c.transaction_timeout_ms, 5_000);
        assert_eq!(c.bootstrap_flush_deadline_ms, 15_000);
        assert_eq!(c.bootstrap_buffer_cap_bytes, 512 * 1024);
        assert_eq!(c.pane_history_cache_cap_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn clamp_rejects_undersized_values() {
        let mut c = Config {
            default_cols: 0,
            default_rows: 0,
            ..Config::default()
        };
        c.clamp();
        assert_eq!(c.default_cols, MIN_COLS);
        assert_eq!(c.default_rows, MIN_ROWS);
    }
}
