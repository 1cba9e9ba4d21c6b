//! Layered kernel configuration.
//!
//! Follows the same defaults-then-merge shape used for the notebook-runner's
//! keybinding config: a fully-populated [`Config`] is built from defaults,
//! optionally overlaid by a `Gokernel.toml` file, and finally by environment
//! variables. Every field has a sensible default so a kernel with no config
//! file at all still starts.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, Result};

/// Fully resolved kernel configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Automatically run `go get` for unresolved imports after auto-import.
    pub auto_get: bool,
    /// Prefix identifying memorized functions that stand in for `func init()`.
    pub init_prefix: String,
    /// Binary name for the external language server (e.g. `gopls`).
    pub lsp_binary: String,
    /// Binary name for the target compiler (e.g. `go`).
    pub compiler_binary: String,
    /// Binary name for the auto-import tool (e.g. `goimports`).
    pub autoimport_binary: String,
    /// Timeout for a single language-server RPC.
    pub lsp_call_timeout: Duration,
    /// Timeout for the language server's initial connect.
    pub lsp_connect_timeout: Duration,
    /// Timeout for the language server process to start listening.
    pub lsp_start_timeout: Duration,
    /// Lines of context shown around a compiler diagnostic.
    pub diagnostic_context_lines: usize,
    /// Delay before the multiplexer offers a front-end input prompt.
    pub input_prompt_delay: Duration,
    /// Widget heartbeat round-trip timeout.
    pub heartbeat_timeout: Duration,
    /// Elapsed time since the last widget message before a heartbeat is sent
    /// proactively on shim reinstall.
    pub heartbeat_staleness_threshold: Duration,
    /// Timeout for installing the widget comm channel.
    pub widget_install_timeout: Duration,
    /// Depth of the buffered channel for widget messages delivered to a cell.
    pub widget_channel_capacity: usize,
    /// Keep the scratch workspace directory around after a failed compile,
    /// for post-mortem inspection.
    pub preserve_workspace_on_error: bool,
    /// Poll interval used while probing for the language-server socket.
    pub lsp_poll_interval: Duration,
    /// Interval between file-tracker manifest rescans.
    pub tracker_rescan_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_get: true,
            init_prefix: "init_".to_string(),
            lsp_binary: "gopls".to_string(),
            compiler_binary: "go".to_string(),
            autoimport_binary: "goimports".to_string(),
            lsp_call_timeout: Duration::from_secs(2),
            lsp_connect_timeout: Duration::from_secs(2),
            lsp_start_timeout: Duration::from_secs(5),
            diagnostic_context_lines: 3,
            input_prompt_delay: Duration::from_millis(300),
            heartbeat_timeout: Duration::from_millis(500),
            heartbeat_staleness_threshold: Duration::from_secs(10),
            widget_install_timeout: Duration::from_secs(3),
            widget_channel_capacity: 64,
            preserve_workspace_on_error: false,
            lsp_poll_interval: Duration::from_millis(50),
            tracker_rescan_interval: Duration::from_secs(2),
        }
    }
}

/// Field-level override layer, deserialized from `Gokernel.toml`.
///
/// Every field is optional so a partial file only overrides what it
/// mentions; unset fields fall through to the previous layer.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PartialConfig {
    pub auto_get: Option<bool>,
    pub init_prefix: Option<String>,
    pub lsp_binary: Option<String>,
    pub compiler_binary: Option<String>,
    pub autoimport_binary: Option<String>,
    pub lsp_call_timeout_ms: Option<u64>,
    pub lsp_connect_timeout_ms: Option<u64>,
    pub lsp_start_timeout_ms: Option<u64>,
    pub diagnostic_context_lines: Option<usize>,
    pub input_prompt_delay_ms: Option<u64>,
    pub heartbeat_timeout_ms: Option<u64>,
    pub heartbeat_staleness_threshold_ms: Option<u64>,
    pub widget_install_timeout_ms: Option<u64>,
    pub widget_channel_capacity: Option<usize>,
    pub preserve_workspace_on_error: Option<bool>,
}

impl Config {
    /// Merge a partial override layer in place.
    pub fn merge(&mut self, partial: PartialConfig) {
        if let Some(v) = partial.auto_get {
            self.auto_get = v;
        }
        if let Some(v) = partial.init_prefix {
            self.init_prefix = v;
        }
        if let Some(v) = partial.lsp_binary {
            self.lsp_binary = v;
        }
        if let Some(v) = partial.compiler_binary {
            self.compiler_binary = v;
        }
        if let Some(v) = partial.autoimport_binary {
            self.autoimport_binary = v;
        }
        if let Some(v) = partial.lsp_call_timeout_ms {
            self.lsp_call_timeout = Duration::from_millis(v);
        }
        if let Some(v) = partial.lsp_connect_timeout_ms {
            self.lsp_connect_timeout = Duration::from_millis(v);
        }
        if let Some(v) = partial.lsp_start_timeout_ms {
            self.lsp_start_timeout = Duration::from_millis(v);
        }
        if let Some(v) = partial.diagnostic_context_lines {
            self.diagnostic_context_lines = v;
        }
        if let Some(v) = partial.input_prompt_delay_ms {
            self.input_prompt_delay = Duration::from_millis(v);
        }
        if let Some(v) = partial.heartbeat_timeout_ms {
            self.heartbeat_timeout = Duration::from_millis(v);
        }
        if let Some(v) = partial.heartbeat_staleness_threshold_ms {
            self.heartbeat_staleness_threshold = Duration::from_millis(v);
        }
        if let Some(v) = partial.widget_install_timeout_ms {
            self.widget_install_timeout = Duration::from_millis(v);
        }
        if let Some(v) = partial.widget_channel_capacity {
            self.widget_channel_capacity = v;
        }
        if let Some(v) = partial.preserve_workspace_on_error {
            self.preserve_workspace_on_error = v;
        }
    }

    fn merge_file(&mut self, path: &std::path::Path) -> Result<()> {
        if let Ok(text) = std::fs::read_to_string(path) {
            let partial: PartialConfig = toml::from_str(&text)?;
            self.merge(partial);
        }
        Ok(())
    }

    /// Resolve the config directory for this platform, erroring rather than
    /// silently skipping the layer, since callers that ask for it intend to
    /// write there (`--install` needs the same root).
    pub fn config_dir() -> Result<PathBuf> {
        dirs_config_dir().ok_or(ConfigError::NoConfigDir).map_err(Into::into)
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs_config_dir().map(|dir| dir.join("gokernel").join("Gokernel.toml"))
    }

    fn local_config_path() -> PathBuf {
        PathBuf::from("Gokernel.toml")
    }

    /// Build the effective config: defaults, then global file, then local
    /// file (working-directory override), then environment variables.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(global) = Self::global_config_path() {
            config.merge_file(&global)?;
        }
        config.merge_file(&Self::local_config_path())?;
        config.merge_env();

        Ok(config)
    }

    fn merge_env(&mut self) {
        if let Ok(v) = std::env::var("GOKERNEL_AUTO_GET") {
            self.auto_get = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Ok(v) = std::env::var("GOKERNEL_INIT_PREFIX") {
            self.init_prefix = v;
        }
        if let Ok(v) = std::env::var("GOKERNEL_LSP_BINARY") {
            self.lsp_binary = v;
        }
    }
}

fn dirs_config_dir() -> Option<PathBuf> {
    dirs::config_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert!(config.auto_get);
        assert_eq!(config.init_prefix, "init_");
        assert_eq!(config.diagnostic_context_lines, 3);
    }

    #[test]
    fn merge_overrides_only_set_fields() {
        let mut config = Config::default();
        let partial = PartialConfig {
            init_prefix: Some("boot_".to_string()),
            ..Default::default()
        };
        config.merge(partial);
        assert_eq!(config.init_prefix, "boot_");
        assert!(config.auto_get, "unset fields must not be touched");
    }

    #[test]
    fn partial_config_round_trips_through_toml() {
        let partial = PartialConfig {
            auto_get: Some(false),
            diagnostic_context_lines: Some(5),
            ..Default::default()
        };
        let text = toml::to_string(&partial).unwrap();
        let back: PartialConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.auto_get, Some(false));
        assert_eq!(back.diagnostic_context_lines, Some(5));
    }
}
