// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk daemon configuration: listener bindings and auth tokens,
//! escalation policy, and merge strategy. Loaded once at startup and
//! rewritten atomically by `rotate_token`.

use nanoid::nanoid;
use relay_core::EscalationConfig;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One WebSocket bind address plus the token clients must present to
/// authenticate on it. Multiple listeners let the daemon serve, say, a
/// loopback-only admin port alongside a LAN-facing one with its own token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub listeners: Vec<ListenerConfig>,
    #[serde(default)]
    pub escalation: EscalationConfig,
    /// Root directory the CLI writes per-project JSONL conversation logs
    /// under. `None` defers to [`crate::env::logs_root`]'s own default.
    #[serde(rename = "codeHome", default)]
    pub code_home: Option<PathBuf>,
    /// Default tmux session name the legacy single-session clients
    /// (`active_session`) fall back to when none has been set explicitly.
    #[serde(rename = "tmuxSession", default)]
    pub tmux_session: Option<String>,
    /// Whether the daemon advertises itself over mDNS so phone/desktop
    /// clients on the LAN can discover it without a manual address. The
    /// advertiser itself is an external collaborator (see module docs);
    /// this flag is data the bootstrap sequence reads to decide whether to
    /// start it.
    #[serde(rename = "mdnsEnabled", default = "default_true")]
    pub mdns_enabled: bool,
    /// Tool names the hub auto-approves without round-tripping a
    /// confirmation prompt to a client.
    #[serde(rename = "autoApproveTools", default)]
    pub auto_approve_tools: Vec<String>,
    /// Optional key for the Anthropic admin/usage API. Out of scope for
    /// this daemon to call (see non-goals); stored so a future billing
    /// poller can read it from the same config file.
    #[serde(rename = "anthropicAdminApiKey", default)]
    pub anthropic_admin_api_key: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listeners: vec![ListenerConfig { host: "127.0.0.1".to_string(), port: 7077, token: nanoid!(32) }],
            escalation: EscalationConfig::default(),
            code_home: None,
            tmux_session: None,
            mdns_enabled: true,
            auto_approve_tools: Vec::new(),
            anthropic_admin_api_key: None,
        }
    }
}

impl DaemonConfig {
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join("config.json")
    }

    /// Load the config file if present, else create one with a freshly
    /// generated token and persist it so a restart reuses the same token.
    pub fn load_or_init(state_dir: &Path) -> std::io::Result<Self> {
        let path = Self::path(state_dir);
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let config: Self = serde_json::from_str(&raw)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save(state_dir)?;
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }

    /// Atomically rewrite the config file: write to a temp file in the same
    /// directory, then rename over the target so a crash mid-write never
    /// leaves a truncated config behind.
    pub fn save(&self, state_dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(state_dir)?;
        let path = Self::path(state_dir);
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(self)?;
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Replace one listener's token in place, keyed by `(host, port)`.
    pub fn rotate_token(&mut self, host: &str, port: u16) -> Option<String> {
        let listener = self.listeners.iter_mut().find(|l| l.host == host && l.port == port)?;
        let new_token = nanoid!(32);
        listener.token = new_token.clone();
        Some(new_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_init_creates_config_with_default_listener() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load_or_init(dir.path()).unwrap();
        assert_eq!(config.listeners.len(), 1);
        assert_eq!(config.listeners[0].port, 7077);
        assert!(DaemonConfig::path(dir.path()).exists());
    }

    #[test]
    fn ambient_fields_default_when_absent_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(
            DaemonConfig::path(dir.path()),
            serde_json::json!({"listeners": [{"host": "127.0.0.1", "port": 7077, "token": "t"}]}).to_string(),
        )
        .unwrap();
        let config = DaemonConfig::load_or_init(dir.path()).unwrap();
        assert!(config.mdns_enabled);
        assert!(config.code_home.is_none());
        assert!(config.auto_approve_tools.is_empty());
    }

    #[test]
    fn load_or_init_reuses_existing_token_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let first = DaemonConfig::load_or_init(dir.path()).unwrap();
        let second = DaemonConfig::load_or_init(dir.path()).unwrap();
        assert_eq!(first.listeners[0].token, second.listeners[0].token);
    }

    #[test]
    fn rotate_token_changes_only_the_matching_listener() {
        let mut config = DaemonConfig::default();
        config.listeners.push(ListenerConfig {
            host: "0.0.0.0".to_string(),
            port: 7078,
            token: "fixed".to_string(),
        });
        let old_primary = config.listeners[0].token.clone();
        let new_token = config.rotate_token("127.0.0.1", 7077).unwrap();
        assert_ne!(old_primary, new_token);
        assert_eq!(config.listeners[0].token, new_token);
        assert_eq!(config.listeners[1].token, "fixed");
    }
}
