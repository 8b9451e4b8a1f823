use std::{fs, path::Path, str::FromStr};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_SETTINGS_FILE: &str = "chat.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    pub server_url: String,
    pub user_id: i64,
    pub display_name: Option<String>,
    pub server_id: i64,
    pub channel_id: i64,
    pub history_limit: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            user_id: 1,
            display_name: None,
            server_id: 1,
            channel_id: 1,
            history_limit: 50,
        }
    }
}

impl ChatSettings {
    /// Name shown to other members when none was configured.
    pub fn display_name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| format!("User {}", self.user_id))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    server_url: Option<String>,
    user_id: Option<i64>,
    display_name: Option<String>,
    server_id: Option<i64>,
    channel_id: Option<i64>,
    history_limit: Option<u32>,
}

pub fn load_settings(path: &Path) -> ChatSettings {
    let mut settings = ChatSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_values(&mut settings, file_cfg),
            Err(err) => warn!(file = %path.display(), %err, "config: ignoring unreadable settings file"),
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_values(settings: &mut ChatSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.user_id {
        settings.user_id = v;
    }
    if file_cfg.display_name.is_some() {
        settings.display_name = file_cfg.display_name;
    }
    if let Some(v) = file_cfg.server_id {
        settings.server_id = v;
    }
    if let Some(v) = file_cfg.channel_id {
        settings.channel_id = v;
    }
    if let Some(v) = file_cfg.history_limit {
        settings.history_limit = v;
    }
}

pub fn apply_env_overrides(settings: &mut ChatSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__DISPLAY_NAME") {
        settings.display_name = Some(v);
    }
    set_parsed(&mut settings.user_id, "APP__USER_ID", &lookup);
    set_parsed(&mut settings.server_id, "APP__SERVER_ID", &lookup);
    set_parsed(&mut settings.channel_id, "APP__CHANNEL_ID", &lookup);
    set_parsed(&mut settings.history_limit, "APP__HISTORY_LIMIT", &lookup);
}

fn set_parsed<T: FromStr>(slot: &mut T, key: &str, lookup: &impl Fn(&str) -> Option<String>) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key, value = %raw, "config: ignoring invalid value"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
