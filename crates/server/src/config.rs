use std::{fs, str::FromStr};

use serde::Deserialize;
use tracing::warn;

const SETTINGS_FILE: &str = "relay.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub broadcast_capacity: usize,
    pub max_message_chars: usize,
    pub history_page_limit: u32,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            broadcast_capacity: 1024,
            max_message_chars: 2000,
            history_page_limit: 100,
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Keys read from `relay.toml`; absent keys keep the current value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    bind_addr: Option<String>,
    broadcast_capacity: Option<usize>,
    max_message_chars: Option<usize>,
    history_page_limit: Option<u32>,
    max_body_bytes: Option<usize>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_values(&mut settings, file_cfg),
            Err(err) => warn!(file = SETTINGS_FILE, %err, "config: ignoring unreadable settings file"),
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_values(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.broadcast_capacity {
        settings.broadcast_capacity = v;
    }
    if let Some(v) = file_cfg.max_message_chars {
        settings.max_message_chars = v;
    }
    if let Some(v) = file_cfg.history_page_limit {
        settings.history_page_limit = v;
    }
    if let Some(v) = file_cfg.max_body_bytes {
        settings.max_body_bytes = v;
    }
}

/// Later keys win, so `APP__*` beats the short names.
fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("RELAY_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("APP__BROADCAST_CAPACITY") {
        set_parsed(&mut settings.broadcast_capacity, "APP__BROADCAST_CAPACITY", &v);
    }
    if let Some(v) = lookup("APP__MAX_MESSAGE_CHARS") {
        set_parsed(&mut settings.max_message_chars, "APP__MAX_MESSAGE_CHARS", &v);
    }
    if let Some(v) = lookup("APP__HISTORY_PAGE_LIMIT") {
        set_parsed(&mut settings.history_page_limit, "APP__HISTORY_PAGE_LIMIT", &v);
    }
    if let Some(v) = lookup("APP__MAX_BODY_BYTES") {
        set_parsed(&mut settings.max_body_bytes, "APP__MAX_BODY_BYTES", &v);
    }
}

fn set_parsed<T: FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value = raw, "config: ignoring invalid value"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
