use std::{fs, time::Duration};

use anyhow::Context;
use client_core::{ConnectorOptions, DEFAULT_API_URL};
use tracing::warn;

const CONFIG_FILE: &str = "research.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub database_url: String,
    pub stream_idle_timeout_secs: Option<u64>,
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            database_url: "sqlite://./data/companies.db".into(),
            stream_idle_timeout_secs: None,
            event_buffer: 256,
        }
    }
}

impl Settings {
    pub fn connector_options(&self) -> ConnectorOptions {
        ConnectorOptions {
            buffer: self.event_buffer,
            idle_timeout: self
                .stream_idle_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(CONFIG_FILE).ok();
    resolve_settings(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then `research.toml`, then environment. Later sources win; values that fail
/// to parse are ignored.
pub fn resolve_settings(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match toml::from_str::<toml::Table>(raw) {
            Ok(table) => {
                if let Some(v) = table_value(&table, "api_url") {
                    settings.api_url = v;
                }
                if let Some(v) = table_value(&table, "database_url") {
                    settings.database_url = v;
                }
                if let Some(v) = table_value(&table, "stream_idle_timeout_secs") {
                    if let Ok(parsed) = v.parse::<u64>() {
                        settings.stream_idle_timeout_secs = Some(parsed);
                    }
                }
                if let Some(v) = table_value(&table, "event_buffer") {
                    if let Ok(parsed) = v.parse::<usize>() {
                        settings.event_buffer = parsed;
                    }
                }
            }
            Err(err) => warn!(error = %err, "ignoring unreadable {CONFIG_FILE}"),
        }
    }

    if let Some(v) = env("RESEARCH_API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = env("APP__API_URL") {
        settings.api_url = v;
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = env("APP__STREAM_IDLE_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.stream_idle_timeout_secs = Some(parsed);
        }
    }

    if let Some(v) = env("APP__EVENT_BUFFER") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.event_buffer = parsed;
        }
    }

    settings
}

fn table_value(table: &toml::Table, key: &str) -> Option<String> {
    match table.get(key)? {
        toml::Value::String(v) => Some(v.clone()),
        toml::Value::Integer(v) => Some(v.to_string()),
        _ => None,
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        if is_windows_drive_path(path) {
            return format!("sqlite:{}", path.replace('\\', "/"));
        }
        return raw_database_url.to_string();
    }

    if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    let path = raw_database_url
        .strip_prefix("sqlite:")
        .unwrap_or(raw_database_url)
        .replace('\\', "/");
    if is_windows_drive_path(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn is_windows_drive_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes[2], b'/' | b'\\')
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    if database_url.starts_with("sqlite::memory:") {
        return Ok(());
    }
    let Some(path) = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .and_then(|rest| rest.split('?').next())
        .filter(|path| !path.is_empty())
    else {
        return Ok(());
    };

    let Some(parent) = std::path::Path::new(path).parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
