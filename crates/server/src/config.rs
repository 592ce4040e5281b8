use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    /// Base URL the vote collector uses to reach this server.
    pub server_public_url: Option<String>,
    pub votecollector_uri: String,
    pub device_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/votes.db".into(),
            server_public_url: None,
            votecollector_uri: "http://localhost:8030".into(),
            device_timeout_seconds: 5,
        }
    }
}

impl Settings {
    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_seconds.max(1))
    }

    /// Where keypad callbacks are sent: the public URL when configured,
    /// otherwise the bind address.
    pub fn callback_base_url(&self) -> anyhow::Result<String> {
        let raw = match &self.server_public_url {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => format!("http://{}", self.server_bind),
        };
        let parsed = Url::parse(&raw).with_context(|| format!("invalid server public url '{raw}'"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("server public url '{raw}' must use http or https");
        }
        Ok(parsed.as_str().trim_end_matches('/').to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    database_url: Option<String>,
    server_public_url: Option<String>,
    votecollector_uri: Option<String>,
    device_timeout_seconds: Option<u64>,
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string("server.toml").ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

pub(crate) fn load_settings_from(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match toml::from_str::<FileSettings>(raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.bind_addr {
                    settings.server_bind = v;
                }
                if let Some(v) = file_cfg.database_url {
                    settings.database_url = v;
                }
                if let Some(v) = file_cfg.server_public_url {
                    settings.server_public_url = Some(v);
                }
                if let Some(v) = file_cfg.votecollector_uri {
                    settings.votecollector_uri = v;
                }
                if let Some(v) = file_cfg.device_timeout_seconds {
                    settings.device_timeout_seconds = v;
                }
            }
            Err(error) => tracing::warn!(%error, "ignoring unreadable server.toml"),
        }
    }

    for key in ["SERVER_BIND", "APP__BIND_ADDR"] {
        if let Some(v) = env(key) {
            settings.server_bind = v;
        }
    }
    for key in ["DATABASE_URL", "APP__DATABASE_URL"] {
        if let Some(v) = env(key) {
            settings.database_url = v;
        }
    }
    for key in ["SERVER_PUBLIC_URL", "APP__SERVER_PUBLIC_URL"] {
        if let Some(v) = env(key) {
            settings.server_public_url = Some(v);
        }
    }
    for key in ["VOTECOLLECTOR_URI", "APP__VOTECOLLECTOR_URI"] {
        if let Some(v) = env(key) {
            settings.votecollector_uri = v;
        }
    }
    if let Some(v) = env("APP__DEVICE_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.device_timeout_seconds = parsed;
        }
    }

    settings
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
        return sqlite_url_for_path(path);
    }
    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return sqlite_url_for_path(path);
    }
    if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    sqlite_url_for_path(raw_database_url)
}

fn sqlite_url_for_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    if has_drive_letter(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn has_drive_letter(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
