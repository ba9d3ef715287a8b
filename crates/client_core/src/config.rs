use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use serde::Deserialize;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_CONFIG_FILE: &str = "client.toml";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const SESSION_DIR_NAME: &str = "tutor-crm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_url: String,
    pub session_dir: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            session_dir: default_session_dir(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_url: Option<String>,
    session_dir: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Base URL for every service call, always ending in `/` so relative
    /// endpoint paths keep any path prefix the deployment uses.
    pub fn base_url(&self) -> anyhow::Result<Url> {
        let raw = self.api_url.trim();
        if raw.is_empty() {
            return Err(anyhow!("api_url must not be empty"));
        }
        let mut url =
            Url::parse(raw).with_context(|| format!("invalid api_url '{raw}'"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("api_url must start with http:// or https://"));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}

fn default_session_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(SESSION_DIR_NAME)
}

/// Defaults, then `client.toml` (or the file named by `TUTOR_CLIENT_CONFIG`),
/// then environment variables.
pub fn load_settings() -> ClientSettings {
    let path = std::env::var("TUTOR_CLIENT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut settings = ClientSettings::default();

    if let Err(err) = apply_file(&mut settings, &path) {
        tracing::warn!(path = %path.display(), "config: ignoring settings file: {err:#}");
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file(settings: &mut ClientSettings, path: &Path) -> anyhow::Result<()> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };
    apply_toml(settings, &raw)
}

fn apply_toml(settings: &mut ClientSettings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw).context("failed to parse settings")?;
    if let Some(v) = file_cfg.api_url {
        settings.api_url = v;
    }
    if let Some(v) = file_cfg.session_dir {
        settings.session_dir = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    Ok(())
}

fn apply_env(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("TUTOR_API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = lookup("APP__API_URL") {
        settings.api_url = v;
    }

    if let Some(v) = lookup("TUTOR_SESSION_DIR") {
        settings.session_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("APP__SESSION_DIR") {
        settings.session_dir = PathBuf::from(v);
    }

    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }
}
