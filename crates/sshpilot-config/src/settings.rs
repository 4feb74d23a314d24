use crate::env::{env_layer, EnvLookup};
use crate::paths::AppPaths;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub session: SessionDefaults,
    pub ssh: SshDefaults,
    pub ai: AiConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AppConfigLayer {
    pub session: Option<SessionDefaultsLayer>,
    pub ssh: Option<SshDefaultsLayer>,
    pub ai: Option<AiConfigLayer>,
    pub logging: Option<LoggingConfigLayer>,
}

impl AppConfigLayer {
    pub fn apply_to(self, cfg: &mut AppConfig) {
        if let Some(layer) = self.session {
            cfg.session.apply(layer);
        }
        if let Some(layer) = self.ssh {
            cfg.ssh.apply(layer);
        }
        if let Some(layer) = self.ai {
            cfg.ai.apply(layer);
        }
        if let Some(layer) = self.logging {
            cfg.logging.apply(layer);
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SessionDefaults {
    pub host: Option<String>,
    pub user: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SessionDefaultsLayer {
    pub host: Option<String>,
    pub user: Option<String>,
}

impl SessionDefaults {
    fn apply(&mut self, layer: SessionDefaultsLayer) {
        if layer.host.is_some() {
            self.host = layer.host;
        }
        if layer.user.is_some() {
            self.user = layer.user;
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SshDefaults {
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub keepalive_interval_secs: u64,
    pub term: String,
    pub term_width: u32,
    pub term_height: u32,
    pub host_key_policy: String,
    pub known_hosts_path: Option<PathBuf>,
    pub send_retry_attempts: u32,
    pub send_retry_backoff_ms: u64,
    pub reader_chunk_size: usize,
    pub reader_poll_interval_ms: u64,
    pub reader_join_timeout_ms: u64,
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            port: 22,
            connect_timeout_ms: 30000,
            keepalive_interval_secs: 15,
            term: "xterm".to_string(),
            term_width: 120,
            term_height: 40,
            host_key_policy: "accept-new".to_string(),
            known_hosts_path: None,
            send_retry_attempts: 5,
            send_retry_backoff_ms: 20,
            reader_chunk_size: 1024,
            reader_poll_interval_ms: 10,
            reader_join_timeout_ms: 500,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SshDefaultsLayer {
    pub port: Option<u16>,
    pub connect_timeout_ms: Option<u64>,
    pub keepalive_interval_secs: Option<u64>,
    pub term: Option<String>,
    pub term_width: Option<u32>,
    pub term_height: Option<u32>,
    pub host_key_policy: Option<String>,
    pub known_hosts_path: Option<PathBuf>,
    pub send_retry_attempts: Option<u32>,
    pub send_retry_backoff_ms: Option<u64>,
    pub reader_chunk_size: Option<usize>,
    pub reader_poll_interval_ms: Option<u64>,
    pub reader_join_timeout_ms: Option<u64>,
}

impl SshDefaults {
    fn apply(&mut self, layer: SshDefaultsLayer) {
        if let Some(v) = layer.port {
            self.port = v;
        }
        if let Some(v) = layer.connect_timeout_ms {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = layer.keepalive_interval_secs {
            self.keepalive_interval_secs = v;
        }
        if let Some(v) = layer.term {
            self.term = v;
        }
        if let Some(v) = layer.term_width {
            self.term_width = v;
        }
        if let Some(v) = layer.term_height {
            self.term_height = v;
        }
        if let Some(v) = layer.host_key_policy {
            self.host_key_policy = v;
        }
        if layer.known_hosts_path.is_some() {
            self.known_hosts_path = layer.known_hosts_path;
        }
        if let Some(v) = layer.send_retry_attempts {
            self.send_retry_attempts = v;
        }
        if let Some(v) = layer.send_retry_backoff_ms {
            self.send_retry_backoff_ms = v;
        }
        if let Some(v) = layer.reader_chunk_size {
            self.reader_chunk_size = v;
        }
        if let Some(v) = layer.reader_poll_interval_ms {
            self.reader_poll_interval_ms = v;
        }
        if let Some(v) = layer.reader_join_timeout_ms {
            self.reader_join_timeout_ms = v;
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AiConfig {
    pub provider: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub default_mode: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            endpoint: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
            timeout_ms: 30000,
            default_mode: "ask".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AiConfigLayer {
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub default_mode: Option<String>,
}

impl AiConfig {
    fn apply(&mut self, layer: AiConfigLayer) {
        if let Some(v) = layer.provider {
            self.provider = v;
        }
        if let Some(v) = layer.endpoint {
            self.endpoint = v;
        }
        if layer.api_key.is_some() {
            self.api_key = layer.api_key;
        }
        if let Some(v) = layer.model {
            self.model = v;
        }
        if let Some(v) = layer.temperature {
            self.temperature = v;
        }
        if let Some(v) = layer.max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = layer.timeout_ms {
            self.timeout_ms = v;
        }
        if let Some(v) = layer.default_mode {
            self.default_mode = v;
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            stdout: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct LoggingConfigLayer {
    pub level: Option<String>,
    pub json: Option<bool>,
    pub stdout: Option<bool>,
}

impl LoggingConfig {
    fn apply(&mut self, layer: LoggingConfigLayer) {
        if let Some(v) = layer.level {
            self.level = v;
        }
        if let Some(v) = layer.json {
            self.json = v;
        }
        if let Some(v) = layer.stdout {
            self.stdout = v;
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConfigManager {
    pub paths: AppPaths,
}

impl ConfigManager {
    pub fn new(paths: AppPaths) -> Self {
        Self { paths }
    }

    /// Defaults, then the user file, the project file, the process environment
    /// and finally `overrides`.
    pub fn load(&self, cwd: Option<&Path>, overrides: Option<AppConfigLayer>) -> Result<AppConfig> {
        self.load_with_env(cwd, &|key: &str| std::env::var(key).ok(), overrides)
    }

    pub fn load_with_env(
        &self,
        cwd: Option<&Path>,
        env: &EnvLookup,
        overrides: Option<AppConfigLayer>,
    ) -> Result<AppConfig> {
        let mut cfg = AppConfig::default();

        if self.paths.config_file.exists() {
            debug!(path = %self.paths.config_file.display(), "loading user config");
            let layer = Self::load_layer(&self.paths.config_file)?;
            layer.apply_to(&mut cfg);
        }

        if let Some(dir) = cwd {
            let project_path = AppPaths::project_config_path(dir);
            if project_path.exists() {
                debug!(path = %project_path.display(), "loading project config");
                let layer = Self::load_layer(&project_path)?;
                layer.apply_to(&mut cfg);
            }
        }

        env_layer(env)?.apply_to(&mut cfg);

        if let Some(layer) = overrides {
            layer.apply_to(&mut cfg);
        }

        if cfg.ssh.known_hosts_path.is_none() {
            cfg.ssh.known_hosts_path = Some(self.paths.known_hosts_file.clone());
        }

        Ok(cfg)
    }

    pub fn load_layer(path: &Path) -> Result<AppConfigLayer, ConfigError> {
        let content = fs::read_to_string(path)?;
        let layer: AppConfigLayer = toml::from_str(&content)?;
        Ok(layer)
    }

    pub fn save_default(&self) -> Result<()> {
        self.save_config(&AppConfig::default())
    }

    pub fn save_config(&self, cfg: &AppConfig) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(cfg).map_err(|e| anyhow::anyhow!(e))?;
        fs::write(&self.paths.config_file, content)?;
        Ok(())
    }
}
