use crate::settings::{
    AiConfigLayer, AppConfigLayer, ConfigError, SessionDefaultsLayer, SshDefaultsLayer,
};
use zeroize::Zeroizing;

pub type EnvLookup = dyn Fn(&str) -> Option<String>;

pub const DEFAULT_HOST: &str = "DEFAULT_HOST";
pub const DEFAULT_PORT: &str = "DEFAULT_PORT";
pub const DEFAULT_USER: &str = "DEFAULT_USER";
pub const DEFAULT_PASS: &str = "DEFAULT_PASS";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_DEFAULT_MODEL: &str = "OPENAI_DEFAULT_MODEL";
pub const OPENAI_TIMEOUT: &str = "OPENAI_TIMEOUT";

fn non_empty(env: &EnvLookup, key: &str) -> Option<String> {
    env(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn env_layer(env: &EnvLookup) -> Result<AppConfigLayer, ConfigError> {
    let port = match non_empty(env, DEFAULT_PORT) {
        Some(raw) => Some(raw.parse::<u16>().map_err(|_| {
            ConfigError::Invalid(format!("{DEFAULT_PORT} must be a port number, got {raw:?}"))
        })?),
        None => None,
    };
    let timeout_ms = match non_empty(env, OPENAI_TIMEOUT) {
        Some(raw) => {
            let secs = raw.parse::<f64>().ok().filter(|s| *s > 0.0).ok_or_else(|| {
                ConfigError::Invalid(format!("{OPENAI_TIMEOUT} must be seconds, got {raw:?}"))
            })?;
            Some((secs * 1000.0) as u64)
        }
        None => None,
    };

    let session = SessionDefaultsLayer {
        host: non_empty(env, DEFAULT_HOST),
        user: non_empty(env, DEFAULT_USER),
    };
    let ai = AiConfigLayer {
        api_key: non_empty(env, OPENAI_API_KEY),
        model: non_empty(env, OPENAI_DEFAULT_MODEL),
        timeout_ms,
        ..Default::default()
    };
    Ok(AppConfigLayer {
        session: Some(session),
        ssh: port.map(|port| SshDefaultsLayer {
            port: Some(port),
            ..Default::default()
        }),
        ai: Some(ai),
        logging: None,
    })
}

pub fn env_password(env: &EnvLookup) -> Option<Zeroizing<String>> {
    env(DEFAULT_PASS)
        .filter(|v| !v.is_empty())
        .map(Zeroizing::new)
}
