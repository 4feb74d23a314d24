pub mod env;
pub mod paths;
pub mod settings;

pub use env::{env_layer, env_password, EnvLookup};
pub use paths::AppPaths;
pub use settings::{
    AiConfig, AiConfigLayer, AppConfig, AppConfigLayer, ConfigError, ConfigManager, LoggingConfig,
    SessionDefaults, SshDefaults,
};
