use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use sshpilot_cli::{parse_target, Cli, Command, ConnectArgs};
use sshpilot_config::{env_password, AiConfigLayer, AppConfig, AppConfigLayer, AppPaths, ConfigManager};
use sshpilot_core::{
    AssistantPipeline, CommandExtractor, ConnectParams, EventBus, HttpCompletionProvider,
    OperatingMode, OutputBridge, SessionController, SessionOptions,
};
use sshpilot_ssh::{AuthMethod, SshClient};
use sshpilot_tui::Console;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use zeroize::Zeroizing;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("sshpilot: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut paths = AppPaths::new()?;
    if let Some(path) = &cli.config {
        paths.config_file = path.clone();
    }
    let config_manager = ConfigManager::new(paths.clone());
    let cwd = cli.project.clone().or_else(|| std::env::current_dir().ok());
    let overrides = match &cli.command {
        Some(Command::Connect(args)) => mode_override(args.mode),
        _ => None,
    };
    let config = config_manager.load(cwd.as_deref(), overrides)?;
    let interactive = matches!(cli.command, None | Some(Command::Connect(_)));
    let _log_guard = init_logging(&config, &paths, config.logging.stdout && !interactive)?;

    match cli.command {
        Some(Command::Config { init }) => {
            if init {
                config_manager.save_default()?;
                println!("config initialized at {}", paths.config_file.display());
            } else {
                println!("config file: {}", paths.config_file.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Extract { file }) => extract(file),
        Some(Command::Connect(args)) => connect(args, &config).await,
        None => connect(ConnectArgs::default(), &config).await,
    }
}

fn mode_override(mode: Option<OperatingMode>) -> Option<AppConfigLayer> {
    mode.map(|mode| AppConfigLayer {
        ai: Some(AiConfigLayer {
            default_mode: Some(mode.to_string().to_lowercase()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn init_logging(
    config: &AppConfig,
    paths: &AppPaths,
    enable_stdout: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&paths.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&paths.log_dir, "sshpilot.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let file_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if enable_stdout {
        let stdout_layer = if config.logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stdout)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .boxed()
        };
        tracing::subscriber::set_global_default(subscriber.with(stdout_layer))?;
    } else {
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(guard)
}

fn extract(file: Option<PathBuf>) -> Result<ExitCode> {
    let text = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    match CommandExtractor::new().extract(&text) {
        Some(command) => {
            println!("{command}");
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::FAILURE),
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Endpoint {
    host: String,
    user: String,
    port: u16,
}

fn resolve_endpoint(args: &ConnectArgs, config: &AppConfig) -> Endpoint {
    let target = args.target.as_deref().map(parse_target).unwrap_or_default();
    let host = if target.host.is_empty() {
        config.session.host.clone().unwrap_or_default()
    } else {
        target.host
    };
    let user = target
        .user
        .or_else(|| config.session.user.clone())
        .unwrap_or_else(whoami::username);
    let port = args.port.or(target.port).unwrap_or(config.ssh.port);
    Endpoint { host, user, port }
}

async fn credential(args: &ConnectArgs, endpoint: &Endpoint) -> Result<AuthMethod> {
    if args.agent {
        return Ok(AuthMethod::Agent);
    }
    if let Some(path) = &args.key {
        return Ok(AuthMethod::Key {
            private_key_path: path.clone(),
            passphrase: None,
        });
    }
    if let Some(var) = &args.password_env {
        let password = std::env::var(var)
            .map_err(|_| anyhow!("environment variable {var} is not set"))?;
        return Ok(AuthMethod::Password {
            password: Zeroizing::new(password),
        });
    }
    let lookup = |key: &str| std::env::var(key).ok();
    if let Some(password) = env_password(&lookup) {
        return Ok(AuthMethod::Password { password });
    }
    if endpoint.host.trim().is_empty() || endpoint.user.trim().is_empty() {
        return Ok(AuthMethod::Password {
            password: Zeroizing::new(String::new()),
        });
    }
    let prompt = format!("{}@{}'s password: ", endpoint.user, endpoint.host);
    let password = tokio::task::spawn_blocking(move || sshpilot_tui::read_password(&prompt))
        .await
        .context("password prompt failed")??;
    Ok(AuthMethod::Password { password })
}

async fn connect(args: ConnectArgs, config: &AppConfig) -> Result<ExitCode> {
    let endpoint = resolve_endpoint(&args, config);
    let mode: OperatingMode = config
        .ai
        .default_mode
        .parse()
        .map_err(|e: String| anyhow!("ai.default_mode: {e}"))?;
    let options = SessionOptions::from_config(&config.ssh)?;
    let provider = Arc::new(HttpCompletionProvider::from_config(&config.ai)?);

    let credential = credential(&args, &endpoint).await?;
    let params = ConnectParams::parse(
        &endpoint.host,
        &endpoint.port.to_string(),
        &endpoint.user,
        credential,
    )?;

    let bus = EventBus::default();
    let events = bus.subscribe();
    let (output_tx, output_rx) = mpsc::unbounded_channel();
    let bridge = Arc::new(OutputBridge::new(output_tx));
    let mut controller = SessionController::new(Arc::new(SshClient), options, bus, bridge);

    if let Err(err) = controller.connect(&params).await {
        error!(error = %err, target_host = %params.target(), "connection failed");
        bail!("cannot connect to {}: {err}", params.target());
    }
    info!(target_host = %params.target(), %mode, "starting console");

    let (pipeline, replies) = AssistantPipeline::new(provider, mode);
    let console = Console::new(controller, pipeline, replies, output_rx, events);
    sshpilot_tui::run(console).await?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(target: Option<&str>) -> ConnectArgs {
        ConnectArgs {
            target: target.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn target_wins_over_configured_defaults() {
        let mut config = AppConfig::default();
        config.session.host = Some("fallback".to_string());
        config.session.user = Some("deploy".to_string());
        config.ssh.port = 2200;

        let endpoint = resolve_endpoint(&args(Some("ops@db1:2222")), &config);
        assert_eq!(
            endpoint,
            Endpoint {
                host: "db1".to_string(),
                user: "ops".to_string(),
                port: 2222,
            }
        );

        let endpoint = resolve_endpoint(&args(None), &config);
        assert_eq!(endpoint.host, "fallback");
        assert_eq!(endpoint.user, "deploy");
        assert_eq!(endpoint.port, 2200);
    }

    #[test]
    fn port_flag_beats_target_port() {
        let mut connect = args(Some("db1:2222"));
        connect.port = Some(2022);
        assert_eq!(resolve_endpoint(&connect, &AppConfig::default()).port, 2022);
    }

    #[test]
    fn mode_flag_becomes_config_layer() {
        let mut config = AppConfig::default();
        mode_override(Some(OperatingMode::Agent))
            .unwrap()
            .apply_to(&mut config);
        assert_eq!(config.ai.default_mode, "agent");
        assert!(mode_override(None).is_none());
    }

    #[tokio::test]
    async fn agent_flag_skips_password_lookup() {
        let mut connect = args(Some("db1"));
        connect.agent = true;
        let endpoint = resolve_endpoint(&connect, &AppConfig::default());
        assert!(matches!(
            credential(&connect, &endpoint).await.unwrap(),
            AuthMethod::Agent
        ));
    }
}
