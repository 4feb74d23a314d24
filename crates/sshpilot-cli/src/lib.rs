use clap::{Parser, Subcommand};
use sshpilot_core::OperatingMode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sshpilot", version, about = "SSH terminal with an AI command assistant")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Use this config file instead of the per-user one.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory searched for a .sshpilot.toml project file.
    #[arg(long)]
    pub project: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open an interactive session. Missing parts come from DEFAULT_* variables and config.
    Connect(ConnectArgs),
    Config {
        #[arg(long)]
        init: bool,
    },
    /// Print the command that would be dispatched for an assistant reply.
    Extract {
        /// Reply text file; stdin when omitted.
        file: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug, Default, Clone)]
pub struct ConnectArgs {
    /// [user@]host[:port]
    pub target: Option<String>,
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Read the password from this environment variable.
    #[arg(long, value_name = "VAR", conflicts_with_all = ["agent", "key"])]
    pub password_env: Option<String>,
    /// Authenticate with the running ssh-agent.
    #[arg(long, conflicts_with = "key")]
    pub agent: bool,
    /// Authenticate with a private key file.
    #[arg(long, value_name = "PATH")]
    pub key: Option<PathBuf>,
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<OperatingMode>,
}

fn parse_mode(value: &str) -> Result<OperatingMode, String> {
    value.parse()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Target {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

/// Splits `[user@]host[:port]`. IPv6 hosts take the bracketed `[addr]:port` form.
pub fn parse_target(target: &str) -> Target {
    let target = target.trim();
    let (user, rest) = match target.rfind('@') {
        Some(at) => (Some(target[..at].to_string()), &target[at + 1..]),
        None => (None, target),
    };
    let user = user.filter(|u| !u.is_empty());

    if let Some(inner) = rest.strip_prefix('[') {
        if let Some(close) = inner.find(']') {
            let host = inner[..close].to_string();
            let port = inner[close + 1..]
                .strip_prefix(':')
                .and_then(|p| p.parse::<u16>().ok());
            return Target { user, host, port };
        }
    }

    match rest.rfind(':') {
        Some(colon) if rest[..colon].find(':').is_none() => match rest[colon + 1..].parse::<u16>() {
            Ok(port) => Target {
                user,
                host: rest[..colon].to_string(),
                port: Some(port),
            },
            Err(_) => Target {
                user,
                host: rest.to_string(),
                port: None,
            },
        },
        _ => Target {
            user,
            host: rest.to_string(),
            port: None,
        },
    }
}
