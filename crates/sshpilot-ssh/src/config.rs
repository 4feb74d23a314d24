use std::path::PathBuf;
use std::time::Duration;
use zeroize::Zeroizing;

#[derive(Clone, Debug)]
pub struct SshConnectConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: AuthMethod,
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts_path: Option<PathBuf>,
    pub keepalive_interval_secs: u64,
    pub connect_timeout_ms: u64,
    pub term: String,
    pub term_width: u32,
    pub term_height: u32,
}

impl SshConnectConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth_method: AuthMethod::Agent,
            host_key_policy: HostKeyPolicy::AcceptNew,
            known_hosts_path: None,
            keepalive_interval_secs: 15,
            connect_timeout_ms: 30_000,
            term: "xterm".to_string(),
            term_width: 120,
            term_height: 40,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

#[derive(Clone, Debug)]
pub enum AuthMethod {
    Password {
        password: Zeroizing<String>,
    },
    Key {
        private_key_path: PathBuf,
        passphrase: Option<Zeroizing<String>>,
    },
    Agent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostKeyPolicy {
    Strict,
    AcceptNew,
    InsecureAcceptAny,
}

impl HostKeyPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "strict" => Some(HostKeyPolicy::Strict),
            "accept-new" | "accept_new" => Some(HostKeyPolicy::AcceptNew),
            "insecure-accept-any" | "insecure" => Some(HostKeyPolicy::InsecureAcceptAny),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SendRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for SendRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_key_policies() {
        assert_eq!(HostKeyPolicy::parse("Strict"), Some(HostKeyPolicy::Strict));
        assert_eq!(
            HostKeyPolicy::parse(" accept-new "),
            Some(HostKeyPolicy::AcceptNew)
        );
        assert_eq!(
            HostKeyPolicy::parse("insecure-accept-any"),
            Some(HostKeyPolicy::InsecureAcceptAny)
        );
        assert_eq!(HostKeyPolicy::parse("yolo"), None);
    }

    #[test]
    fn target_formats_user_host_port() {
        let cfg = SshConnectConfig::new("10.0.0.12", 2222, "ops");
        assert_eq!(cfg.target(), "ops@10.0.0.12:2222");
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(30));
    }
}
