use crate::bridge::OutputBridge;
use crate::error::CoreError;
use crate::events::{Event, EventBus, NoticeLevel};
use sshpilot_config::SshDefaults;
use sshpilot_ssh::{
    AuthMethod, ChannelReader, HostKeyPolicy, ReaderConfig, ReaderEvent, ReaderExit, SendRetry,
    SessionTransport, ShellConnector, SshConnectConfig, SshError, TransportState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: AuthMethod,
}

impl ConnectParams {
    /// Validates raw form input. All problems are reported together in one message.
    pub fn parse(
        host: &str,
        port: &str,
        username: &str,
        credential: AuthMethod,
    ) -> Result<Self, CoreError> {
        let host = host.trim();
        let username = username.trim();
        let mut missing = Vec::new();
        if host.is_empty() {
            missing.push("host");
        }
        if username.is_empty() {
            missing.push("user");
        }
        if let AuthMethod::Password { password } = &credential {
            if password.is_empty() {
                missing.push("password");
            }
        }
        if !missing.is_empty() {
            return Err(CoreError::Invalid(format!(
                "{} required",
                missing.join(", ")
            )));
        }
        let port = match port.trim().parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                return Err(CoreError::Invalid(format!(
                    "port must be a number between 1 and 65535, got {:?}",
                    port.trim()
                )))
            }
        };
        Ok(Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            credential,
        })
    }

    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    pub fn ssh_config(&self, options: &SessionOptions) -> SshConnectConfig {
        let mut cfg = SshConnectConfig::new(&self.host, self.port, &self.username);
        cfg.auth_method = self.credential.clone();
        cfg.host_key_policy = options.host_key_policy.clone();
        cfg.known_hosts_path = options.known_hosts_path.clone();
        cfg.keepalive_interval_secs = options.keepalive_interval_secs;
        cfg.connect_timeout_ms = options.connect_timeout_ms;
        cfg.term = options.term.clone();
        cfg.term_width = options.term_width;
        cfg.term_height = options.term_height;
        cfg
    }
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub connect_timeout_ms: u64,
    pub keepalive_interval_secs: u64,
    pub term: String,
    pub term_width: u32,
    pub term_height: u32,
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts_path: Option<PathBuf>,
    pub retry: SendRetry,
    pub reader: ReaderConfig,
    pub reader_join_timeout: Duration,
}

impl SessionOptions {
    pub fn from_config(ssh: &SshDefaults) -> Result<Self, CoreError> {
        let host_key_policy = HostKeyPolicy::parse(&ssh.host_key_policy).ok_or_else(|| {
            CoreError::Invalid(format!(
                "unknown host_key_policy {:?}, expected accept-new, strict or insecure-accept-any",
                ssh.host_key_policy
            ))
        })?;
        if ssh.reader_chunk_size == 0 {
            return Err(CoreError::Invalid(
                "reader_chunk_size must be positive".to_string(),
            ));
        }
        Ok(Self::with_policy(ssh, host_key_policy))
    }

    fn with_policy(ssh: &SshDefaults, host_key_policy: HostKeyPolicy) -> Self {
        Self {
            connect_timeout_ms: ssh.connect_timeout_ms,
            keepalive_interval_secs: ssh.keepalive_interval_secs,
            term: ssh.term.clone(),
            term_width: ssh.term_width,
            term_height: ssh.term_height,
            host_key_policy,
            known_hosts_path: ssh.known_hosts_path.clone(),
            retry: SendRetry {
                attempts: ssh.send_retry_attempts,
                backoff: Duration::from_millis(ssh.send_retry_backoff_ms),
            },
            reader: ReaderConfig {
                chunk_size: ssh.reader_chunk_size,
                poll_interval: Duration::from_millis(ssh.reader_poll_interval_ms.max(1)),
            },
            reader_join_timeout: Duration::from_millis(ssh.reader_join_timeout_ms),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::with_policy(&SshDefaults::default(), HostKeyPolicy::AcceptNew)
    }
}

/// One live session: the transport, its reader task and the output bridge.
///
/// Owned by the control task; every write goes through `&mut self`.
pub struct SessionController {
    id: Uuid,
    transport: SessionTransport,
    options: SessionOptions,
    bus: EventBus,
    bridge: Arc<OutputBridge>,
    reader: Option<ChannelReader>,
    state: SessionState,
}

impl SessionController {
    pub fn new(
        connector: Arc<dyn ShellConnector>,
        options: SessionOptions,
        bus: EventBus,
        bridge: Arc<OutputBridge>,
    ) -> Self {
        let transport = SessionTransport::new(connector).with_retry(options.retry);
        Self {
            id: Uuid::new_v4(),
            transport,
            options,
            bus,
            bridge,
            reader: None,
            state: SessionState::Disconnected,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn bridge(&self) -> &Arc<OutputBridge> {
        &self.bridge
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        self.state = state.clone();
        self.bus.send(Event::SessionStateChanged {
            session_id: self.id,
            state,
        });
    }

    pub async fn connect(&mut self, params: &ConnectParams) -> Result<(), CoreError> {
        if self.reader.is_some() || self.transport_state() != TransportState::Disconnected {
            return Err(SshError::AlreadyConnected.into());
        }
        info!(session_id = %self.id, target_host = %params.target(), "session connect start");
        self.set_state(SessionState::Connecting);

        let cfg = params.ssh_config(&self.options);
        let source = match self.transport.connect(&cfg).await {
            Ok(source) => source,
            Err(err) => {
                error!(session_id = %self.id, error = %err, "session connect failed");
                self.set_state(SessionState::Failed(err.to_string()));
                self.set_state(SessionState::Disconnected);
                return Err(err.into());
            }
        };

        let bridge = self.bridge.clone();
        let bus = self.bus.clone();
        let session_id = self.id;
        self.reader = Some(ChannelReader::spawn(
            source,
            self.options.reader,
            move |event| match event {
                ReaderEvent::Chunk(chunk) => bridge.on_chunk(chunk),
                ReaderEvent::Finished(ReaderExit::Stopped) => {
                    debug!(session_id = %session_id, "reader stopped");
                }
                ReaderEvent::Finished(exit) => {
                    info!(session_id = %session_id, ?exit, "remote channel ended");
                    bus.send(Event::ChannelClosed { session_id });
                }
            },
        ));

        self.set_state(SessionState::Connected);
        info!(session_id = %self.id, "session connected");
        Ok(())
    }

    pub fn mark_ready(&self) -> bool {
        self.bridge.mark_ready()
    }

    pub async fn send(&mut self, data: &[u8]) {
        self.transport.send(data).await;
    }

    pub async fn resize(&mut self, cols: u16, rows: u16) {
        self.transport.resize(u32::from(cols), u32::from(rows)).await;
    }

    pub async fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            match reader.stop(self.options.reader_join_timeout).await {
                Some(exit) => debug!(session_id = %self.id, ?exit, "reader joined"),
                None => {
                    warn!(session_id = %self.id, "reader did not stop in time, aborted");
                    self.bus.send(Event::Notification {
                        session_id: self.id,
                        level: NoticeLevel::Warn,
                        message: "output reader was aborted".to_string(),
                    });
                }
            }
        }
        self.transport.close().await;
        if self.state != SessionState::Disconnected {
            info!(session_id = %self.id, "session disconnected");
        }
        self.set_state(SessionState::Disconnected);
    }
}
