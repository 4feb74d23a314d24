use crate::channel::{ChannelBuffer, ChannelSink, ChannelSource, ShellChannel, ShellConnector};
use crate::config::{AuthMethod, HostKeyPolicy, SshConnectConfig};
use crate::error::SshError;
use crate::known_hosts::KnownHosts;
use async_trait::async_trait;
use russh::client::{self, AuthResult, Config as ClientConfig, Handle, Msg};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{load_secret_key, Algorithm};
use russh::{Channel, ChannelMsg, ChannelWriteHalf, Disconnect};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Clone, Default)]
pub struct SshClient;

#[async_trait]
impl ShellConnector for SshClient {
    async fn open_shell(&self, cfg: &SshConnectConfig) -> Result<ShellChannel, SshError> {
        let handle = establish(cfg).await?;
        let session = open_interactive(&handle, cfg).await?;
        info!(target_host = %cfg.target(), "interactive channel open");
        Ok(attach(session.channel, handle, session.early))
    }
}

async fn establish(cfg: &SshConnectConfig) -> Result<Handle<ClientHandler>, SshError> {
    let known_hosts = match (&cfg.known_hosts_path, &cfg.host_key_policy) {
        (_, HostKeyPolicy::InsecureAcceptAny) | (None, _) => None,
        (Some(path), _) => Some(Arc::new(Mutex::new(KnownHosts::load(path.clone())?))),
    };
    let handler = ClientHandler {
        host: cfg.host.clone(),
        port: cfg.port,
        policy: cfg.host_key_policy.clone(),
        known_hosts,
    };

    let sock = tokio::net::TcpStream::connect((cfg.host.as_str(), cfg.port))
        .await
        .map_err(|e| SshError::Connection(format!("{}:{}: {e}", cfg.host, cfg.port)))?;
    let mut handle = client::connect_stream(Arc::new(build_client_config(cfg)), sock, handler)
        .await
        .map_err(|err| SshError::from_handshake(err, &cfg.host, cfg.port))?;

    authenticate(&mut handle, &cfg.username, &cfg.auth_method).await?;
    debug!(target_host = %cfg.target(), "authenticated");
    Ok(handle)
}

fn build_client_config(cfg: &SshConnectConfig) -> ClientConfig {
    ClientConfig {
        keepalive_interval: Some(Duration::from_secs(cfg.keepalive_interval_secs)),
        keepalive_max: 3,
        ..Default::default()
    }
}

#[async_trait]
trait PendingSession: Send {
    async fn request_pty(&mut self, cfg: &SshConnectConfig) -> Result<bool, SshError>;
    async fn request_shell(&mut self) -> Result<bool, SshError>;
    async fn close(&mut self);
}

#[async_trait]
trait SessionOpener: Sync {
    type Session: PendingSession;
    async fn open_session(&self) -> Result<Self::Session, SshError>;
}

/// Prefers a shell; when the remote refuses it, retries on a fresh channel with a pty only.
async fn open_interactive<O: SessionOpener>(
    opener: &O,
    cfg: &SshConnectConfig,
) -> Result<O::Session, SshError> {
    let mut session = opener.open_session().await?;
    if !session.request_pty(cfg).await? {
        warn!(target_host = %cfg.target(), "pty request rejected");
    }
    if session.request_shell().await? {
        return Ok(session);
    }

    warn!(target_host = %cfg.target(), "shell request rejected, falling back to a raw pty session");
    session.close().await;
    let mut fallback = opener.open_session().await?;
    if !fallback.request_pty(cfg).await? {
        return Err(SshError::Protocol(
            "remote rejected both shell and pty allocation".to_string(),
        ));
    }
    Ok(fallback)
}

struct RusshSession {
    channel: Channel<Msg>,
    early: Vec<Vec<u8>>,
}

#[async_trait]
impl PendingSession for RusshSession {
    async fn request_pty(&mut self, cfg: &SshConnectConfig) -> Result<bool, SshError> {
        self.channel
            .request_pty(true, &cfg.term, cfg.term_width, cfg.term_height, 0, 0, &[])
            .await
            .map_err(SshError::from_setup)?;
        Ok(await_reply(&mut self.channel, &mut self.early).await)
    }

    async fn request_shell(&mut self) -> Result<bool, SshError> {
        self.channel
            .request_shell(true)
            .await
            .map_err(SshError::from_setup)?;
        Ok(await_reply(&mut self.channel, &mut self.early).await)
    }

    async fn close(&mut self) {
        if let Err(err) = self.channel.close().await {
            debug!(error = %err, "rejected channel close");
        }
    }
}

#[async_trait]
impl SessionOpener for Handle<ClientHandler> {
    type Session = RusshSession;

    async fn open_session(&self) -> Result<RusshSession, SshError> {
        let channel = self
            .channel_open_session()
            .await
            .map_err(SshError::from_setup)?;
        Ok(RusshSession {
            channel,
            early: Vec::new(),
        })
    }
}

/// Waits for the reply to a want-reply request, keeping any data that races ahead of it.
async fn await_reply(channel: &mut Channel<Msg>, early: &mut Vec<Vec<u8>>) -> bool {
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Success => return true,
            ChannelMsg::Failure | ChannelMsg::Eof | ChannelMsg::Close => return false,
            ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. } => {
                early.push(data.to_vec())
            }
            _ => {}
        }
    }
    false
}

fn attach(channel: Channel<Msg>, handle: Handle<ClientHandler>, early: Vec<Vec<u8>>) -> ShellChannel {
    let buffer = Arc::new(ChannelBuffer::new());
    for bytes in &early {
        buffer.push(bytes);
    }
    let (mut reader, writer) = channel.split();
    let pump_buffer = buffer.clone();
    tokio::spawn(async move {
        while let Some(msg) = reader.wait().await {
            match msg {
                ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. } => {
                    pump_buffer.push(&data)
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    debug!(exit_status, "remote shell exited");
                    pump_buffer.set_exit_status(exit_status);
                }
                ChannelMsg::Eof => pump_buffer.set_eof(),
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        pump_buffer.set_closed();
    });
    ShellChannel {
        source: buffer.clone(),
        sink: Box::new(RusshSink {
            writer,
            handle,
            buffer,
        }),
    }
}

struct RusshSink {
    writer: ChannelWriteHalf<Msg>,
    handle: Handle<ClientHandler>,
    buffer: Arc<ChannelBuffer>,
}

#[async_trait]
impl ChannelSink for RusshSink {
    fn send_ready(&self) -> bool {
        !self.handle.is_closed() && !self.buffer.is_closed()
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), SshError> {
        let mut writer = self.writer.make_writer();
        writer
            .write_all(data)
            .await
            .map_err(|e| SshError::ChannelWrite(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| SshError::ChannelWrite(e.to_string()))
    }

    async fn resize(&mut self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.writer
            .window_change(cols, rows, 0, 0)
            .await
            .map_err(|e| SshError::ChannelWrite(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), SshError> {
        if let Err(err) = self.writer.close().await {
            debug!(error = %err, "channel close");
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "session closed", "en")
            .await
            .map_err(|e| SshError::Protocol(e.to_string()))
    }
}

struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Option<Arc<Mutex<KnownHosts>>>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        let host = self.host.clone();
        let port = self.port;
        let policy = self.policy.clone();
        let known_hosts = self.known_hosts.clone();
        let key = server_public_key.clone();
        async move {
            if policy == HostKeyPolicy::InsecureAcceptAny {
                warn!(host = %host, port, "accepting any host key");
                return Ok(true);
            }
            let Some(known_hosts) = known_hosts else {
                warn!(host = %host, port, "known_hosts not configured");
                return Ok(false);
            };
            let mut known_hosts = known_hosts.lock().await;
            match known_hosts.verify(&host, port, &key, &policy) {
                Ok(trusted) => Ok(trusted),
                Err(err) => {
                    warn!(host = %host, port, error = %err, "host key verification failed");
                    Ok(false)
                }
            }
        }
    }
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    username: &str,
    auth: &AuthMethod,
) -> Result<(), SshError> {
    let user = username.to_string();
    let granted = match auth {
        AuthMethod::Password { password } => handle
            .authenticate_password(user, password.to_string())
            .await
            .map(|res| accepted(&res))
            .map_err(SshError::from_setup)?,
        AuthMethod::Key {
            private_key_path,
            passphrase,
        } => {
            let key = load_private_key(private_key_path, passphrase.as_ref().map(|v| v.as_str()))?;
            let hash = if matches!(key.algorithm(), Algorithm::Rsa { .. }) {
                handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(SshError::from_setup)?
                    .flatten()
            } else {
                None
            };
            handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash))
                .await
                .map(|res| accepted(&res))
                .map_err(SshError::from_setup)?
        }
        AuthMethod::Agent => authenticate_with_agent(handle, &user).await?,
    };
    if granted {
        Ok(())
    } else {
        Err(SshError::Authentication(format!(
            "credentials rejected for user {username}"
        )))
    }
}

fn accepted(res: &AuthResult) -> bool {
    matches!(res, AuthResult::Success)
}

fn load_private_key(
    path: &Path,
    passphrase: Option<&str>,
) -> Result<russh::keys::PrivateKey, SshError> {
    load_secret_key(path, passphrase)
        .map_err(|e| SshError::Authentication(format!("{}: {e}", path.display())))
}

async fn authenticate_with_agent(
    handle: &mut Handle<ClientHandler>,
    user: &str,
) -> Result<bool, SshError> {
    #[cfg(unix)]
    let mut agent = russh::keys::agent::client::AgentClient::connect_env()
        .await
        .map_err(|e| SshError::Authentication(format!("ssh-agent unavailable: {e}")))?;

    #[cfg(windows)]
    let mut agent = {
        use tokio::net::windows::named_pipe::ClientOptions;
        let sock = std::env::var("SSH_AUTH_SOCK")
            .unwrap_or_else(|_| "\\\\.\\pipe\\openssh-ssh-agent".to_string());
        let stream = ClientOptions::new()
            .open(sock)
            .map_err(|e| SshError::Authentication(format!("ssh-agent unavailable: {e}")))?;
        russh::keys::agent::client::AgentClient::connect(stream)
    };

    let keys = agent
        .request_identities()
        .await
        .map_err(|e| SshError::Authentication(format!("ssh-agent identities: {e}")))?;
    for key in keys {
        let hash = if matches!(key.algorithm(), Algorithm::Rsa { .. }) {
            handle
                .best_supported_rsa_hash()
                .await
                .map_err(SshError::from_setup)?
                .flatten()
        } else {
            None
        };
        let res = handle
            .authenticate_publickey_with(user.to_string(), key, hash, &mut agent)
            .await
            .map_err(|e| SshError::Authentication(e.to_string()))?;
        if accepted(&res) {
            return Ok(true);
        }
    }
    Ok(false)
}
