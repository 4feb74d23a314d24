use crate::conversation::ConversationTurn;
use crate::provider::{CompletionProvider, ProviderError};
use async_trait::async_trait;
use parking_lot::Mutex;
use sshpilot_ssh::channel::ChannelBuffer;
use sshpilot_ssh::{AuthMethod, ChannelSink, ShellChannel, ShellConnector, SshConnectConfig, SshError};
use std::collections::VecDeque;
use std::sync::Arc;

pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl ScriptedProvider {
    pub fn new<'a>(
        replies: impl IntoIterator<Item = Result<&'a str, ProviderError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string))
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Vec<ConversationTurn>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, turns: Vec<ConversationTurn>) -> Result<String, ProviderError> {
        self.requests.lock().push(turns);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or(Err(ProviderError::EmptyResponse))
    }
}

#[derive(Default)]
pub struct SinkLog {
    pub writes: Vec<Vec<u8>>,
    pub resizes: Vec<(u32, u32)>,
    pub closes: u32,
}

impl SinkLog {
    pub fn written(&self) -> String {
        self.writes
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }
}

struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    buffer: Arc<ChannelBuffer>,
}

#[async_trait]
impl ChannelSink for RecordingSink {
    fn send_ready(&self) -> bool {
        true
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), SshError> {
        self.log.lock().writes.push(data.to_vec());
        Ok(())
    }

    async fn resize(&mut self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.log.lock().resizes.push((cols, rows));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SshError> {
        self.log.lock().closes += 1;
        self.buffer.set_closed();
        Ok(())
    }
}

pub struct FakeConnector {
    pub password: String,
    pub buffer: Arc<ChannelBuffer>,
    pub log: Arc<Mutex<SinkLog>>,
}

impl FakeConnector {
    pub fn new(password: &str) -> Arc<Self> {
        Arc::new(Self {
            password: password.to_string(),
            buffer: Arc::new(ChannelBuffer::new()),
            log: Arc::new(Mutex::new(SinkLog::default())),
        })
    }
}

#[async_trait]
impl ShellConnector for FakeConnector {
    async fn open_shell(&self, cfg: &SshConnectConfig) -> Result<ShellChannel, SshError> {
        match &cfg.auth_method {
            AuthMethod::Password { password } if password.as_str() == self.password => {}
            _ => {
                return Err(SshError::Authentication(format!(
                    "credentials rejected for user {}",
                    cfg.username
                )))
            }
        }
        Ok(ShellChannel {
            source: self.buffer.clone(),
            sink: Box::new(RecordingSink {
                log: self.log.clone(),
                buffer: self.buffer.clone(),
            }),
        })
    }
}
