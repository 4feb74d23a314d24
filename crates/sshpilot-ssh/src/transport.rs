use crate::channel::{ChannelSink, ChannelSource, ShellConnector};
use crate::config::{SendRetry, SshConnectConfig};
use crate::error::SshError;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Owns the authenticated connection and its single interactive channel.
///
/// All writes go through `&mut self`, so whoever owns the transport is the
/// only writer on the channel.
pub struct SessionTransport {
    connector: Arc<dyn ShellConnector>,
    state: TransportState,
    sink: Option<Box<dyn ChannelSink>>,
    retry: SendRetry,
}

impl SessionTransport {
    pub fn new(connector: Arc<dyn ShellConnector>) -> Self {
        Self {
            connector,
            state: TransportState::Disconnected,
            sink: None,
            retry: SendRetry::default(),
        }
    }

    pub fn with_retry(mut self, retry: SendRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }

    pub async fn connect(
        &mut self,
        cfg: &SshConnectConfig,
    ) -> Result<Arc<dyn ChannelSource>, SshError> {
        if self.state != TransportState::Disconnected {
            return Err(SshError::AlreadyConnected);
        }
        self.state = TransportState::Connecting;
        info!(target_host = %cfg.target(), timeout_ms = cfg.connect_timeout_ms, "connecting");

        let opened = tokio::time::timeout(cfg.connect_timeout(), self.connector.open_shell(cfg))
            .await
            .unwrap_or_else(|_| {
                Err(SshError::Connection(format!(
                    "{}: timed out after {} ms",
                    cfg.target(),
                    cfg.connect_timeout_ms
                )))
            });

        match opened {
            Ok(channel) => {
                self.sink = Some(channel.sink);
                self.state = TransportState::Connected;
                info!(target_host = %cfg.target(), "connected");
                Ok(channel.source)
            }
            Err(err) => {
                self.state = TransportState::Disconnected;
                warn!(target_host = %cfg.target(), error = %err, "connect failed");
                Err(err)
            }
        }
    }

    /// Writes to the channel, retrying briefly while it is not writable.
    /// Persistent failures are logged and the data dropped; a dead channel
    /// shows up through the reader instead.
    pub async fn send(&mut self, data: &[u8]) {
        if !self.is_connected() {
            debug!(len = data.len(), "send while not connected, dropped");
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let attempts = self.retry.attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            if sink.send_ready() {
                match sink.send(data).await {
                    Ok(()) => return,
                    Err(err) => {
                        debug!(attempt, error = %err, "channel write failed");
                        last_error = Some(err);
                    }
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry.backoff).await;
            }
        }
        let error = last_error
            .unwrap_or_else(|| SshError::ChannelWrite("channel not writable".to_string()));
        warn!(len = data.len(), attempts, error = %error, "dropping channel write");
    }

    pub async fn resize(&mut self, cols: u32, rows: u32) {
        if !self.is_connected() {
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if !sink.send_ready() {
            return;
        }
        if let Err(err) = sink.resize(cols, rows).await {
            debug!(cols, rows, error = %err, "resize failed");
        }
    }

    pub async fn close(&mut self) {
        let Some(mut sink) = self.sink.take() else {
            self.state = TransportState::Disconnected;
            return;
        };
        self.state = TransportState::Closing;
        if let Err(err) = sink.close().await {
            debug!(error = %err, "close");
        }
        self.state = TransportState::Disconnected;
        info!("transport closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelBuffer, ShellChannel};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct SinkLog {
        writes: Vec<Vec<u8>>,
        resizes: Vec<(u32, u32)>,
        closes: u32,
    }

    struct FakeSink {
        log: Arc<Mutex<SinkLog>>,
        not_ready_for: u32,
        fail_writes: bool,
    }

    #[async_trait]
    impl ChannelSink for FakeSink {
        fn send_ready(&self) -> bool {
            self.not_ready_for == 0
        }

        async fn send(&mut self, data: &[u8]) -> Result<(), SshError> {
            if self.fail_writes {
                return Err(SshError::ChannelWrite("broken pipe".into()));
            }
            self.log.lock().writes.push(data.to_vec());
            Ok(())
        }

        async fn resize(&mut self, cols: u32, rows: u32) -> Result<(), SshError> {
            self.log.lock().resizes.push((cols, rows));
            Ok(())
        }

        async fn close(&mut self) -> Result<(), SshError> {
            self.log.lock().closes += 1;
            Ok(())
        }
    }

    struct SlowSink {
        inner: FakeSink,
        checks: Mutex<u32>,
    }

    #[async_trait]
    impl ChannelSink for SlowSink {
        fn send_ready(&self) -> bool {
            let mut checks = self.checks.lock();
            *checks += 1;
            *checks > self.inner.not_ready_for
        }

        async fn send(&mut self, data: &[u8]) -> Result<(), SshError> {
            self.inner.send(data).await
        }

        async fn resize(&mut self, cols: u32, rows: u32) -> Result<(), SshError> {
            self.inner.resize(cols, rows).await
        }

        async fn close(&mut self) -> Result<(), SshError> {
            self.inner.close().await
        }
    }

    enum Outcome {
        Open { not_ready_for: u32, fail_writes: bool },
        Reject(fn() -> SshError),
        Hang,
    }

    struct FakeConnector {
        outcome: Outcome,
        log: Arc<Mutex<SinkLog>>,
    }

    impl FakeConnector {
        fn new(outcome: Outcome) -> (Arc<Self>, Arc<Mutex<SinkLog>>) {
            let log = Arc::new(Mutex::new(SinkLog::default()));
            (
                Arc::new(Self {
                    outcome,
                    log: log.clone(),
                }),
                log,
            )
        }
    }

    #[async_trait]
    impl ShellConnector for FakeConnector {
        async fn open_shell(&self, _cfg: &SshConnectConfig) -> Result<ShellChannel, SshError> {
            match &self.outcome {
                Outcome::Open {
                    not_ready_for,
                    fail_writes,
                } => {
                    let inner = FakeSink {
                        log: self.log.clone(),
                        not_ready_for: *not_ready_for,
                        fail_writes: *fail_writes,
                    };
                    Ok(ShellChannel {
                        source: Arc::new(ChannelBuffer::new()),
                        sink: Box::new(SlowSink {
                            inner,
                            checks: Mutex::new(0),
                        }),
                    })
                }
                Outcome::Reject(make) => Err(make()),
                Outcome::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(SshError::Connection("unreachable".into()))
                }
            }
        }
    }

    fn cfg() -> SshConnectConfig {
        SshConnectConfig::new("10.0.0.12", 22, "ops")
    }

    fn fast_retry() -> SendRetry {
        SendRetry {
            attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn connect_with_valid_credentials_accepts_writes() {
        let (connector, log) = FakeConnector::new(Outcome::Open {
            not_ready_for: 0,
            fail_writes: false,
        });
        let mut transport = SessionTransport::new(connector);
        transport.connect(&cfg()).await.unwrap();
        assert_eq!(transport.state(), TransportState::Connected);

        transport.send(b"ls -la\n").await;
        transport.resize(100, 30).await;
        let log = log.lock();
        assert_eq!(log.writes, vec![b"ls -la\n".to_vec()]);
        assert_eq!(log.resizes, vec![(100, 30)]);
    }

    #[tokio::test]
    async fn rejected_credentials_leave_transport_disconnected() {
        let (connector, _) = FakeConnector::new(Outcome::Reject(|| {
            SshError::Authentication("credentials rejected for user ops".into())
        }));
        let mut transport = SessionTransport::new(connector);
        let err = transport.connect(&cfg()).await.err().unwrap();
        assert!(matches!(err, SshError::Authentication(_)));
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn connect_timeout_is_a_connection_error() {
        let (connector, _) = FakeConnector::new(Outcome::Hang);
        let mut transport = SessionTransport::new(connector);
        let mut cfg = cfg();
        cfg.connect_timeout_ms = 20;
        let err = transport.connect(&cfg).await.err().unwrap();
        assert!(matches!(err, SshError::Connection(_)));
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn second_connect_is_refused() {
        let (connector, _) = FakeConnector::new(Outcome::Open {
            not_ready_for: 0,
            fail_writes: false,
        });
        let mut transport = SessionTransport::new(connector);
        transport.connect(&cfg()).await.unwrap();
        assert!(matches!(
            transport.connect(&cfg()).await,
            Err(SshError::AlreadyConnected)
        ));
        assert_eq!(transport.state(), TransportState::Connected);
    }

    #[tokio::test]
    async fn send_waits_for_write_readiness() {
        let (connector, log) = FakeConnector::new(Outcome::Open {
            not_ready_for: 2,
            fail_writes: false,
        });
        let mut transport = SessionTransport::new(connector).with_retry(fast_retry());
        transport.connect(&cfg()).await.unwrap();
        transport.send(b"pwd\n").await;
        assert_eq!(log.lock().writes, vec![b"pwd\n".to_vec()]);
    }

    #[tokio::test]
    async fn persistent_write_errors_are_dropped() {
        let (connector, log) = FakeConnector::new(Outcome::Open {
            not_ready_for: 0,
            fail_writes: true,
        });
        let mut transport = SessionTransport::new(connector).with_retry(fast_retry());
        transport.connect(&cfg()).await.unwrap();
        transport.send(b"whoami\n").await;
        assert!(log.lock().writes.is_empty());
        assert_eq!(transport.state(), TransportState::Connected);
    }

    #[tokio::test]
    async fn resize_is_a_no_op_until_writable() {
        let (connector, log) = FakeConnector::new(Outcome::Open {
            not_ready_for: 10,
            fail_writes: false,
        });
        let mut transport = SessionTransport::new(connector);
        transport.resize(80, 24).await;
        transport.connect(&cfg()).await.unwrap();
        transport.resize(80, 24).await;
        assert!(log.lock().resizes.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (connector, log) = FakeConnector::new(Outcome::Open {
            not_ready_for: 0,
            fail_writes: false,
        });
        let mut transport = SessionTransport::new(connector);
        transport.close().await;
        transport.connect(&cfg()).await.unwrap();
        transport.close().await;
        transport.close().await;
        assert_eq!(transport.state(), TransportState::Disconnected);
        assert_eq!(log.lock().closes, 1);

        transport.send(b"ignored\n").await;
        assert!(log.lock().writes.is_empty());
    }
}
