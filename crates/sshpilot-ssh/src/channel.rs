use crate::config::SshConnectConfig;
use crate::error::SshError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[async_trait]
pub trait ChannelSource: Send + Sync {
    fn is_closed(&self) -> bool;
    fn exit_status_ready(&self) -> bool;
    fn recv_ready(&self) -> bool;
    fn recv(&self, max: usize) -> Result<Vec<u8>, SshError>;

    async fn wait_readable(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }
}

#[async_trait]
pub trait ChannelSink: Send {
    fn send_ready(&self) -> bool;
    async fn send(&mut self, data: &[u8]) -> Result<(), SshError>;
    async fn resize(&mut self, cols: u32, rows: u32) -> Result<(), SshError>;
    async fn close(&mut self) -> Result<(), SshError>;
}

pub struct ShellChannel {
    pub source: Arc<dyn ChannelSource>,
    pub sink: Box<dyn ChannelSink>,
}

#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn open_shell(&self, cfg: &SshConnectConfig) -> Result<ShellChannel, SshError>;
}

#[derive(Default)]
struct BufferState {
    data: VecDeque<u8>,
    exit_status: Option<u32>,
    eof: bool,
    closed: bool,
}

#[derive(Default)]
pub struct ChannelBuffer {
    state: Mutex<BufferState>,
    notify: Notify,
}

impl ChannelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.state.lock().data.extend(bytes);
        self.notify.notify_one();
    }

    pub fn set_exit_status(&self, status: u32) {
        self.state.lock().exit_status = Some(status);
        self.notify.notify_one();
    }

    pub fn set_eof(&self) {
        self.state.lock().eof = true;
        self.notify.notify_one();
    }

    pub fn set_closed(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

}

#[async_trait]
impl ChannelSource for ChannelBuffer {
    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn exit_status_ready(&self) -> bool {
        self.state.lock().exit_status.is_some()
    }

    fn recv_ready(&self) -> bool {
        !self.state.lock().data.is_empty()
    }

    fn recv(&self, max: usize) -> Result<Vec<u8>, SshError> {
        let mut state = self.state.lock();
        if state.data.is_empty() {
            return Err(if state.closed || state.eof {
                SshError::Read("channel closed".to_string())
            } else {
                SshError::Read("no data available".to_string())
            });
        }
        let take = max.min(state.data.len());
        Ok(state.data.drain(..take).collect())
    }

    async fn wait_readable(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_drains_in_order_and_respects_max() {
        let buffer = ChannelBuffer::new();
        buffer.push(b"hello ");
        buffer.push(b"world");
        assert!(buffer.recv_ready());
        assert_eq!(buffer.recv(4).unwrap(), b"hell");
        assert_eq!(buffer.recv(1024).unwrap(), b"o world");
        assert!(!buffer.recv_ready());
    }

    #[test]
    fn recv_on_closed_empty_buffer_is_read_error() {
        let buffer = ChannelBuffer::new();
        buffer.set_closed();
        assert!(matches!(buffer.recv(16), Err(SshError::Read(_))));
        assert!(buffer.is_closed());
    }

    #[test]
    fn exit_status_is_reported() {
        let buffer = ChannelBuffer::new();
        assert!(!buffer.exit_status_ready());
        buffer.set_exit_status(0);
        assert!(buffer.exit_status_ready());
        assert!(!buffer.is_closed());
    }

    #[tokio::test]
    async fn wait_readable_wakes_on_push() {
        let buffer = Arc::new(ChannelBuffer::new());
        let producer = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            producer.push(b"x");
        });
        tokio::time::timeout(
            Duration::from_secs(2),
            buffer.wait_readable(Duration::from_secs(10)),
        )
        .await
        .unwrap();
        assert!(buffer.recv_ready());
    }
}
