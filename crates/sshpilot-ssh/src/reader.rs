use crate::channel::ChannelSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputChunk {
    seq: u64,
    text: String,
}

impl OutputChunk {
    pub fn new(seq: u64, text: impl Into<String>) -> Self {
        Self {
            seq,
            text: text.into(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ReaderConfig {
    pub chunk_size: usize,
    pub poll_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            poll_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderExit {
    Stopped,
    ExitStatus,
    ChannelClosed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReaderEvent {
    Chunk(OutputChunk),
    Finished(ReaderExit),
}

pub struct ChannelReader {
    stop: CancellationToken,
    task: JoinHandle<ReaderExit>,
}

impl ChannelReader {
    pub fn spawn<F>(source: Arc<dyn ChannelSource>, config: ReaderConfig, on_event: F) -> Self
    where
        F: FnMut(ReaderEvent) + Send + 'static,
    {
        let stop = CancellationToken::new();
        let task = tokio::spawn(run(source, config, stop.clone(), on_event));
        Self { stop, task }
    }

    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Requests a stop and waits for the loop to observe it, aborting after `timeout`.
    pub async fn stop(self, timeout: Duration) -> Option<ReaderExit> {
        self.request_stop();
        let mut task = self.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(err)) => {
                warn!(error = %err, "channel reader task failed");
                None
            }
            Err(_) => {
                warn!(?timeout, "channel reader did not stop in time, aborting");
                task.abort();
                None
            }
        }
    }
}

async fn run<F>(
    source: Arc<dyn ChannelSource>,
    config: ReaderConfig,
    stop: CancellationToken,
    mut on_event: F,
) -> ReaderExit
where
    F: FnMut(ReaderEvent),
{
    let mut decoder = Utf8Decoder::default();
    let mut seq = 0u64;
    let exit = loop {
        if stop.is_cancelled() {
            break ReaderExit::Stopped;
        }
        let pending = source.recv_ready();
        if !pending {
            if source.exit_status_ready() {
                info!("remote exit status ready with no pending data");
                break ReaderExit::ExitStatus;
            }
            if source.is_closed() {
                break ReaderExit::ChannelClosed;
            }
        }

        if pending {
            match source.recv(config.chunk_size) {
                Ok(bytes) => {
                    let text = decoder.decode(&bytes);
                    if !text.is_empty() {
                        on_event(ReaderEvent::Chunk(OutputChunk::new(seq, text)));
                        seq += 1;
                    }
                    continue;
                }
                Err(err) => {
                    if source.is_closed() {
                        debug!(error = %err, "read failed on closed channel");
                        break ReaderExit::ChannelClosed;
                    }
                    warn!(error = %err, "channel read failed");
                }
            }
        }

        tokio::select! {
            _ = stop.cancelled() => break ReaderExit::Stopped,
            _ = source.wait_readable(config.poll_interval) => {}
        }
    };

    let rest = decoder.finish();
    if !rest.is_empty() && exit != ReaderExit::Stopped {
        on_event(ReaderEvent::Chunk(OutputChunk::new(seq, rest)));
    }
    on_event(ReaderEvent::Finished(exit));
    exit
}

/// Lossy UTF-8 decoding that carries a split multi-byte sequence into the next read.
#[derive(Default)]
struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(bytes);
        let split = incomplete_tail(&buf);
        self.carry = buf.split_off(split);
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

fn incomplete_tail(buf: &[u8]) -> usize {
    let len = buf.len();
    for back in 1..=len.min(3) {
        let byte = buf[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            b if b & 0xE0 == 0xC0 => 2,
            b if b & 0xF0 == 0xE0 => 3,
            b if b & 0xF8 == 0xF0 => 4,
            _ => return len,
        };
        return if width > back { len - back } else { len };
    }
    len
}
