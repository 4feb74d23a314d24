use parking_lot::Mutex;
use sshpilot_ssh::OutputChunk;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::debug;

pub trait OutputSink: Send {
    fn deliver(&mut self, chunk: OutputChunk);
}

impl OutputSink for mpsc::UnboundedSender<OutputChunk> {
    fn deliver(&mut self, chunk: OutputChunk) {
        let _ = self.send(chunk);
    }
}

struct BridgeState {
    ready: bool,
    pending: VecDeque<OutputChunk>,
    sink: Box<dyn OutputSink>,
}

/// Hands reader output to the consumer, holding it back until the consumer
/// reports it has finished initializing.
///
/// Delivery happens under the bridge lock, so chunks reach the sink in the
/// order `on_chunk` was called even while `mark_ready` is flushing.
pub struct OutputBridge {
    state: Mutex<BridgeState>,
}

impl OutputBridge {
    pub fn new(sink: impl OutputSink + 'static) -> Self {
        Self {
            state: Mutex::new(BridgeState {
                ready: false,
                pending: VecDeque::new(),
                sink: Box::new(sink),
            }),
        }
    }

    pub fn on_chunk(&self, chunk: OutputChunk) {
        let mut state = self.state.lock();
        if state.ready {
            state.sink.deliver(chunk);
        } else {
            state.pending.push_back(chunk);
        }
    }

    pub fn mark_ready(&self) -> bool {
        let mut state = self.state.lock();
        if state.ready {
            return false;
        }
        state.ready = true;
        let pending = std::mem::take(&mut state.pending);
        debug!(pending = pending.len(), "output consumer ready, flushing");
        for chunk in pending {
            state.sink.deliver(chunk);
        }
        true
    }
}
