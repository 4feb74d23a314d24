use crate::session::SessionState;
use std::fmt;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeLevel::Info => f.write_str("info"),
            NoticeLevel::Warn => f.write_str("warn"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    SessionStateChanged {
        session_id: Uuid,
        state: SessionState,
    },
    ChannelClosed {
        session_id: Uuid,
    },
    Notification {
        session_id: Uuid,
        level: NoticeLevel,
        message: String,
    },
}

impl Event {
    pub fn session_id(&self) -> Uuid {
        match self {
            Event::SessionStateChanged { session_id, .. }
            | Event::ChannelClosed { session_id }
            | Event::Notification { session_id, .. } => *session_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn send(&self, event: Event) {
        if self.sender.send(event).is_err() {
            trace!("event published without subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
