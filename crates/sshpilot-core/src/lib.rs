pub mod assistant;
pub mod bridge;
pub mod conversation;
pub mod error;
pub mod events;
pub mod extractor;
pub mod prompts;
pub mod provider;
pub mod session;

#[cfg(test)]
mod testing;

pub use assistant::{AssistantPipeline, PipelineAction, ProviderReply};
pub use bridge::{OutputBridge, OutputSink};
pub use conversation::{ConversationTurn, OperatingMode, Role};
pub use error::CoreError;
pub use events::{Event, EventBus, NoticeLevel};
pub use extractor::CommandExtractor;
pub use provider::{CompletionProvider, HttpCompletionProvider, ProviderError, ProviderKind};
pub use session::{ConnectParams, SessionController, SessionOptions, SessionState};
