use crate::conversation::{ConversationTurn, OperatingMode};
use crate::extractor::CommandExtractor;
use crate::prompts;
use crate::provider::{CompletionProvider, ProviderError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RequestKind {
    Prompt,
    Explain,
}

#[derive(Debug)]
pub struct ProviderReply {
    generation: u64,
    kind: RequestKind,
    result: Result<String, ProviderError>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineAction {
    Render {
        content: String,
        suggested: Option<String>,
    },
    Dispatch(String),
    Error(String),
}

/// Conversation state plus the routing of replies into the live session.
///
/// Provider requests run on spawned tasks and report through the receiver
/// returned by [`AssistantPipeline::new`]. Overlapping prompts are allowed;
/// their replies are appended in completion order, which can differ from
/// submission order.
pub struct AssistantPipeline {
    provider: Arc<dyn CompletionProvider>,
    extractor: CommandExtractor,
    mode: OperatingMode,
    history: Vec<ConversationTurn>,
    awaiting_output: bool,
    last_command: Option<String>,
    generation: u64,
    in_flight: usize,
    replies: mpsc::UnboundedSender<ProviderReply>,
}

impl AssistantPipeline {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        mode: OperatingMode,
    ) -> (Self, mpsc::UnboundedReceiver<ProviderReply>) {
        let (replies, rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            provider,
            extractor: CommandExtractor::new(),
            mode,
            history: vec![ConversationTurn::system(prompts::system_prompt(mode))],
            awaiting_output: false,
            last_command: None,
            generation: 0,
            in_flight: 0,
            replies,
        };
        (pipeline, rx)
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn awaiting_session_output(&self) -> bool {
        self.awaiting_output
    }

    pub fn last_command(&self) -> Option<&str> {
        self.last_command.as_deref()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn set_mode(&mut self, mode: OperatingMode) {
        info!(from = %self.mode, to = %mode, "assistant mode changed");
        self.mode = mode;
        self.reset();
    }

    pub fn new_chat(&mut self) {
        debug!(mode = %self.mode, "new chat");
        self.reset();
    }

    fn reset(&mut self) {
        self.detach();
        self.history = vec![ConversationTurn::system(prompts::system_prompt(self.mode))];
        self.last_command = None;
    }

    pub fn detach(&mut self) {
        if self.in_flight > 0 {
            debug!(in_flight = self.in_flight, "detaching outstanding ai requests");
        }
        self.generation += 1;
        self.in_flight = 0;
        self.awaiting_output = false;
    }

    pub fn send_prompt(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.history.push(ConversationTurn::user(text));
        self.spawn_request(RequestKind::Prompt);
        true
    }

    /// Feeds session output observed by the control task. After a dispatched
    /// command, the first output triggers one explanation request.
    pub fn on_session_output(&mut self, text: &str) -> bool {
        if !self.awaiting_output {
            return false;
        }
        self.awaiting_output = false;
        let command = self.last_command.clone().unwrap_or_default();
        self.history
            .push(ConversationTurn::user(prompts::explain_output(&command, text)));
        self.spawn_request(RequestKind::Explain);
        true
    }

    pub fn handle_reply(&mut self, reply: ProviderReply) -> Vec<PipelineAction> {
        if reply.generation != self.generation {
            debug!(
                generation = reply.generation,
                current = self.generation,
                "discarding reply from a reset conversation"
            );
            return Vec::new();
        }
        self.in_flight = self.in_flight.saturating_sub(1);

        let content = match reply.result {
            Ok(content) => content,
            Err(err) => {
                warn!(error = %err, kind = ?reply.kind, "ai request failed");
                return vec![PipelineAction::Error(err.to_string())];
            }
        };
        self.history.push(ConversationTurn::assistant(content.clone()));

        if reply.kind == RequestKind::Explain {
            return vec![PipelineAction::Render {
                content,
                suggested: None,
            }];
        }

        let command = self.extractor.extract(&content);
        match command {
            Some(command) if self.mode.dispatches_commands() => {
                info!(lines = command.lines().count(), "dispatching extracted command");
                self.awaiting_output = true;
                self.last_command = Some(command.clone());
                vec![
                    PipelineAction::Render {
                        content,
                        suggested: None,
                    },
                    PipelineAction::Dispatch(with_newline(command)),
                ]
            }
            suggested => vec![PipelineAction::Render { content, suggested }],
        }
    }

    fn spawn_request(&mut self, kind: RequestKind) {
        self.in_flight += 1;
        let provider = self.provider.clone();
        let turns = self.history.clone();
        let replies = self.replies.clone();
        let generation = self.generation;
        debug!(?kind, turns = turns.len(), generation, "ai request queued");
        tokio::spawn(async move {
            let result = provider.complete(turns).await;
            let _ = replies.send(ProviderReply {
                generation,
                kind,
                result,
            });
        });
    }
}

fn with_newline(mut command: String) -> String {
    if !command.ends_with('\n') {
        command.push('\n');
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use crate::testing::ScriptedProvider;
    use std::time::Duration;

    async fn next(rx: &mut mpsc::UnboundedReceiver<ProviderReply>) -> ProviderReply {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    const LS_REPLY: &str = "EXPLANATION:\nLists the files.\n```bash\nls -la\n```";

    #[tokio::test]
    async fn agent_mode_dispatches_extracted_command() {
        let provider = ScriptedProvider::new([Ok(LS_REPLY)]);
        let (mut pipeline, mut rx) = AssistantPipeline::new(provider.clone(), OperatingMode::Agent);
        assert!(pipeline.send_prompt("  show me the files "));
        assert_eq!(pipeline.in_flight(), 1);

        let actions = pipeline.handle_reply(next(&mut rx).await);
        assert_eq!(
            actions,
            vec![
                PipelineAction::Render {
                    content: LS_REPLY.to_string(),
                    suggested: None
                },
                PipelineAction::Dispatch("ls -la\n".to_string()),
            ]
        );
        assert!(pipeline.awaiting_session_output());
        assert_eq!(pipeline.last_command(), Some("ls -la"));
        assert_eq!(pipeline.in_flight(), 0);

        let sent = provider.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 2);
        assert_eq!(sent[0][1], ConversationTurn::user("show me the files"));
    }

    #[tokio::test]
    async fn ask_mode_only_suggests() {
        let provider = ScriptedProvider::new([Ok(LS_REPLY)]);
        let (mut pipeline, mut rx) = AssistantPipeline::new(provider, OperatingMode::Ask);
        pipeline.send_prompt("show me the files");
        let actions = pipeline.handle_reply(next(&mut rx).await);
        assert_eq!(
            actions,
            vec![PipelineAction::Render {
                content: LS_REPLY.to_string(),
                suggested: Some("ls -la".to_string()),
            }]
        );
        assert!(!pipeline.awaiting_session_output());
        assert!(!pipeline.on_session_output("total 0"));
    }

    #[tokio::test]
    async fn agent_reply_without_command_dispatches_nothing() {
        let provider = ScriptedProvider::new([Ok("Linux is a family of open source operating systems built on the Linux kernel.")]);
        let (mut pipeline, mut rx) = AssistantPipeline::new(provider, OperatingMode::Agent);
        pipeline.send_prompt("what is linux?");
        let actions = pipeline.handle_reply(next(&mut rx).await);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], PipelineAction::Render { .. }));
        assert!(!pipeline.awaiting_session_output());
    }

    #[tokio::test]
    async fn session_output_triggers_one_explanation() {
        let provider = ScriptedProvider::new([
            Ok(LS_REPLY),
            Ok("These are the files in your home directory."),
        ]);
        let (mut pipeline, mut rx) = AssistantPipeline::new(provider.clone(), OperatingMode::Agent);
        pipeline.send_prompt("show me the files");
        pipeline.handle_reply(next(&mut rx).await);

        assert!(pipeline.on_session_output("total 8\r\n-rw-r--r-- 1 ops ops 0 notes.txt\r\n"));
        assert!(!pipeline.awaiting_session_output());
        assert!(!pipeline.on_session_output("$ "));

        let actions = pipeline.handle_reply(next(&mut rx).await);
        assert_eq!(
            actions,
            vec![PipelineAction::Render {
                content: "These are the files in your home directory.".to_string(),
                suggested: None,
            }]
        );

        let explain_request = provider.requests().pop().unwrap();
        let asked = &explain_request.last().unwrap().content;
        assert_eq!(explain_request.last().unwrap().role, Role::User);
        assert!(asked.starts_with("I just ran the command: `ls -la`"));
        assert!(asked.contains("notes.txt"));

        let roles: Vec<Role> = pipeline.history().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn provider_error_keeps_user_turn_only() {
        let provider = ScriptedProvider::new([Err(ProviderError::Status {
            status: 500,
            body: "upstream down".to_string(),
        })]);
        let (mut pipeline, mut rx) = AssistantPipeline::new(provider, OperatingMode::Agent);
        pipeline.send_prompt("restart nginx");
        let actions = pipeline.handle_reply(next(&mut rx).await);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], PipelineAction::Error(msg) if msg.contains("upstream down")));
        assert_eq!(pipeline.history().len(), 2);
        assert_eq!(pipeline.history()[1], ConversationTurn::user("restart nginx"));
        assert!(!pipeline.awaiting_session_output());
    }

    #[tokio::test]
    async fn switching_mode_resets_to_one_system_turn() {
        let provider = ScriptedProvider::new([Ok("hello")]);
        let (mut pipeline, mut rx) = AssistantPipeline::new(provider, OperatingMode::Ask);
        pipeline.send_prompt("hi");
        pipeline.handle_reply(next(&mut rx).await);
        assert_eq!(pipeline.history().len(), 3);

        for mode in [OperatingMode::Agent, OperatingMode::Ask, OperatingMode::Agent] {
            pipeline.set_mode(mode);
            assert_eq!(
                pipeline.history(),
                &[ConversationTurn::system(prompts::system_prompt(mode))]
            );
        }
    }

    #[tokio::test]
    async fn replies_after_reset_are_discarded() {
        let provider = ScriptedProvider::new([Ok(LS_REPLY)]);
        let (mut pipeline, mut rx) = AssistantPipeline::new(provider, OperatingMode::Agent);
        pipeline.send_prompt("show me the files");
        pipeline.new_chat();
        assert_eq!(pipeline.mode(), OperatingMode::Agent);

        let actions = pipeline.handle_reply(next(&mut rx).await);
        assert!(actions.is_empty());
        assert_eq!(pipeline.history().len(), 1);
        assert!(!pipeline.awaiting_session_output());
    }

    #[tokio::test]
    async fn overlapping_prompts_append_in_completion_order() {
        let provider = ScriptedProvider::new([Ok("first"), Ok("second")]);
        let (mut pipeline, mut rx) = AssistantPipeline::new(provider, OperatingMode::Ask);
        pipeline.send_prompt("one");
        pipeline.send_prompt("two");
        assert_eq!(pipeline.in_flight(), 2);

        let a = next(&mut rx).await;
        let b = next(&mut rx).await;
        let b_content = b.result.as_ref().unwrap().clone();
        pipeline.handle_reply(b);
        pipeline.handle_reply(a);
        assert_eq!(pipeline.in_flight(), 0);

        let history = pipeline.history();
        assert_eq!(history.len(), 5);
        assert_eq!(history[3], ConversationTurn::assistant(b_content));
    }

    #[test]
    fn dispatch_payload_is_newline_terminated() {
        assert_eq!(with_newline("ls".to_string()), "ls\n");
        assert_eq!(with_newline("cat <<'EOF'\nx\nEOF\n".to_string()), "cat <<'EOF'\nx\nEOF\n");
    }

    #[test]
    fn blank_prompts_are_ignored() {
        let provider = ScriptedProvider::new(Vec::<Result<&str, ProviderError>>::new());
        let (mut pipeline, _rx) = AssistantPipeline::new(provider, OperatingMode::Ask);
        assert!(!pipeline.send_prompt("   "));
        assert_eq!(pipeline.history().len(), 1);
    }
}
