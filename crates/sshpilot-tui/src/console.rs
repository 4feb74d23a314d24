use crate::keys::{binding, key_to_bytes, Binding};
use crate::transcript;
use anyhow::{bail, Result};
use crossterm::event::{
    self, Event as TermEvent, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures::StreamExt;
use sshpilot_core::{
    AssistantPipeline, Event, PipelineAction, ProviderReply, Role, SessionController,
    SessionState,
};
use sshpilot_ssh::OutputChunk;
use std::io::{self, Write};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const HELP: &str = "Ctrl-A ask the assistant, Ctrl-T switch mode, Ctrl-N new chat, Ctrl-Q quit";

#[derive(Debug, PartialEq, Eq)]
enum PromptOutcome {
    Pending(String),
    Submit(String),
    Cancel,
}

#[derive(Debug, Default)]
struct PromptEditor {
    buffer: String,
}

impl PromptEditor {
    fn apply(&mut self, key: &KeyEvent) -> PromptOutcome {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Enter => PromptOutcome::Submit(std::mem::take(&mut self.buffer)),
            KeyCode::Esc => PromptOutcome::Cancel,
            KeyCode::Char('c') if ctrl => PromptOutcome::Cancel,
            KeyCode::Backspace => match self.buffer.pop() {
                Some(_) => PromptOutcome::Pending("\x08 \x08".to_string()),
                None => PromptOutcome::Pending(String::new()),
            },
            KeyCode::Char(c) if !ctrl => {
                self.buffer.push(c);
                PromptOutcome::Pending(c.to_string())
            }
            _ => PromptOutcome::Pending(String::new()),
        }
    }

    fn paste(&mut self, text: &str) -> String {
        let flat: String = text
            .chars()
            .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
            .collect();
        self.buffer.push_str(&flat);
        flat
    }
}

pub struct Console {
    controller: SessionController,
    pipeline: AssistantPipeline,
    replies: mpsc::UnboundedReceiver<ProviderReply>,
    output: mpsc::UnboundedReceiver<OutputChunk>,
    events: broadcast::Receiver<Event>,
    editor: Option<PromptEditor>,
    held: Vec<OutputChunk>,
}

impl Console {
    pub fn new(
        controller: SessionController,
        pipeline: AssistantPipeline,
        replies: mpsc::UnboundedReceiver<ProviderReply>,
        output: mpsc::UnboundedReceiver<OutputChunk>,
        events: broadcast::Receiver<Event>,
    ) -> Self {
        Self {
            controller,
            pipeline,
            replies,
            output,
            events,
            editor: None,
            held: Vec::new(),
        }
    }

    fn print(&self, text: &str) -> Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    async fn run_loop(&mut self) -> Result<()> {
        let mut term_events = EventStream::new();
        if let Ok((cols, rows)) = crossterm::terminal::size() {
            self.controller.resize(cols, rows).await;
        }
        self.print(&transcript::render_notice(&format!(
            "{} mode. {HELP}",
            self.pipeline.mode()
        )))?;
        self.controller.mark_ready();

        loop {
            tokio::select! {
                maybe_event = term_events.next() => match maybe_event {
                    Some(Ok(event)) => {
                        if self.handle_terminal_event(event).await? {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "terminal input failed");
                        break;
                    }
                    None => break,
                },
                Some(chunk) = self.output.recv() => {
                    self.handle_output(chunk)?;
                }
                Some(reply) = self.replies.recv() => {
                    self.handle_reply(reply).await?;
                }
                maybe_bus = self.events.recv() => match maybe_bus {
                    Ok(Event::ChannelClosed { .. }) => {
                        self.drain_output()?;
                        self.print(&transcript::render_notice("connection closed by remote host"))?;
                        break;
                    }
                    Ok(Event::SessionStateChanged { state: SessionState::Failed(reason), .. }) => {
                        self.print(&transcript::render_error(&reason))?;
                    }
                    Ok(Event::Notification { level, message, .. }) => {
                        self.print(&transcript::render_notice(&format!("{level}: {message}")))?;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "event bus lagged");
                    }
                    Err(RecvError::Closed) => {}
                }
            }
        }
        Ok(())
    }

    fn handle_output(&mut self, chunk: OutputChunk) -> Result<()> {
        if self.pipeline.on_session_output(chunk.text()) {
            debug!(seq = chunk.seq(), "session output sent for explanation");
        }
        if self.editor.is_some() {
            self.held.push(chunk);
            return Ok(());
        }
        self.print(chunk.text())
    }

    fn drain_output(&mut self) -> Result<()> {
        while let Ok(chunk) = self.output.try_recv() {
            self.handle_output(chunk)?;
        }
        Ok(())
    }

    fn release_held(&mut self) -> Result<()> {
        let held = std::mem::take(&mut self.held);
        for chunk in held {
            self.print(chunk.text())?;
        }
        Ok(())
    }

    fn redraw_prompt(&self) -> Result<()> {
        if let Some(editor) = &self.editor {
            self.print(&transcript::prompt_prefix(self.pipeline.mode()))?;
            self.print(&editor.buffer)?;
        }
        Ok(())
    }

    async fn handle_reply(&mut self, reply: ProviderReply) -> Result<()> {
        let actions = self.pipeline.handle_reply(reply);
        if actions.is_empty() {
            return Ok(());
        }
        for action in actions {
            match action {
                PipelineAction::Render { content, suggested } => {
                    self.print(&transcript::render_turn(
                        Role::Assistant,
                        self.pipeline.mode(),
                        &content,
                    ))?;
                    if let Some(command) = suggested {
                        self.print(&transcript::render_suggestion(&command))?;
                    }
                }
                PipelineAction::Dispatch(command) => {
                    info!(bytes = command.len(), "dispatching assistant command");
                    self.controller.send(command.as_bytes()).await;
                    if self.pipeline.awaiting_session_output() {
                        self.print(&transcript::render_notice("command sent, waiting for its output"))?;
                    }
                }
                PipelineAction::Error(message) => {
                    self.print(&transcript::render_error(&message))?;
                }
            }
        }
        self.redraw_prompt()
    }

    async fn handle_terminal_event(&mut self, event: TermEvent) -> Result<bool> {
        match event {
            TermEvent::Key(key) => self.handle_key(key).await,
            TermEvent::Resize(cols, rows) => {
                self.controller.resize(cols, rows).await;
                Ok(false)
            }
            TermEvent::Paste(text) => {
                match self.editor.as_mut() {
                    Some(editor) => {
                        let echo = editor.paste(&text);
                        self.print(&echo)?;
                    }
                    None => self.controller.send(text.as_bytes()).await,
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    async fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if key.kind == KeyEventKind::Release {
            return Ok(false);
        }
        let shortcut = binding(&key);
        if shortcut == Some(Binding::Quit) {
            return Ok(true);
        }

        if let Some(editor) = self.editor.as_mut() {
            match editor.apply(&key) {
                PromptOutcome::Pending(echo) => {
                    if !echo.is_empty() {
                        self.print(&echo)?;
                    }
                }
                PromptOutcome::Submit(text) => {
                    self.editor = None;
                    self.print("\r\n")?;
                    if self.pipeline.send_prompt(&text) {
                        debug!(in_flight = self.pipeline.in_flight(), "prompt submitted");
                    }
                    self.release_held()?;
                }
                PromptOutcome::Cancel => {
                    self.editor = None;
                    self.print(&transcript::render_notice("prompt cancelled"))?;
                    self.release_held()?;
                }
            }
            return Ok(false);
        }

        match shortcut {
            Some(Binding::Prompt) => {
                self.editor = Some(PromptEditor::default());
                self.redraw_prompt()?;
            }
            Some(Binding::ToggleMode) => {
                let mode = self.pipeline.mode().toggled();
                self.pipeline.set_mode(mode);
                self.print(&transcript::render_notice(&format!(
                    "switched to {mode} mode, conversation reset"
                )))?;
            }
            Some(Binding::NewChat) => {
                self.pipeline.new_chat();
                self.print(&transcript::render_notice("new chat started"))?;
            }
            Some(Binding::Quit) => return Ok(true),
            None => {
                if let Some(bytes) = key_to_bytes(&key) {
                    self.controller.send(&bytes).await;
                }
            }
        }
        Ok(false)
    }

    async fn shutdown(&mut self) {
        self.pipeline.detach();
        self.controller.disconnect().await;
    }
}

pub async fn run(mut console: Console) -> Result<()> {
    enable_raw_mode()?;
    let res = console.run_loop().await;
    console.shutdown().await;
    disable_raw_mode()?;
    println!();
    res
}

/// Reads a line without echo. Blocking; call it off the async workers.
pub fn read_password(prompt: &str) -> Result<Zeroizing<String>> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt}")?;
    stdout.flush()?;
    enable_raw_mode()?;
    let res = read_secret_line();
    disable_raw_mode()?;
    writeln!(stdout)?;
    res
}

fn read_secret_line() -> Result<Zeroizing<String>> {
    let mut secret = Zeroizing::new(String::new());
    loop {
        let TermEvent::Key(key) = event::read()? else {
            continue;
        };
        if key.kind == KeyEventKind::Release {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(secret),
            KeyCode::Esc => bail!("password entry cancelled"),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                bail!("password entry cancelled")
            }
            KeyCode::Backspace => {
                secret.pop();
            }
            KeyCode::Char(c) => secret.push(c),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn editor_collects_and_submits() {
        let mut editor = PromptEditor::default();
        for c in "list filez".chars() {
            assert_eq!(editor.apply(&press(KeyCode::Char(c))), PromptOutcome::Pending(c.to_string()));
        }
        assert_eq!(
            editor.apply(&press(KeyCode::Backspace)),
            PromptOutcome::Pending("\x08 \x08".to_string())
        );
        editor.apply(&press(KeyCode::Char('s')));
        assert_eq!(
            editor.apply(&press(KeyCode::Enter)),
            PromptOutcome::Submit("list files".to_string())
        );
        assert!(editor.buffer.is_empty());
    }

    #[test]
    fn editor_cancels_on_escape_and_ctrl_c() {
        let mut editor = PromptEditor::default();
        editor.apply(&press(KeyCode::Char('x')));
        assert_eq!(editor.apply(&press(KeyCode::Esc)), PromptOutcome::Cancel);
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(editor.apply(&ctrl_c), PromptOutcome::Cancel);
    }

    #[test]
    fn backspace_on_empty_buffer_echoes_nothing() {
        let mut editor = PromptEditor::default();
        assert_eq!(
            editor.apply(&press(KeyCode::Backspace)),
            PromptOutcome::Pending(String::new())
        );
    }

    #[test]
    fn pasted_text_stays_on_one_line() {
        let mut editor = PromptEditor::default();
        assert_eq!(editor.paste("why\nis disk full"), "why is disk full");
        assert_eq!(editor.buffer, "why is disk full");
    }
}
