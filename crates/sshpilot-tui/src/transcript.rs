//! Assistant transcript lines printed between terminal output.
//!
//! The terminal is in raw mode, so every line break is written as `\r\n`.

use crossterm::style::Stylize;
use sshpilot_core::{OperatingMode, Role};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    Text,
    Fence,
    Code,
}

pub fn classify_lines(content: &str) -> Vec<(LineKind, &str)> {
    let mut in_fence = false;
    content
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                (LineKind::Fence, line)
            } else if in_fence {
                (LineKind::Code, line)
            } else {
                (LineKind::Text, line)
            }
        })
        .collect()
}

fn label(role: Role, mode: OperatingMode) -> String {
    match role {
        Role::Assistant => format!("[assistant {mode}]"),
        Role::User => "[you]".to_string(),
        Role::System => "[system]".to_string(),
    }
}

pub fn render_turn(role: Role, mode: OperatingMode, content: &str) -> String {
    let mut out = String::from("\r\n");
    let head = label(role, mode);
    out.push_str(&match role {
        Role::Assistant => head.cyan().bold().to_string(),
        _ => head.magenta().bold().to_string(),
    });
    out.push_str("\r\n");
    for (kind, line) in classify_lines(content) {
        match kind {
            LineKind::Text => out.push_str(line),
            LineKind::Fence => out.push_str(&line.dark_grey().to_string()),
            LineKind::Code => out.push_str(&line.yellow().to_string()),
        }
        out.push_str("\r\n");
    }
    out
}

pub fn render_suggestion(command: &str) -> String {
    format!(
        "{} {}\r\n",
        "suggested, not sent:".dark_grey(),
        command.lines().next().unwrap_or_default().green()
    )
}

pub fn render_error(message: &str) -> String {
    format!("\r\n{}\r\n", format!("assistant error: {message}").red())
}

pub fn render_notice(message: &str) -> String {
    format!("\r\n{}\r\n", message.dark_grey().italic())
}

pub fn prompt_prefix(mode: OperatingMode) -> String {
    format!("\r\n{} ", format!("[{mode}] >").cyan().bold())
}
