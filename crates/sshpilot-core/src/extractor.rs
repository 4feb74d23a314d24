use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```([^\n`]*)\r?\n([\s\S]*?)```").unwrap());

static FOREIGN_HEAD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(def\s|class\s|\{|\[|import\s|from\s|#!|---|\{\s*"|<\?xml|function\s)"#)
        .unwrap()
});

static INLINE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").unwrap());

static PROMPT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$+\s*").unwrap());

static TRAILING_COMMENT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+#.*$").unwrap());

const SHELL_TAGS: [&str; 4] = ["bash", "sh", "zsh", "shell"];
const FOREIGN_HEAD_CHARS: usize = 40;
const MAX_COMMAND_WORDS: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
    ShellFence,
    PlainFence,
    Inline,
    Fallback,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CommandExtractor;

impl CommandExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> Option<String> {
        let (strategy, command) = extract_with_strategy(text)?;
        debug!(?strategy, lines = command.lines().count(), "command extracted");
        Some(command)
    }
}

fn extract_with_strategy(text: &str) -> Option<(Strategy, String)> {
    if text.trim().is_empty() {
        return None;
    }

    let fences: Vec<(String, &str)> = FENCE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let tag = caps.get(1)?.as_str().trim().to_lowercase();
            Some((tag, caps.get(2)?.as_str()))
        })
        .collect();

    let shell = fences
        .iter()
        .filter(|(tag, _)| SHELL_TAGS.contains(&tag.as_str()))
        .find_map(|(_, body)| sanitize_block(body));
    if let Some(command) = shell {
        return Some((Strategy::ShellFence, command));
    }

    let plain = fences
        .iter()
        .filter(|(tag, body)| tag.is_empty() && !looks_foreign(body))
        .find_map(|(_, body)| sanitize_block(body));
    if let Some(command) = plain {
        return Some((Strategy::PlainFence, command));
    }

    // Fenced blocks that were not accepted above never leak into the looser strategies.
    let outside = FENCE_PATTERN.replace_all(text, "\n");

    let inline = INLINE_PATTERN
        .captures_iter(&outside)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| sanitize_block(m.as_str()));
    if let Some(command) = inline {
        return Some((Strategy::Inline, command));
    }

    first_command_line(&outside).map(|line| (Strategy::Fallback, line))
}

fn looks_foreign(body: &str) -> bool {
    let head: String = body
        .trim_start()
        .chars()
        .take(FOREIGN_HEAD_CHARS)
        .collect::<String>()
        .to_lowercase();
    FOREIGN_HEAD_PATTERN.is_match(&head)
}

/// Strips prompt markers and trailing whitespace per line. Interior blank
/// lines and indentation are kept so here-documents survive intact.
fn sanitize_block(body: &str) -> Option<String> {
    let lines: Vec<String> = body
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                PROMPT_PATTERN.replace(line.trim_end(), "").into_owned()
            }
        })
        .collect();
    let joined = lines.join("\n");
    let block = joined.trim_matches('\n');
    if block.trim().is_empty() {
        None
    } else {
        Some(block.to_string())
    }
}

fn first_command_line(text: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("```") || line.starts_with('#') {
            continue;
        }
        let line = PROMPT_PATTERN.replace(line, "");
        let line = TRAILING_COMMENT_PATTERN.replace(&line, "");
        let line = line.trim();
        if line.is_empty() || looks_like_prose(line) {
            continue;
        }
        return Some(line.to_string());
    }
    None
}

fn looks_like_prose(line: &str) -> bool {
    if line.ends_with(':') {
        return true;
    }
    let words = line.split_whitespace().count();
    if words > MAX_COMMAND_WORDS && !line.contains('|') {
        return true;
    }
    let capitalized = line.chars().next().is_some_and(|c| c.is_uppercase());
    if capitalized && line.ends_with(['.', '!', '?']) {
        return true;
    }
    let shell_syntax = line.contains(['|', '&', ';', '>', '<', '$', '/', '=', '-']);
    capitalized && words >= 4 && !shell_syntax
}
