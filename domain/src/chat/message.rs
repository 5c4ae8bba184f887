//! Line-protocol message parsing.
//!
//! Wire format (one line, terminator already stripped):
//!
//! ```text
//! [@key=value;key2=value2 ][:source ]COMMAND[ param]*[ :trailing with spaces]
//! ```
//!
//! Tag values use the IRCv3 escaping rules and are unescaped on parse.

use std::collections::HashMap;
use std::fmt;

/// One parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Tag block, order irrelevant. Valueless tags map to an empty string.
    pub tags: HashMap<String, String>,
    /// Source prefix without the leading `:` (e.g. `nick!user@host`).
    pub source: Option<String>,
    /// Command token (`PRIVMSG`, `PING`, `001`, ...), uppercased for
    /// alphabetic commands.
    pub command: String,
    /// Ordered parameters; the trailing parameter (if any) is last.
    pub params: Vec<String>,
}

impl Message {
    /// Build an outbound message.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            command: command.into(),
            params,
            ..Default::default()
        }
    }

    /// Parse one line. Returns `None` for malformed input (no command).
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start_matches(' ');
        let mut message = Message::default();

        if let Some(tagged) = rest.strip_prefix('@') {
            let (tags, tail) = split_token(tagged);
            message.tags = parse_tags(tags);
            rest = tail;
        }

        if let Some(prefixed) = rest.strip_prefix(':') {
            let (source, tail) = split_token(prefixed);
            if !source.is_empty() {
                message.source = Some(source.to_string());
            }
            rest = tail;
        }

        let (command, mut rest) = split_token(rest);
        if command.is_empty() {
            return None;
        }
        message.command = command.to_ascii_uppercase();

        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                message.params.push(trailing.to_string());
                break;
            }
            let (param, tail) = split_token(rest);
            message.params.push(param.to_string());
            rest = tail;
        }

        Some(message)
    }

    /// Nickname part of the source (`nick` in `nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        let source = self.source.as_deref()?;
        let end = source.find(['!', '@']).unwrap_or(source.len());
        Some(&source[..end])
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Last parameter, which carries free text for most commands.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

/// Serializes without tags or source (client-to-server form, no terminator).
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let needs_colon =
                i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if needs_colon {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

/// Split off the next space-delimited token, skipping repeated spaces.
fn split_token(input: &str) -> (&str, &str) {
    match input.find(' ') {
        Some(idx) => (&input[..idx], input[idx..].trim_start_matches(' ')),
        None => (input, ""),
    }
}

fn parse_tags(block: &str) -> HashMap<String, String> {
    block
        .split(';')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), unescape_tag_value(value)),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            // A lone trailing backslash is dropped
            None => {}
        }
    }
    out
}
