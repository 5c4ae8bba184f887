//! Typed views over parsed chat lines.

use super::message::Message;
use chrono::{DateTime, Utc};

/// A channel message from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Privmsg {
    pub channel: String,
    /// Login name from the source prefix.
    pub user: String,
    /// `display-name` tag when present, otherwise the login name.
    pub display_name: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl Privmsg {
    /// Interpret a parsed `PRIVMSG`. Returns `None` for other commands or
    /// when channel/text/source are missing.
    pub fn from_message(message: &Message) -> Option<Self> {
        if message.command != "PRIVMSG" || message.params.len() < 2 {
            return None;
        }
        let user = message.nick()?.to_string();
        let display_name = message
            .tag("display-name")
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| user.clone());
        Some(Self {
            channel: message.params[0].clone(),
            user,
            display_name,
            text: message.trailing().unwrap_or_default().to_string(),
            received_at: Utc::now(),
        })
    }

    /// Whether the text addresses `nick` (`@nick` or `nick:` / `nick,` prefix),
    /// compared case-insensitively.
    pub fn mentions(&self, nick: &str) -> bool {
        let text = self.text.to_lowercase();
        let nick = nick.to_lowercase();
        text.contains(&format!("@{}", nick))
            || text.starts_with(&format!("{}:", nick))
            || text.starts_with(&format!("{},", nick))
    }
}

/// Events dispatched by the chat connection to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The server accepted the registration (`001`).
    Welcome,
    /// The server confirmed our own `JOIN`.
    Joined { channel: String },
    Privmsg(Privmsg),
    /// Any other well-formed line.
    Other(Message),
    /// The connection was lost; a reconnect is scheduled.
    Disconnected { reason: String },
}
