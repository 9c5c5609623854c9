//! Events emitted by the connection task for the UI layer to consume.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::irc::{self, Message};
use crate::session::ConnectionState;
use crate::style::{self, StyledRun};

/// How a chat message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Privmsg,
    Notice,
    /// CTCP ACTION (`/me waves`).
    Action,
}

/// A chat message in a channel or private thread.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub from: String,
    pub target: String,
    pub kind: MessageKind,
    /// Body as received, formatting codes included.
    pub text: String,
    /// Body split into styled runs.
    pub runs: Vec<StyledRun>,
    pub timestamp: DateTime<Utc>,
    /// Sent by this client.
    pub own: bool,
    /// Mentions our nick.
    pub pinged: bool,
}

impl MessageEvent {
    pub fn new(from: &str, target: &str, kind: MessageKind, text: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            from: from.to_string(),
            target: target.to_string(),
            kind,
            text: text.to_string(),
            runs: style::parse(text),
            timestamp,
            own: false,
            pinged: false,
        }
    }

    pub fn is_channel_message(&self) -> bool {
        irc::is_channel_name(&self.target)
    }

    /// Body without formatting codes.
    pub fn plain_text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }
}

/// Everything the UI needs to know about a server connection.
#[derive(Debug, Clone)]
pub enum Event {
    /// The connection state machine moved.
    StateChanged { state: ConnectionState },

    /// Transport (TCP/TLS) established, registration starting.
    Connected { server: String },

    /// IRC registration complete. `nick` is our confirmed nick.
    Registered { nick: String },

    /// Someone (possibly us) joined a channel.
    Joined { channel: String, nick: String },

    /// Someone (possibly us) left a channel.
    Parted {
        channel: String,
        nick: String,
        reason: Option<String>,
    },

    /// Someone was kicked from a channel.
    Kicked {
        channel: String,
        nick: String,
        by: String,
        reason: String,
    },

    /// Someone changed nick. `channels` lists shared channels affected.
    NickChanged {
        old: String,
        new: String,
        channels: Vec<String>,
    },

    /// A message in a channel or private thread.
    Message(MessageEvent),

    /// NAMES list for a channel (complete, prefixes stripped).
    Names { channel: String, nicks: Vec<String> },

    /// Channel topic changed or received on join.
    TopicChanged {
        channel: String,
        topic: String,
        set_by: Option<String>,
    },

    /// Someone quit the server. `channels` lists shared channels affected.
    UserQuit {
        nick: String,
        reason: String,
        channels: Vec<String>,
    },

    /// Server notice not addressed to a channel or a user.
    ServerNotice { text: String },

    /// Error reported by the server (numeric error or ERROR command).
    ServerError { text: String },

    /// Connection lost; the manager will retry unless told to stop.
    Disconnected { reason: String },

    /// Waiting `delay` before reconnect attempt number `attempt` (1-based).
    Reconnecting { attempt: u32, delay: Duration },

    /// A line this client does not interpret, passed through as parsed.
    Raw(Message),

    /// Raw server line (for debugging views).
    RawLine(String),
}
