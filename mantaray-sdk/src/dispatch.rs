//! Message dispatch: parsed lines become typed [`Inbound`] variants, which
//! are applied to the [`Session`] and turned into UI [`Event`]s.

use chrono::{DateTime, Utc};

use crate::casemap::irc_eq;
use crate::event::{Event, MessageEvent, MessageKind};
use crate::irc::{self, Message};
use crate::session::Session;

/// A server line the client knows how to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ping { token: String },
    Pong,
    /// RPL_WELCOME (001): registration finished under `nick`.
    Welcome { nick: String },
    /// ERR_NICKNAMEINUSE (433).
    NickInUse { nick: String },
    Join { nick: String, channel: String },
    Part {
        nick: String,
        channel: String,
        reason: Option<String>,
    },
    Kick {
        channel: String,
        nick: String,
        by: String,
        reason: String,
    },
    Nick { old: String, new: String },
    Quit { nick: String, reason: String },
    Privmsg { from: String, target: String, text: String },
    /// `from` is `None` for notices sent by the server itself.
    Notice {
        from: Option<String>,
        target: String,
        text: String,
    },
    /// TOPIC change or RPL_TOPIC (332).
    Topic {
        channel: String,
        topic: String,
        set_by: Option<String>,
    },
    /// RPL_NAMREPLY (353); may arrive in several parts.
    Names { channel: String, nicks: Vec<String> },
    /// RPL_ENDOFNAMES (366).
    EndOfNames { channel: String },
    /// ERROR: the server is closing the link.
    Error { text: String },
    /// Numeric error reply (400-599).
    ErrorReply { code: String, text: String },
    /// Anything else, including known commands with missing parameters.
    Raw(Message),
}

impl Inbound {
    pub fn from_message(msg: Message) -> Inbound {
        match classify(&msg) {
            Some(inbound) => inbound,
            None => {
                if is_known(&msg.command) {
                    tracing::warn!(command = %msg.command, params = ?msg.params, "missing parameters");
                }
                Inbound::Raw(msg)
            }
        }
    }
}

fn is_known(command: &str) -> bool {
    matches!(
        command,
        "PING" | "001" | "433" | "JOIN" | "PART" | "KICK" | "NICK" | "QUIT" | "PRIVMSG" | "NOTICE"
            | "TOPIC" | "332" | "353" | "366"
    )
}

fn classify(msg: &Message) -> Option<Inbound> {
    let from = || msg.source_nick().unwrap_or("").to_string();
    let param = |i: usize| msg.param(i).map(|s| s.to_string());

    let inbound = match msg.command.as_str() {
        "PING" => Inbound::Ping {
            token: param(0).unwrap_or_default(),
        },
        "PONG" => Inbound::Pong,
        "001" => Inbound::Welcome { nick: param(0)? },
        "433" => Inbound::NickInUse { nick: param(1)? },
        "JOIN" => Inbound::Join {
            nick: nonempty(from())?,
            channel: param(0)?,
        },
        "PART" => Inbound::Part {
            nick: nonempty(from())?,
            channel: param(0)?,
            reason: param(1),
        },
        "KICK" => Inbound::Kick {
            channel: param(0)?,
            nick: param(1)?,
            by: msg.source_nick().unwrap_or("server").to_string(),
            reason: param(2).unwrap_or_default(),
        },
        "NICK" => Inbound::Nick {
            old: nonempty(from())?,
            new: param(0)?,
        },
        "QUIT" => Inbound::Quit {
            nick: nonempty(from())?,
            reason: param(0).unwrap_or_default(),
        },
        "PRIVMSG" => Inbound::Privmsg {
            from: nonempty(from())?,
            target: param(0)?,
            text: param(1)?,
        },
        "NOTICE" => Inbound::Notice {
            from: msg
                .prefix
                .as_deref()
                .filter(|p| p.contains('!'))
                .map(|p| irc::nick_of(p).to_string()),
            target: param(0)?,
            text: param(1)?,
        },
        "TOPIC" => Inbound::Topic {
            channel: param(0)?,
            topic: param(1).unwrap_or_default(),
            set_by: msg.source_nick().map(|s| s.to_string()),
        },
        "332" => Inbound::Topic {
            channel: param(1)?,
            topic: param(2)?,
            set_by: None,
        },
        "353" => Inbound::Names {
            channel: param(2)?,
            nicks: msg.param(3)?.split_whitespace().map(|s| s.to_string()).collect(),
        },
        "366" => Inbound::EndOfNames { channel: param(1)? },
        "ERROR" => Inbound::Error {
            text: param(0).unwrap_or_default(),
        },
        code if is_error_numeric(code) => Inbound::ErrorReply {
            code: code.to_string(),
            text: msg.params.iter().skip(1).cloned().collect::<Vec<_>>().join(" "),
        },
        _ => return None,
    };
    Some(inbound)
}

fn nonempty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn is_error_numeric(code: &str) -> bool {
    code.len() == 3 && matches!(code.as_bytes()[0], b'4' | b'5') && code.bytes().all(|b| b.is_ascii_digit())
}

/// Split a CTCP ACTION body (`\x01ACTION waves\x01`) from a PRIVMSG.
fn ctcp_action(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('\x01')?;
    let inner = inner.strip_suffix('\x01').unwrap_or(inner);
    inner.strip_prefix("ACTION ").or_else(|| (inner == "ACTION").then_some(""))
}

/// Whether `text` mentions `nick` as a whole word.
pub fn mentions(text: &str, nick: &str) -> bool {
    if nick.is_empty() {
        return false;
    }
    crate::style::strip(text)
        .split(|c: char| !is_nick_char(c))
        .any(|word| irc_eq(word, nick))
}

fn is_nick_char(c: char) -> bool {
    c.is_alphanumeric() || "-_[]\\`^{}|".contains(c)
}

/// Apply one inbound line to the session and return the resulting events.
pub fn dispatch(session: &mut Session, inbound: Inbound, now: DateTime<Utc>) -> Vec<Event> {
    match inbound {
        Inbound::Ping { .. } | Inbound::Pong => vec![],
        Inbound::Welcome { nick } => {
            session.set_nick(&nick);
            vec![Event::Registered { nick }]
        }
        Inbound::NickInUse { nick } => vec![Event::ServerError {
            text: format!("Nickname {nick} is already in use"),
        }],
        Inbound::Join { nick, channel } => {
            if !session.join(&channel, &nick) {
                tracing::debug!(%channel, %nick, "join for a channel we are not in");
            }
            vec![Event::Joined { channel, nick }]
        }
        Inbound::Part { nick, channel, reason } => {
            session.part(&channel, &nick);
            vec![Event::Parted { channel, nick, reason }]
        }
        Inbound::Kick {
            channel,
            nick,
            by,
            reason,
        } => {
            session.part(&channel, &nick);
            vec![Event::Kicked {
                channel,
                nick,
                by,
                reason,
            }]
        }
        Inbound::Nick { old, new } => {
            let channels = session.rename(&old, &new);
            vec![Event::NickChanged { old, new, channels }]
        }
        Inbound::Quit { nick, reason } => {
            let channels = session.quit(&nick);
            vec![Event::UserQuit { nick, reason, channels }]
        }
        Inbound::Privmsg { from, target, text } => {
            let (kind, body) = match ctcp_action(&text) {
                Some(action) => (MessageKind::Action, action.to_string()),
                None if text.starts_with('\x01') => {
                    tracing::debug!(%from, "ignoring CTCP request {text:?}");
                    return vec![];
                }
                None => (MessageKind::Privmsg, text),
            };
            vec![incoming_message(session, &from, &target, kind, &body, now)]
        }
        Inbound::Notice { from, target, text } => match from {
            Some(from) => vec![incoming_message(session, &from, &target, MessageKind::Notice, &text, now)],
            None => vec![Event::ServerNotice { text }],
        },
        Inbound::Topic { channel, topic, set_by } => {
            session.set_topic(&channel, &topic);
            vec![Event::TopicChanged { channel, topic, set_by }]
        }
        Inbound::Names { channel, nicks } => {
            session.add_names(&channel, &nicks);
            vec![]
        }
        Inbound::EndOfNames { channel } => {
            let nicks = session
                .channel(&channel)
                .map(|c| c.members().map(|s| s.to_string()).collect())
                .unwrap_or_default();
            vec![Event::Names { channel, nicks }]
        }
        Inbound::Error { text } => vec![Event::ServerError { text }],
        Inbound::ErrorReply { code, text } => vec![Event::ServerError {
            text: format!("{code} {text}"),
        }],
        Inbound::Raw(msg) => vec![Event::Raw(msg)],
    }
}

fn incoming_message(
    session: &mut Session,
    from: &str,
    target: &str,
    kind: MessageKind,
    text: &str,
    now: DateTime<Utc>,
) -> Event {
    let mut event = MessageEvent::new(from, target, kind, text, now);
    event.own = session.is_self(from);
    event.pinged = !event.own && mentions(text, session.nick());
    session.record(event.clone());
    Event::Message(event)
}

/// Record a message we sent. Servers do not echo our own PRIVMSGs back, so
/// the connection task calls this after writing one.
pub fn outgoing_message(
    session: &mut Session,
    target: &str,
    kind: MessageKind,
    text: &str,
    now: DateTime<Utc>,
) -> Event {
    let mut event = MessageEvent::new(session.nick(), target, kind, text, now);
    event.own = true;
    session.record(event.clone());
    Event::Message(event)
}
