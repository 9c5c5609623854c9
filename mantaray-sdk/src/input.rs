//! Text typed into the input box, turned into something to send.
//!
//! Lines starting with `/` are commands; everything else is a message to
//! the conversation being viewed. `//text` escapes the slash and sends
//! `/text` literally.

use crate::irc;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Privmsg { target: String, text: String },
    Action { target: String, text: String },
    Join { channel: String, key: Option<String> },
    Part { channel: String, reason: Option<String> },
    Nick(String),
    Quit(Option<String>),
    /// `topic: None` asks the server for the current topic.
    Topic { channel: String, topic: Option<String> },
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("unknown command /{0}")]
    UnknownCommand(String),
    /// Plain text or `/me` typed in a view with no conversation (server tab).
    #[error("no channel or nick to send to here")]
    NoTarget,
    #[error("not in a channel")]
    NotInChannel,
}

/// Parse `line` typed while `current_view` (a channel or nick, `None` for
/// the server view) is shown. Returns `Ok(None)` for blank input.
pub fn parse_input(line: &str, current_view: Option<&str>) -> Result<Option<Input>, InputError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let command_line = match line.strip_prefix('/') {
        Some(rest) if !rest.starts_with('/') => rest,
        Some(escaped) => {
            return Ok(Some(Input::Privmsg {
                target: current_view.ok_or(InputError::NoTarget)?.to_string(),
                text: escaped.to_string(),
            }));
        }
        None => {
            return Ok(Some(Input::Privmsg {
                target: current_view.ok_or(InputError::NoTarget)?.to_string(),
                text: line.to_string(),
            }));
        }
    };

    let (command, arg) = split_word(command_line);
    let command = command.to_lowercase();
    let input = match command.as_str() {
        "msg" | "query" => {
            let (target, text) = split_word(arg);
            if target.is_empty() || text.is_empty() {
                return Err(InputError::Usage("/msg <nick> <message>"));
            }
            Input::Privmsg {
                target: target.to_string(),
                text: text.to_string(),
            }
        }
        "me" => {
            if arg.is_empty() {
                return Err(InputError::Usage("/me <action>"));
            }
            Input::Action {
                target: current_view.ok_or(InputError::NoTarget)?.to_string(),
                text: arg.to_string(),
            }
        }
        "join" | "j" => {
            let (channel, key) = split_word(arg);
            if channel.is_empty() {
                return Err(InputError::Usage("/join <#channel> [key]"));
            }
            let channel = if irc::is_channel_name(channel) {
                channel.to_string()
            } else {
                format!("#{channel}")
            };
            Input::Join {
                channel,
                key: nonempty(key),
            }
        }
        "part" | "leave" => {
            let (first, rest) = split_word(arg);
            let (channel, reason) = if irc::is_channel_name(first) {
                (first.to_string(), nonempty(rest))
            } else {
                let channel = current_view
                    .filter(|view| irc::is_channel_name(view))
                    .ok_or(InputError::NotInChannel)?;
                (channel.to_string(), nonempty(arg))
            };
            Input::Part { channel, reason }
        }
        "nick" => {
            let (nick, _) = split_word(arg);
            if nick.is_empty() {
                return Err(InputError::Usage("/nick <new nick>"));
            }
            Input::Nick(nick.to_string())
        }
        "quit" => Input::Quit(nonempty(arg)),
        "topic" => {
            let (first, rest) = split_word(arg);
            let (channel, topic) = if irc::is_channel_name(first) {
                (first.to_string(), nonempty(rest))
            } else {
                let channel = current_view
                    .filter(|view| irc::is_channel_name(view))
                    .ok_or(InputError::NotInChannel)?;
                (channel.to_string(), nonempty(arg))
            };
            Input::Topic { channel, topic }
        }
        "raw" | "quote" => {
            if arg.is_empty() {
                return Err(InputError::Usage("/raw <line>"));
            }
            Input::Raw(arg.to_string())
        }
        _ => return Err(InputError::UnknownCommand(command)),
    };
    Ok(Some(input))
}

/// First space-separated word and the rest with leading spaces trimmed.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(' ') {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}

fn nonempty(s: &str) -> Option<String> {
    let s = s.trim_end();
    (!s.is_empty()).then(|| s.to_string())
}
