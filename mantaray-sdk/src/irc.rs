//! IRC line parser and formatter.
//!
//! Handles the RFC 1459/2812 line grammar plus IRCv3 message tags:
//! `@key=value;key2=value2 :prefix COMMAND middle middle :trailing`

use std::collections::HashMap;
use std::fmt;

/// Why a raw line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("line has tags or a prefix but no command")]
    MissingCommand,
    #[error("invalid command {0:?}")]
    InvalidCommand(String),
}

/// A parsed IRC message with optional IRCv3 tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 message tags (key=value pairs).
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    /// Upper-cased command or three-digit numeric.
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Parse a raw IRC line. Trailing CR/LF is ignored.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let mut rest = line;

        let tags = match rest.strip_prefix('@') {
            Some(tagged) => {
                let (tag_str, tail) = tagged.split_once(' ').ok_or(ParseError::MissingCommand)?;
                rest = tail.trim_start_matches(' ');
                parse_tags(tag_str)
            }
            None => HashMap::new(),
        };

        let prefix = match rest.strip_prefix(':') {
            Some(prefixed) => {
                let (pfx, tail) = prefixed.split_once(' ').ok_or(ParseError::MissingCommand)?;
                rest = tail.trim_start_matches(' ');
                Some(pfx.to_string())
            }
            None => None,
        };

        let (raw_command, mut rest) = match rest.split_once(' ') {
            Some((cmd, tail)) => (cmd, tail),
            None => (rest, ""),
        };
        if raw_command.is_empty() {
            return Err(ParseError::MissingCommand);
        }
        if !is_valid_command(raw_command) {
            return Err(ParseError::InvalidCommand(raw_command.to_string()));
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((middle, tail)) => {
                    params.push(middle.to_string());
                    rest = tail;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Message {
            tags,
            prefix,
            command: raw_command.to_ascii_uppercase(),
            params,
        })
    }

    pub fn new(command: &str, params: Vec<&str>) -> Self {
        Self {
            tags: HashMap::new(),
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Nick part of the prefix (`nick!user@host` -> `nick`).
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix.as_deref().map(nick_of)
    }

    /// Parameter at `index`, if present.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(|s| s.as_str())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut keys: Vec<&String> = self.tags.keys().collect();
            keys.sort();
            write!(f, "@")?;
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    write!(f, ";")?;
                }
                let value = &self.tags[key];
                if value.is_empty() {
                    write!(f, "{key}")?;
                } else {
                    write!(f, "{key}={}", escape_tag_value(value))?;
                }
            }
            write!(f, " ")?;
        }

        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        for (i, param) in self.params.iter().enumerate() {
            if i == self.params.len() - 1
                && (param.contains(' ') || param.starts_with(':') || param.is_empty())
            {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

/// Nick part of a `nick!user@host` prefix. Server prefixes come back unchanged.
pub fn nick_of(prefix: &str) -> &str {
    prefix
        .split(['!', '@'])
        .next()
        .unwrap_or(prefix)
}

/// Whether a target names a channel rather than a nick.
pub fn is_channel_name(target: &str) -> bool {
    target.starts_with(['#', '&', '+', '!'])
}

fn is_valid_command(cmd: &str) -> bool {
    cmd.chars().all(|c| c.is_ascii_alphabetic())
        || (cmd.len() == 3 && cmd.chars().all(|c| c.is_ascii_digit()))
}

/// Parse IRCv3 tag string: `key=value;key2=value2`
fn parse_tags(tag_str: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    for pair in tag_str.split(';') {
        if pair.is_empty() {
            continue;
        }
        if let Some((key, value)) = pair.split_once('=') {
            tags.insert(key.to_string(), unescape_tag_value(value));
        } else {
            tags.insert(pair.to_string(), String::new());
        }
    }
    tags
}

/// `\:` -> `;`, `\s` -> space, `\\` -> `\`, `\r` -> CR, `\n` -> LF
fn unescape_tag_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => result.push(';'),
            Some('s') => result.push(' '),
            Some('\\') => result.push('\\'),
            Some('r') => result.push('\r'),
            Some('n') => result.push('\n'),
            // unknown escapes drop the backslash
            Some(other) => result.push(other),
            None => {}
        }
    }
    result
}

fn escape_tag_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ';' => result.push_str("\\:"),
            ' ' => result.push_str("\\s"),
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}
