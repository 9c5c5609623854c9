//! View model: events turned into lines of tagged text.
//!
//! A UI renders each [`Span`] with the look of its [`Tag`]s and makes
//! `url` and `other-nick` spans clickable via [`clickable_at`]. Nothing here
//! depends on a UI toolkit.

use std::fmt;

use crate::casemap::irc_eq;
use crate::event::{Event, MessageEvent, MessageKind};
use crate::style::{self, StyleTag, StyledRun};
use crate::url;

/// A named text attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// mIRC color or underline from the message body.
    Style(StyleTag),
    Url,
    /// The line mentions our nick.
    Pinged,
    Error,
    Info,
    HistorySelection,
    Channel,
    SelfNick,
    OtherNick,
    SentPrivmsg,
    ReceivedPrivmsg,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Style(tag) => return tag.fmt(f),
            Tag::Url => "url",
            Tag::Pinged => "pinged",
            Tag::Error => "error",
            Tag::Info => "info",
            Tag::HistorySelection => "history-selection",
            Tag::Channel => "channel",
            Tag::SelfNick => "self-nick",
            Tag::OtherNick => "other-nick",
            Tag::SentPrivmsg => "sent-privmsg",
            Tag::ReceivedPrivmsg => "received-privmsg",
        };
        f.write_str(name)
    }
}

/// How a tag looks. `None` leaves the attribute to lower tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Appearance {
    pub foreground: Option<&'static str>,
    pub background: Option<&'static str>,
    pub underline: bool,
}

impl Tag {
    pub fn appearance(&self) -> Appearance {
        let fg = |color| Appearance {
            foreground: Some(color),
            ..Default::default()
        };
        match self {
            Tag::Style(StyleTag::Foreground(n)) => Appearance {
                foreground: style::palette_color(*n),
                ..Default::default()
            },
            Tag::Style(StyleTag::Background(n)) => Appearance {
                background: style::palette_color(*n),
                ..Default::default()
            },
            Tag::Style(StyleTag::Underline) | Tag::Url => Appearance {
                underline: true,
                ..Default::default()
            },
            Tag::Pinged => fg("#a1e37b"),
            Tag::Error => fg("#bd2f2f"),
            Tag::Info => fg("#FFE6C7"),
            Tag::HistorySelection => Appearance {
                background: Some("#5a5c50"),
                ..Default::default()
            },
            Tag::Channel => fg("#f7e452"),
            Tag::SelfNick => Appearance {
                foreground: Some("#de8c28"),
                underline: true,
                ..Default::default()
            },
            Tag::OtherNick => Appearance {
                foreground: Some("#e7b678"),
                underline: true,
                ..Default::default()
            },
            Tag::SentPrivmsg | Tag::ReceivedPrivmsg => fg(style::FOREGROUND),
        }
    }

    /// Tags a user can click: the callback gets the whole tagged text.
    pub fn is_clickable(&self) -> bool {
        matches!(self, Tag::Url | Tag::OtherNick)
    }
}

/// A piece of a displayed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub tags: Vec<Tag>,
}

impl Span {
    pub fn new(text: &str, tags: &[Tag]) -> Self {
        Self {
            text: text.to_string(),
            tags: tags.to_vec(),
        }
    }

    pub fn has(&self, tag: Tag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.to_string()).collect()
    }
}

/// Plain text of a line.
pub fn line_text(spans: &[Span]) -> String {
    spans.iter().map(|s| s.text.as_str()).collect()
}

/// Split styled runs further at URL boundaries and tag them.
/// `base` is added to every span.
pub fn body_spans(runs: &[StyledRun], base: &[Tag]) -> Vec<Span> {
    let plain: String = runs.iter().map(|r| r.text.as_str()).collect();
    let urls = url::find_urls(&plain);

    let mut spans = Vec::new();
    let mut offset = 0;
    for run in runs {
        let run_end = offset + run.text.len();
        let mut cuts = vec![offset, run_end];
        for range in &urls {
            cuts.extend([range.start, range.end].into_iter().filter(|&b| b > offset && b < run_end));
        }
        cuts.sort_unstable();
        cuts.dedup();

        for pair in cuts.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let mut tags = base.to_vec();
            tags.extend(run.tags().into_iter().map(Tag::Style));
            if urls.iter().any(|u| u.start <= start && end <= u.end) {
                tags.push(Tag::Url);
            }
            spans.push(Span {
                text: plain[start..end].to_string(),
                tags,
            });
        }
        offset = run_end;
    }
    spans
}

fn nick_span(nick: &str, own_nick: &str, extra: &[Tag]) -> Span {
    let mut tags = vec![if irc_eq(nick, own_nick) {
        Tag::SelfNick
    } else {
        Tag::OtherNick
    }];
    tags.extend_from_slice(extra);
    Span::new(nick, &tags)
}

/// Spans for a chat message: nick, separator, styled body.
pub fn message_spans(event: &MessageEvent) -> Vec<Span> {
    let mut line_tags = vec![];
    if event.pinged {
        line_tags.push(Tag::Pinged);
    }
    let mut body_tags = line_tags.clone();
    body_tags.push(if event.own {
        Tag::SentPrivmsg
    } else {
        Tag::ReceivedPrivmsg
    });
    let nick_tag = if event.own { Tag::SelfNick } else { Tag::OtherNick };
    let mut nick_tags = vec![nick_tag];
    nick_tags.extend_from_slice(&line_tags);

    let mut spans = match event.kind {
        MessageKind::Privmsg => vec![Span::new(&event.from, &nick_tags), Span::new(" ", &line_tags)],
        MessageKind::Notice => vec![
            Span::new("-", &line_tags),
            Span::new(&event.from, &nick_tags),
            Span::new("- ", &line_tags),
        ],
        MessageKind::Action => vec![
            Span::new("* ", &line_tags),
            Span::new(&event.from, &nick_tags),
            Span::new(" ", &line_tags),
        ],
    };
    spans.extend(body_spans(&event.runs, &body_tags));
    spans
}

/// Spans for any event worth showing. `own_nick` decides which nicks are
/// ours.
pub fn event_spans(event: &Event, own_nick: &str) -> Option<Vec<Span>> {
    let info = |text: &str| Span::new(text, &[Tag::Info]);
    let nick = |n: &str| nick_span(n, own_nick, &[]);
    let channel = |c: &str| Span::new(c, &[Tag::Channel]);
    let reason = |r: &str| {
        if r.is_empty() {
            vec![]
        } else {
            vec![info(&format!(" ({r})"))]
        }
    };

    let spans = match event {
        Event::Message(m) => message_spans(m),
        Event::Joined { channel: c, nick: n } => vec![nick(n), info(" joined "), channel(c)],
        Event::Parted {
            channel: c,
            nick: n,
            reason: r,
        } => {
            let mut spans = vec![nick(n), info(" left "), channel(c)];
            spans.extend(reason(r.as_deref().unwrap_or("")));
            spans
        }
        Event::Kicked {
            channel: c,
            nick: n,
            by,
            reason: r,
        } => {
            let mut spans = vec![nick(by), info(" kicked "), nick(n), info(" from "), channel(c)];
            spans.extend(reason(r));
            spans
        }
        Event::NickChanged { old, new, .. } => vec![nick(old), info(" is now known as "), nick(new)],
        Event::UserQuit { nick: n, reason: r, .. } => {
            let mut spans = vec![nick(n), info(" quit")];
            spans.extend(reason(r));
            spans
        }
        Event::TopicChanged { channel: c, topic, set_by } => {
            let mut spans = match set_by {
                Some(by) => vec![nick(by), info(" changed the topic of "), channel(c), info(": ")],
                None => vec![info("Topic of "), channel(c), info(": ")],
            };
            spans.extend(body_spans(&style::parse(topic), &[Tag::Info]));
            spans
        }
        Event::Names { channel: c, nicks } => {
            let mut spans = vec![info("Users on "), channel(c), info(": ")];
            for (i, n) in nicks.iter().enumerate() {
                if i > 0 {
                    spans.push(info(", "));
                }
                spans.push(nick(n));
            }
            spans
        }
        Event::Registered { nick: n } => vec![info("Logged in as "), nick(n)],
        Event::ServerNotice { text } => body_spans(&style::parse(text), &[Tag::Info]),
        Event::ServerError { text } => body_spans(&style::parse(text), &[Tag::Error]),
        Event::Disconnected { reason } => vec![Span::new(&format!("Disconnected: {reason}"), &[Tag::Error])],
        Event::Reconnecting { attempt, delay } => vec![info(&format!(
            "Reconnecting in {:.1}s (attempt {attempt})",
            delay.as_secs_f64()
        ))],
        Event::StateChanged { .. } | Event::Connected { .. } | Event::Raw(_) | Event::RawLine(_) => return None,
    };
    Some(spans)
}

/// The clickable thing at character `offset` of a line, with its full text.
///
/// Neighbouring spans carrying the same clickable tag belong together: a URL
/// may be split over several color runs.
pub fn clickable_at(spans: &[Span], offset: usize) -> Option<(Tag, String)> {
    let mut pos = 0;
    let index = spans.iter().position(|span| {
        let len = span.text.chars().count();
        let hit = offset < pos + len;
        pos += len;
        hit
    })?;
    let tag = spans[index].tags.iter().copied().find(Tag::is_clickable)?;

    let mut start = index;
    while start > 0 && spans[start - 1].has(tag) {
        start -= 1;
    }
    let mut end = index + 1;
    while end < spans.len() && spans[end].has(tag) {
        end += 1;
    }
    Some((tag, line_text(&spans[start..end])))
}
