//! Per-server session state: joined channels, members, topics, private
//! threads and their message history.
//!
//! The connection task is the only writer. UI code gets a [`SessionStore`]
//! and reads snapshots or runs short closures under the read lock.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::casemap::{irc_eq, IrcKey};
use crate::event::MessageEvent;

/// Default number of messages kept per channel or thread.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Registering,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Registering => "registering",
            ConnectionState::Connected => "connected",
        })
    }
}

/// A joined channel.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Name as the server last reported it.
    pub name: String,
    pub topic: Option<String>,
    pub history: VecDeque<MessageEvent>,
    members: BTreeMap<IrcKey, String>,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            topic: None,
            history: VecDeque::new(),
            members: BTreeMap::new(),
        }
    }

    /// Member nicks in display casing, sorted case-insensitively.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.values().map(|s| s.as_str())
    }

    pub fn has_member(&self, nick: &str) -> bool {
        self.members.contains_key(&IrcKey::new(nick))
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn add_member(&mut self, nick: &str) {
        self.members.insert(IrcKey::new(nick), nick.to_string());
    }

    fn remove_member(&mut self, nick: &str) -> bool {
        self.members.remove(&IrcKey::new(nick)).is_some()
    }
}

/// A direct-message conversation with one other nick.
#[derive(Debug, Clone)]
pub struct PrivateThread {
    /// The other party, in the casing they last used.
    pub nick: String,
    pub history: VecDeque<MessageEvent>,
}

/// State of one server session.
#[derive(Debug, Clone)]
pub struct Session {
    server: String,
    nick: String,
    state: ConnectionState,
    last_seen: Option<DateTime<Utc>>,
    channels: BTreeMap<IrcKey, Channel>,
    threads: BTreeMap<IrcKey, PrivateThread>,
    history_limit: usize,
}

impl Session {
    pub fn new(server: &str, nick: &str, history_limit: usize) -> Self {
        Self {
            server: server.to_string(),
            nick: nick.to_string(),
            state: ConnectionState::Disconnected,
            last_seen: None,
            channels: BTreeMap::new(),
            threads: BTreeMap::new(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Our current nick.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// When the last line arrived from the server.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    pub fn is_self(&self, nick: &str) -> bool {
        irc_eq(&self.nick, nick)
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&IrcKey::new(name))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Names of every joined channel.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.values().map(|c| c.name.clone()).collect()
    }

    pub fn thread(&self, nick: &str) -> Option<&PrivateThread> {
        self.threads.get(&IrcKey::new(nick))
    }

    pub fn threads(&self) -> impl Iterator<Item = &PrivateThread> {
        self.threads.values()
    }

    /// Channel name or peer nick a message belongs to.
    pub fn conversation_for<'a>(&self, event: &'a MessageEvent) -> &'a str {
        if event.is_channel_message() {
            &event.target
        } else if event.own || self.is_self(&event.from) {
            &event.target
        } else {
            &event.from
        }
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub(crate) fn set_nick(&mut self, nick: &str) {
        self.nick = nick.to_string();
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.last_seen = Some(now);
    }

    /// `nick` joined `channel`. Returns false when the join concerns a
    /// channel we are not in.
    pub(crate) fn join(&mut self, channel: &str, nick: &str) -> bool {
        let key = IrcKey::new(channel);
        if self.is_self(nick) {
            let entry = self.channels.entry(key).or_insert_with(|| Channel::new(channel));
            entry.name = channel.to_string();
            entry.add_member(nick);
            return true;
        }
        match self.channels.get_mut(&key) {
            Some(chan) => {
                chan.add_member(nick);
                true
            }
            None => false,
        }
    }

    /// `nick` left `channel` (PART or KICK). Our own departure drops the
    /// channel entirely.
    pub(crate) fn part(&mut self, channel: &str, nick: &str) -> bool {
        let key = IrcKey::new(channel);
        if self.is_self(nick) {
            return self.channels.remove(&key).is_some();
        }
        self.channels
            .get_mut(&key)
            .is_some_and(|chan| chan.remove_member(nick))
    }

    /// Remove `nick` from every channel; returns the channels it was in.
    pub(crate) fn quit(&mut self, nick: &str) -> Vec<String> {
        self.channels
            .values_mut()
            .filter_map(|chan| chan.remove_member(nick).then(|| chan.name.clone()))
            .collect()
    }

    /// Apply a nick change everywhere; returns the channels it was seen in.
    pub(crate) fn rename(&mut self, old: &str, new: &str) -> Vec<String> {
        if self.is_self(old) {
            self.nick = new.to_string();
        }

        let mut affected = Vec::new();
        for chan in self.channels.values_mut() {
            if chan.remove_member(old) {
                chan.add_member(new);
                affected.push(chan.name.clone());
            }
        }

        if let Some(mut thread) = self.threads.remove(&IrcKey::new(old)) {
            thread.nick = new.to_string();
            let key = IrcKey::new(new);
            match self.threads.get_mut(&key) {
                // Both nicks had threads: keep the older history first.
                Some(existing) => {
                    thread.history.extend(existing.history.drain(..));
                    existing.history = thread.history;
                    existing.nick = thread.nick;
                }
                None => {
                    self.threads.insert(key, thread);
                }
            }
        }
        affected
    }

    /// Add NAMES reply entries, stripping membership prefixes (`@`, `+`, ...).
    pub(crate) fn add_names(&mut self, channel: &str, nicks: &[String]) {
        if let Some(chan) = self.channels.get_mut(&IrcKey::new(channel)) {
            for raw in nicks {
                let nick = strip_member_prefix(raw);
                if !nick.is_empty() {
                    chan.add_member(nick);
                }
            }
        }
    }

    pub(crate) fn set_topic(&mut self, channel: &str, topic: &str) -> bool {
        match self.channels.get_mut(&IrcKey::new(channel)) {
            Some(chan) => {
                chan.topic = (!topic.is_empty()).then(|| topic.to_string());
                true
            }
            None => false,
        }
    }

    /// Store a message in its channel or private thread. Private threads are
    /// created on the first message in either direction. Returns the
    /// conversation name, or `None` for channels we are not in.
    pub(crate) fn record(&mut self, event: MessageEvent) -> Option<String> {
        let limit = self.history_limit;

        if event.is_channel_message() {
            let chan = self.channels.get_mut(&IrcKey::new(&event.target))?;
            let name = chan.name.clone();
            push_bounded(&mut chan.history, event, limit);
            return Some(name);
        }

        let incoming = !(event.own || self.is_self(&event.from));
        let peer = if incoming { event.from.clone() } else { event.target.clone() };
        let thread = self
            .threads
            .entry(IrcKey::new(&peer))
            .or_insert_with(|| PrivateThread {
                nick: peer.clone(),
                history: VecDeque::new(),
            });
        if incoming {
            // the peer's own casing wins over however we typed it
            thread.nick = peer;
        }
        let name = thread.nick.clone();
        push_bounded(&mut thread.history, event, limit);
        Some(name)
    }

    /// Forget channel membership after the link drops. Channels and
    /// histories stay so they can be rejoined on reconnect.
    pub(crate) fn reset_membership(&mut self) {
        for chan in self.channels.values_mut() {
            chan.members.clear();
        }
    }
}

fn push_bounded(history: &mut VecDeque<MessageEvent>, event: MessageEvent, limit: usize) {
    history.push_back(event);
    while history.len() > limit {
        history.pop_front();
    }
}

/// Strip channel membership prefixes from a NAMES entry.
pub fn strip_member_prefix(nick: &str) -> &str {
    nick.trim_start_matches(['~', '&', '@', '%', '+'])
}

/// Shared handle to a [`Session`]; cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<Session>>,
}

impl SessionStore {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(RwLock::new(session)),
        }
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> Session {
        self.read(|s| s.clone())
    }

    /// Run `f` against the current state under the read lock.
    pub fn read<T>(&self, f: impl FnOnce(&Session) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    pub(crate) fn update<T>(&self, f: impl FnOnce(&mut Session) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}
