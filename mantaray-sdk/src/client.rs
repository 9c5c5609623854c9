//! Connection to one IRC server.
//!
//! [`connect`] opens the transport (plain TCP or TLS) and spawns a task that
//! owns it. The task registers, answers PINGs, sends its own keepalive PINGs,
//! dispatches every line into the [`Session`] and emits [`Event`]s. When the
//! link is lost it reconnects with exponential backoff until told to quit.
//! The UI talks to the task through a cloneable [`ClientHandle`].

use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;

use crate::casemap::IrcKey;
use crate::config::ServerConfig;
use crate::dispatch::{self, Inbound};
use crate::error::{Error, Result};
use crate::event::{Event, MessageKind};
use crate::input::Input;
use crate::irc::Message;
use crate::session::{ConnectionState, Session, SessionStore};

const EVENT_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 64;
const KEEPALIVE_TOKEN: &str = "mantaray";
/// How many times a 433 during registration is answered with `nick_`.
const NICK_RETRIES: u32 = 3;

/// Commands the UI can send to the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A raw protocol line, without CRLF.
    Raw(String),
    /// Chat text; recorded in the session once written.
    Message {
        target: String,
        kind: MessageKind,
        text: String,
    },
    Quit(Option<String>),
}

/// A handle to a running server connection.
#[derive(Clone)]
pub struct ClientHandle {
    server: String,
    cmd_tx: mpsc::Sender<Command>,
    session: SessionStore,
}

impl ClientHandle {
    /// Name of the server this handle talks to.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Shared view of the session state.
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Whether the connection task is still running.
    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    /// Send one raw line. Embedded CR/LF are removed.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        let line: String = line.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
        if line.is_empty() {
            return Ok(());
        }
        self.send(Command::Raw(line)).await
    }

    pub async fn join(&self, channel: &str) -> Result<()> {
        self.send_line(&format!("JOIN {channel}")).await
    }

    pub async fn part(&self, channel: &str, reason: Option<&str>) -> Result<()> {
        match reason {
            Some(reason) => self.send_line(&format!("PART {channel} :{reason}")).await,
            None => self.send_line(&format!("PART {channel}")).await,
        }
    }

    /// Send a message; text with several lines goes out as several messages.
    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.message(target, MessageKind::Privmsg, text).await
    }

    pub async fn notice(&self, target: &str, text: &str) -> Result<()> {
        self.message(target, MessageKind::Notice, text).await
    }

    /// CTCP ACTION (`/me`).
    pub async fn action(&self, target: &str, text: &str) -> Result<()> {
        self.message(target, MessageKind::Action, text).await
    }

    pub async fn nick(&self, nick: &str) -> Result<()> {
        self.send_line(&format!("NICK {nick}")).await
    }

    /// Set the topic, or ask for it with `None`.
    pub async fn topic(&self, channel: &str, topic: Option<&str>) -> Result<()> {
        match topic {
            Some(topic) => self.send_line(&format!("TOPIC {channel} :{topic}")).await,
            None => self.send_line(&format!("TOPIC {channel}")).await,
        }
    }

    /// Leave the server. Also cancels a pending reconnect.
    pub async fn quit(&self, reason: Option<&str>) -> Result<()> {
        let reason = reason.map(|r| r.replace(['\r', '\n'], " "));
        self.send(Command::Quit(reason)).await
    }

    /// Carry out a line the user typed.
    pub async fn submit(&self, input: Input) -> Result<()> {
        match input {
            Input::Privmsg { target, text } => self.privmsg(&target, &text).await,
            Input::Action { target, text } => self.action(&target, &text).await,
            Input::Join { channel, key: Some(key) } => self.send_line(&format!("JOIN {channel} {key}")).await,
            Input::Join { channel, key: None } => self.join(&channel).await,
            Input::Part { channel, reason } => self.part(&channel, reason.as_deref()).await,
            Input::Nick(nick) => self.nick(&nick).await,
            Input::Quit(reason) => self.quit(reason.as_deref()).await,
            Input::Topic { channel, topic } => self.topic(&channel, topic.as_deref()).await,
            Input::Raw(line) => self.send_line(&line).await,
        }
    }

    async fn message(&self, target: &str, kind: MessageKind, text: &str) -> Result<()> {
        for line in text.lines().filter(|l| !l.is_empty()) {
            self.send(Command::Message {
                target: target.to_string(),
                kind,
                text: line.replace('\r', ""),
            })
            .await?;
        }
        Ok(())
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| Error::Closed)
    }
}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// started IRC registration yet.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Open the TCP connection and, if configured, complete the TLS handshake.
pub async fn establish_connection(config: &ServerConfig) -> Result<Transport> {
    let addr = config.addr();
    let server_name = if config.tls {
        Some(
            rustls::pki_types::ServerName::try_from(config.host.clone())
                .map_err(|_| Error::InvalidServerName(config.host.clone()))?,
        )
    } else {
        None
    };

    tracing::info!(%addr, tls = config.tls, "connecting");
    let tcp = match tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&addr)).await {
        Err(_) => return Err(Error::ConnectTimeout(addr)),
        Ok(Err(source)) => return Err(Error::Network { addr, source }),
        Ok(Ok(tcp)) => tcp,
    };

    let Some(server_name) = server_name else {
        return Ok(Transport::Plain(tcp));
    };
    let tls_config = if config.tls_insecure {
        tracing::warn!(%addr, "TLS certificate verification disabled");
        rustls_insecure_config()
    } else {
        rustls_default_config()
    };
    let connector = TlsConnector::from(Arc::new(tls_config));
    let tls = match tokio::time::timeout(config.connect_timeout(), connector.connect(server_name, tcp)).await {
        Err(_) => return Err(Error::ConnectTimeout(addr)),
        Ok(Err(source)) => return Err(Error::Tls { addr, source }),
        Ok(Ok(tls)) => tls,
    };
    tracing::debug!(%addr, "TLS handshake complete");
    Ok(Transport::Tls(Box::new(tls)))
}

/// Connect to a server and spawn the task that drives the connection.
///
/// Fails if the first transport cannot be opened; later failures are
/// reported as [`Event::Disconnected`] and retried per the reconnect policy.
pub async fn connect(config: ServerConfig) -> Result<(ClientHandle, mpsc::Receiver<Event>)> {
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let session = SessionStore::new(Session::new(
        config.server_name(),
        &config.nick,
        config.history_limit,
    ));

    let conn = Connection {
        config,
        session: session.clone(),
        event_tx,
        cmd_rx,
        pending: Vec::new(),
        rejoin: Vec::new(),
        nick_retries: 0,
    };
    conn.set_state(ConnectionState::Connecting).await;
    let transport = establish_connection(&conn.config).await?;

    let handle = ClientHandle {
        server: conn.config.server_name().to_string(),
        cmd_tx,
        session,
    };
    tokio::spawn(conn.run(transport));
    Ok((handle, event_rx))
}

fn rustls_default_config() -> rustls::ClientConfig {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    let _ = rustls::crypto::ring::default_provider().install_default();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

/// Accepts any certificate. Only used when `tls_insecure` is set.
#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Why a transport stopped being used.
#[derive(Debug)]
enum Disconnect {
    /// The user quit, or every handle was dropped.
    Quit,
    /// The link failed; reconnect.
    Lost(String),
}

/// State owned by the connection task across reconnects.
struct Connection {
    config: ServerConfig,
    session: SessionStore,
    event_tx: mpsc::Sender<Event>,
    cmd_rx: mpsc::Receiver<Command>,
    /// Commands issued while not registered, sent in order after 001.
    pending: Vec<Command>,
    /// Channels we were in when the previous link dropped.
    rejoin: Vec<String>,
    /// 433 replies answered with a new nick on the current link.
    nick_retries: u32,
}

impl Connection {
    async fn run(mut self, first: Transport) {
        let mut transport = first;
        loop {
            let reason = match self.run_transport(transport).await {
                Disconnect::Quit => break,
                Disconnect::Lost(reason) => reason,
            };
            tracing::warn!(server = %self.config.server_name(), %reason, "connection lost");
            self.rejoin = self.session.read(|s| s.channel_names());
            self.session.update(|s| s.reset_membership());
            self.set_state(ConnectionState::Disconnected).await;
            self.emit(Event::Disconnected { reason }).await;

            match self.reconnect().await {
                Some(next) => transport = next,
                None => break,
            }
        }
        self.set_state(ConnectionState::Disconnected).await;
        tracing::info!(server = %self.config.server_name(), "connection closed");
    }

    async fn run_transport(&mut self, transport: Transport) -> Disconnect {
        self.emit(Event::Connected {
            server: self.config.addr(),
        })
        .await;
        match transport {
            Transport::Plain(tcp) => self.run_irc(tcp).await,
            Transport::Tls(tls) => self.run_irc(*tls).await,
        }
    }

    /// Wait out the backoff and reopen the transport. `None` means stop.
    async fn reconnect(&mut self) -> Option<Transport> {
        let policy = self.config.reconnect.clone();
        let mut attempt = 0;
        loop {
            attempt += 1;
            if !policy.allows(attempt) {
                tracing::error!(server = %self.config.server_name(), attempts = attempt - 1, "giving up reconnecting");
                return None;
            }
            let delay = policy.delay_for(attempt);
            tracing::info!(attempt, ?delay, "reconnecting");
            self.emit(Event::Reconnecting { attempt, delay }).await;
            if !self.wait(delay).await {
                return None;
            }

            self.set_state(ConnectionState::Connecting).await;
            match establish_connection(&self.config).await {
                Ok(transport) => return Some(transport),
                Err(e) => {
                    tracing::warn!(attempt, "reconnect failed: {e}");
                    self.set_state(ConnectionState::Disconnected).await;
                }
            }
        }
    }

    /// Sleep for `delay`, queueing commands. Returns false if told to quit.
    async fn wait(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(Command::Quit(_)) => return false,
                    Some(cmd) => self.pending.push(cmd),
                }
            }
        }
    }

    async fn run_irc<S>(&mut self, stream: S) -> Disconnect
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        self.set_state(ConnectionState::Registering).await;
        let mut nick = self.config.nick.clone();
        self.nick_retries = 0;
        self.session.update(|s| s.set_nick(&nick));
        if let Err(e) = self.register(&mut writer, &nick).await {
            return Disconnect::Lost(e.to_string());
        }

        let mut registered = false;
        let mut buf = Vec::new();
        let mut last_activity = Instant::now();
        // when our keepalive PING went out, until any line arrives
        let mut ping_sent: Option<Instant> = None;
        let ping_interval = self.config.ping_interval();
        let ping_timeout = self.config.ping_timeout();

        loop {
            let deadline = match ping_sent {
                Some(sent_at) => sent_at + ping_timeout,
                None => last_activity + ping_interval,
            };

            tokio::select! {
                result = reader.read_until(b'\n', &mut buf) => {
                    match result {
                        Ok(0) => return Disconnect::Lost("connection closed by server".to_string()),
                        Ok(_) => {}
                        Err(e) => return Disconnect::Lost(e.to_string()),
                    }
                    last_activity = Instant::now();
                    ping_sent = None;

                    let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();
                    buf.clear();
                    if line.is_empty() {
                        continue;
                    }
                    match self.handle_line(&line, &mut writer, &mut registered, &mut nick).await {
                        Ok(None) => {}
                        Ok(Some(disconnect)) => return disconnect,
                        Err(e) => return Disconnect::Lost(e.to_string()),
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    let result = match cmd {
                        None => {
                            let _ = write_line(&mut writer, "QUIT").await;
                            let _ = writer.shutdown().await;
                            return Disconnect::Quit;
                        }
                        Some(Command::Quit(reason)) => {
                            let _ = self.execute(&mut writer, Command::Quit(reason)).await;
                            let _ = writer.shutdown().await;
                            return Disconnect::Quit;
                        }
                        Some(cmd) if registered => self.execute(&mut writer, cmd).await,
                        // a new nick is the way out of a 433 we gave up on
                        Some(Command::Raw(line)) if is_nick_command(&line) => {
                            if let Some(wanted) = line.split_whitespace().nth(1) {
                                nick = wanted.trim_start_matches(':').to_string();
                                self.session.update(|s| s.set_nick(&nick));
                            }
                            write_line(&mut writer, &line).await
                        }
                        Some(cmd) => {
                            self.pending.push(cmd);
                            Ok(())
                        }
                    };
                    if let Err(e) = result {
                        return Disconnect::Lost(e.to_string());
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if ping_sent.is_some() {
                        return Disconnect::Lost("ping timeout".to_string());
                    }
                    if let Err(e) = write_line(&mut writer, &format!("PING :{KEEPALIVE_TOKEN}")).await {
                        return Disconnect::Lost(e.to_string());
                    }
                    ping_sent = Some(Instant::now());
                }
            }
        }
    }

    async fn register<W: AsyncWrite + Unpin>(&self, writer: &mut W, nick: &str) -> std::io::Result<()> {
        if let Some(password) = &self.config.password {
            write_line(writer, &format!("PASS {password}")).await?;
        }
        write_line(writer, &format!("NICK {nick}")).await?;
        write_line(
            writer,
            &format!("USER {} 0 * :{}", self.config.user, self.config.realname),
        )
        .await
    }

    /// Handle one received line. Returns a [`Disconnect`] when the server
    /// closes the link.
    async fn handle_line<W: AsyncWrite + Unpin>(
        &mut self,
        line: &str,
        writer: &mut W,
        registered: &mut bool,
        nick: &mut String,
    ) -> std::io::Result<Option<Disconnect>> {
        tracing::debug!("<< {line}");
        self.emit(Event::RawLine(line.to_string())).await;

        let msg = match Message::parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(%line, "skipping malformed line: {e}");
                return Ok(None);
            }
        };
        let inbound = Inbound::from_message(msg);

        let mut closing = None;
        match &inbound {
            Inbound::Ping { token } => write_line(writer, &format!("PONG :{token}")).await?,
            Inbound::NickInUse { .. } if !*registered && self.nick_retries < NICK_RETRIES => {
                self.nick_retries += 1;
                nick.push('_');
                tracing::info!(%nick, "nick in use, retrying");
                self.session.update(|s| s.set_nick(nick));
                write_line(writer, &format!("NICK {nick}")).await?;
            }
            Inbound::NickInUse { .. } if !*registered => {
                tracing::warn!(%nick, "nick still in use after {NICK_RETRIES} retries, waiting for a new one");
            }
            Inbound::Error { text } => closing = Some(Disconnect::Lost(text.clone())),
            _ => {}
        }

        let welcome = matches!(inbound, Inbound::Welcome { .. });
        let now = Utc::now();
        let events = self.session.update(|s| {
            s.touch(now);
            dispatch::dispatch(s, inbound, now)
        });
        for event in events {
            self.emit(event).await;
        }

        if welcome && !*registered {
            *registered = true;
            tracing::info!(server = %self.config.server_name(), nick = %self.session.read(|s| s.nick().to_string()), "registered");
            self.set_state(ConnectionState::Connected).await;
            self.join_channels(writer).await?;
            for cmd in std::mem::take(&mut self.pending) {
                self.execute(writer, cmd).await?;
            }
        }
        Ok(closing)
    }

    /// Join autojoin channels plus whatever we were in before a reconnect.
    async fn join_channels<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> std::io::Result<()> {
        let mut seen = std::collections::HashSet::new();
        let channels: Vec<String> = self
            .config
            .autojoin
            .iter()
            .chain(self.rejoin.iter())
            .filter(|c| seen.insert(IrcKey::new(c)))
            .cloned()
            .collect();
        self.rejoin.clear();
        for channel in channels {
            write_line(writer, &format!("JOIN {channel}")).await?;
        }
        Ok(())
    }

    /// Write one command on the wire.
    async fn execute<W: AsyncWrite + Unpin>(&mut self, writer: &mut W, cmd: Command) -> std::io::Result<()> {
        match cmd {
            Command::Raw(line) => write_line(writer, &line).await,
            Command::Message { target, kind, text } => {
                let line = match kind {
                    MessageKind::Privmsg => format!("PRIVMSG {target} :{text}"),
                    MessageKind::Notice => format!("NOTICE {target} :{text}"),
                    MessageKind::Action => format!("PRIVMSG {target} :\x01ACTION {text}\x01"),
                };
                write_line(writer, &line).await?;
                let event = self
                    .session
                    .update(|s| dispatch::outgoing_message(s, &target, kind, &text, Utc::now()));
                self.emit(event).await;
                Ok(())
            }
            Command::Quit(reason) => match reason {
                Some(reason) => write_line(writer, &format!("QUIT :{reason}")).await,
                None => write_line(writer, "QUIT").await,
            },
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        let changed = self.session.update(|s| {
            let changed = s.state() != state;
            s.set_state(state);
            changed
        });
        if changed {
            tracing::debug!(server = %self.config.server_name(), %state, "state changed");
            self.emit(Event::StateChanged { state }).await;
        }
    }

    async fn emit(&self, event: Event) {
        // A dropped receiver only means nobody is watching.
        let _ = self.event_tx.send(event).await;
    }
}

fn is_nick_command(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .is_some_and(|command| command.eq_ignore_ascii_case("NICK"))
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    tracing::debug!(">> {line}");
    writer.write_all(format!("{line}\r\n").as_bytes()).await?;
    writer.flush().await
}
