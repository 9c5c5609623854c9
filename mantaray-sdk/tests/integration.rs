//! Integration tests: in-process IRC relay + SDK clients.
//!
//! The relay speaks just enough IRC (registration, JOIN, PRIVMSG, PING) to
//! let two real clients talk to each other over TCP.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mantaray_sdk::client::{self, ClientHandle};
use mantaray_sdk::config::{ReconnectPolicy, ServerConfig};
use mantaray_sdk::event::{Event, MessageKind};
use mantaray_sdk::input::parse_input;
use mantaray_sdk::irc::Message;
use mantaray_sdk::manager::Client;
use mantaray_sdk::session::ConnectionState;
use mantaray_sdk::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Default)]
struct RelayState {
    /// lowercase nick -> (display nick, outgoing lines)
    users: HashMap<String, (String, mpsc::UnboundedSender<String>)>,
    /// lowercase channel -> lowercase member nicks
    channels: HashMap<String, BTreeSet<String>>,
}

type Shared = Arc<Mutex<RelayState>>;

struct RelayConn {
    tx: mpsc::UnboundedSender<String>,
    nick: Option<String>,
    user_seen: bool,
    registered: bool,
}

/// Helper: start a relay on a random port.
async fn start_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Shared::default();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(relay_connection(stream, state.clone()));
        }
    });
    addr
}

async fn relay_connection(stream: TcpStream, state: Shared) {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if writer.write_all(format!("{line}\r\n").as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut conn = RelayConn {
        tx,
        nick: None,
        user_seen: false,
        registered: false,
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(msg) = Message::parse(&line) else {
            continue;
        };
        if !relay_line(&state, &mut conn, &msg) {
            break;
        }
    }

    if let (true, Some(nick)) = (conn.registered, &conn.nick) {
        let key = nick.to_lowercase();
        let mut st = state.lock().unwrap();
        st.users.remove(&key);
        for members in st.channels.values_mut() {
            members.remove(&key);
        }
    }
}

/// Handle one client line. Returns false when the client quits.
fn relay_line(state: &Shared, conn: &mut RelayConn, msg: &Message) -> bool {
    let mut st = state.lock().unwrap();
    match msg.command.as_str() {
        "NICK" if !conn.registered => {
            let wanted = msg.param(0).unwrap_or_default().to_string();
            if st.users.contains_key(&wanted.to_lowercase()) {
                let _ = conn.tx.send(format!(":relay 433 * {wanted} :Nickname is already in use"));
            } else {
                conn.nick = Some(wanted);
            }
        }
        "USER" => conn.user_seen = true,
        "PING" => {
            let token = msg.param(0).unwrap_or_default();
            let _ = conn.tx.send(format!(":relay PONG relay :{token}"));
        }
        "QUIT" => return false,
        "JOIN" if conn.registered => {
            let nick = conn.nick.clone().unwrap_or_default();
            let channel = msg.param(0).unwrap_or_default().to_string();
            let members = st.channels.entry(channel.to_lowercase()).or_default();
            members.insert(nick.to_lowercase());
            let members: Vec<String> = members.iter().cloned().collect();
            let mut names = vec![];
            for member in &members {
                if let Some((display, tx)) = st.users.get(member) {
                    let _ = tx.send(format!(":{nick}!{nick}@relay JOIN {channel}"));
                    names.push(display.clone());
                }
            }
            let _ = conn.tx.send(format!(":relay 353 {nick} = {channel} :{}", names.join(" ")));
            let _ = conn.tx.send(format!(":relay 366 {nick} {channel} :End of /NAMES list."));
        }
        "PRIVMSG" if conn.registered => {
            let nick = conn.nick.clone().unwrap_or_default();
            let (Some(target), Some(text)) = (msg.param(0), msg.param(1)) else {
                return true;
            };
            let line = format!(":{nick}!{nick}@relay PRIVMSG {target} :{text}");
            if target.starts_with('#') {
                let members = st.channels.get(&target.to_lowercase()).cloned().unwrap_or_default();
                for member in members.iter().filter(|m| **m != nick.to_lowercase()) {
                    if let Some((_, tx)) = st.users.get(member) {
                        let _ = tx.send(line.clone());
                    }
                }
            } else if let Some((_, tx)) = st.users.get(&target.to_lowercase()) {
                let _ = tx.send(line);
            }
        }
        _ => {}
    }

    if !conn.registered && conn.user_seen {
        if let Some(nick) = conn.nick.clone() {
            let key = nick.to_lowercase();
            if let std::collections::hash_map::Entry::Vacant(slot) = st.users.entry(key) {
                slot.insert((nick.clone(), conn.tx.clone()));
                conn.registered = true;
                let _ = conn.tx.send(format!(":relay 001 {nick} :Welcome to the relay"));
            }
        }
    }
    true
}

/// Helper: wait for a specific event, with timeout.
async fn expect_event(
    events: &mut mpsc::Receiver<Event>,
    timeout_ms: u64,
    predicate: impl Fn(&Event) -> bool,
    description: &str,
) -> Event {
    let deadline = Duration::from_millis(timeout_ms);
    let start = tokio::time::Instant::now();
    loop {
        match timeout(deadline.saturating_sub(start.elapsed()), events.recv()).await {
            Ok(Some(event)) => {
                if predicate(&event) {
                    return event;
                }
            }
            Ok(None) => panic!("Channel closed while waiting for: {description}"),
            Err(_) => panic!("Timeout waiting for: {description}"),
        }
    }
}

fn config(addr: SocketAddr, nick: &str) -> ServerConfig {
    ServerConfig {
        name: format!("relay-{nick}"),
        host: addr.ip().to_string(),
        port: addr.port(),
        nick: nick.to_string(),
        user: nick.to_lowercase(),
        autojoin: vec!["#autojoin".to_string()],
        reconnect: ReconnectPolicy {
            initial_delay_ms: 10,
            max_delay_ms: 100,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Connect and wait until our own JOIN of #autojoin comes back.
async fn join_autojoin(addr: SocketAddr, nick: &str) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (handle, mut events) = client::connect(config(addr, nick)).await.unwrap();
    let own = nick.to_string();
    expect_event(
        &mut events,
        2000,
        |e| matches!(e, Event::Joined { channel, nick } if channel == "#autojoin" && *nick == own),
        "own join of #autojoin",
    )
    .await;
    (handle, events)
}

async fn next_line(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> String {
    timeout(Duration::from_secs(3), lines.next_line())
        .await
        .expect("timed out waiting for a client line")
        .unwrap()
        .expect("client closed the connection")
}

// ── Messaging ───────────────────────────────────────────────────────

#[tokio::test]
async fn channel_message_reaches_other_client() {
    let addr = start_relay().await;
    let (alice, mut alice_events) = join_autojoin(addr, "Alice").await;
    let (_bob, mut bob_events) = join_autojoin(addr, "Bob").await;
    expect_event(
        &mut alice_events,
        2000,
        |e| matches!(e, Event::Joined { nick, .. } if nick == "Bob"),
        "Bob joining",
    )
    .await;

    alice.privmsg("#autojoin", "Hello there").await.unwrap();

    let own = expect_event(&mut alice_events, 2000, |e| matches!(e, Event::Message(_)), "own echo").await;
    assert!(matches!(own, Event::Message(m) if m.own && m.text == "Hello there"));

    let got = expect_event(&mut bob_events, 2000, |e| matches!(e, Event::Message(_)), "message at Bob").await;
    let Event::Message(m) = got else { unreachable!() };
    assert_eq!(m.from, "Alice");
    assert_eq!(m.target, "#autojoin");
    assert_eq!(m.text, "Hello there");
    assert!(!m.own);

    let members: Vec<String> = alice.session().read(|s| {
        s.channel("#AUTOJOIN").unwrap().members().map(|m| m.to_string()).collect()
    });
    assert_eq!(members, vec!["Alice", "Bob"]);
}

#[tokio::test]
async fn private_thread_is_case_insensitive() {
    let addr = start_relay().await;
    let (alice, mut alice_events) = join_autojoin(addr, "Alice").await;
    let (bob, mut bob_events) = join_autojoin(addr, "Bob").await;

    let input = parse_input("/msg Bob hello there", Some("#autojoin")).unwrap().unwrap();
    alice.submit(input).await.unwrap();

    expect_event(
        &mut bob_events,
        2000,
        |e| matches!(e, Event::Message(m) if m.text == "hello there" && m.target == "Bob"),
        "private message at Bob",
    )
    .await;
    assert_eq!(bob.session().read(|s| s.thread("alice").map(|t| t.nick.clone())), Some("Alice".to_string()));

    let reply = parse_input("Hey Alice", Some("Alice")).unwrap().unwrap();
    bob.submit(reply).await.unwrap();
    expect_event(
        &mut alice_events,
        2000,
        |e| matches!(e, Event::Message(m) if m.text == "Hey Alice" && m.from == "Bob"),
        "reply at Alice",
    )
    .await;

    let again = parse_input("/msg bob lowercase this time", Some("#autojoin")).unwrap().unwrap();
    alice.submit(again).await.unwrap();
    expect_event(
        &mut bob_events,
        2000,
        |e| matches!(e, Event::Message(m) if m.text == "lowercase this time"),
        "second private message at Bob",
    )
    .await;

    let (threads, history, nick) = alice.session().read(|s| {
        let thread = s.thread("BOB").unwrap();
        (s.threads().count(), thread.history.len(), thread.nick.clone())
    });
    assert_eq!(threads, 1);
    assert_eq!(history, 3);
    assert_eq!(nick, "Bob");
    assert_eq!(bob.session().read(|s| s.threads().count()), 1);
}

#[tokio::test]
async fn blank_input_sends_nothing_and_double_slash_is_literal() {
    let addr = start_relay().await;
    let (alice, _alice_events) = join_autojoin(addr, "Alice").await;
    let (_bob, mut bob_events) = join_autojoin(addr, "Bob").await;

    assert_eq!(parse_input("", Some("#autojoin")), Ok(None));
    let path = parse_input("//home/alice/codes", Some("#autojoin")).unwrap().unwrap();
    alice.submit(path).await.unwrap();

    let got = expect_event(&mut bob_events, 2000, |e| matches!(e, Event::Message(_)), "message at Bob").await;
    assert!(matches!(got, Event::Message(m) if m.text == "/home/alice/codes"));
}

#[tokio::test]
async fn action_round_trips_as_action() {
    let addr = start_relay().await;
    let (alice, _alice_events) = join_autojoin(addr, "Alice").await;
    let (_bob, mut bob_events) = join_autojoin(addr, "Bob").await;

    alice.action("#autojoin", "waves").await.unwrap();
    let got = expect_event(&mut bob_events, 2000, |e| matches!(e, Event::Message(_)), "action at Bob").await;
    assert!(matches!(got, Event::Message(m) if m.kind == MessageKind::Action && m.text == "waves"));
}

#[tokio::test]
async fn nick_in_use_gets_underscore() {
    let addr = start_relay().await;
    let (_alice, _alice_events) = join_autojoin(addr, "Alice").await;
    let (second, mut events) = client::connect(config(addr, "alice")).await.unwrap();
    let reg = expect_event(&mut events, 2000, |e| matches!(e, Event::Registered { .. }), "Registered").await;
    assert!(matches!(reg, Event::Registered { nick } if nick == "alice_"));
    assert_eq!(second.session().read(|s| s.nick().to_string()), "alice_");
}

// ── Connection management ───────────────────────────────────────────

#[tokio::test]
async fn unreachable_host_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client::connect(config(addr, "Alice")).await.err().unwrap();
    assert!(matches!(err, Error::Network { .. }), "got {err:?}");
}

#[tokio::test]
async fn silent_server_gets_pinged_then_dropped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cfg = ServerConfig {
        ping_interval_secs: 1,
        ping_timeout_secs: 2,
        reconnect: ReconnectPolicy {
            enabled: false,
            ..Default::default()
        },
        ..config(addr, "Alice")
    };
    let (_handle, mut events) = client::connect(cfg).await.unwrap();

    let (stream, _) = listener.accept().await.unwrap();
    let (r, mut w) = stream.into_split();
    let mut lines = BufReader::new(r).lines();
    next_line(&mut lines).await;
    next_line(&mut lines).await;
    w.write_all(b":srv 001 Alice :Welcome\r\n").await.unwrap();
    assert_eq!(next_line(&mut lines).await, "JOIN #autojoin");
    assert!(next_line(&mut lines).await.starts_with("PING :"));

    let lost = expect_event(&mut events, 4000, |e| matches!(e, Event::Disconnected { .. }), "ping timeout").await;
    assert!(matches!(lost, Event::Disconnected { reason } if reason == "ping timeout"));
}

#[tokio::test]
async fn answered_keepalive_keeps_link_up() {
    let addr = start_relay().await;
    let cfg = ServerConfig {
        ping_interval_secs: 1,
        ping_timeout_secs: 1,
        ..config(addr, "Alice")
    };
    let (handle, mut events) = client::connect(cfg).await.unwrap();
    expect_event(
        &mut events,
        2000,
        |e| matches!(e, Event::Joined { channel, .. } if channel == "#autojoin"),
        "own join of #autojoin",
    )
    .await;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(3500);
    let mut pongs = 0;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        match event {
            Event::Disconnected { reason } => panic!("link dropped: {reason}"),
            Event::RawLine(line) if line.contains(" PONG ") => pongs += 1,
            _ => {}
        }
    }
    assert!(pongs >= 2, "only {pongs} keepalive replies");
    assert_eq!(handle.session().read(|s| s.state()), ConnectionState::Connected);
}

#[tokio::test]
async fn server_error_triggers_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_handle, mut events) = client::connect(config(addr, "Alice")).await.unwrap();

    let (stream, _) = listener.accept().await.unwrap();
    let (r, mut w) = stream.into_split();
    let mut lines = BufReader::new(r).lines();
    next_line(&mut lines).await;
    next_line(&mut lines).await;
    w.write_all(b":srv 001 Alice :Welcome\r\nERROR :Closing link (flood)\r\n")
        .await
        .unwrap();

    let lost = expect_event(&mut events, 2000, |e| matches!(e, Event::Disconnected { .. }), "Disconnected").await;
    assert!(matches!(lost, Event::Disconnected { reason } if reason == "Closing link (flood)"));
    let retry = expect_event(&mut events, 2000, |e| matches!(e, Event::Reconnecting { .. }), "Reconnecting").await;
    assert!(matches!(retry, Event::Reconnecting { attempt: 1, .. }));

    let (stream, _) = listener.accept().await.unwrap();
    let mut lines = BufReader::new(stream).lines();
    assert_eq!(
        timeout(Duration::from_secs(3), lines.next_line()).await.unwrap().unwrap(),
        Some("NICK Alice".to_string())
    );
}

#[tokio::test]
async fn reconnect_gives_up_after_max_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cfg = ServerConfig {
        reconnect: ReconnectPolicy {
            initial_delay_ms: 10,
            max_delay_ms: 20,
            max_attempts: Some(2),
            ..Default::default()
        },
        ..config(addr, "Alice")
    };
    let (handle, mut events) = client::connect(cfg).await.unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    // nothing listens any more, so every reconnect is refused
    drop(listener);
    drop(stream);

    let mut attempts = vec![];
    let ended = timeout(Duration::from_secs(3), async {
        while let Some(event) = events.recv().await {
            if let Event::Reconnecting { attempt, .. } = event {
                attempts.push(attempt);
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "event stream should end after the last attempt");
    assert_eq!(attempts, vec![1, 2]);
    assert!(!handle.is_alive());
    assert_eq!(handle.session().read(|s| s.state()), ConnectionState::Disconnected);
}

#[tokio::test]
async fn dropped_link_reconnects_and_rejoins() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cfg = ServerConfig {
        autojoin: vec![],
        ..config(addr, "Alice")
    };
    let (handle, mut events) = client::connect(cfg).await.unwrap();

    {
        let (stream, _) = listener.accept().await.unwrap();
        let (r, mut w) = stream.into_split();
        let mut lines = BufReader::new(r).lines();
        assert_eq!(next_line(&mut lines).await, "NICK Alice");
        next_line(&mut lines).await;
        w.write_all(b":srv 001 Alice :Welcome\r\n").await.unwrap();
        handle.join("#rust").await.unwrap();
        assert_eq!(next_line(&mut lines).await, "JOIN #rust");
        w.write_all(b":Alice!a@h JOIN #rust\r\n").await.unwrap();
        expect_event(&mut events, 2000, |e| matches!(e, Event::Joined { .. }), "join").await;
        // dropping both halves closes the link
    }

    expect_event(&mut events, 2000, |e| matches!(e, Event::Disconnected { .. }), "Disconnected").await;
    assert_eq!(handle.session().read(|s| s.channel("#rust").map(|c| c.member_count())), Some(0));
    let retry = expect_event(&mut events, 2000, |e| matches!(e, Event::Reconnecting { .. }), "Reconnecting").await;
    assert!(matches!(retry, Event::Reconnecting { attempt: 1, delay } if delay == Duration::from_millis(10)));

    let (stream, _) = listener.accept().await.unwrap();
    let (r, mut w) = stream.into_split();
    let mut lines = BufReader::new(r).lines();
    assert_eq!(next_line(&mut lines).await, "NICK Alice");
    next_line(&mut lines).await;
    w.write_all(b":srv 001 Alice :Welcome back\r\n").await.unwrap();
    assert_eq!(next_line(&mut lines).await, "JOIN #rust");
    expect_event(
        &mut events,
        2000,
        |e| matches!(e, Event::StateChanged { state: ConnectionState::Connected }),
        "Connected again",
    )
    .await;
}

#[tokio::test]
async fn quit_cancels_pending_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cfg = ServerConfig {
        reconnect: ReconnectPolicy {
            initial_delay_ms: 60_000,
            ..Default::default()
        },
        ..config(addr, "Alice")
    };
    let (handle, mut events) = client::connect(cfg).await.unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    drop(stream);

    expect_event(&mut events, 2000, |e| matches!(e, Event::Reconnecting { .. }), "Reconnecting").await;
    handle.quit(None).await.unwrap();

    let closed = timeout(Duration::from_secs(2), async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "event stream should end after quit");
    assert!(!handle.is_alive());
}

#[tokio::test]
async fn manager_refuses_duplicate_connection() {
    let addr = start_relay().await;
    let (mut client, mut events) = Client::new();

    let mut cfg = config(addr, "Alice");
    cfg.name = "relay".to_string();
    client.connect(cfg.clone()).await.unwrap();
    let err = client.connect(cfg).await.err().unwrap();
    assert!(matches!(err, Error::AlreadyConnected(name) if name == "relay"));

    let first = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    assert_eq!(first.server, "relay");
    assert_eq!(client.servers(), vec!["relay"]);

    client.disconnect("RELAY", Some("bye")).await.unwrap();
    assert!(matches!(client.disconnect("relay", None).await, Err(Error::UnknownServer(_))));
}

#[tokio::test]
async fn quit_handle_then_disconnect_from_manager() {
    let addr = start_relay().await;
    let (mut client, _events) = Client::new();
    let mut cfg = config(addr, "Alice");
    cfg.name = "relay".to_string();
    let handle = client.connect(cfg).await.unwrap();

    handle.submit(parse_input("/quit bye", None).unwrap().unwrap()).await.unwrap();
    let stopped = timeout(Duration::from_secs(2), async {
        while handle.is_alive() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(stopped.is_ok(), "connection task should end after /quit");

    assert!(client.servers().is_empty());
    assert!(matches!(handle.privmsg("#autojoin", "too late").await, Err(Error::Closed)));
    client.disconnect("relay", None).await.unwrap();
    assert!(client.get("relay").is_none());
}
