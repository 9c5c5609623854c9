use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use mantaray_sdk::config::{ClientConfig, ServerConfig};
use mantaray_sdk::event::Event;
use mantaray_sdk::input::{self, Input, InputError};
use mantaray_sdk::manager::{Client, ServerEvent};
use mantaray_sdk::view;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Headless line-oriented IRC client.
///
/// Lines typed on stdin are sent to the current conversation; `/switch
/// <channel|nick>` changes it. Everything else (`/msg`, `/join`, `/me`, ...)
/// works as in any IRC client.
#[derive(Parser, Debug)]
#[command(name = "mantaray", version, about)]
struct Cli {
    /// Server host name.
    host: Option<String>,

    /// IRC nickname.
    nick: Option<String>,

    #[arg(long, default_value_t = 6667)]
    port: u16,

    /// Connect with TLS.
    #[arg(long)]
    tls: bool,

    /// Skip TLS certificate verification (for self-signed certs).
    #[arg(long)]
    tls_insecure: bool,

    /// Channel to join after connecting (repeatable).
    #[arg(long = "channel", short = 'c')]
    channels: Vec<String>,

    /// Server password.
    #[arg(long, env = "MANTARAY_PASSWORD")]
    password: Option<String>,

    /// TOML file with `[[server]]` entries. Host and nick arguments are then
    /// optional and add one more server.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn servers(&self) -> Result<Vec<ServerConfig>> {
        let mut servers = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?
                .servers,
            None => vec![],
        };
        match (&self.host, &self.nick) {
            (Some(host), Some(nick)) => servers.push(ServerConfig {
                host: host.clone(),
                port: self.port,
                tls: self.tls || self.tls_insecure,
                tls_insecure: self.tls_insecure,
                nick: nick.clone(),
                user: nick.to_lowercase(),
                password: self.password.clone(),
                autojoin: self.channels.clone(),
                ..Default::default()
            }),
            (Some(_), None) => bail!("a nick is required when a host is given"),
            _ => {}
        }
        if servers.is_empty() {
            bail!("nothing to connect to: give <HOST> <NICK> or --config FILE");
        }
        Ok(servers)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("mantaray=info".parse()?))
        .init();

    let cli = Cli::parse();
    let servers = cli.servers()?;

    let (mut client, mut events) = Client::new();
    let mut current_server = None;
    for server in servers {
        let name = server.server_name().to_string();
        tracing::info!("Connecting to {} as {}", server.addr(), server.nick);
        match client.connect(server).await {
            Ok(_) => {
                current_server.get_or_insert(name);
            }
            Err(e) => tracing::error!(server = %name, "{e}"),
        }
    }
    let Some(mut current_server) = current_server else {
        bail!("could not connect to any server");
    };
    let mut current_view: Option<String> = None;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    let servers: Vec<String> = client.servers().into_iter().map(String::from).collect();
                    for server in servers {
                        client.disconnect(&server, None).await?;
                    }
                    break;
                };
                if let Some(target) = line.strip_prefix("/switch ") {
                    let target = target.trim();
                    if client.get(target).is_some() {
                        current_server = target.to_string();
                        current_view = None;
                    } else {
                        current_view = Some(target.to_string());
                    }
                    continue;
                }
                let parsed = match input::parse_input(&line, current_view.as_deref()) {
                    Ok(Some(parsed)) => parsed,
                    Ok(None) => continue,
                    Err(InputError::NoTarget) => {
                        eprintln!("no conversation selected; use /switch <channel|nick>");
                        continue;
                    }
                    Err(e) => {
                        eprintln!("{e}");
                        continue;
                    }
                };
                if let Input::Quit(reason) = &parsed {
                    if let Err(e) = client.disconnect(&current_server, reason.as_deref()).await {
                        eprintln!("{current_server}: {e}");
                    }
                    let Some(next) = client.servers().first().map(|s| s.to_string()) else {
                        break;
                    };
                    current_server = next;
                    current_view = None;
                    continue;
                }
                let Some(handle) = client.get(&current_server) else {
                    eprintln!("not connected to {current_server}");
                    continue;
                };
                if let Err(e) = handle.submit(parsed).await {
                    eprintln!("{current_server}: {e}");
                }
            }
            event = events.recv() => {
                let Some(ServerEvent { server, event }) = event else {
                    break;
                };
                if let Event::Joined { channel, nick } = &event {
                    let own = client
                        .get(&server)
                        .is_some_and(|h| h.session().read(|s| s.is_self(nick)));
                    if own && server == current_server {
                        current_view = Some(channel.clone());
                    }
                }
                print_event(&client, &server, &event);
            }
        }
    }
    Ok(())
}

fn print_event(client: &Client, server: &str, event: &Event) {
    let Some(handle) = client.get(server) else {
        return;
    };
    let own_nick = handle.session().read(|s| s.nick().to_string());
    let Some(spans) = view::event_spans(event, &own_nick) else {
        return;
    };
    let place = match event {
        Event::Message(m) => handle.session().read(|s| s.conversation_for(m).to_string()),
        Event::Joined { channel, .. }
        | Event::Parted { channel, .. }
        | Event::Kicked { channel, .. }
        | Event::TopicChanged { channel, .. }
        | Event::Names { channel, .. } => channel.clone(),
        _ => server.to_string(),
    };
    let time = chrono::Local::now().format("%H:%M:%S");
    println!("{time} [{place}] {}", view::line_text(&spans));
}
