//! Several server connections behind one event stream.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use crate::casemap::IrcKey;
use crate::client::{self, ClientHandle};
use crate::config::{ClientConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::event::Event;

/// An event and the server it came from.
#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub server: String,
    pub event: Event,
}

/// Registry of live connections, keyed by server name.
pub struct Client {
    connections: BTreeMap<IrcKey, ClientHandle>,
    event_tx: mpsc::Sender<ServerEvent>,
}

impl Client {
    pub fn new() -> (Self, mpsc::Receiver<ServerEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let client = Self {
            connections: BTreeMap::new(),
            event_tx,
        };
        (client, event_rx)
    }

    /// Connect to a server. Refused while a connection with the same name is
    /// still running.
    pub async fn connect(&mut self, config: ServerConfig) -> Result<ClientHandle> {
        let name = config.server_name().to_string();
        let key = IrcKey::new(&name);
        if self.connections.get(&key).is_some_and(|h| h.is_alive()) {
            return Err(Error::AlreadyConnected(name));
        }

        let (handle, mut events) = client::connect(config).await?;
        let event_tx = self.event_tx.clone();
        let server = name.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let event = ServerEvent {
                    server: server.clone(),
                    event,
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            tracing::debug!(%server, "event stream ended");
        });

        self.connections.insert(key, handle.clone());
        Ok(handle)
    }

    /// Connect to every server in `config`; one failure does not stop the
    /// others.
    pub async fn connect_all(&mut self, config: &ClientConfig) -> Vec<(String, Result<ClientHandle>)> {
        let mut results = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let name = server.server_name().to_string();
            let result = self.connect(server.clone()).await;
            if let Err(e) = &result {
                tracing::warn!(server = %name, "could not connect: {e}");
            }
            results.push((name, result));
        }
        results
    }

    pub fn get(&self, server: &str) -> Option<&ClientHandle> {
        self.connections.get(&IrcKey::new(server))
    }

    /// Names of the connections whose task is still running.
    pub fn servers(&self) -> Vec<&str> {
        self.connections
            .values()
            .filter(|h| h.is_alive())
            .map(|h| h.server())
            .collect()
    }

    /// Quit one server and forget it.
    pub async fn disconnect(&mut self, server: &str, reason: Option<&str>) -> Result<()> {
        let handle = self
            .connections
            .remove(&IrcKey::new(server))
            .ok_or_else(|| Error::UnknownServer(server.to_string()))?;
        match handle.quit(reason).await {
            // already gone
            Err(Error::Closed) => Ok(()),
            other => other,
        }
    }
}
