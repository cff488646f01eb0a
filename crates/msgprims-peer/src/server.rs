use std::collections::HashMap;
use std::fmt;

use msgprims_transport::{Endpoint, IpcListener};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::PeerConfig;
use crate::error::{PeerError, Result};
use crate::peer::{to_json, Peer, PeerEvent, PeerHandle};

/// Handle for one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
pub enum ServerEvent {
    /// A new connection was accepted.
    Connected {
        connection: ConnectionId,
        remote: String,
    },
    /// An event from one connection. After
    /// [`PeerEvent::Disconnected`] the id is no longer valid.
    Peer {
        connection: ConnectionId,
        event: PeerEvent,
    },
}

impl ServerEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            ServerEvent::Connected { connection, .. } | ServerEvent::Peer { connection, .. } => {
                *connection
            }
        }
    }
}

/// Accepts connections and multiplexes their events.
///
/// Each connection runs its own task with its own callbacks and response
/// streams. The table of live connections is only touched from
/// [`Server::next_event`] and the other `&mut self` methods.
pub struct Server {
    listener: IpcListener,
    config: PeerConfig,
    connections: HashMap<ConnectionId, PeerHandle>,
    next_id: u64,
    events_tx: mpsc::UnboundedSender<(ConnectionId, PeerEvent)>,
    events_rx: mpsc::UnboundedReceiver<(ConnectionId, PeerEvent)>,
}

impl Server {
    /// Bind a listener; every accepted connection uses `config`.
    pub async fn bind(endpoint: &Endpoint, config: PeerConfig) -> Result<Self> {
        let listener = IpcListener::bind(endpoint).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            listener,
            config,
            connections: HashMap::new(),
            next_id: 1,
            events_tx,
            events_rx,
        })
    }

    /// The endpoint actually bound (resolves TCP port 0).
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        Ok(self.listener.local_endpoint()?)
    }

    /// Wait for the next accepted connection or connection event.
    ///
    /// Accept failures are returned; the server stays usable.
    pub async fn next_event(&mut self) -> Result<ServerEvent> {
        tokio::select! {
            accepted = self.listener.accept() => {
                let stream = accepted?;
                let connection = ConnectionId(self.next_id);
                self.next_id += 1;
                let remote = stream.peer_description();

                let events = self.events_tx.clone();
                let handle = Peer::spawn_with_sink(
                    stream,
                    self.config.clone(),
                    connection.to_string(),
                    Box::new(move |event: PeerEvent| {
                        let _ = events.send((connection, event));
                    }),
                );
                self.connections.insert(connection, handle);
                info!(%connection, %remote, "accepted connection");
                Ok(ServerEvent::Connected { connection, remote })
            }
            Some((connection, event)) = self.events_rx.recv() => {
                if let PeerEvent::Disconnected(reason) = &event {
                    if self.connections.remove(&connection).is_some() {
                        debug!(%connection, %reason, "released connection");
                    }
                }
                Ok(ServerEvent::Peer { connection, event })
            }
        }
    }

    pub fn connection(&self, connection: ConnectionId) -> Option<&PeerHandle> {
        self.connections.get(&connection)
    }

    /// Ids of live connections, oldest first.
    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn send_to<T: Serialize + ?Sized>(
        &self,
        connection: ConnectionId,
        data: &T,
    ) -> Result<()> {
        self.connections
            .get(&connection)
            .ok_or(PeerError::UnknownConnection(connection.get()))?
            .send(data)
            .await
    }

    /// Send to every live connection; returns how many accepted the frame.
    pub async fn broadcast<T: Serialize + ?Sized>(&self, data: &T) -> Result<usize> {
        let value = to_json(data)?;
        let mut delivered = 0;
        for (connection, handle) in &self.connections {
            match handle.send(&value).await {
                Ok(()) => delivered += 1,
                Err(err) => debug!(%connection, error = %err, "broadcast skipped connection"),
            }
        }
        Ok(delivered)
    }

    /// Close one connection and forget it. Its `Disconnected` event is
    /// still delivered.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Result<()> {
        let handle = self
            .connections
            .remove(&connection)
            .ok_or(PeerError::UnknownConnection(connection.get()))?;
        handle.close();
        Ok(())
    }

    /// Close every connection.
    pub fn close_all(&mut self) {
        for (_, handle) in self.connections.drain() {
            handle.close();
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("connections", &self.connections.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
