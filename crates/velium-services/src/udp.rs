//! UDP transport engine.
//!
//! UDP never originates a session. A remote endpoint binds itself to a
//! session minted over TCP by sending a 17-byte `SESSION` frame; an unknown
//! session gets a single `QUIT` byte back. Each datagram is dispatched on its
//! own task, so two datagrams from one address may be handled out of order.
//! Client records are only ever removed by the idle reaper.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::Instant;

use velium_core::wire::{self, Message, SessionId};

use crate::error::{GatewayError, ProtocolError};
use crate::reaper::{self, LastSeen};
use crate::session::SessionDirectory;

#[derive(Debug, Clone, Copy)]
pub struct UdpSettings {
    pub idle_timeout: Duration,
    pub max_datagram_bytes: usize,
}

/// One remote endpoint seen on the UDP socket.
#[derive(Debug, Clone)]
pub struct UdpClient {
    pub remote_addr: SocketAddr,
    pub remote_key: String,
    /// Never set over UDP; kept so both transports log identities alike.
    pub display_name: String,
    /// Set by a successful bind, cleared by a bind to an unknown session.
    pub session_id: Option<SessionId>,
    pub last_seen: Instant,
}

impl UdpClient {
    fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            remote_key: remote_addr.to_string(),
            display_name: String::new(),
            session_id: None,
            last_seen: Instant::now(),
        }
    }

    pub fn identity(&self) -> String {
        if self.display_name.is_empty() {
            self.remote_key.clone()
        } else {
            format!("{}@{}", self.display_name, self.remote_key)
        }
    }
}

impl LastSeen for UdpClient {
    fn last_seen(&self) -> Instant {
        self.last_seen
    }
}

/// UDP endpoints keyed on remote socket address.
pub type UdpClientTable = Arc<DashMap<SocketAddr, UdpClient>>;

#[derive(Debug, Clone)]
pub struct UdpEngine {
    socket: Arc<UdpSocket>,
    clients: UdpClientTable,
    directory: SessionDirectory,
    settings: UdpSettings,
}

impl UdpEngine {
    pub fn new(socket: Arc<UdpSocket>, directory: SessionDirectory, settings: UdpSettings) -> Self {
        Self {
            socket,
            clients: Arc::new(DashMap::new()),
            directory,
            settings,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Session the endpoint at `remote` is currently bound to.
    pub fn bound_session(&self, remote: &SocketAddr) -> Option<SessionId> {
        self.clients.get(remote).and_then(|c| c.session_id)
    }

    /// Receive datagrams until shutdown, handing each to its own task.
    pub async fn recv_loop(self, mut shutdown: broadcast::Receiver<()>) {
        let mut buf = vec![0u8; self.settings.max_datagram_bytes];

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("udp listener shutting down");
                    return;
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    let data = Bytes::copy_from_slice(&buf[..len]);
                    let engine = self.clone();
                    tokio::spawn(async move { engine.handle_datagram(peer, data).await });
                }
            }
        }
    }

    /// Record activity for `peer` and act on one datagram from it.
    pub async fn handle_datagram(&self, peer: SocketAddr, data: Bytes) {
        let identity = self.observe(peer);

        tracing::debug!(
            client = %identity,
            opcode = data.first().copied().unwrap_or_default(),
            len = data.len(),
            "udp datagram"
        );

        if let Err(e) = self.dispatch(peer, &data).await {
            tracing::warn!(client = %identity, error = %e, "error handling datagram");
        }
    }

    /// Resolve or create the record for `peer` and refresh its last_seen.
    fn observe(&self, peer: SocketAddr) -> String {
        let mut client = self.clients.entry(peer).or_insert_with(|| {
            tracing::info!(client = %peer, "new udp client");
            UdpClient::new(peer)
        });
        client.last_seen = Instant::now();
        client.identity()
    }

    async fn dispatch(&self, peer: SocketAddr, data: &[u8]) -> Result<(), GatewayError> {
        let message = wire::decode(data)?;
        let opcode = message.opcode();

        match message {
            Message::Identify(_) | Message::Ping(_) | Message::Command(_) => {
                tracing::debug!(client = %peer, ?opcode, "ignoring opcode unsupported on udp");
                Ok(())
            }
            Message::Session(raw) => self.bind(peer, raw).await,
            Message::Quit(_)
            | Message::CommandResponse(_)
            | Message::Pong(_)
            | Message::Echo(_) => Err(ProtocolError::UnknownCommand(opcode).into()),
        }
    }

    /// Bind `peer` to the session in `raw`, or tell it to quit.
    async fn bind(&self, peer: SocketAddr, raw: &[u8]) -> Result<(), GatewayError> {
        let id = SessionId::from_slice(raw)?;
        let session = self.directory.get(&id);

        self.clients
            .entry(peer)
            .or_insert_with(|| UdpClient::new(peer))
            .session_id = session.as_ref().map(|s| s.id);

        match session {
            Some(session) => {
                tracing::info!(
                    client = %peer,
                    session_id = %id,
                    name = %session.display_name,
                    "udp client bound to session"
                );
            }
            None => {
                tracing::warn!(client = %peer, session_id = %id, "unknown session, sending QUIT");
                if let Err(e) = self.socket.send_to(&wire::quit_frame(), peer).await {
                    tracing::warn!(client = %peer, error = %e, "failed to send QUIT");
                }
            }
        }
        Ok(())
    }

    /// Forget every endpoint silent for longer than the idle timeout.
    pub fn sweep_idle(&self) -> usize {
        reaper::sweep_idle(&self.clients, self.settings.idle_timeout, |_, client| {
            tracing::info!(client = %client.identity(), "udp client disconnected (inactive)");
        })
    }
}
