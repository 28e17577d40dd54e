//! TCP transport engine.
//!
//! Every accepted connection gets its own task that reads newline-terminated
//! frames strictly in order and dispatches them by opcode. Outbound frames
//! (replies and directed messages from other connections) go through a
//! per-connection unbounded queue drained by a writer task, so no table lock
//! is ever held across a socket write.
//!
//! A connection starts unidentified. It must send `IDENTIFY` within the grace
//! period or it is dropped without a reply. Identify mints a session in the
//! directory; every way a connection ends releases that session again.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::Instant;

use velium_core::wire::{self, Message, SessionId};

use crate::error::{Arity, GatewayError, ProtocolError};
use crate::reaper::{self, LastSeen};
use crate::session::SessionDirectory;

/// Tunables for the TCP engine.
#[derive(Debug, Clone, Copy)]
pub struct TcpSettings {
    pub identify_grace: Duration,
    pub idle_timeout: Duration,
    pub max_line_bytes: usize,
}

/// Where a connection is in the identify handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Identified; the session id never changes for the life of the connection.
    Identified(SessionId),
}

/// One accepted stream connection.
#[derive(Debug)]
pub struct TcpClient {
    /// Remote address string. Table key and fallback identity.
    pub remote_key: String,
    /// Empty until identify. A later identify renames.
    pub display_name: String,
    pub state: ConnectionState,
    pub created_at: Instant,
    pub last_seen: Instant,
    outbound: mpsc::UnboundedSender<Bytes>,
    kill: Arc<Notify>,
}

impl TcpClient {
    pub fn session_id(&self) -> Option<SessionId> {
        match self.state {
            ConnectionState::Identified(id) => Some(id),
            ConnectionState::Connected => None,
        }
    }

    pub fn is_identified(&self) -> bool {
        matches!(self.state, ConnectionState::Identified(_))
    }

    /// `name@addr` once identified, otherwise just the address.
    pub fn identity(&self) -> String {
        if self.display_name.is_empty() {
            self.remote_key.clone()
        } else {
            format!("{}@{}", self.display_name, self.remote_key)
        }
    }

    /// Name used as the sender of directed messages.
    fn sender_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.remote_key
        } else {
            &self.display_name
        }
    }
}

impl LastSeen for TcpClient {
    fn last_seen(&self) -> Instant {
        self.last_seen
    }
}

/// Connected TCP clients keyed on remote address string.
pub type TcpClientTable = Arc<DashMap<String, TcpClient>>;

#[derive(Debug, Clone)]
pub struct TcpEngine {
    clients: TcpClientTable,
    directory: SessionDirectory,
    settings: TcpSettings,
}

impl TcpEngine {
    pub fn new(directory: SessionDirectory, settings: TcpSettings) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            directory,
            settings,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Display name of the client connected from `remote`, if any.
    pub fn display_name(&self, remote: &SocketAddr) -> Option<String> {
        self.clients
            .get(&remote.to_string())
            .map(|c| c.display_name.clone())
    }

    /// Accept connections until shutdown, then drop every open connection.
    pub async fn accept_loop(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    for client in self.clients.iter() {
                        client.kill.notify_one();
                    }
                    tracing::info!("tcp listener shutting down");
                    return;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(self.clone().handle_connection(stream, peer));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        }
    }

    async fn handle_connection(self, stream: TcpStream, peer: SocketAddr) {
        let key = peer.to_string();
        let now = Instant::now();
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let kill = Arc::new(Notify::new());

        self.clients.insert(
            key.clone(),
            TcpClient {
                remote_key: key.clone(),
                display_name: String::new(),
                state: ConnectionState::Connected,
                created_at: now,
                last_seen: now,
                outbound: outbound.clone(),
                kill: kill.clone(),
            },
        );
        tracing::info!(client = %key, "client connected");

        tokio::spawn(write_loop(write_half, outbound_rx, kill.clone(), key.clone()));

        let result = self
            .read_loop(&key, read_half, &outbound, &kill, now + self.settings.identify_grace)
            .await;
        drop(outbound);

        let identity = self.teardown(&key).unwrap_or(key);
        let remaining = self.clients.len();
        match result {
            Ok(()) => tracing::info!(client = %identity, remaining, "client disconnected"),
            Err(e) => tracing::info!(client = %identity, remaining, reason = %e, "client disconnected"),
        }
    }

    /// Read and dispatch frames until the connection has to end.
    ///
    /// `Ok(())` is a clean end of stream; every `Err` is fatal.
    async fn read_loop(
        &self,
        key: &str,
        read_half: OwnedReadHalf,
        outbound: &mpsc::UnboundedSender<Bytes>,
        kill: &Notify,
        identify_deadline: Instant,
    ) -> Result<(), GatewayError> {
        let mut reader = BufReader::new(read_half);
        let mut line = Vec::with_capacity(256);

        loop {
            let identified = match self.clients.get(key) {
                Some(client) => client.is_identified(),
                None => return Err(GatewayError::Evicted),
            };
            let grace = async {
                if identified {
                    std::future::pending::<()>().await
                } else {
                    tokio::time::sleep_until(identify_deadline).await
                }
            };

            tokio::select! {
                _ = kill.notified() => return Err(GatewayError::Evicted),
                _ = grace => return Err(GatewayError::HandshakeTimeout(self.settings.identify_grace)),
                read = read_line(&mut reader, &mut line, self.settings.max_line_bytes) => {
                    if !read? {
                        return Ok(());
                    }
                }
            }

            tracing::debug!(
                client = key,
                opcode = line.first().copied().unwrap_or_default(),
                payload = %String::from_utf8_lossy(line.get(1..).unwrap_or_default()),
                "tcp frame"
            );

            if let Err(e) = self.dispatch(key, &line, outbound) {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(client = key, error = %e, "error handling message");
            }
            self.refresh(key);
        }
    }

    fn dispatch(
        &self,
        key: &str,
        line: &[u8],
        outbound: &mpsc::UnboundedSender<Bytes>,
    ) -> Result<(), GatewayError> {
        let message = wire::decode(line)?;
        let opcode = message.opcode();

        match message {
            Message::Identify(args) => {
                Arity::Exactly(1).check(opcode, &args)?;
                self.identify(key, args[0], outbound)
            }
            Message::Session(_) => {
                tracing::debug!(client = key, "ignoring SESSION on tcp");
                Ok(())
            }
            Message::Ping(args) => {
                Arity::Exactly(1).check(opcode, &args)?;
                reply(outbound, wire::PONG_LINE)
            }
            Message::Command(args) => {
                Arity::AtLeast(2).check(opcode, &args)?;
                reply(outbound, &wire::command_response(&args[1..]))
            }
            Message::Echo(args) => {
                Arity::AtLeast(3).check(opcode, &args)?;
                self.send_directed(key, args[1], &args[2..].join(" "))
            }
            Message::Quit(_) | Message::CommandResponse(_) | Message::Pong(_) => {
                Err(ProtocolError::UnknownCommand(opcode).into())
            }
        }
    }

    /// First identify mints a session; later ones only rename.
    fn identify(
        &self,
        key: &str,
        name: &str,
        outbound: &mpsc::UnboundedSender<Bytes>,
    ) -> Result<(), GatewayError> {
        if name.is_empty() {
            return Err(ProtocolError::EmptyName.into());
        }

        {
            let mut client = self.clients.get_mut(key).ok_or(GatewayError::Evicted)?;
            if client.is_identified() {
                tracing::info!(client = %client.identity(), new_name = name, "client renamed");
                client.display_name = name.to_string();
                return Ok(());
            }
        }

        let session_id = self.directory.create(name);
        match self.clients.get_mut(key) {
            Some(mut client) => {
                client.display_name = name.to_string();
                client.state = ConnectionState::Identified(session_id);
                tracing::info!(
                    client = %client.identity(),
                    session_id = %session_id,
                    "client identified"
                );
            }
            None => {
                // Reaped while the session was being minted.
                self.directory.remove(&session_id);
                return Err(GatewayError::Evicted);
            }
        }

        reply(outbound, &wire::session_frame(&session_id))
    }

    /// Deliver `MSG <sender> <text>` to the client currently named `recipient`.
    fn send_directed(&self, key: &str, recipient: &str, text: &str) -> Result<(), GatewayError> {
        let sender = self
            .clients
            .get(key)
            .map(|c| c.sender_name().to_string())
            .ok_or(GatewayError::Evicted)?;

        let target = self
            .clients
            .iter()
            .find(|c| !c.display_name.is_empty() && c.display_name == recipient)
            .map(|c| (c.identity(), c.outbound.clone()));

        let Some((target_identity, target_tx)) = target else {
            return Err(GatewayError::RecipientNotFound(recipient.to_string()));
        };

        let frame = wire::to_line(&wire::directed_message(&sender, text));
        if target_tx.send(frame).is_err() {
            tracing::debug!(recipient = %target_identity, "recipient is closing, message dropped");
        } else {
            tracing::debug!(from = %sender, to = %target_identity, "directed message delivered");
        }
        Ok(())
    }

    /// Record activity: bump last_seen and keep the session alive.
    fn refresh(&self, key: &str) {
        let session_id = match self.clients.get_mut(key) {
            Some(mut client) => {
                client.last_seen = Instant::now();
                client.session_id()
            }
            None => return,
        };
        if let Some(id) = session_id {
            self.directory.touch(&id);
        }
    }

    /// Remove the connection and release its session. Returns its identity
    /// if it was still registered.
    fn teardown(&self, key: &str) -> Option<String> {
        let (_, client) = self.clients.remove(key)?;
        if let Some(id) = client.session_id() {
            self.directory.remove(&id);
        }
        Some(client.identity())
    }

    /// Close every connection silent for longer than the idle timeout.
    pub fn sweep_idle(&self) -> usize {
        reaper::sweep_idle(&self.clients, self.settings.idle_timeout, |_, client| {
            tracing::info!(client = %client.identity(), "client disconnected (inactive)");
            if let Some(id) = client.session_id() {
                self.directory.remove(&id);
            }
            client.kill.notify_one();
        })
    }
}

fn reply(outbound: &mpsc::UnboundedSender<Bytes>, frame: &[u8]) -> Result<(), GatewayError> {
    outbound.send(wire::to_line(frame)).map_err(|_| {
        GatewayError::Transport(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "connection writer closed",
        ))
    })
}

/// Read one `\n`-terminated frame into `buf`, stripping the terminator and a
/// trailing `\r`. Returns `false` at end of stream.
///
/// A final unterminated line before EOF is returned as a frame. A line longer
/// than `max` bytes is an error.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> Result<bool, GatewayError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(false);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > max {
        return Err(GatewayError::LineTooLong(max));
    }
    Ok(true)
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    kill: Arc<Notify>,
    client: String,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            tracing::warn!(client = %client, error = %e, "write failed");
            kill.notify_one();
            return;
        }
    }
    let _ = writer.shutdown().await;
}
