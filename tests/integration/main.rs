//! Velium integration test harness.
//!
//! Every test starts its own in-process gateway on 127.0.0.1 with an
//! OS-assigned port and shortened timeouts, then drives it over real
//! sockets. Gateways share nothing, so tests may run in parallel.

mod reaper;
mod tcp;
mod udp;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use velium_core::wire::{SessionId, SESSION_FRAME_LEN};
use velium_services::{Gateway, GatewayHandle, GatewaySettings};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const IDENTIFY_GRACE: Duration = Duration::from_millis(300);
pub const IDLE_TIMEOUT: Duration = Duration::from_millis(500);
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// How long a read waits before the test treats the line as missing.
pub const READ_WAIT: Duration = Duration::from_secs(2);

pub fn settings() -> GatewaySettings {
    GatewaySettings {
        bind: "127.0.0.1:0".parse().unwrap(),
        identify_grace: IDENTIFY_GRACE,
        idle_timeout: IDLE_TIMEOUT,
        sweep_interval: SWEEP_INTERVAL,
        session_ttl: Duration::from_secs(300),
        max_line_bytes: 4096,
        max_datagram_bytes: 1024,
    }
}

pub async fn start() -> GatewayHandle {
    Gateway::start(settings())
        .await
        .expect("gateway should start on an ephemeral port")
}

/// One TCP connection to a gateway.
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(handle: &GatewayHandle) -> Result<Self> {
        let stream = TcpStream::connect(handle.tcp_addr())
            .await
            .context("connect to gateway")?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.writer.local_addr()?)
    }

    /// Send one frame followed by a newline.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.write_all(frame).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Next newline-terminated line, without the newline.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let n = tokio::time::timeout(READ_WAIT, self.reader.read_until(b'\n', &mut buf))
            .await
            .context("timed out waiting for a line")??;
        if n == 0 {
            bail!("connection closed");
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        Ok(buf)
    }

    /// IDENTIFY as `name` and return the session id from the reply.
    ///
    /// Session ids are raw bytes and may contain a newline, so the reply is
    /// read as a fixed-size frame rather than a line.
    pub async fn identify(&mut self, name: &str) -> Result<SessionId> {
        let mut frame = vec![0x01];
        frame.extend_from_slice(name.as_bytes());
        self.send(&frame).await?;

        let mut reply = [0u8; SESSION_FRAME_LEN + 1];
        tokio::time::timeout(READ_WAIT, self.reader.read_exact(&mut reply))
            .await
            .context("timed out waiting for SESSION")??;
        if reply[0] != 0x02 || reply[SESSION_FRAME_LEN] != b'\n' {
            bail!("unexpected identify reply: {reply:?}");
        }
        Ok(SessionId::from_slice(&reply[1..SESSION_FRAME_LEN])?)
    }

    /// Round-trip a PING so everything sent before it has been handled.
    pub async fn sync(&mut self) -> Result<()> {
        self.send(b"\x06").await?;
        let line = self.read_line().await?;
        if line != b"PONG" {
            bail!("expected PONG, got {line:?}");
        }
        Ok(())
    }

    /// Read until the server closes or resets the connection.
    pub async fn drain(&mut self) -> std::io::Result<usize> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf).await
    }

    /// Wait for the server to close the connection, failing on any data.
    pub async fn expect_closed(&mut self, within: Duration) -> Result<()> {
        let mut buf = Vec::new();
        let n = tokio::time::timeout(within, self.reader.read_to_end(&mut buf))
            .await
            .context("connection was not closed in time")??;
        if n != 0 {
            bail!("expected no data before close, got {buf:?}");
        }
        Ok(())
    }
}

/// Poll `cond` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
