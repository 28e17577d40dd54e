//! Gateway — one running instance of both transports around a shared
//! session directory.
//!
//! Nothing here is global: every `Gateway::start` binds its own sockets and
//! owns its own directory, so several gateways can run side by side.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use velium_core::config::VeliumConfig;
use velium_core::SessionId;

use crate::reaper::Reaper;
use crate::session::{Session, SessionDirectory};
use crate::tcp::{TcpEngine, TcpSettings};
use crate::udp::{UdpEngine, UdpSettings};

/// Upper bound for any configured timeout. Keeps deadline arithmetic on
/// `Instant` from overflowing.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Everything needed to start a gateway.
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    /// Shared TCP/UDP address. Port 0 lets TCP pick and UDP follow.
    pub bind: SocketAddr,
    pub identify_grace: Duration,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub session_ttl: Duration,
    pub max_line_bytes: usize,
    pub max_datagram_bytes: usize,
}

impl GatewaySettings {
    pub fn from_config(config: &VeliumConfig) -> Result<Self> {
        let ip = config
            .network
            .bind_addr
            .parse()
            .with_context(|| format!("invalid bind_addr: {}", config.network.bind_addr))?;
        let settings = Self {
            bind: SocketAddr::new(ip, config.network.port),
            identify_grace: config.timeouts.identify_grace(),
            idle_timeout: config.timeouts.idle_timeout(),
            sweep_interval: config.timeouts.sweep_interval(),
            session_ttl: config.timeouts.session_ttl(),
            max_line_bytes: config.limits.max_line_bytes,
            max_datagram_bytes: config.limits.max_datagram_bytes,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            bail!("sweep_interval must be non-zero");
        }
        if self.max_line_bytes == 0 {
            bail!("max_line_bytes must be non-zero");
        }
        if self.max_datagram_bytes == 0 {
            bail!("max_datagram_bytes must be non-zero");
        }
        for (name, value) in [
            ("identify_grace", self.identify_grace),
            ("idle_timeout", self.idle_timeout),
            ("sweep_interval", self.sweep_interval),
            ("session_ttl", self.session_ttl),
        ] {
            if value > MAX_TIMEOUT {
                bail!("{name} exceeds {}s", MAX_TIMEOUT.as_secs());
            }
        }
        Ok(())
    }
}

/// Both transport engines and the directory they share.
#[derive(Debug)]
pub struct Gateway {
    directory: SessionDirectory,
    tcp: TcpEngine,
    udp: UdpEngine,
}

impl Gateway {
    /// Bind both transports and spawn the listeners and reapers.
    pub async fn start(settings: GatewaySettings) -> Result<GatewayHandle> {
        settings.validate()?;

        let listener = TcpListener::bind(settings.bind)
            .await
            .with_context(|| format!("failed to bind tcp {}", settings.bind))?;
        let tcp_addr = listener.local_addr()?;

        let udp_bind = SocketAddr::new(settings.bind.ip(), tcp_addr.port());
        let socket = Arc::new(
            UdpSocket::bind(udp_bind)
                .await
                .with_context(|| format!("failed to bind udp {udp_bind}"))?,
        );
        let udp_addr = socket.local_addr()?;

        let directory = SessionDirectory::new(settings.session_ttl);
        let tcp = TcpEngine::new(
            directory.clone(),
            TcpSettings {
                identify_grace: settings.identify_grace,
                idle_timeout: settings.idle_timeout,
                max_line_bytes: settings.max_line_bytes,
            },
        );
        let udp = UdpEngine::new(
            socket,
            directory.clone(),
            UdpSettings {
                idle_timeout: settings.idle_timeout,
                max_datagram_bytes: settings.max_datagram_bytes,
            },
        );
        let gateway = Arc::new(Gateway {
            directory,
            tcp,
            udp,
        });

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let reaper = Reaper::new(settings.sweep_interval);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(
            gateway.tcp.clone().accept_loop(listener, shutdown_tx.subscribe()),
        ));
        tasks.push(tokio::spawn(gateway.udp.clone().recv_loop(shutdown_tx.subscribe())));

        let tcp = gateway.tcp.clone();
        tasks.push(tokio::spawn(reaper.run(
            "tcp",
            move || tcp.sweep_idle(),
            shutdown_tx.subscribe(),
        )));
        let udp = gateway.udp.clone();
        tasks.push(tokio::spawn(reaper.run(
            "udp",
            move || udp.sweep_idle(),
            shutdown_tx.subscribe(),
        )));
        let directory = gateway.directory.clone();
        tasks.push(tokio::spawn(reaper.run(
            "sessions",
            move || directory.purge_expired(),
            shutdown_tx.subscribe(),
        )));

        tracing::info!(%tcp_addr, "listening on tcp");
        tracing::info!(%udp_addr, "listening on udp");

        Ok(GatewayHandle {
            gateway,
            tcp_addr,
            udp_addr,
            shutdown_tx,
            tasks,
        })
    }

    pub fn session_create(&self, display_name: &str) -> SessionId {
        self.directory.create(display_name)
    }

    pub fn session_get(&self, id: &SessionId) -> Option<Session> {
        self.directory.get(id)
    }

    /// Idempotent. Returns whether a session was actually removed.
    pub fn session_remove(&self, id: &SessionId) -> bool {
        self.directory.remove(id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.directory.count()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.directory.snapshot()
    }

    pub fn tcp(&self) -> &TcpEngine {
        &self.tcp
    }

    pub fn udp(&self) -> &UdpEngine {
        &self.udp
    }
}

/// A started gateway: bound addresses plus the means to stop it.
pub struct GatewayHandle {
    gateway: Arc<Gateway>,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewayHandle {
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Signal every gateway task to stop and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "gateway task failed");
            }
        }
    }
}
