//! velium-services — session directory, transport engines, and the gateway
//! that runs them.

pub mod error;
pub mod gateway;
pub mod reaper;
pub mod session;
pub mod tcp;
pub mod udp;

pub use error::{Arity, GatewayError, ProtocolError};
pub use gateway::{Gateway, GatewayHandle, GatewaySettings};
pub use reaper::{sweep_idle, LastSeen, Reaper};
pub use session::{Session, SessionDirectory};
pub use tcp::{ConnectionState, TcpClient, TcpEngine, TcpSettings};
pub use udp::{UdpClient, UdpEngine, UdpSettings};
