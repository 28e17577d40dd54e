//! Error taxonomy for the transport engines.

use std::fmt;
use std::time::Duration;

use velium_core::{Opcode, WireError};

/// How many space-separated arguments an opcode accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, got: usize) -> bool {
        match self {
            Arity::Exactly(n) => got == n,
            Arity::AtLeast(n) => got >= n,
        }
    }

    /// Fail with `InvalidArgumentCount` unless `args` fits.
    pub fn check(self, opcode: Opcode, args: &[&str]) -> Result<(), ProtocolError> {
        if self.accepts(args.len()) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidArgumentCount {
                opcode,
                got: args.len(),
                wanted: self,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// A message that could not be acted on. Logged and dropped; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] WireError),

    #[error("unknown command {0:?} on this transport")]
    UnknownCommand(Opcode),

    #[error("invalid {opcode:?} message ({got} args, wanted {wanted})")]
    InvalidArgumentCount {
        opcode: Opcode,
        got: usize,
        wanted: Arity,
    },

    #[error("identify with an empty name")]
    EmptyName,
}

/// Everything a connection or datagram handler can fail with.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("no identify within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("evicted after idle timeout")]
    Evicted,
}

impl GatewayError {
    /// Whether the error ends the connection it happened on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            GatewayError::Protocol(_) | GatewayError::RecipientNotFound(_)
        )
    }
}

impl From<WireError> for GatewayError {
    fn from(err: WireError) -> Self {
        GatewayError::Protocol(ProtocolError::Malformed(err))
    }
}
