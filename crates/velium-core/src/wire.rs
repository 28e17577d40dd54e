//! Velium wire format — the opcode line protocol shared by TCP and UDP.
//!
//! Every message is one opcode byte followed by an optional payload. On TCP a
//! message is one `\n`-terminated line; on UDP it is one datagram. Text
//! payloads are UTF-8 and split on single ASCII spaces into arguments. There
//! is no quoting, so an argument can never contain a space.
//!
//! `SESSION` is the one binary frame: the opcode byte is followed by the 16
//! raw bytes of a session id, nothing else.
//!
//! The codec only checks that a message is non-empty and starts with a known
//! opcode. Argument counts belong to the handler for each opcode.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// Leading byte of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Identify = 0x01,
    Session = 0x02,
    Quit = 0x03,
    Command = 0x04,
    CommandResponse = 0x05,
    Ping = 0x06,
    Pong = 0x07,
    Echo = 0x08,
}

impl TryFrom<u8> for Opcode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Opcode::Identify),
            0x02 => Ok(Opcode::Session),
            0x03 => Ok(Opcode::Quit),
            0x04 => Ok(Opcode::Command),
            0x05 => Ok(Opcode::CommandResponse),
            0x06 => Ok(Opcode::Ping),
            0x07 => Ok(Opcode::Pong),
            0x08 => Ok(Opcode::Echo),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

// ── Session ID ────────────────────────────────────────────────────────────────

/// Length of a session id on the wire.
pub const SESSION_ID_LEN: usize = 16;

/// Length of a complete `SESSION` frame: opcode + raw id.
pub const SESSION_FRAME_LEN: usize = 1 + SESSION_ID_LEN;

/// 128-bit session identifier minted by the server at identify time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    /// Fresh random id from the thread-local CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; SESSION_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; SESSION_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the raw id that follows a `SESSION` opcode.
    pub fn from_slice(raw: &[u8]) -> Result<Self, WireError> {
        let bytes: [u8; SESSION_ID_LEN] = raw
            .try_into()
            .map_err(|_| WireError::SessionLength(raw.len()))?;
        Ok(Self(bytes))
    }

    /// Parse the lowercase hex form produced by `Display`.
    pub fn from_hex(s: &str) -> Result<Self, WireError> {
        let raw = hex::decode(s).map_err(|_| WireError::InvalidHex)?;
        Self::from_slice(&raw)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", hex::encode(self.0))
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// A decoded inbound message. One variant per opcode.
///
/// Text variants carry the space-split arguments exactly as they appeared;
/// an opcode with no payload yields a single empty argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    Identify(Vec<&'a str>),
    /// Raw bytes after the opcode. Length is checked by the handler.
    Session(&'a [u8]),
    Quit(Vec<&'a str>),
    Command(Vec<&'a str>),
    CommandResponse(Vec<&'a str>),
    Ping(Vec<&'a str>),
    Pong(Vec<&'a str>),
    Echo(Vec<&'a str>),
}

impl Message<'_> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Identify(_) => Opcode::Identify,
            Message::Session(_) => Opcode::Session,
            Message::Quit(_) => Opcode::Quit,
            Message::Command(_) => Opcode::Command,
            Message::CommandResponse(_) => Opcode::CommandResponse,
            Message::Ping(_) => Opcode::Ping,
            Message::Pong(_) => Opcode::Pong,
            Message::Echo(_) => Opcode::Echo,
        }
    }
}

/// Decode one framed message (line terminator already stripped).
pub fn decode(data: &[u8]) -> Result<Message<'_>, WireError> {
    let (&first, payload) = data.split_first().ok_or(WireError::Empty)?;
    let opcode = Opcode::try_from(first)?;

    if opcode == Opcode::Session {
        return Ok(Message::Session(payload));
    }

    let args = split_args(payload)?;
    Ok(match opcode {
        Opcode::Identify => Message::Identify(args),
        Opcode::Quit => Message::Quit(args),
        Opcode::Command => Message::Command(args),
        Opcode::CommandResponse => Message::CommandResponse(args),
        Opcode::Ping => Message::Ping(args),
        Opcode::Pong => Message::Pong(args),
        Opcode::Echo => Message::Echo(args),
        Opcode::Session => unreachable!("handled above"),
    })
}

fn split_args(payload: &[u8]) -> Result<Vec<&str>, WireError> {
    let text = std::str::from_utf8(payload).map_err(|_| WireError::InvalidUtf8)?;
    Ok(text.split(' ').collect())
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Literal reply to a TCP `PING`.
pub const PONG_LINE: &[u8] = b"PONG";

/// `SESSION` frame: opcode + 16 raw id bytes.
pub fn session_frame(id: &SessionId) -> Bytes {
    let mut buf = BytesMut::with_capacity(SESSION_FRAME_LEN);
    buf.put_u8(Opcode::Session.into());
    buf.put_slice(id.as_bytes());
    buf.freeze()
}

/// `COMMAND_RESPONSE` frame carrying the given words joined by spaces.
///
/// Older servers answered COMMAND with the `COMMAND` opcode (`0x04`) instead.
pub fn command_response(words: &[&str]) -> Bytes {
    let body = words.join(" ");
    let mut buf = BytesMut::with_capacity(1 + body.len());
    buf.put_u8(Opcode::CommandResponse.into());
    buf.put_slice(body.as_bytes());
    buf.freeze()
}

/// Directed message as delivered to the recipient: `MSG <sender> <text>`.
pub fn directed_message(sender: &str, text: &str) -> Bytes {
    Bytes::from(format!("MSG {sender} {text}"))
}

/// Single-byte `QUIT`, sent to a UDP peer presenting an unknown session.
pub fn quit_frame() -> Bytes {
    Bytes::from_static(&[Opcode::Quit as u8])
}

/// Terminate a frame for the TCP transport.
pub fn to_line(frame: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame.len() + 1);
    buf.put_slice(frame);
    buf.put_u8(b'\n');
    buf.freeze()
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default listening port for both transports.
pub const DEFAULT_PORT: u16 = 12345;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("empty message")]
    Empty,

    #[error("unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("session id is {0} bytes, wanted {SESSION_ID_LEN}")]
    SessionLength(usize),

    #[error("session id is not valid hex")]
    InvalidHex,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
