//! velium-core — wire format and configuration shared by every Velium crate.

pub mod config;
pub mod wire;

pub use wire::{Message, Opcode, SessionId, WireError};
