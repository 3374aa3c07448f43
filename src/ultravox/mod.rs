//! Ultravox2, the binary broadcaster protocol spoken by SHOUTcast v2 servers.

pub mod factory;
pub mod handshake;
pub mod message;
mod source;
pub mod xtea;

pub use handshake::HandshakeStage;
pub use message::{Message, MessageClass, MessageType};
pub use source::{UltravoxConfig, UltravoxSource};
