//! Voice-chat SFU signaling core: the token gate, session/grace lifecycle,
//! per-room roster with producer registry, request dispatcher, and event
//! broadcaster. The media engine itself is reached only through the
//! [`media`] adapter.

pub mod config;
pub mod connection;
pub mod core;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod media;
pub mod peer;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session_registry;
pub mod token;
