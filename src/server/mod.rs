//! Relay server
//!
//! One listening socket carries both the Icecast source protocol and plain
//! HTTP. The [`RelayServer`] accepts connections, lets the detector registry
//! pick a [`ConnHandler`] for each one and runs it in its own task.

pub mod config;
pub mod connection;
pub mod handler;
pub mod listener;
pub mod pipe;

pub use config::ServerConfig;
pub use connection::{BoxedStream, Connection, RawStream};
pub use handler::{ConnHandler, Handler};
pub use listener::RelayServer;
pub use pipe::{connection_pipe, PipeAcceptor, PipeHandler};
