//! Server module - Unix socket bridge in front of the session manager

mod connection;
mod listener;

pub use connection::ClientConnection;
pub use listener::ServerListener;
