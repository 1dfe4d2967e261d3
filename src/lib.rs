//! termhost - a pseudo-terminal session manager
//!
//! This crate provides:
//! - Platform probing (shell resolution, WSL detection, cwd sanitizing)
//! - Session management (PTY spawning, batched output fan-out, lifecycle)
//! - A process-wide service accessor
//! - A Unix socket bridge and its protocol, for out-of-process front ends
//!
//! # Architecture
//!
//! All session state lives on one control thread owned by
//! [`session::SessionManager`]. Handles send it requests; PTY output, exits
//! and batching timers arrive as events on the same thread, so subscriber
//! callbacks never race with create/write/resize/kill.

pub mod client;
pub mod config;
pub mod platform;
pub mod protocol;
pub mod server;
pub mod service;
pub mod session;

pub use service::terminal_service;
