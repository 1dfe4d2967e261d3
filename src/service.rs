//! Process-wide terminal service

use crate::config::Config;
use crate::session::{ManagerOptions, SessionManager, TerminalError};
use std::sync::OnceLock;

static SERVICE: OnceLock<SessionManager> = OnceLock::new();

/// The shared [`SessionManager`], started on first use with options from the
/// user's config file.
///
/// Every call returns the same instance. It lives until
/// [`SessionManager::shutdown`] is called on it.
pub fn terminal_service() -> Result<&'static SessionManager, TerminalError> {
    if let Some(service) = SERVICE.get() {
        return Ok(service);
    }

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable config: {:#}", e);
        Config::default()
    });
    let manager = SessionManager::with_options(ManagerOptions::from(&config))?;

    // A racing initializer may have won; its instance is the one kept and
    // ours stops when dropped.
    Ok(SERVICE.get_or_init(|| manager))
}
