//! Detect whether we are running inside WSL

use super::Platform;
use std::path::Path;

/// Kernel version pseudo-file
pub const KERNEL_VERSION_PATH: &str = "/proc/version";

/// Whether the host process runs under the Windows Subsystem for Linux.
///
/// Checks the kernel version string first, then `WSL_DISTRO_NAME` and
/// `WSLENV`. Read errors fall through to the environment checks.
pub fn is_wsl(platform: &dyn Platform) -> bool {
    kernel_mentions_wsl(platform)
        || env_is_set(platform, "WSL_DISTRO_NAME")
        || env_is_set(platform, "WSLENV")
}

fn kernel_mentions_wsl(platform: &dyn Platform) -> bool {
    let path = Path::new(KERNEL_VERSION_PATH);
    if !platform.exists(path) {
        return false;
    }
    match platform.read_to_string(path) {
        Ok(version) => {
            let version = version.to_lowercase();
            version.contains("microsoft") || version.contains("wsl")
        }
        Err(e) => {
            tracing::debug!("Could not read {}: {}", KERNEL_VERSION_PATH, e);
            false
        }
    }
}

fn env_is_set(platform: &dyn Platform, name: &str) -> bool {
    platform.env_var(name).is_some_and(|v| !v.is_empty())
}
