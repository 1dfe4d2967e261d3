//! Platform probing - shell resolution, WSL detection, working directory sanitizing
//!
//! Everything in here reads the host through the [`Platform`] trait so the
//! decision logic can be driven by a fake host in tests.

mod cwd;
mod shell;
mod wsl;

pub use cwd::normalize_cwd;
pub use shell::{detect_shell, ShellSpec, CMD_PATH, POWERSHELL_PATH, PWSH_PATH};
pub use wsl::{is_wsl, KERNEL_VERSION_PATH};

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Operating system family, as far as shell resolution cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Windows,
    MacOs,
    Linux,
    /// Any other Unix (BSDs, illumos, ...)
    OtherUnix,
}

impl Os {
    /// Map a `std::env::consts::OS` value
    pub fn from_name(name: &str) -> Self {
        match name {
            "windows" => Os::Windows,
            "macos" => Os::MacOs,
            "linux" => Os::Linux,
            _ => Os::OtherUnix,
        }
    }
}

/// Ambient host facts used by the resolvers
pub trait Platform: Send + Sync {
    /// Operating system family
    fn os(&self) -> Os;

    /// Rust OS name (`linux`, `macos`, `windows`, ...)
    fn os_name(&self) -> String;

    /// CPU architecture (`x86_64`, `aarch64`, ...)
    fn arch(&self) -> String;

    /// Environment variable lookup
    fn env_var(&self, name: &str) -> Option<String>;

    /// The user's home directory
    fn home_dir(&self) -> PathBuf;

    /// Whether the path exists. Probe failures count as "does not exist".
    fn exists(&self, path: &Path) -> bool;

    /// Whether the path is a directory
    fn is_dir(&self, path: &Path) -> io::Result<bool>;

    /// Read a whole file as text
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// The real host
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn os(&self) -> Os {
        Os::from_name(std::env::consts::OS)
    }

    fn os_name(&self) -> String {
        std::env::consts::OS.to_string()
    }

    fn arch(&self) -> String {
        std::env::consts::ARCH.to_string()
    }

    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn home_dir(&self) -> PathBuf {
        dirs::home_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    fn exists(&self, path: &Path) -> bool {
        path.try_exists().unwrap_or(false)
    }

    fn is_dir(&self, path: &Path) -> io::Result<bool> {
        Ok(std::fs::metadata(path)?.is_dir())
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Summary of the host, as reported to front ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub platform: String,
    pub arch: String,
    pub default_shell: String,
    pub is_wsl: bool,
}

/// Collect [`PlatformInfo`] for the given host
pub fn platform_info(platform: &dyn Platform) -> PlatformInfo {
    PlatformInfo {
        platform: platform.os_name(),
        arch: platform.arch(),
        default_shell: detect_shell(platform).program,
        is_wsl: is_wsl(platform),
    }
}
