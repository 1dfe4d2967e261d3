//! Interactive shell resolution

use super::{Os, Platform};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// PowerShell Core standard install location
pub const PWSH_PATH: &str = r"C:\Program Files\PowerShell\7\pwsh.exe";

/// Windows PowerShell standard install location
pub const POWERSHELL_PATH: &str = r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe";

/// Last resort on Windows, resolved through PATH
pub const CMD_PATH: &str = "cmd.exe";

const LOGIN: &str = "--login";

/// Program and arguments that make up the user's interactive shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellSpec {
    fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Decide which shell to launch on this host.
///
/// Never fails: every platform ends in an unconditional fallback.
pub fn detect_shell(platform: &dyn Platform) -> ShellSpec {
    match platform.os() {
        Os::Windows => windows_shell(platform),
        Os::MacOs => {
            let program = user_shell(platform)
                .or_else(|| existing(platform, "/bin/zsh"))
                .unwrap_or_else(|| "/bin/bash".to_string());
            ShellSpec::new(program, &[LOGIN])
        }
        Os::Linux | Os::OtherUnix => {
            if let Some(program) =
                user_shell(platform).or_else(|| existing(platform, "/bin/bash"))
            {
                ShellSpec::new(program, &[LOGIN])
            } else {
                ShellSpec::new("/bin/sh", &[])
            }
        }
    }
}

fn windows_shell(platform: &dyn Platform) -> ShellSpec {
    let program = existing(platform, PWSH_PATH)
        .or_else(|| existing(platform, POWERSHELL_PATH))
        .unwrap_or_else(|| CMD_PATH.to_string());
    ShellSpec::new(program, &[])
}

/// `$SHELL`, if it names a file that exists
fn user_shell(platform: &dyn Platform) -> Option<String> {
    platform
        .env_var("SHELL")
        .filter(|shell| !shell.is_empty())
        .and_then(|shell| existing(platform, &shell))
}

fn existing(platform: &dyn Platform, path: &str) -> Option<String> {
    platform.exists(Path::new(path)).then(|| path.to_string())
}
