//! Working directory sanitizing

use super::{Os, Platform};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Prefixes that reach into a WSL distribution's filesystem from Windows.
/// Their leading double separator is meaningful and must survive.
const WSL_BRIDGE_PREFIXES: &[&str] = &[
    "//wsl$/",
    "//wsl.localhost/",
    r"\\wsl$\",
    r"\\wsl.localhost\",
];

/// Runs of either separator; Windows accepts both
static WINDOWS_SEPARATOR_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([/\\])[/\\]+").unwrap());

/// Runs of `/`; a backslash is an ordinary filename byte on Unix
static UNIX_SEPARATOR_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/{2,}").unwrap());

fn collapse_separators(os: Os, path: &str) -> String {
    match os {
        Os::Windows => WINDOWS_SEPARATOR_RUNS.replace_all(path, "$1").into_owned(),
        _ => UNIX_SEPARATOR_RUNS.replace_all(path, "/").into_owned(),
    }
}

fn is_wsl_bridge_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    WSL_BRIDGE_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Turn a requested working directory into one that exists.
///
/// Absent or empty requests, missing paths, non-directories and failed stat
/// calls all resolve to `home_dir`.
pub fn normalize_cwd(
    platform: &dyn Platform,
    requested: Option<&str>,
    home_dir: &Path,
) -> PathBuf {
    let requested = match requested {
        Some(path) if !path.is_empty() => path,
        _ => return home_dir.to_path_buf(),
    };

    let candidate = if is_wsl_bridge_path(requested) {
        PathBuf::from(requested)
    } else {
        PathBuf::from(collapse_separators(platform.os(), requested))
    };

    match platform.is_dir(&candidate) {
        Ok(true) => candidate,
        Ok(false) => {
            tracing::debug!(
                "Requested cwd '{}' is not a directory, using home",
                candidate.display()
            );
            home_dir.to_path_buf()
        }
        Err(e) => {
            tracing::debug!(
                "Requested cwd '{}' is unusable ({}), using home",
                candidate.display(),
                e
            );
            home_dir.to_path_buf()
        }
    }
}
