// Service discovery - scans the services root for runnable entrypoints

use crate::config::EntrypointRule;
use crate::error::{CorralError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// How a discovered service is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrypoint {
    /// Program handed to the OS: the interpreter, or the script itself
    pub program: PathBuf,
    /// Arguments following the program
    pub args: Vec<String>,
    /// The matched file inside the service directory
    pub script: PathBuf,
}

/// A runnable service found by a discovery pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub dir: PathBuf,
    pub entrypoint: Entrypoint,
    /// Port handed out by the allocator; 0 until allocation has run
    pub port: u16,
    pub enabled: bool,
}

/// Why a directory under the services root was not turned into a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    NoEntrypoint,
    NotExecutable(PathBuf),
    InvalidName,
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoEntrypoint => write!(f, "no entrypoint found"),
            SkipReason::NotExecutable(path) => {
                write!(f, "entrypoint {} is not executable", path.display())
            }
            SkipReason::InvalidName => write!(f, "directory name is not a valid service name"),
            SkipReason::Unreadable(e) => write!(f, "directory unreadable: {}", e),
        }
    }
}

/// Outcome of inspecting one candidate directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovered {
    Service(ServiceDescriptor),
    Skip {
        name: String,
        path: PathBuf,
        reason: SkipReason,
    },
}

/// Scan `root` for service directories.
///
/// Candidates are visited in directory-name order so that port allocation
/// over the result is deterministic. Hidden directories are ignored. A
/// missing root is treated as an empty fleet.
///
/// # Arguments
/// * `root` - Directory whose immediate subdirectories are candidates
/// * `rules` - Entrypoint rules, tried in order for every candidate
/// * `disabled` - Names that are discovered with `enabled = false`
pub fn scan(root: &Path, rules: &[EntrypointRule], disabled: &[String]) -> Result<Vec<Discovered>> {
    if !root.exists() {
        tracing::warn!("Services root {} does not exist", root.display());
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(root).map_err(|e| {
        CorralError::DiscoveryError(format!("Failed to read {}: {}", root.display(), e))
    })?;

    let mut dirs: Vec<(String, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        dirs.push((name, path));
    }
    dirs.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(dirs
        .into_iter()
        .map(|(name, path)| inspect(name, path, rules, disabled))
        .collect())
}

/// Keep only the runnable services of a scan, in scan order
pub fn services(discovered: Vec<Discovered>) -> Vec<ServiceDescriptor> {
    discovered
        .into_iter()
        .filter_map(|d| match d {
            Discovered::Service(service) => Some(service),
            Discovered::Skip { .. } => None,
        })
        .collect()
}

fn inspect(name: String, dir: PathBuf, rules: &[EntrypointRule], disabled: &[String]) -> Discovered {
    if !is_valid_name(&name) {
        return Discovered::Skip {
            name,
            path: dir,
            reason: SkipReason::InvalidName,
        };
    }

    if let Err(e) = std::fs::read_dir(&dir) {
        return Discovered::Skip {
            name,
            path: dir,
            reason: SkipReason::Unreadable(e.to_string()),
        };
    }

    let mut not_executable = None;
    for rule in rules {
        let script = dir.join(&rule.file);
        if !script.is_file() {
            continue;
        }

        let entrypoint = match &rule.interpreter {
            Some(interpreter) => Entrypoint {
                program: PathBuf::from(interpreter),
                args: vec![rule.file.clone()],
                script,
            },
            None if is_executable(&script) => Entrypoint {
                program: script.clone(),
                args: Vec::new(),
                script,
            },
            None => {
                // A later rule may still match
                not_executable.get_or_insert(script);
                continue;
            }
        };

        let enabled = !disabled.iter().any(|d| d == &name);
        return Discovered::Service(ServiceDescriptor {
            name,
            dir,
            entrypoint,
            port: 0,
            enabled,
        });
    }

    let reason = match not_executable {
        Some(script) => SkipReason::NotExecutable(script),
        None => SkipReason::NoEntrypoint,
    };
    Discovered::Skip {
        name,
        path: dir,
        reason,
    }
}

/// Service names end up in file names and environment, keep them plain
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
