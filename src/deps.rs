//! src/deps.rs
//! Verifies that the host has the build tools R needs before anything is touched.

use std::fmt;

use tracing::debug;

use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::output;

/// Commands that must be on PATH for every build.
pub const REQUIRED_TOOLS: &[&str] = &["gcc", "g++", "gfortran", "make", "pkg-config"];

/// Needed only when the dependency closure is computed without linuxdeploy.
pub const LDD_TOOLS: &[&str] = &["ldd"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
}

impl PackageManager {
    /// First package manager found, in apt, dnf, yum order.
    pub fn detect(is_available: impl Fn(&str) -> bool) -> Option<Self> {
        [
            ("apt-get", PackageManager::Apt),
            ("dnf", PackageManager::Dnf),
            ("yum", PackageManager::Yum),
        ]
        .into_iter()
        .find(|(cmd, _)| is_available(cmd))
        .map(|(_, pm)| pm)
    }

    /// Distribution package that ships `tool`.
    pub fn package_for(&self, tool: &str) -> String {
        let name = match (self, tool) {
            (PackageManager::Apt, "ldd") => "libc-bin",
            (PackageManager::Dnf | PackageManager::Yum, "g++") => "gcc-c++",
            (PackageManager::Dnf | PackageManager::Yum, "gfortran") => "gcc-gfortran",
            (PackageManager::Dnf | PackageManager::Yum, "ldd") => "glibc-common",
            (PackageManager::Dnf, "pkg-config") => "pkgconf-pkg-config",
            (PackageManager::Yum, "pkg-config") => "pkgconfig",
            (_, other) => other,
        };
        name.to_string()
    }

    pub fn install_command(&self, tools: &[String]) -> String {
        let mut packages: Vec<String> = tools.iter().map(|t| self.package_for(t)).collect();
        packages.dedup();
        let prefix = match self {
            PackageManager::Apt => "sudo apt-get install -y",
            PackageManager::Dnf => "sudo dnf install -y",
            PackageManager::Yum => "sudo yum install -y",
        };
        format!("{} {}", prefix, packages.join(" "))
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PackageManager::Apt => "apt",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
        })
    }
}

// --- Public API ---

/// Returns every tool in `required` that `is_available` rejects, in order.
pub fn missing_tools(required: &[&str], is_available: impl Fn(&str) -> bool) -> Vec<String> {
    required
        .iter()
        .filter(|tool| !is_available(tool))
        .map(|tool| tool.to_string())
        .collect()
}

/// Checks all of `required` and fails once with every missing tool named.
pub fn check_tools(required: &[&str], is_available: impl Fn(&str) -> bool) -> Result<()> {
    let missing = missing_tools(required, &is_available);
    if missing.is_empty() {
        return Ok(());
    }
    let remedy = match PackageManager::detect(&is_available) {
        Some(pm) => {
            debug!(package_manager = %pm, "suggesting install command");
            pm.install_command(&missing)
        }
        None => format!("your package manager (packages providing: {})", missing.join(", ")),
    };
    Err(Error::MissingTools { missing, remedy })
}

pub fn on_path(tool: &str) -> bool {
    which::which(tool).is_ok()
}

/// Dependency check for a real run, against the host PATH.
pub fn check_host(cfg: &BuildConfig) -> Result<()> {
    let mut required: Vec<&str> = REQUIRED_TOOLS.to_vec();
    if !cfg.use_linuxdeploy {
        required.extend_from_slice(LDD_TOOLS);
    }
    debug!(tools = ?required, "checking build tools");
    check_tools(&required, on_path)?;
    output::success(&format!("All {} required tools found", required.len()));
    Ok(())
}
