// src/config.rs
// Loads r-appimage configuration from /etc, the user config dir and the working
// directory, applies CLI/env overrides and resolves the immutable BuildConfig.

use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::output;

pub const DEFAULT_R_VERSION: &str = "4.4.2";
pub const DEFAULT_CRAN_MIRROR: &str = "https://cloud.r-project.org";
pub const DEFAULT_BUILD_ROOT: &str = "build";

/// Packages baked into a `with-packages` build when none are requested explicitly.
pub const DEFAULT_PACKAGES: &[&str] = &["jsonlite", "dplyr", "ggplot2", "data.table"];

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// Architecture of the running host, if supported.
    pub fn host() -> Result<Self> {
        env::consts::ARCH.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Arch::X86_64),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            other => Err(Error::UnsupportedArch(other.to_string())),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    #[default]
    Minimal,
    WithPackages,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Minimal => "minimal",
            BuildMode::WithPackages => "with-packages",
        }
    }
}

impl FromStr for BuildMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(BuildMode::Minimal),
            "with-packages" | "with_packages" | "packages" => Ok(BuildMode::WithPackages),
            other => Err(Error::Config(format!(
                "unknown build mode '{}' (expected minimal or with-packages)",
                other
            ))),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Layered sources ---

/// Contents of a `config.toml`. Every key is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub version: Option<String>,
    pub arch: Option<String>,
    pub mode: Option<String>,
    pub packages: Option<Vec<String>>,
    pub build_root: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub cran_mirror: Option<String>,
    pub use_linuxdeploy: Option<bool>,
}

impl FileConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Later values win.
    fn merge(&mut self, other: FileConfig) {
        if other.version.is_some() { self.version = other.version; }
        if other.arch.is_some() { self.arch = other.arch; }
        if other.mode.is_some() { self.mode = other.mode; }
        if other.packages.is_some() { self.packages = other.packages; }
        if other.build_root.is_some() { self.build_root = other.build_root; }
        if other.output_dir.is_some() { self.output_dir = other.output_dir; }
        if other.cran_mirror.is_some() { self.cran_mirror = other.cran_mirror; }
        if other.use_linuxdeploy.is_some() { self.use_linuxdeploy = other.use_linuxdeploy; }
    }

    /// Reads system, user and working-directory config files, in that order.
    /// Unreadable or malformed files are reported and skipped.
    pub fn load() -> Self {
        let mut cfg = FileConfig::default();
        for path in config_file_paths() {
            if !path.exists() {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|e| Error::io(&path, e))
                .and_then(|s| FileConfig::from_toml(&s))
            {
                Ok(layer) => {
                    debug!(path = %path.display(), "loaded config file");
                    cfg.merge(layer);
                }
                Err(e) => output::warn(&format!("failed to load {}: {}", path.display(), e)),
            }
        }
        cfg
    }
}

fn config_file_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/r-appimage/config.toml")];
    let user_base = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs_next::home_dir().map(|h| h.join(".config")));
    if let Some(base) = user_base {
        paths.push(base.join("r-appimage/config.toml"));
    }
    paths.push(PathBuf::from("r-appimage.toml"));
    paths
}

/// Values given on the command line (or through their environment variables).
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub version: Option<String>,
    pub arch: Option<String>,
    pub mode: Option<BuildMode>,
    pub packages: Option<Vec<String>>,
    pub build_root: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub cran_mirror: Option<String>,
    pub no_linuxdeploy: bool,
    pub clean: bool,
    pub install: bool,
    pub release_dir: Option<PathBuf>,
}

// --- Resolved configuration ---

/// Immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub arch: Arch,
    pub version: String,
    pub mode: BuildMode,
    /// Empty in minimal mode.
    pub packages: Vec<String>,
    pub build_root: PathBuf,
    pub output_dir: PathBuf,
    pub cran_mirror: String,
    pub use_linuxdeploy: bool,
    pub clean: bool,
    pub install: bool,
    pub release_dir: Option<PathBuf>,
}

impl BuildConfig {
    /// Merges file config and overrides. Validates the architecture before
    /// anything else and touches nothing on disk.
    pub fn resolve(file: FileConfig, ov: Overrides) -> Result<Self> {
        let arch = match ov.arch.as_deref().or(file.arch.as_deref()) {
            Some(a) => a.parse()?,
            None => Arch::host()?,
        };

        let version = ov
            .version
            .or(file.version)
            .unwrap_or_else(|| DEFAULT_R_VERSION.to_string());
        validate_version(&version)?;

        let mode = match ov.mode {
            Some(m) => m,
            None => match file.mode.as_deref() {
                Some(m) => m.parse()?,
                None => BuildMode::default(),
            },
        };

        let packages = match mode {
            BuildMode::Minimal => Vec::new(),
            BuildMode::WithPackages => {
                let list = ov.packages.or(file.packages).unwrap_or_default();
                let list: Vec<String> = list
                    .into_iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                if list.is_empty() {
                    DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect()
                } else {
                    list
                }
            }
        };
        for p in &packages {
            validate_package_name(p)?;
        }

        let build_root = ov
            .build_root
            .or(file.build_root)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_ROOT));
        let output_dir = ov
            .output_dir
            .or(file.output_dir)
            .unwrap_or_else(|| build_root.clone());
        let cran_mirror = ov
            .cran_mirror
            .or(file.cran_mirror)
            .unwrap_or_else(|| DEFAULT_CRAN_MIRROR.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(BuildConfig {
            arch,
            version,
            mode,
            packages,
            build_root,
            output_dir,
            cran_mirror,
            use_linuxdeploy: !ov.no_linuxdeploy && file.use_linuxdeploy.unwrap_or(true),
            clean: ov.clean,
            install: ov.install,
            release_dir: ov.release_dir,
        })
    }

    // --- Build root layout ---

    pub fn downloads_dir(&self) -> PathBuf {
        self.build_root.join("downloads")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.build_root.join("tools")
    }

    pub fn src_dir(&self) -> PathBuf {
        self.build_root.join("src")
    }

    /// Staging prefix that `make install DESTDIR=...` writes into.
    pub fn install_prefix(&self) -> PathBuf {
        self.build_root.join("install")
    }

    pub fn appdir(&self) -> PathBuf {
        self.build_root.join("AppDir")
    }

    // --- Source ---

    pub fn source_url(&self) -> String {
        let major = self.version.split('.').next().unwrap_or(&self.version);
        format!(
            "{}/src/base/R-{}/R-{}.tar.gz",
            self.cran_mirror, major, self.version
        )
    }

    pub fn source_tarball(&self) -> PathBuf {
        self.downloads_dir().join(format!("R-{}.tar.gz", self.version))
    }

    pub fn source_tree(&self) -> PathBuf {
        self.src_dir().join(format!("R-{}", self.version))
    }

    // --- Artifact ---

    pub fn artifact_name(&self) -> String {
        format!("R-{}-{}-{}.AppImage", self.version, self.mode, self.arch)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(self.artifact_name())
    }
}

fn validate_version(version: &str) -> Result<()> {
    let ok = !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid R version '{}'", version)))
    }
}

/// R package names: letters, digits and dots, starting with a letter.
fn validate_package_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '.');
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid R package name '{}'", name)))
    }
}

/// Splits a comma-separated package list as accepted by `--packages`.
pub fn parse_package_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Path under the user's home used by `--install`.
pub fn user_bin_dir() -> Option<PathBuf> {
    dirs_next::home_dir().map(|h| h.join(".local/bin"))
}
