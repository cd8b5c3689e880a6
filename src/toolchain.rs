//! src/toolchain.rs
//! Fetches the AppImage helper tools (appimagetool, linuxdeploy) into the tools cache.
//!
//! Tools come from the versionless "continuous" release channel. A cached file with the
//! expected name is trusted as-is; there is no checksum or version check.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::config::{Arch, BuildConfig};
use crate::error::{IoContext, Result};
use crate::fetch::{self, Fetched};
use crate::output;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    AppImageTool,
    LinuxDeploy,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::AppImageTool => "appimagetool",
            Tool::LinuxDeploy => "linuxdeploy",
        }
    }

    pub fn file_name(&self, arch: Arch) -> String {
        format!("{}-{}.AppImage", self.name(), arch)
    }

    pub fn url(&self, arch: Arch) -> String {
        let repo = match self {
            Tool::AppImageTool => "AppImage/appimagetool",
            Tool::LinuxDeploy => "linuxdeploy/linuxdeploy",
        };
        format!(
            "https://github.com/{}/releases/download/continuous/{}",
            repo,
            self.file_name(arch)
        )
    }
}

/// Paths of the helper executables for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub appimagetool: PathBuf,
    /// `None` when the ldd fallback bundler is used.
    pub linuxdeploy: Option<PathBuf>,
}

pub fn tool_path(cfg: &BuildConfig, tool: Tool) -> PathBuf {
    cfg.tools_dir().join(tool.file_name(cfg.arch))
}

fn make_executable(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path).at(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms).at(path)
}

/// Ensures `tool` is in the cache, downloading it with `download` if absent.
pub fn ensure_tool<F>(cfg: &BuildConfig, tool: Tool, download: F) -> Result<PathBuf>
where
    F: FnOnce(&str, &Path) -> Result<()>,
{
    let path = tool_path(cfg, tool);
    match fetch::ensure_cached(&tool.url(cfg.arch), &path, download)? {
        Fetched::Cached => output::info(&format!("Using cached {} ({})", tool.name(), path.display())),
        Fetched::Downloaded => output::success(&format!("Fetched {}", tool.name())),
    }
    make_executable(&path)?;
    Ok(path)
}

/// Fetches every helper this configuration needs.
pub fn fetch_toolchain<F>(cfg: &BuildConfig, download: F) -> Result<Toolchain>
where
    F: Fn(&str, &Path) -> Result<()>,
{
    let appimagetool = ensure_tool(cfg, Tool::AppImageTool, &download)?;
    let linuxdeploy = if cfg.use_linuxdeploy {
        Some(ensure_tool(cfg, Tool::LinuxDeploy, &download)?)
    } else {
        None
    };
    Ok(Toolchain {
        appimagetool,
        linuxdeploy,
    })
}
