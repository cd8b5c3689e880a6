//! src/bundle/mod.rs
//! Assembles the AppDir from the staged install tree.
//!
//! ELF executables and R's private libraries go through the bundling helper (or the
//! ldd fallback) for dependency closure. Everything the helper does not understand
//! (R home resources, wrapper scripts, `Rprofile.site`, `AppRun`) is copied or
//! generated in a second pass.

pub mod apprun;
pub mod desktop;
pub mod elf;
pub mod libs;
pub mod linuxdeploy;
pub mod profile;

use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::build::profile::R_HOME_REL;
use crate::build::InstallTree;
use crate::config::{BuildConfig, BuildMode};
use crate::deps;
use crate::error::{Error, IoContext, Result};
use crate::fetch;
use crate::output;
use crate::toolchain::Toolchain;
use elf::FileKind;
use linuxdeploy::DeployRequest;

/// An assembled AppDir, ready for packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDir {
    pub root: PathBuf,
}

impl AppDir {
    pub fn usr_bin(&self) -> PathBuf {
        self.root.join("usr/bin")
    }

    pub fn usr_lib(&self) -> PathBuf {
        self.root.join("usr/lib")
    }

    /// Checks the layout the packaging tool relies on: a desktop entry and an icon at
    /// the root, `AppRun`, and at least one executable in `usr/bin`.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidAppDir {
            path: self.root.clone(),
            reason: reason.to_string(),
        };
        let root_entries: Vec<PathBuf> = fs::read_dir(&self.root)
            .at(&self.root)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        let has_ext = |ext: &str| {
            root_entries
                .iter()
                .any(|p| p.is_file() && p.extension().is_some_and(|e| e == ext))
        };

        if !has_ext("desktop") {
            return Err(invalid("no .desktop file at the root"));
        }
        if !has_ext("png") && !has_ext("svg") {
            return Err(invalid("no icon at the root"));
        }
        if !is_executable(&self.root.join("AppRun")) {
            return Err(invalid("AppRun is missing or not executable"));
        }
        let bin = self.usr_bin();
        let has_exe = fs::read_dir(&bin)
            .map(|rd| rd.filter_map(|e| e.ok()).any(|e| is_executable(&e.path())))
            .unwrap_or(false);
        if !has_exe {
            return Err(invalid("usr/bin contains no executable"));
        }
        Ok(())
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn set_executable(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path).at(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).at(path)
}

// --- Planning ---

/// Launch candidates of the install tree, split by kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BundlePlan {
    /// ELF executables handed to the dependency-closure step.
    pub executables: Vec<PathBuf>,
    /// Text launchers from `usr/bin`, copied verbatim into the AppDir's `usr/bin`.
    pub scripts: Vec<PathBuf>,
    /// R's own shared libraries.
    pub private_libs: Vec<PathBuf>,
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let path = entry.at(dir)?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn plan(tree: &InstallTree) -> Result<BundlePlan> {
    let mut plan = BundlePlan::default();

    for path in sorted_files(&tree.bin_dir())? {
        match elf::classify(&path)? {
            FileKind::Elf => plan.executables.push(path),
            FileKind::Script => plan.scripts.push(path),
        }
    }
    // The real R binary; its bin/R namesake is a shell script.
    for path in sorted_files(&tree.r_home.join("bin/exec"))? {
        if elf::classify(&path)? == FileKind::Elf {
            plan.executables.push(path);
        }
    }
    plan.private_libs = libs::private_libraries(&tree.r_home)?;

    debug!(
        executables = plan.executables.len(),
        scripts = plan.scripts.len(),
        private_libs = plan.private_libs.len(),
        "bundle plan"
    );
    Ok(plan)
}

// --- Copy helpers ---

/// Recursively copies `src` into `dst`, recreating symlinks and keeping permissions.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            Error::io(path, e.into())
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&target).at(&target)?;
        } else if ft.is_symlink() {
            let link = fs::read_link(entry.path()).at(entry.path())?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target).at(&target)?;
            }
            symlink(&link, &target).at(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).at(parent)?;
            }
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target).at(&target)?;
            }
            fs::copy(entry.path(), &target).at(&target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Makes R's launcher honour `R_HOME` from the environment instead of the
/// compiled-in prefix.
pub fn relocate_r_script(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 16);
    for line in content.lines() {
        match line.strip_prefix("R_HOME_DIR=") {
            Some(original) if !original.starts_with("\"${R_HOME:-") => {
                out.push_str(&format!("R_HOME_DIR=\"${{R_HOME:-{}}}\"", original.trim_matches('"')));
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

#[derive(Debug, Serialize)]
struct BuildInfo<'a> {
    name: &'a str,
    version: &'a str,
    arch: &'a str,
    mode: &'a str,
    packages: &'a [String],
    bundler: &'a str,
}

fn write_build_info(cfg: &BuildConfig, appdir: &Path) -> Result<()> {
    let info = BuildInfo {
        name: "R",
        version: &cfg.version,
        arch: cfg.arch.as_str(),
        mode: cfg.mode.as_str(),
        packages: &cfg.packages,
        bundler: if cfg.use_linuxdeploy { "linuxdeploy" } else { "ldd" },
    };
    let dir = appdir.join("usr/share/r-appimage");
    fs::create_dir_all(&dir).at(&dir)?;
    let path = dir.join("build-info.json");
    let json = serde_json::to_string_pretty(&info)
        .map_err(|e| Error::io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    fs::write(&path, json + "\n").at(&path)
}

fn reset_appdir(root: &Path) -> Result<()> {
    if root.exists() {
        fs::remove_dir_all(root).at(root)?;
    }
    for dir in ["usr/bin", "usr/lib", "usr/share/applications", "usr/share/metainfo"] {
        let path = root.join(dir);
        fs::create_dir_all(&path).at(&path)?;
    }
    Ok(())
}

// --- Resource pass ---

fn copy_resources(cfg: &BuildConfig, tree: &InstallTree, appdir: &AppDir) -> Result<PathBuf> {
    let r_home_rel = tree
        .r_home
        .strip_prefix(&tree.root)
        .unwrap_or(Path::new(R_HOME_REL))
        .to_path_buf();
    let r_home = appdir.root.join(&r_home_rel);

    let n = copy_tree(&tree.r_home, &r_home)?;
    output::success(&format!("Copied R home ({} files)", n));

    // Optional: man pages and other shared data outside R home.
    let share = tree.share_dir();
    if share.is_dir() {
        match copy_tree(&share, &appdir.root.join("usr/share")) {
            Ok(n) => debug!(files = n, "copied usr/share"),
            Err(e) => output::warn(&format!("could not copy optional resources from {}: {}", share.display(), e)),
        }
    }

    let launcher = r_home.join("bin/R");
    if launcher.is_file() {
        let content = fs::read_to_string(&launcher).at(&launcher)?;
        fs::write(&launcher, relocate_r_script(&content)).at(&launcher)?;
        set_executable(&launcher)?;
    }

    let etc = r_home.join("etc");
    fs::create_dir_all(&etc).at(&etc)?;
    let rprofile = etc.join("Rprofile.site");
    fs::write(&rprofile, profile::render_rprofile(cfg.mode, &cfg.packages, &cfg.cran_mirror)).at(&rprofile)?;
    info!(mode = %cfg.mode, path = %rprofile.display(), "wrote Rprofile.site");

    Ok(r_home_rel)
}

// --- Public API ---

/// Builds the AppDir for `tree`. `is_available` decides which optional host tools
/// (validators, SVG converters) may be used; `download` fetches the logo and
/// `convert` rasterises it.
pub fn assemble<A, D, C>(
    cfg: &BuildConfig,
    toolchain: &Toolchain,
    tree: &InstallTree,
    is_available: A,
    download: D,
    convert: C,
) -> Result<AppDir>
where
    A: Fn(&str) -> bool + Copy,
    D: FnOnce(&str, &Path) -> Result<()>,
    C: FnMut(desktop::Converter, &Path, &Path, u32) -> bool,
{
    let appdir = AppDir { root: cfg.appdir() };
    reset_appdir(&appdir.root)?;
    let appdir = AppDir {
        root: fs::canonicalize(&appdir.root).at(&appdir.root)?,
    };

    let plan = plan(tree)?;
    if plan.executables.is_empty() {
        return Err(Error::InvalidAppDir {
            path: tree.root.clone(),
            reason: "install tree has no ELF executables".to_string(),
        });
    }
    output::info(&format!(
        "{} executable(s), {} launcher script(s), {} private librar(y/ies)",
        plan.executables.len(),
        plan.scripts.len(),
        plan.private_libs.len()
    ));

    let meta = desktop::generate(cfg, &cfg.build_root.join("meta"), is_available, download, convert)?;
    desktop::install_into(&meta, &appdir.root)?;

    let lib_path = tree.r_home.join("lib");
    match &toolchain.linuxdeploy {
        Some(tool) => {
            let request = DeployRequest {
                appdir: appdir.root.clone(),
                executables: plan.executables.clone(),
                libraries: plan.private_libs.clone(),
                desktop_file: meta.desktop.clone(),
                icon_file: meta.icon.clone(),
                library_path: lib_path,
                arch: cfg.arch,
            };
            linuxdeploy::run_linuxdeploy(tool, &request)?;
        }
        None => {
            let mut objects = plan.executables.clone();
            objects.extend(plan.private_libs.iter().cloned());
            let closure = libs::dependency_closure(&objects, &lib_path, &tree.root)?;
            debug!(libs = ?closure.libs, "dependency closure");
            let n = libs::copy_closure(&closure, &appdir.usr_lib())?;
            output::success(&format!("Bundled {} shared librar(y/ies) via ldd", n));
            for exe in plan.executables.iter().filter(|e| e.starts_with(tree.bin_dir())) {
                if let Some(name) = exe.file_name() {
                    let dst = appdir.usr_bin().join(name);
                    fs::copy(exe, &dst).at(&dst)?;
                }
            }
        }
    }

    let r_home_rel = copy_resources(cfg, tree, &appdir)?;

    // Launcher scripts replace whatever the bundler deployed under the same name
    // (linuxdeploy resolves usr/bin/R to the ELF in bin/exec). The script sets
    // R_HOME and execs that binary; AppRun's LD_LIBRARY_PATH covers its libraries.
    for script in &plan.scripts {
        if let Some(name) = script.file_name() {
            let dst = appdir.usr_bin().join(name);
            if dst.symlink_metadata().is_ok() {
                fs::remove_file(&dst).at(&dst)?;
            }
            fs::copy(script, &dst).at(&dst)?;
            set_executable(&dst)?;
        }
    }

    let apprun = appdir.root.join("AppRun");
    if apprun.symlink_metadata().is_ok() {
        fs::remove_file(&apprun).at(&apprun)?;
    }
    fs::write(&apprun, apprun::render_apprun(&r_home_rel.to_string_lossy())).at(&apprun)?;
    set_executable(&apprun)?;

    write_build_info(cfg, &appdir.root)?;

    appdir.validate()?;
    output::success(&format!("AppDir assembled at {}", appdir.root.display()));
    if cfg.mode == BuildMode::WithPackages {
        output::info(&format!("Bundled packages: {}", cfg.packages.join(", ")));
    }
    Ok(appdir)
}

/// [`assemble`] against the host PATH.
pub fn assemble_on_host(cfg: &BuildConfig, toolchain: &Toolchain, tree: &InstallTree) -> Result<AppDir> {
    assemble(
        cfg,
        toolchain,
        tree,
        deps::on_path,
        fetch::download_file_with_progress,
        desktop::run_converter,
    )
}
