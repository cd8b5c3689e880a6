//! src/build/mod.rs
//! Downloads, configures and compiles R into an isolated install prefix.

pub mod profile;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::compress;
use crate::config::{BuildConfig, BuildMode};
use crate::error::{Error, IoContext, Result};
use crate::exec;
use crate::fetch;
use crate::output;
use profile::{BuildProfile, R_HOME_REL};

/// The staged result of `make install DESTDIR=<root>`. Read-only after the build stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTree {
    /// The `DESTDIR` the build was installed into.
    pub root: PathBuf,
    /// `R_HOME` inside `root`.
    pub r_home: PathBuf,
}

impl InstallTree {
    /// Finds R home inside a staged install.
    pub fn locate(root: &Path) -> Result<Self> {
        for rel in [R_HOME_REL, "usr/lib64/R"] {
            let candidate = root.join(rel);
            if candidate.join("bin").is_dir() {
                return Ok(InstallTree {
                    root: root.to_path_buf(),
                    r_home: candidate,
                });
            }
        }
        Err(Error::io(
            root.join(R_HOME_REL),
            std::io::Error::new(std::io::ErrorKind::NotFound, "R home not found in install tree"),
        ))
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("usr/bin")
    }

    pub fn share_dir(&self) -> PathBuf {
        self.root.join("usr/share")
    }

    pub fn library_dir(&self) -> PathBuf {
        self.r_home.join("library")
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    fs::create_dir_all(path).at(path)?;
    fs::canonicalize(path).at(path)
}

/// Fetches the source tarball (if absent) and extracts it (if not already extracted).
pub fn prepare_source(cfg: &BuildConfig) -> Result<PathBuf> {
    let tarball = cfg.source_tarball();
    fetch::ensure_cached(&cfg.source_url(), &tarball, fetch::download_file_with_progress)?;

    let tree = cfg.source_tree();
    if compress::extract_if_missing(&tarball, &cfg.src_dir(), &tree)? {
        output::success(&format!("Extracted {}", tarball.display()));
    } else {
        output::info(&format!("Reusing extracted source in {}", tree.display()));
    }
    Ok(tree)
}

/// R expression that installs `packages` into `lib` and fails if any is missing afterwards.
pub fn package_install_expr(packages: &[String], lib: &Path, repos: &str, jobs: usize) -> String {
    let quoted: Vec<String> = packages.iter().map(|p| format!("\"{}\"", p)).collect();
    let pkgs = format!("c({})", quoted.join(", "));
    let lib = lib.display();
    format!(
        "pkgs <- {pkgs}; \
         install.packages(pkgs, lib = \"{lib}\", repos = \"{repos}\", Ncpus = {jobs}L); \
         missing <- setdiff(pkgs, rownames(installed.packages(lib.loc = \"{lib}\"))); \
         if (length(missing) > 0L) {{ message(\"failed to install: \", paste(missing, collapse = \", \")); quit(status = 1L) }}"
    )
}

fn install_packages(cfg: &BuildConfig, source_tree: &Path, tree: &InstallTree, jobs: usize) -> Result<()> {
    let rscript = source_tree.join("bin/Rscript");
    let expr = package_install_expr(&cfg.packages, &tree.library_dir(), &cfg.cran_mirror, jobs);
    info!(packages = ?cfg.packages, "preinstalling packages");
    exec::run_step(
        &format!("Installing {} package(s): {}", cfg.packages.len(), cfg.packages.join(", ")),
        Command::new(rscript).arg("-e").arg(expr).current_dir(source_tree),
    )
}

/// Runs the whole source build and returns the staged install tree.
pub fn build_source(cfg: &BuildConfig) -> Result<InstallTree> {
    let tree = prepare_source(cfg)?;
    let tree = fs::canonicalize(&tree).at(&tree)?;
    let profile = BuildProfile::for_config(cfg, profile::host_cpus());
    debug!(profile = %profile.name, jobs = profile.jobs, "build profile");

    exec::run_step(
        &format!("Configuring R {}", cfg.version),
        Command::new(tree.join("configure"))
            .args(&profile.configure_args)
            .envs(profile.configure_env.iter().map(|(k, v)| (k, v)))
            .current_dir(&tree),
    )?;

    exec::run_step(
        &format!("Compiling R {} with {} job(s)", cfg.version, profile.jobs),
        Command::new("make").args(profile.build_args()).current_dir(&tree),
    )?;

    let prefix = cfg.install_prefix();
    if prefix.exists() {
        fs::remove_dir_all(&prefix).at(&prefix)?;
    }
    let destdir = absolute(&prefix)?;
    exec::run_step(
        &format!("Installing into {}", destdir.display()),
        Command::new("make").args(profile.install_args(&destdir)).current_dir(&tree),
    )?;

    let installed = InstallTree::locate(&destdir)?;
    if cfg.mode == BuildMode::WithPackages && !cfg.packages.is_empty() {
        install_packages(cfg, &tree, &installed, profile.jobs)?;
    }
    Ok(installed)
}
