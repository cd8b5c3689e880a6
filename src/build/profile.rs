//! src/build/profile.rs
//! Configure flags, compiler flags and parallelism for the R source build.

use std::path::Path;

use crate::config::{Arch, BuildConfig};

/// Prefix R is configured for. Files are staged elsewhere through `DESTDIR`,
/// so the compiled-in paths keep pointing here.
pub const INSTALL_PREFIX: &str = "/usr";

/// R home relative to the install prefix, fixed by `--libdir`.
pub const R_HOME_REL: &str = "usr/lib/R";

/// Feature flags passed to `configure` after `--prefix` and `--libdir`.
pub const CONFIGURE_FLAGS: &[&str] = &[
    "--enable-R-shlib",
    "--enable-memory-profiling",
    "--with-readline",
    "--with-cairo",
    "--with-libpng",
    "--with-jpeglib",
    "--with-libtiff",
    "--with-x=no",
    "--disable-java",
    "--with-recommended-packages",
];

/// Parallel jobs never exceed this on aarch64, where boards tend to have many
/// cores and little memory.
pub const AARCH64_MAX_JOBS: usize = 2;

pub fn optimization_flags(arch: Arch) -> &'static str {
    match arch {
        Arch::X86_64 => "-O2 -pipe -march=x86-64 -mtune=generic",
        Arch::Aarch64 => "-O2 -pipe -march=armv8-a",
    }
}

pub fn job_count(arch: Arch, cpus: usize) -> usize {
    let cpus = cpus.max(1);
    match arch {
        Arch::Aarch64 if cpus > AARCH64_MAX_JOBS => AARCH64_MAX_JOBS,
        _ => cpus,
    }
}

pub fn host_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Default, Clone)]
pub struct BuildProfile {
    pub name: String,
    pub configure_args: Vec<String>,
    pub configure_env: Vec<(String, String)>,
    pub jobs: usize,
}

impl BuildProfile {
    pub fn for_config(cfg: &BuildConfig, cpus: usize) -> Self {
        let flags = optimization_flags(cfg.arch).to_string();
        let mut configure_args = vec![
            format!("--prefix={}", INSTALL_PREFIX),
            format!("--libdir={}/lib", INSTALL_PREFIX),
        ];
        configure_args.extend(CONFIGURE_FLAGS.iter().map(|s| s.to_string()));
        BuildProfile {
            name: format!("R-{}-{}", cfg.version, cfg.arch),
            configure_args,
            configure_env: ["CFLAGS", "CXXFLAGS", "FFLAGS", "FCFLAGS"]
                .iter()
                .map(|k| (k.to_string(), flags.clone()))
                .collect(),
            jobs: job_count(cfg.arch, cpus),
        }
    }

    pub fn build_args(&self) -> Vec<String> {
        vec![format!("-j{}", self.jobs)]
    }

    /// `make install` arguments redirecting the install into `destdir`.
    pub fn install_args(&self, destdir: &Path) -> Vec<String> {
        vec!["install".to_string(), format!("DESTDIR={}", destdir.display())]
    }
}
