mod build;
mod bundle;
mod compress;
mod config;
mod deps;
mod error;
mod exec;
mod fetch;
mod output;
mod package;
mod pipeline;
mod toolchain;

use std::path::PathBuf;
use std::process;

use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use crate::config::{BuildConfig, BuildMode, FileConfig, Overrides};
use crate::error::{Error, EXIT_INTERRUPTED};
use crate::pipeline::{HostStages, Interrupt};

/// Builds a self-contained R AppImage from source
#[derive(Parser, Debug)]
#[command(name = "r-appimage")]
#[command(version, about, long_about = None)]
#[command(after_help = "\
Config files (later wins): /etc/r-appimage/config.toml, \
$XDG_CONFIG_HOME/r-appimage/config.toml, ./r-appimage.toml.
Set RUST_LOG (e.g. RUST_LOG=r_appimage=debug) for diagnostic logging.")]
struct Cli {
    /// Build the minimal variant: base and recommended packages only (default)
    #[arg(long, conflicts_with = "with_packages")]
    minimal: bool,

    /// Build the variant with preinstalled CRAN packages
    #[arg(long)]
    with_packages: bool,

    /// Comma-separated CRAN packages for --with-packages
    #[arg(long, env = "R_APPIMAGE_PACKAGES")]
    packages: Option<String>,

    /// Target architecture: x86_64 or aarch64 (default: host)
    #[arg(long, env = "R_APPIMAGE_ARCH")]
    arch: Option<String>,

    /// R version to build
    #[arg(long = "r-version", env = "R_VERSION")]
    r_version: Option<String>,

    /// Directory for downloads, sources and intermediate trees
    #[arg(long, env = "R_APPIMAGE_BUILD_ROOT")]
    build_root: Option<PathBuf>,

    /// Where the finished AppImage is written (default: build root)
    #[arg(long, env = "R_APPIMAGE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// CRAN mirror for the R source and packages
    #[arg(long, env = "R_APPIMAGE_CRAN_MIRROR")]
    cran_mirror: Option<String>,

    /// Bundle shared libraries with ldd instead of linuxdeploy
    #[arg(long)]
    no_linuxdeploy: bool,

    /// Remove previous source, install and AppDir trees first (downloads are kept)
    #[arg(long)]
    clean: bool,

    /// Copy the finished AppImage into ~/.local/bin
    #[arg(long)]
    install: bool,

    /// Also copy the AppImage and its checksum into this directory
    #[arg(long)]
    release_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(self) -> Overrides {
        let mode = if self.with_packages {
            Some(BuildMode::WithPackages)
        } else if self.minimal {
            Some(BuildMode::Minimal)
        } else if self.packages.is_some() {
            // A package list only makes sense for the with-packages variant.
            Some(BuildMode::WithPackages)
        } else {
            None
        };
        Overrides {
            version: self.r_version,
            arch: self.arch,
            mode,
            packages: self.packages.as_deref().map(config::parse_package_list),
            build_root: self.build_root,
            output_dir: self.output_dir,
            cran_mirror: self.cran_mirror,
            no_linuxdeploy: self.no_linuxdeploy,
            clean: self.clean,
            install: self.install,
            release_dir: self.release_dir,
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn interrupted() -> ! {
    eprintln!();
    output::warn("Interrupted; partial build products are left in place");
    process::exit(EXIT_INTERRUPTED);
}

fn fail(e: &Error) -> ! {
    output::error(&e.to_string());
    process::exit(e.exit_code());
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Resolved before anything touches the build root.
    let cfg = match BuildConfig::resolve(FileConfig::load(), cli.overrides()) {
        Ok(cfg) => cfg,
        Err(e) => fail(&e),
    };

    println!(
        "{} R {} ({}, {}) -> {}",
        "r-appimage".bold(),
        cfg.version,
        cfg.mode,
        cfg.arch,
        cfg.artifact_path().display()
    );
    if !cfg.packages.is_empty() {
        output::info(&format!("Packages: {}", cfg.packages.join(", ")));
    }

    let interrupt = Interrupt::new();
    // Registered before any child is spawned: a Ctrl-C reaches configure/make too,
    // and the flag must already be set when the worker sees the child die.
    if let Err(e) = interrupt.register_sigint() {
        output::warn(&format!("could not install the SIGINT handler: {}", e));
    }
    let worker_flag = interrupt.clone();
    let worker = tokio::task::spawn_blocking(move || {
        let mut stages = HostStages::new(&cfg);
        pipeline::run_pipeline(&mut stages, &worker_flag)
    });

    tokio::select! {
        joined = worker => match joined {
            Ok(Ok(artifact)) => {
                println!();
                output::success(&format!("Done: {}", artifact.path.display()));
                if !artifact.smoke_test_passed {
                    output::warn("the smoke test did not pass on this host");
                }
            }
            Ok(Err(_)) if interrupt.is_set() => interrupted(),
            Ok(Err(e)) => fail(&e),
            Err(e) => {
                output::error(&format!("build task panicked: {}", e));
                process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            interrupt.trigger();
            interrupted();
        }
    }
}
