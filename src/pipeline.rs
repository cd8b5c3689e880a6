//! src/pipeline.rs
//! Runs the five build stages in order. Any stage failure aborts the run before
//! later stages start; an interrupt observed between stages (or while a stage
//! fails) is reported as [`Error::Interrupted`].

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::SIGINT;
use tracing::{debug, info};

use crate::build::{self, InstallTree};
use crate::bundle::{self, AppDir};
use crate::config::BuildConfig;
use crate::deps;
use crate::error::{Error, IoContext, Result};
use crate::fetch;
use crate::output;
use crate::package::{self, Artifact};
use crate::toolchain::{self, Toolchain};

pub const STAGES: [&str; 5] = [
    "Checking build dependencies",
    "Fetching AppImage tooling",
    "Building R from source",
    "Assembling AppDir",
    "Packaging AppImage",
];

/// Shared flag set by the signal handler.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag from the SIGINT handler itself, so it is already set when a
    /// child killed by the same Ctrl-C is reaped. The default action (terminate) is
    /// replaced; the caller decides when to exit.
    pub fn register_sigint(&self) -> std::io::Result<()> {
        signal_hook::flag::register(SIGINT, Arc::clone(&self.0)).map(|_| ())
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_set() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// One implementation per environment: the host, or a recording double in tests.
pub trait Stages {
    fn check_dependencies(&mut self) -> Result<()>;
    fn fetch_toolchain(&mut self) -> Result<Toolchain>;
    fn build_source(&mut self) -> Result<InstallTree>;
    fn assemble_bundle(&mut self, toolchain: &Toolchain, tree: &InstallTree) -> Result<AppDir>;
    fn package(&mut self, toolchain: &Toolchain, appdir: &AppDir) -> Result<Artifact>;
}

fn stage<T>(index: usize, interrupt: &Interrupt, f: impl FnOnce() -> Result<T>) -> Result<T> {
    interrupt.check()?;
    output::stage(index + 1, STAGES.len(), STAGES[index]);
    match f() {
        Ok(v) => Ok(v),
        // A child killed by the same SIGINT surfaces as a command failure.
        Err(_) if interrupt.is_set() => Err(Error::Interrupted),
        Err(e) => {
            debug!(stage = STAGES[index], error = %e, "stage failed");
            Err(e)
        }
    }
}

pub fn run_pipeline<S: Stages>(stages: &mut S, interrupt: &Interrupt) -> Result<Artifact> {
    stage(0, interrupt, || stages.check_dependencies())?;
    let toolchain = stage(1, interrupt, || stages.fetch_toolchain())?;
    let tree = stage(2, interrupt, || stages.build_source())?;
    let appdir = stage(3, interrupt, || stages.assemble_bundle(&toolchain, &tree))?;
    let artifact = stage(4, interrupt, || stages.package(&toolchain, &appdir))?;
    interrupt.check()?;
    Ok(artifact)
}

/// The real stages, acting on the host.
pub struct HostStages<'a> {
    pub cfg: &'a BuildConfig,
}

impl<'a> HostStages<'a> {
    pub fn new(cfg: &'a BuildConfig) -> Self {
        HostStages { cfg }
    }

    /// `--clean`: drop build products but keep downloads and tools.
    fn clean(&self) -> Result<()> {
        for dir in [self.cfg.src_dir(), self.cfg.install_prefix(), self.cfg.appdir()] {
            if dir.exists() {
                info!(path = %dir.display(), "removing");
                fs::remove_dir_all(&dir).at(&dir)?;
            }
        }
        output::info("Removed previous build products");
        Ok(())
    }
}

impl Stages for HostStages<'_> {
    fn check_dependencies(&mut self) -> Result<()> {
        deps::check_host(self.cfg)
    }

    fn fetch_toolchain(&mut self) -> Result<Toolchain> {
        toolchain::fetch_toolchain(self.cfg, fetch::download_file_with_progress)
    }

    fn build_source(&mut self) -> Result<InstallTree> {
        if self.cfg.clean {
            self.clean()?;
        }
        build::build_source(self.cfg)
    }

    fn assemble_bundle(&mut self, toolchain: &Toolchain, tree: &InstallTree) -> Result<AppDir> {
        bundle::assemble_on_host(self.cfg, toolchain, tree)
    }

    fn package(&mut self, toolchain: &Toolchain, appdir: &AppDir) -> Result<Artifact> {
        package::package(self.cfg, &toolchain.appimagetool, appdir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        fail_at: Option<&'static str>,
        interrupt_during: Option<(&'static str, Interrupt)>,
    }

    impl Recorder {
        fn enter(&mut self, name: &'static str) -> Result<()> {
            self.calls.push(name);
            if let Some((at, flag)) = &self.interrupt_during {
                if *at == name {
                    flag.trigger();
                    return Err(Error::CommandFailed {
                        program: "make".into(),
                        code: None,
                    });
                }
            }
            if self.fail_at == Some(name) {
                return Err(Error::BundlerFailed {
                    code: Some(1),
                    output: "ERROR: Could not find dependency".into(),
                });
            }
            Ok(())
        }
    }

    impl Stages for Recorder {
        fn check_dependencies(&mut self) -> Result<()> {
            self.enter("deps")
        }
        fn fetch_toolchain(&mut self) -> Result<Toolchain> {
            self.enter("fetch")?;
            Ok(Toolchain {
                appimagetool: PathBuf::from("appimagetool"),
                linuxdeploy: None,
            })
        }
        fn build_source(&mut self) -> Result<InstallTree> {
            self.enter("build")?;
            Ok(InstallTree {
                root: PathBuf::from("install"),
                r_home: PathBuf::from("install/usr/lib/R"),
            })
        }
        fn assemble_bundle(&mut self, _: &Toolchain, _: &InstallTree) -> Result<AppDir> {
            self.enter("bundle")?;
            Ok(AppDir { root: PathBuf::from("AppDir") })
        }
        fn package(&mut self, _: &Toolchain, _: &AppDir) -> Result<Artifact> {
            self.enter("package")?;
            Ok(Artifact {
                path: PathBuf::from("R-4.4.2-minimal-x86_64.AppImage"),
                sha256: String::new(),
                smoke_test_passed: true,
            })
        }
    }

    #[test]
    fn sigint_sets_the_flag_synchronously() {
        let flag = Interrupt::new();
        flag.register_sigint().unwrap();
        assert!(!flag.is_set());
        signal_hook::low_level::raise(SIGINT).unwrap();
        assert!(flag.is_set());
        assert!(matches!(flag.check(), Err(Error::Interrupted)));
    }

    #[test]
    fn stages_run_in_order() {
        let mut rec = Recorder::default();
        let art = run_pipeline(&mut rec, &Interrupt::new()).unwrap();
        assert_eq!(rec.calls, ["deps", "fetch", "build", "bundle", "package"]);
        assert_eq!(art.path, PathBuf::from("R-4.4.2-minimal-x86_64.AppImage"));
    }

    #[test]
    fn bundle_failure_stops_before_packaging() {
        let mut rec = Recorder {
            fail_at: Some("bundle"),
            ..Default::default()
        };
        let err = run_pipeline(&mut rec, &Interrupt::new()).unwrap_err();
        assert!(matches!(err, Error::BundlerFailed { .. }));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(rec.calls, ["deps", "fetch", "build", "bundle"]);
    }

    #[test]
    fn interrupt_during_build_exits_130_without_packaging() {
        let flag = Interrupt::new();
        let mut rec = Recorder {
            interrupt_during: Some(("build", flag.clone())),
            ..Default::default()
        };
        let err = run_pipeline(&mut rec, &flag).unwrap_err();
        assert!(matches!(err, Error::Interrupted));
        assert_eq!(err.exit_code(), 130);
        assert!(!rec.calls.contains(&"package"));
    }

    #[test]
    fn interrupt_before_start_runs_nothing() {
        let flag = Interrupt::new();
        flag.trigger();
        let mut rec = Recorder::default();
        assert!(matches!(run_pipeline(&mut rec, &flag), Err(Error::Interrupted)));
        assert!(rec.calls.is_empty());
    }
}
