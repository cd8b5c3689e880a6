//! src/bundle/linuxdeploy.rs
//! Runs linuxdeploy over the AppDir and decides whether its exit is fatal.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::config::Arch;
use crate::error::{Error, Result};
use crate::exec;
use crate::output;

/// linuxdeploy's strip step fails on binaries carrying a `.relr.dyn` section (newer
/// binutils) while everything else has been deployed. A non-zero exit whose output
/// contains both markers is tolerated.
pub const STRIP_FAILED_MARKER: &str = "Strip call failed";
pub const RELR_SECTION_MARKER: &str = ".relr.dyn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundlerOutcome {
    Success,
    /// Known-benign strip failure; treated as success with a warning.
    BenignStripFailure,
    Failed,
}

pub fn classify_bundler_exit(success: bool, output: &str) -> BundlerOutcome {
    if success {
        BundlerOutcome::Success
    } else if output.contains(STRIP_FAILED_MARKER) && output.contains(RELR_SECTION_MARKER) {
        BundlerOutcome::BenignStripFailure
    } else {
        BundlerOutcome::Failed
    }
}

/// Inputs for one linuxdeploy invocation.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub appdir: PathBuf,
    pub executables: Vec<PathBuf>,
    pub libraries: Vec<PathBuf>,
    pub desktop_file: PathBuf,
    pub icon_file: PathBuf,
    /// Extra library search path for resolving R's own libraries.
    pub library_path: PathBuf,
    pub arch: Arch,
}

impl DeployRequest {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["--appdir".to_string(), self.appdir.display().to_string()];
        for exe in &self.executables {
            args.push("--executable".to_string());
            args.push(exe.display().to_string());
        }
        for lib in &self.libraries {
            args.push("--library".to_string());
            args.push(lib.display().to_string());
        }
        args.push("--desktop-file".to_string());
        args.push(self.desktop_file.display().to_string());
        args.push("--icon-file".to_string());
        args.push(self.icon_file.display().to_string());
        args
    }
}

pub fn run_linuxdeploy(tool: &Path, request: &DeployRequest) -> Result<()> {
    let pb = output::spinner("Running linuxdeploy");
    let captured = exec::capture(
        Command::new(tool)
            .args(request.args())
            .env("APPIMAGE_EXTRACT_AND_RUN", "1")
            .env("ARCH", request.arch.as_str())
            .env("LD_LIBRARY_PATH", &request.library_path),
    );
    pb.finish_and_clear();
    let captured = captured?;
    debug!(output = %captured.text, "linuxdeploy output");

    match classify_bundler_exit(captured.success(), &captured.text) {
        BundlerOutcome::Success => {
            output::success("linuxdeploy completed");
            Ok(())
        }
        BundlerOutcome::BenignStripFailure => {
            output::warn("linuxdeploy could not strip binaries with a .relr.dyn section; continuing unstripped");
            Ok(())
        }
        BundlerOutcome::Failed => Err(Error::BundlerFailed {
            code: captured.code(),
            output: captured.text,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELR_FAILURE: &str = "\
-- Deploying files into AppDir root directory --
ERROR: Strip call failed: /tmp/.mount_linuxdAbC/usr/bin/strip: AppDir/usr/lib/libgfortran.so.5: unknown type [0x13] section `.relr.dyn'
";

    #[test]
    fn success_is_success() {
        assert_eq!(classify_bundler_exit(true, ""), BundlerOutcome::Success);
        assert_eq!(classify_bundler_exit(true, RELR_FAILURE), BundlerOutcome::Success);
    }

    #[test]
    fn strip_failure_on_relr_section_is_benign() {
        assert_eq!(
            classify_bundler_exit(false, RELR_FAILURE),
            BundlerOutcome::BenignStripFailure
        );
    }

    #[test]
    fn markers_are_pinned() {
        assert_eq!(STRIP_FAILED_MARKER, "Strip call failed");
        assert_eq!(RELR_SECTION_MARKER, ".relr.dyn");
    }

    #[test]
    fn one_marker_alone_is_fatal() {
        assert_eq!(
            classify_bundler_exit(false, "ERROR: Strip call failed: permission denied"),
            BundlerOutcome::Failed
        );
        assert_eq!(
            classify_bundler_exit(false, "warning: section .relr.dyn ignored\nERROR: Could not find dependency"),
            BundlerOutcome::Failed
        );
    }

    #[test]
    fn other_failures_are_fatal() {
        assert_eq!(
            classify_bundler_exit(false, "ERROR: Could not find dependency: libtre.so.5"),
            BundlerOutcome::Failed
        );
        assert_eq!(classify_bundler_exit(false, ""), BundlerOutcome::Failed);
    }

    #[test]
    fn request_lists_every_executable_and_library() {
        let req = DeployRequest {
            appdir: "/b/AppDir".into(),
            executables: vec!["/b/install/usr/lib/R/bin/exec/R".into()],
            libraries: vec!["/b/install/usr/lib/R/lib/libR.so".into()],
            desktop_file: "/b/AppDir/R.desktop".into(),
            icon_file: "/b/AppDir/r-project.png".into(),
            library_path: "/b/install/usr/lib/R/lib".into(),
            arch: Arch::X86_64,
        };
        assert_eq!(
            req.args(),
            vec![
                "--appdir", "/b/AppDir",
                "--executable", "/b/install/usr/lib/R/bin/exec/R",
                "--library", "/b/install/usr/lib/R/lib/libR.so",
                "--desktop-file", "/b/AppDir/R.desktop",
                "--icon-file", "/b/AppDir/r-project.png",
            ]
        );
    }
}
