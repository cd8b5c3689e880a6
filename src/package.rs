//! src/package.rs
//! Turns the assembled AppDir into the final `.AppImage`, smoke-tests it and
//! writes the checksum next to it.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::bundle::AppDir;
use crate::config::{Arch, BuildConfig};
use crate::error::{Error, IoContext, Result};
use crate::exec;
use crate::output;

/// The packaged image and its checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub sha256: String,
    /// Whether `<artifact> --version` ran cleanly on this host.
    pub smoke_test_passed: bool,
}

impl Artifact {
    pub fn checksum_path(&self) -> PathBuf {
        checksum_path(&self.path)
    }
}

fn checksum_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(".sha256");
    PathBuf::from(name)
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).at(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).at(path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Writes `<hash>  <file name>`, the format `sha256sum -c` expects.
fn write_checksum(artifact: &Path, hash: &str) -> Result<PathBuf> {
    let path = checksum_path(artifact);
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    fs::write(&path, format!("{}  {}\n", hash, name)).at(&path)?;
    Ok(path)
}

pub fn appimagetool_command(tool: &Path, appdir: &Path, artifact: &Path, arch: Arch) -> Command {
    let mut cmd = Command::new(tool);
    cmd.arg(appdir)
        .arg(artifact)
        .env("ARCH", arch.as_str())
        .env("APPIMAGE_EXTRACT_AND_RUN", "1");
    cmd
}

/// Runs `<artifact> --version`. A failing run is reported, never fatal: the host may
/// lack FUSE or the image may target another architecture.
pub fn smoke_test(artifact: &Path) -> bool {
    let result = exec::capture(
        Command::new(artifact)
            .arg("--version")
            .env("APPIMAGE_EXTRACT_AND_RUN", "1"),
    );
    match result {
        Ok(c) if c.success() => {
            if let Some(first) = c.text.lines().next() {
                output::success(&format!("Smoke test: {}", first.trim()));
            } else {
                output::success("Smoke test passed");
            }
            true
        }
        Ok(c) => {
            debug!(output = %c.text, "smoke test output");
            output::warn(&format!(
                "Smoke test of {} failed ({}); the image may still work on the target host",
                artifact.display(),
                c.code().map_or_else(|| "signal".to_string(), |code| format!("exit code {}", code))
            ));
            false
        }
        Err(e) => {
            output::warn(&format!("Smoke test could not run: {}", e));
            false
        }
    }
}

/// Packages `appdir` into `artifact` with appimagetool.
pub fn package_with(tool: &Path, appdir: &AppDir, artifact: &Path, arch: Arch) -> Result<Artifact> {
    if let Some(parent) = artifact.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    if artifact.exists() {
        fs::remove_file(artifact).at(artifact)?;
    }

    exec::run_step(
        &format!("Packaging {}", artifact.display()),
        &mut appimagetool_command(tool, &appdir.root, artifact, arch),
    )?;
    if !artifact.is_file() {
        return Err(Error::io(
            artifact,
            std::io::Error::new(std::io::ErrorKind::NotFound, "appimagetool produced no output"),
        ));
    }

    let mut perms = fs::metadata(artifact).at(artifact)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(artifact, perms).at(artifact)?;

    let smoke_test_passed = smoke_test(artifact);
    let sha256 = sha256_file(artifact)?;
    let sum_path = write_checksum(artifact, &sha256)?;
    info!(sha256 = %sha256, checksum = %sum_path.display(), "artifact hashed");

    Ok(Artifact {
        path: artifact.to_path_buf(),
        sha256,
        smoke_test_passed,
    })
}

/// Stage five: package, smoke-test, then honour `--install` and `--release-dir`.
pub fn package(cfg: &BuildConfig, appimagetool: &Path, appdir: &AppDir) -> Result<Artifact> {
    let artifact = package_with(appimagetool, appdir, &cfg.artifact_path(), cfg.arch)?;

    let size = fs::metadata(&artifact.path).map(|m| m.len()).unwrap_or(0);
    output::success(&format!(
        "{} ({:.1} MiB)",
        artifact.path.display(),
        size as f64 / (1024.0 * 1024.0)
    ));
    output::info(&format!("sha256 {}", artifact.sha256));

    if let Some(dir) = &cfg.release_dir {
        copy_to_release(&artifact, dir)?;
    }
    if cfg.install {
        match crate::config::user_bin_dir() {
            Some(bin) => {
                install_artifact(&artifact, &bin)?;
            }
            None => output::warn("no home directory; skipping --install"),
        }
    }
    Ok(artifact)
}

/// Copies the image and its checksum into a release directory.
pub fn copy_to_release(artifact: &Artifact, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).at(dir)?;
    let mut copied = Vec::new();
    for src in [artifact.path.clone(), artifact.checksum_path()] {
        if let Some(name) = src.file_name() {
            let dst = dir.join(name);
            fs::copy(&src, &dst).at(&dst)?;
            copied.push(dst);
        }
    }
    output::success(&format!("Release copy in {}", dir.display()));
    Ok(copied.into_iter().next().unwrap_or_else(|| dir.to_path_buf()))
}

/// Installs the image into `bin_dir`, keeping its versioned name so several builds
/// can coexist.
pub fn install_artifact(artifact: &Artifact, bin_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(bin_dir).at(bin_dir)?;
    let name = artifact.path.file_name().ok_or_else(|| {
        Error::io(
            &artifact.path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "artifact has no file name"),
        )
    })?;
    let dst = bin_dir.join(name);
    fs::copy(&artifact.path, &dst).at(&dst)?;
    let mut perms = fs::metadata(&dst).at(&dst)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&dst, perms).at(&dst)?;
    output::success(&format!("Installed to {}", dst.display()));
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn sha256_of_known_content() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("f");
        fs::write(&p, b"abc").unwrap();
        assert_eq!(
            sha256_file(&p).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn checksum_file_sits_next_to_artifact() {
        let tmp = TempDir::new().unwrap();
        let art = tmp.path().join("R-4.4.2-minimal-x86_64.AppImage");
        fs::write(&art, b"abc").unwrap();
        let sum = write_checksum(&art, "deadbeef").unwrap();
        assert_eq!(sum, tmp.path().join("R-4.4.2-minimal-x86_64.AppImage.sha256"));
        assert_eq!(
            fs::read_to_string(sum).unwrap(),
            "deadbeef  R-4.4.2-minimal-x86_64.AppImage\n"
        );
    }

    #[test]
    fn failing_smoke_test_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let art = script(tmp.path(), "broken.AppImage", "exit 1");
        assert!(!smoke_test(&art));
        let ok = script(tmp.path(), "ok.AppImage", "echo 'R version 4.4.2'");
        assert!(smoke_test(&ok));
    }

    #[test]
    fn prior_artifact_is_replaced() {
        let tmp = TempDir::new().unwrap();
        // Fake appimagetool: writes a runnable image that passes the smoke test.
        let tool = script(
            tmp.path(),
            "appimagetool",
            "printf '#!/bin/sh\\necho R %s\\n' \"$ARCH\" > \"$2\"",
        );
        let appdir = AppDir { root: tmp.path().join("AppDir") };
        fs::create_dir_all(&appdir.root).unwrap();
        let out = tmp.path().join("out/R-4.4.2-minimal-x86_64.AppImage");
        fs::create_dir_all(out.parent().unwrap()).unwrap();
        fs::write(&out, b"stale image").unwrap();

        let art = package_with(&tool, &appdir, &out, Arch::X86_64).unwrap();
        assert!(art.smoke_test_passed);
        assert_eq!(fs::read_to_string(&out).unwrap(), "#!/bin/sh\necho R x86_64\n");
        assert_eq!(art.sha256, sha256_file(&out).unwrap());
        let entries: Vec<_> = fs::read_dir(out.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 2, "artifact and checksum only");
    }

    #[test]
    fn packaging_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let tool = script(tmp.path(), "appimagetool", "exit 3");
        let appdir = AppDir { root: tmp.path().to_path_buf() };
        let err = package_with(&tool, &appdir, &tmp.path().join("x.AppImage"), Arch::Aarch64).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { code: Some(3), .. }));
    }

    #[test]
    fn release_and_install_copies() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("R.AppImage");
        fs::write(&path, b"img").unwrap();
        let art = Artifact {
            sha256: sha256_file(&path).unwrap(),
            path,
            smoke_test_passed: true,
        };
        write_checksum(&art.path, &art.sha256).unwrap();

        let rel = tmp.path().join("release");
        copy_to_release(&art, &rel).unwrap();
        assert!(rel.join("R.AppImage").is_file());
        assert!(rel.join("R.AppImage.sha256").is_file());

        let bin = tmp.path().join("home/.local/bin");
        let installed = install_artifact(&art, &bin).unwrap();
        let mode = fs::metadata(installed).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
