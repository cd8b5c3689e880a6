//! CLI tests for r-appimage.
//!
//! Nothing here touches the network: most cases stop before the first build
//! stage, and the interrupt case runs against a pre-seeded build root with fake
//! compilers on `PATH`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const OVERRIDE_VARS: &[&str] = &[
    "R_VERSION",
    "R_APPIMAGE_ARCH",
    "R_APPIMAGE_PACKAGES",
    "R_APPIMAGE_BUILD_ROOT",
    "R_APPIMAGE_OUTPUT_DIR",
    "R_APPIMAGE_CRAN_MIRROR",
    "RUST_LOG",
];

/// A command isolated from the caller's config files and environment overrides.
fn r_appimage(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("r-appimage");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"));
    for var in OVERRIDE_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn write_script(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn help_lists_flags_and_environment() {
    let home = TempDir::new().unwrap();
    r_appimage(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--with-packages"))
        .stdout(predicate::str::contains("--no-linuxdeploy"))
        .stdout(predicate::str::contains("R_VERSION"))
        .stdout(predicate::str::contains("RUST_LOG"));
}

#[test]
fn version_flag_works() {
    let home = TempDir::new().unwrap();
    r_appimage(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("r-appimage"));
}

#[test]
fn unknown_flag_fails() {
    let home = TempDir::new().unwrap();
    r_appimage(&home).arg("--frobnicate").assert().failure();
}

#[test]
fn mode_flags_conflict() {
    let home = TempDir::new().unwrap();
    r_appimage(&home)
        .args(["--minimal", "--with-packages"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn unsupported_arch_fails_before_creating_build_root() {
    let home = TempDir::new().unwrap();
    let build_root = home.path().join("b");
    r_appimage(&home)
        .args(["--arch", "sparc", "--build-root"])
        .arg(&build_root)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unsupported architecture 'sparc'"));
    assert!(!build_root.exists());
}

#[test]
fn unsupported_arch_from_environment() {
    let home = TempDir::new().unwrap();
    r_appimage(&home)
        .env("R_APPIMAGE_ARCH", "riscv64")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("riscv64"));
    assert!(!home.path().join("build").exists());
}

#[test]
fn invalid_package_name_is_a_config_error() {
    let home = TempDir::new().unwrap();
    r_appimage(&home)
        .args(["--arch", "x86_64", "--packages", "jsonlite,../evil"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid R package name"));
    assert!(!home.path().join("build").exists());
}

/// A terminal Ctrl-C signals the whole process group, so `configure` dies at the
/// same moment the tool is interrupted. The run must still end with 130 and never
/// reach bundling or packaging.
#[test]
fn ctrl_c_during_build_exits_130_without_packaging() {
    let home = TempDir::new().unwrap();
    let root = home.path().join("b");

    let fake_bin = home.path().join("fake-bin");
    for tool in ["gcc", "g++", "gfortran", "make", "pkg-config"] {
        write_script(&fake_bin.join(tool), "exit 0");
    }
    for tool in ["appimagetool", "linuxdeploy"] {
        write_script(&root.join(format!("tools/{}-x86_64.AppImage", tool)), "exit 0");
    }
    fs::create_dir_all(root.join("downloads")).unwrap();
    fs::write(root.join("downloads/R-4.4.2.tar.gz"), b"").unwrap();
    let tree = root.join("src/R-4.4.2");
    write_script(&tree.join("configure"), "touch configure.started\nexec sleep 30");

    let path = format!(
        "{}:{}",
        fake_bin.display(),
        std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".into())
    );
    let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_r-appimage"));
    cmd.args(["--arch", "x86_64", "--r-version", "4.4.2", "--build-root"])
        .arg(&root)
        .current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env("PATH", path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);
    for var in OVERRIDE_VARS {
        cmd.env_remove(var);
    }
    let mut child = cmd.spawn().unwrap();

    let started = wait_until(Duration::from_secs(20), || tree.join("configure.started").exists());
    if !started {
        let _ = child.kill();
        panic!("configure never started: {:?}", child.try_wait());
    }

    let status = std::process::Command::new("kill")
        .args(["-INT", "--", &format!("-{}", child.id())])
        .status()
        .unwrap();
    assert!(status.success());

    let mut exit = None;
    let finished = wait_until(Duration::from_secs(20), || {
        exit = child.try_wait().unwrap();
        exit.is_some()
    });
    if !finished {
        let _ = child.kill();
        panic!("r-appimage did not exit after SIGINT");
    }

    assert_eq!(exit.and_then(|s| s.code()), Some(130));
    assert!(!root.join("AppDir").exists());
    let artifacts: Vec<_> = fs::read_dir(&root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".AppImage"))
        .collect();
    assert!(artifacts.is_empty(), "unexpected artifacts: {:?}", artifacts);
}
