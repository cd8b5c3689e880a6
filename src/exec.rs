//! src/exec.rs
//! Thin wrappers around `std::process::Command` that log what they run and turn
//! exit statuses into crate errors.

use std::process::{Command, ExitStatus};

use tracing::debug;

use crate::error::{Error, Result};
use crate::output;

/// Output of a finished child whose streams were captured.
#[derive(Debug, Clone)]
pub struct Captured {
    pub status: ExitStatus,
    /// stdout followed by stderr.
    pub text: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

pub fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

fn describe(cmd: &Command) -> String {
    let mut line = program_name(cmd);
    for arg in cmd.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

fn spawn_error(cmd: &Command, e: std::io::Error) -> Error {
    Error::CommandSpawn {
        program: program_name(cmd),
        source: e,
    }
}

/// Runs `cmd` with inherited stdio and fails on a non-zero exit.
pub fn run(cmd: &mut Command) -> Result<()> {
    debug!(command = %describe(cmd), cwd = ?cmd.get_current_dir(), "running");
    let status = cmd.status().map_err(|e| spawn_error(cmd, e))?;
    check(cmd, status)
}

/// Like [`run`], behind a spinner that is suspended while the child writes to the terminal.
pub fn run_step(message: &str, cmd: &mut Command) -> Result<()> {
    let pb = output::spinner(message);
    let result = pb.suspend(|| run(cmd));
    match &result {
        Ok(()) => pb.finish_and_clear(),
        Err(_) => pb.abandon(),
    }
    if result.is_ok() {
        output::success(message);
    }
    result
}

/// Runs `cmd` capturing stdout and stderr. A non-zero exit is not an error here.
pub fn capture(cmd: &mut Command) -> Result<Captured> {
    debug!(command = %describe(cmd), "running (captured)");
    let out = cmd.output().map_err(|e| spawn_error(cmd, e))?;
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&out.stderr));
    Ok(Captured {
        status: out.status,
        text,
    })
}

fn check(cmd: &Command, status: ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(Error::CommandFailed {
            program: program_name(cmd),
            code: status.code(),
        })
    }
}
