//! Thin wrapper for running platform command-line tools.
//!
//! Every backend talks to its platform through external binaries (`adb`,
//! `emulator`, `xcrun`). This module runs them with [`tokio::process`] and
//! maps the common failure shapes onto [`BackendError`].

use std::ffi::OsStr;
use std::process::{Output, Stdio};

use tokio::process::{Child, Command};
use tracing::debug;

use crate::backend::BackendError;

fn command<I, S>(program: &OsStr, args: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
    cmd
}

fn map_spawn_error(program: &OsStr, err: std::io::Error) -> BackendError {
    if err.kind() == std::io::ErrorKind::NotFound {
        BackendError::ToolNotFound(program.to_string_lossy().into_owned())
    } else {
        BackendError::Io(err)
    }
}

/// Run a command to completion and return its raw output, whatever the exit
/// status.
pub async fn output<P, I, S>(program: P, args: I) -> Result<Output, BackendError>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let args: Vec<S> = args.into_iter().collect();
    debug!(
        program = %program.to_string_lossy(),
        args = ?args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()).collect::<Vec<_>>(),
        "Running command"
    );

    command(program, &args)
        .output()
        .await
        .map_err(|e| map_spawn_error(program, e))
}

/// Run a command and return stdout bytes, failing on a non-zero exit.
pub async fn run_bytes<P, I, S>(program: P, args: I) -> Result<Vec<u8>, BackendError>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let out = output(program, args).await?;
    if !out.status.success() {
        return Err(BackendError::CommandFailed(
            String::from_utf8_lossy(&out.stderr).trim().to_string(),
        ));
    }
    Ok(out.stdout)
}

/// Run a command and return stdout as a string, failing on a non-zero exit.
pub async fn run<P, I, S>(program: P, args: I) -> Result<String, BackendError>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bytes = run_bytes(program, args).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Spawn a long-running command detached from our stdio.
///
/// The child is not killed on drop; ownership passes to the caller.
pub fn spawn<P, I, S>(program: P, args: I) -> Result<Child, BackendError>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    debug!(program = %program.to_string_lossy(), "Spawning process");
    command(program, args)
        .kill_on_drop(false)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| map_spawn_error(program, e))
}
