//! External build command.
//!
//! The configured command runs through the platform shell in the project
//! directory, once before serving and again on every rebuild.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::Instant;

use sitewatch_server::{BuildCallback, BuildResult};

/// Error from running the build command.
#[derive(Debug, thiserror::Error)]
pub(crate) enum BuildError {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed with {status}")]
    Failed { command: String, status: ExitStatus },
}

/// Run `command` through the shell in `dir`, waiting for it to finish.
pub(crate) fn run(command: &str, dir: &Path) -> Result<(), BuildError> {
    let start = Instant::now();
    let status = shell(command)
        .current_dir(dir)
        .status()
        .map_err(|source| BuildError::Spawn {
            command: command.to_owned(),
            source,
        })?;

    if !status.success() {
        return Err(BuildError::Failed {
            command: command.to_owned(),
            status,
        });
    }

    tracing::info!(
        command,
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Build finished"
    );
    Ok(())
}

/// Build callback running `command`, or a no-op when there is none.
pub(crate) fn callback(command: Option<String>, dir: PathBuf) -> BuildCallback {
    match command {
        Some(command) => Arc::new(move || -> BuildResult { Ok(run(&command, &dir)?) }),
        None => Arc::new(|| Ok(())),
    }
}

fn shell(command: &str) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C");
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c");
        cmd
    };
    cmd.arg(command);
    cmd
}
