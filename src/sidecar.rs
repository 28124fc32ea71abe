//! Optional speech helper process (serves `/transcribe` and
//! `/analyze-context`). Killed when the handle is dropped.

use tokio::process::{Child, Command};

use crate::error::{AppError, Result};

#[derive(Debug)]
pub struct Sidecar {
    child: Child,
}

impl Sidecar {
    /// `command[0]` is the program, the rest its arguments.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AppError::Config("Helper command is empty".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        log::info!("Helper started: {} (pid {:?})", program, child.id());
        Ok(Self { child })
    }

    /// Stops the helper and returns its exit status.
    pub async fn kill(mut self) -> Option<std::process::ExitStatus> {
        if let Err(e) = self.child.kill().await {
            log::debug!("Helper already gone: {}", e);
        }
        let status = self.child.wait().await.ok();
        log::info!("Helper stopped ({:?})", status);
        status
    }
}
