//! Operator control-file transport.
//!
//! `warden trigger` writes a single JSON command file; the running daemon
//! polls for it and consumes it. A file drop keeps the operator channel
//! inside the same file-based coordination model as the lock store — no
//! socket needed to reach a run on the same host.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::emergency::OperatorCommand;
use crate::error::Result;

/// Atomically drop a command file for a running daemon to pick up.
pub fn write_command(path: &Path, command: &OperatorCommand) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(command)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Poll the control file and forward consumed commands. Runs until the
/// receiving side is gone.
pub async fn watch_control_file(
    path: PathBuf,
    poll_interval: Duration,
    tx: mpsc::Sender<OperatorCommand>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        if tx.is_closed() {
            break;
        }
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = %path.display(), "control file unreadable: {e}");
                continue;
            }
        };
        // Consume before acting so a command fires once.
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), "could not consume control file: {e}");
        }
        match serde_json::from_slice::<OperatorCommand>(&bytes) {
            Ok(command) => {
                info!(?command, "operator command received");
                if tx.send(command).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(path = %path.display(), "malformed control file ignored: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.json");
        let (tx, mut rx) = mpsc::channel(4);

        write_command(
            &path,
            &OperatorCommand::Quarantine {
                agent_id: "agent-03".into(),
            },
        )
        .unwrap();

        let handle = tokio::spawn(watch_control_file(
            path.clone(),
            Duration::from_millis(10),
            tx,
        ));

        let command = rx.recv().await.unwrap();
        assert!(matches!(
            command,
            OperatorCommand::Quarantine { agent_id } if agent_id == "agent-03"
        ));
        // Consumed: the file is gone.
        assert!(!path.exists());

        drop(rx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.json");
        std::fs::write(&path, b"not a command").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::spawn(watch_control_file(
            path.clone(),
            Duration::from_millis(10),
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
        assert!(!path.exists());

        drop(rx);
        handle.await.unwrap();
    }
}
