//! Start a group of node processes for one run and collect their output.
//!
//! The launcher prepares a fresh session directory (so every checkpoint
//! starts at generation 0), spawns one child per participant with its identity
//! in the environment, forwards each child's output prefixed with its node id,
//! and waits for all of them.

use crate::config::{HarnessConfig, ENV_NODE_COUNT, ENV_NODE_ID, ENV_WORK_DIR};
use crate::HarnessError;
use colored::Colorize;
use futures::future::join_all;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// What one node printed and how it exited
#[derive(Debug)]
pub struct NodeOutput {
    pub node_id: u32,
    pub status: ExitStatus,
    /// Stdout lines, without the node prefix
    pub stdout: Vec<String>,
}

/// The command every node runs; identity is added through the environment
#[derive(Clone, Debug)]
pub struct Launcher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Launcher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-run the current executable in node mode with the given config file
    pub fn current_exe(config_path: &Path) -> Result<Self, HarnessError> {
        Ok(Self::new(
            std::env::current_exe()?,
            vec!["node".into(), config_path.as_os_str().to_owned()],
        ))
    }

    /// Run `config.participant_count` nodes to completion
    /// # Returns
    /// * The output of every node, ordered by node id
    /// # Errors
    /// * If the session directory cannot be prepared or a node cannot be spawned
    /// * `HarnessError::OtherError` if any node exits unsuccessfully
    pub async fn launch(&self, config: &HarnessConfig) -> Result<Vec<NodeOutput>, HarnessError> {
        config.validate()?;
        prepare_session(&config.work_dir)?;
        let started = chrono::Local::now();
        log::info!("Started at {}", started.format(TIME_FORMAT));

        let result = self.run_group(config).await;

        let finished = chrono::Local::now();
        log::info!("Finished at {}", finished.format(TIME_FORMAT));
        log::info!(
            "Runtime (sec): {:.6}",
            (finished - started).num_microseconds().unwrap_or_default() as f64 / 1e6
        );
        if !config.keep_work_dir {
            close_session(&config.work_dir);
        }

        let outputs = result?;
        if let Some(failed) = outputs.iter().find(|o| !o.status.success()) {
            return Err(HarnessError::OtherError(format!(
                "node {} exited with {}",
                failed.node_id, failed.status
            )));
        }
        Ok(outputs)
    }

    async fn run_group(&self, config: &HarnessConfig) -> Result<Vec<NodeOutput>, HarnessError> {
        let mut children = Vec::with_capacity(config.participant_count as usize);
        for node_id in 0..config.participant_count {
            let child = Command::new(&self.program)
                .args(&self.args)
                .env(ENV_NODE_ID, node_id.to_string())
                .env(ENV_NODE_COUNT, config.participant_count.to_string())
                .env(ENV_WORK_DIR, &config.work_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()?;
            log::debug!("spawned node {} as pid {:?}", node_id, child.id());
            children.push((node_id, child));
        }
        join_all(children.into_iter().map(|(id, child)| supervise(id, child)))
            .await
            .into_iter()
            .collect()
    }
}

async fn supervise(node_id: u32, mut child: Child) -> Result<NodeOutput, HarnessError> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| HarnessError::OtherError("child stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| HarnessError::OtherError("child stderr not captured".to_string()))?;

    let errors = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            eprintln!("{}", format!("[{node_id}] {line}").red());
        }
    });

    let mut collected = Vec::new();
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        println!("[{node_id}] {line}");
        collected.push(line);
    }
    let status = child.wait().await?;
    errors.await?;
    Ok(NodeOutput {
        node_id,
        status,
        stdout: collected,
    })
}

/// Start from an empty session directory
fn prepare_session(work_dir: &Path) -> Result<(), HarnessError> {
    match std::fs::remove_dir_all(work_dir) {
        Ok(()) => log::debug!("removed stale session {:?}", work_dir),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::fs::create_dir_all(work_dir)?;
    Ok(())
}

/// Remove the session directory, logging rather than failing
pub fn close_session(work_dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(work_dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("could not remove session {:?}: {}", work_dir, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SyncConfig, SyncMode};

    fn shell(script: &str) -> Launcher {
        Launcher::new("/bin/sh", vec!["-c".into(), script.into()])
    }

    fn config(nodes: u32, work_dir: PathBuf) -> HarnessConfig {
        HarnessConfig {
            participant_count: nodes,
            work_dir,
            sync: SyncConfig {
                mode: SyncMode::File,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_nodes_receive_identity() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("session");
        let launcher = shell("echo \"$HARNESS_NODE_ID of $HARNESS_NODE_COUNT in $HARNESS_WORK_DIR\"");
        let outputs = launcher.launch(&config(3, session.clone())).await.unwrap();
        assert_eq!(outputs.len(), 3);
        for (id, output) in outputs.iter().enumerate() {
            assert_eq!(output.node_id, id as u32);
            assert_eq!(
                output.stdout,
                vec![format!("{} of 3 in {}", id, session.display())]
            );
        }
        assert!(!session.exists());
    }

    #[tokio::test]
    async fn test_stale_session_is_replaced_and_kept_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("session");
        std::fs::create_dir_all(&session).unwrap();
        std::fs::write(session.join("queue.barrier.json"), "stale").unwrap();
        let mut config = config(1, session.clone());
        config.keep_work_dir = true;
        shell("ls \"$HARNESS_WORK_DIR\"")
            .launch(&config)
            .await
            .map(|outputs| assert!(outputs[0].stdout.is_empty()))
            .unwrap();
        assert!(session.is_dir());
    }

    #[tokio::test]
    async fn test_group_without_sync_is_refused_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("session");
        let mut config = config(3, session.clone());
        config.sync.mode = SyncMode::Noop;
        let err = shell("echo started").launch(&config).await.unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig(_)));
        assert!(!session.exists());
    }

    #[tokio::test]
    async fn test_failing_node_fails_the_launch() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = shell("echo oops >&2; [ \"$HARNESS_NODE_ID\" != 1 ]");
        let err = launcher
            .launch(&config(2, dir.path().join("session")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("node 1 exited"));
    }
}
