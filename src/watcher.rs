//! Config file watcher: turns on-disk edits of the backend list into
//! reconcile calls.
//!
//! The watcher never mutates live state itself. Parsed snapshots flow through
//! a channel to a single reconciler task, so overlapping edits apply in
//! arrival order and a malformed file leaves the previous state active.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use notify::{RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    client::ClientManager,
    config,
    core::error::{GatewayError, GatewayResult},
};

/// Quiet period after a change before the file is re-read; editors often
/// produce bursts of events per save.
const DEBOUNCE: Duration = Duration::from_millis(300);

/// Keeps the filesystem watcher and its reconciler task alive.
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn stop(self) {
        self.task.abort();
    }
}

fn fingerprint(content: &str) -> [u8; 32] {
    Sha256::digest(content.as_bytes()).into()
}

/// Start watching `path` and reconciling the manager on changes.
/// `initial_content` seeds the change detector so the startup state does not
/// immediately re-apply.
pub fn watch(
    path: PathBuf,
    initial_content: &str,
    manager: Arc<ClientManager>,
) -> GatewayResult<ConfigWatcher> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file_name = path.file_name().map(|n| n.to_os_string());

    let (tx, rx) = mpsc::unbounded_channel::<()>();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) => {
                // watch the parent dir: editors rename temp files into place
                let relevant = event.paths.iter().any(|p| {
                    p.file_name().map(|n| n.to_os_string()) == file_name
                });
                if relevant {
                    let _ = tx.send(());
                }
            }
            Err(e) => warn!(error = %e, "Config watcher error"),
        }
    })
    .map_err(|e| GatewayError::config(format!("start config watcher: {}", e)))?;

    watcher
        .watch(&parent, RecursiveMode::NonRecursive)
        .map_err(|e| GatewayError::config(format!("watch {}: {}", parent.display(), e)))?;

    info!(path = %path.display(), "Watching configuration file");

    let task = tokio::spawn(reconcile_loop(path, fingerprint(initial_content), manager, rx));

    Ok(ConfigWatcher {
        _watcher: watcher,
        task,
    })
}

async fn reconcile_loop(
    path: PathBuf,
    mut last_applied: [u8; 32],
    manager: Arc<ClientManager>,
    mut rx: mpsc::UnboundedReceiver<()>,
) {
    while rx.recv().await.is_some() {
        // debounce the burst of events a single save produces
        tokio::time::sleep(DEBOUNCE).await;
        while rx.try_recv().is_ok() {}

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config file unreadable, keeping previous state");
                continue;
            }
        };

        let digest = fingerprint(&raw);
        if digest == last_applied {
            debug!(path = %path.display(), "Config content unchanged, skipping reload");
            continue;
        }

        match config::parse_config(&raw, &path) {
            Ok(parsed) => {
                info!(
                    path = %path.display(),
                    backends = parsed.backends.len(),
                    "Applying configuration change"
                );
                last_applied = digest;
                manager.reconcile(parsed.backends).await;
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Rejecting malformed config update, previous state stays active"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, io::Write};

    use super::*;
    use crate::{config::GatewaySettings, registry::ToolRegistry};

    const INITIAL: &str = r#"
backends:
  first:
    transport: stdio
    command: "echo"
    enabled: false
"#;

    const UPDATED: &str = r#"
backends:
  first:
    transport: stdio
    command: "echo"
    enabled: false
  second:
    transport: stdio
    command: "echo"
    enabled: false
"#;

    async fn wait_for<F: Fn() -> bool>(predicate: F, label: &str) {
        for _ in 0..100 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("timed out waiting for {}", label);
    }

    #[tokio::test]
    async fn test_file_change_triggers_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(&path, INITIAL).unwrap();

        let manager = ClientManager::new(Arc::new(ToolRegistry::new()), GatewaySettings::default());
        let initial = config::parse_config(INITIAL, &path).unwrap();
        manager.reconcile(initial.backends).await;

        let watcher = watch(path.clone(), INITIAL, Arc::clone(&manager)).unwrap();

        std::fs::write(&path, UPDATED).unwrap();
        wait_for(
            || manager.desired_backends().contains_key("second"),
            "second backend to appear",
        )
        .await;

        watcher.stop();
    }

    #[tokio::test]
    async fn test_malformed_update_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(&path, INITIAL).unwrap();

        let manager = ClientManager::new(Arc::new(ToolRegistry::new()), GatewaySettings::default());
        let initial = config::parse_config(INITIAL, &path).unwrap();
        manager.reconcile(initial.backends).await;

        let watcher = watch(path.clone(), INITIAL, Arc::clone(&manager)).unwrap();

        // malformed: stdio backend without a command
        std::fs::write(
            &path,
            r#"
backends:
  broken:
    transport: stdio
    command: ""
"#,
        )
        .unwrap();

        // give the watcher time to see and reject it
        tokio::time::sleep(Duration::from_secs(1)).await;
        let desired = manager.desired_backends();
        assert!(desired.contains_key("first"));
        assert!(!desired.contains_key("broken"));

        // a later valid update still applies
        std::fs::write(&path, UPDATED).unwrap();
        wait_for(
            || manager.desired_backends().contains_key("second"),
            "recovery after malformed update",
        )
        .await;

        watcher.stop();
    }

    #[tokio::test]
    async fn test_touch_without_content_change_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(&path, INITIAL).unwrap();

        let manager = ClientManager::new(Arc::new(ToolRegistry::new()), GatewaySettings::default());
        let watcher = watch(path.clone(), INITIAL, Arc::clone(&manager)).unwrap();

        // rewrite identical content; the fingerprint suppresses the reload,
        // so the desired set stays empty (reconcile never ran)
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.write_all(INITIAL.as_bytes()).unwrap();
        drop(file);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.desired_backends(), BTreeMap::new());

        watcher.stop();
    }
}
