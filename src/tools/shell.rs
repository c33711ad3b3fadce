//! Background shell process management.
//!
//! The shell manager owns every background subprocess the agent starts.
//! It is a process-wide singleton because shell ids must stay unique and
//! resolvable for the lifetime of the process; entries are removed only
//! by explicit kill or by cleanup of completed shells past a grace
//! window. Interval logic (ages, deadlines) uses monotonic time;
//! wall-clock timestamps exist only for serialization and logs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Poll interval for pipe reads and wait loops.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Status of a shell process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Killed,
    TimedOut,
}

impl ShellStatus {
    /// Whether the process can no longer produce output.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ShellStatus::Pending | ShellStatus::Running)
    }
}

/// A background shell process and its buffered output.
pub struct ShellProcess {
    /// Short opaque id (`shell_` + 8 hex chars), never reused
    pub id: String,
    /// The command line being run
    pub command: String,
    /// Working directory the command was started in
    pub working_dir: PathBuf,
    /// Current status
    pub status: ShellStatus,
    /// Exit code once the process has finished
    pub exit_code: Option<i32>,
    /// Wall-clock creation time (for serialization/logs)
    pub created_at: DateTime<Utc>,
    /// Wall-clock start time
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock completion time
    pub completed_at: Option<DateTime<Utc>>,
    stdout_buffer: String,
    stderr_buffer: String,
    last_read_stdout: usize,
    last_read_stderr: usize,
    completed_instant: Option<Instant>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ShellProcess {
    /// Whether the process is still running.
    pub fn is_running(&self) -> bool {
        self.status == ShellStatus::Running
    }

    /// Pick up an exit that happened without an explicit `wait`.
    fn refresh(&mut self) {
        if self.status != ShellStatus::Running {
            return;
        }
        let Some(child) = self.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(exit)) => {
                self.exit_code = exit.code();
                self.mark_done(if exit.success() {
                    ShellStatus::Completed
                } else {
                    ShellStatus::Failed
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to poll shell {}: {}", self.id, e);
            }
        }
    }

    fn mark_done(&mut self, status: ShellStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.completed_instant = Some(Instant::now());
    }

    /// Drain whatever both pipes currently hold, with a short timeout
    /// per stream so callers never block on a quiet process.
    async fn pump(&mut self) {
        let mut buf = [0u8; 4096];

        if let Some(stdout) = self.stdout.as_mut() {
            loop {
                match tokio::time::timeout(POLL_INTERVAL, stdout.read(&mut buf)).await {
                    Ok(Ok(0)) => {
                        self.stdout = None;
                        break;
                    }
                    Ok(Ok(n)) => {
                        self.stdout_buffer
                            .push_str(&String::from_utf8_lossy(&buf[..n]));
                    }
                    Ok(Err(_)) | Err(_) => break,
                }
            }
        }

        if let Some(stderr) = self.stderr.as_mut() {
            loop {
                match tokio::time::timeout(POLL_INTERVAL, stderr.read(&mut buf)).await {
                    Ok(Ok(0)) => {
                        self.stderr = None;
                        break;
                    }
                    Ok(Ok(n)) => {
                        self.stderr_buffer
                            .push_str(&String::from_utf8_lossy(&buf[..n]));
                    }
                    Ok(Err(_)) | Err(_) => break,
                }
            }
        }
    }

    /// Output appended since the previous read from the same stream.
    fn new_output(&mut self, include_stderr: bool) -> String {
        let mut output = self.stdout_buffer[self.last_read_stdout..].to_string();
        self.last_read_stdout = self.stdout_buffer.len();

        if include_stderr {
            let stderr = &self.stderr_buffer[self.last_read_stderr..];
            if !stderr.is_empty() {
                output.push_str("\n[stderr]\n");
                output.push_str(stderr);
            }
            self.last_read_stderr = self.stderr_buffer.len();
        }

        output
    }

    /// Everything both streams have produced so far.
    pub fn all_output(&self) -> String {
        let mut output = self.stdout_buffer.clone();
        if !self.stderr_buffer.is_empty() {
            output.push_str("\n[stderr]\n");
            output.push_str(&self.stderr_buffer);
        }
        output
    }

    fn kill_now(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!("Kill for shell {} failed (already gone?): {}", self.id, e);
            }
        }
        self.mark_done(ShellStatus::Killed);
    }
}

/// Read-only snapshot of a shell's state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ShellSnapshot {
    pub id: String,
    pub command: String,
    pub status: ShellStatus,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Manages background shell processes.
pub struct ShellManager {
    shells: Mutex<HashMap<String, Arc<Mutex<ShellProcess>>>>,
}

static GLOBAL: OnceLock<ShellManager> = OnceLock::new();

impl ShellManager {
    fn new() -> Self {
        ShellManager {
            shells: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide shell manager.
    pub fn global() -> &'static ShellManager {
        GLOBAL.get_or_init(ShellManager::new)
    }

    /// Kill every running shell and drop all entries. Test hook only.
    pub async fn reset_for_test(&self) {
        self.kill_all().await;
        self.shells.lock().await.clear();
    }

    /// Spawn a new background shell.
    ///
    /// The spawn and the id→process insertion happen under the manager
    /// lock, so the mapping is never observed half-built.
    pub async fn create(
        &self,
        command: &str,
        working_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<String> {
        let id = format!("shell_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

        let mut shells = self.shells.lock().await;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .envs(env)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn shell: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let shell = ShellProcess {
            id: id.clone(),
            command: command.to_string(),
            working_dir: working_dir.to_path_buf(),
            status: ShellStatus::Running,
            exit_code: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            stdout_buffer: String::new(),
            stderr_buffer: String::new(),
            last_read_stdout: 0,
            last_read_stderr: 0,
            completed_instant: None,
            child: Some(child),
            stdout,
            stderr,
        };

        debug!("Started shell {}: {}", id, command);
        shells.insert(id.clone(), Arc::new(Mutex::new(shell)));
        Ok(id)
    }

    /// Get a shell handle by id.
    pub async fn get(&self, shell_id: &str) -> Option<Arc<Mutex<ShellProcess>>> {
        self.shells.lock().await.get(shell_id).map(Arc::clone)
    }

    async fn require(&self, shell_id: &str) -> Result<Arc<Mutex<ShellProcess>>> {
        self.get(shell_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("shell '{}' not found", shell_id)))
    }

    /// Non-blocking read of output produced since the last read.
    pub async fn read_output(&self, shell_id: &str, include_stderr: bool) -> Result<String> {
        let shell = self.require(shell_id).await?;
        let mut shell = shell.lock().await;
        shell.refresh();
        shell.pump().await;
        Ok(shell.new_output(include_stderr))
    }

    /// Wait for a shell to exit, with an optional deadline.
    ///
    /// On deadline expiry the shell is marked `TimedOut` and an error is
    /// returned; the process itself keeps running until killed.
    pub async fn wait(&self, shell_id: &str, timeout: Option<Duration>) -> Result<i32> {
        let shell = self.require(shell_id).await?;
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            {
                let mut guard = shell.lock().await;
                guard.refresh();
                guard.pump().await;
                if guard.status.is_terminal() {
                    return Ok(guard.exit_code.unwrap_or(-1));
                }
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    let mut guard = shell.lock().await;
                    if !guard.status.is_terminal() {
                        guard.status = ShellStatus::TimedOut;
                    }
                    return Err(Error::Timeout(format!(
                        "shell '{}' did not exit in time",
                        shell_id
                    )));
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Forcefully kill a shell.
    pub async fn kill(&self, shell_id: &str) -> Result<()> {
        let shell = self.require(shell_id).await?;
        let mut guard = shell.lock().await;
        guard.kill_now();
        Ok(())
    }

    /// Ask a shell to exit gracefully (SIGTERM on unix).
    pub async fn terminate(&self, shell_id: &str) -> Result<()> {
        let shell = self.require(shell_id).await?;
        let mut guard = shell.lock().await;

        #[cfg(unix)]
        {
            if let Some(pid) = guard.child.as_ref().and_then(|c| c.id()) {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
                return Ok(());
            }
        }

        // No pid (already reaped) or non-unix platform
        guard.kill_now();
        Ok(())
    }

    /// Snapshot of every known shell.
    pub async fn list(&self) -> Vec<ShellSnapshot> {
        let handles: Vec<_> = self.shells.lock().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            let mut guard = handle.lock().await;
            guard.refresh();
            snapshots.push(ShellSnapshot {
                id: guard.id.clone(),
                command: guard.command.clone(),
                status: guard.status,
                exit_code: guard.exit_code,
                created_at: guard.created_at,
                started_at: guard.started_at,
                completed_at: guard.completed_at,
            });
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Snapshot of shells that are still running.
    pub async fn list_running(&self) -> Vec<ShellSnapshot> {
        self.list()
            .await
            .into_iter()
            .filter(|s| s.status == ShellStatus::Running)
            .collect()
    }

    /// Remove terminal shells whose completion is older than `max_age`.
    /// Returns the number removed.
    pub async fn cleanup_completed(&self, max_age: Duration) -> usize {
        let mut shells = self.shells.lock().await;
        let mut to_remove = Vec::new();

        for (id, handle) in shells.iter() {
            let mut guard = handle.lock().await;
            guard.refresh();
            let old_enough = guard
                .completed_instant
                .map(|done| done.elapsed() > max_age)
                .unwrap_or(false);
            if guard.status.is_terminal() && old_enough {
                to_remove.push(id.clone());
            }
        }

        for id in &to_remove {
            shells.remove(id);
            debug!("Cleaned up shell {}", id);
        }
        to_remove.len()
    }

    /// Kill every running shell. Returns the count killed.
    pub async fn kill_all(&self) -> usize {
        let handles: Vec<_> = self.shells.lock().await.values().cloned().collect();
        let mut killed = 0;
        for handle in handles {
            let mut guard = handle.lock().await;
            guard.refresh();
            if guard.is_running() {
                guard.kill_now();
                killed += 1;
            }
        }
        killed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ShellManager {
        // Tests use private managers so they cannot interfere with each
        // other or with the global singleton.
        ShellManager::new()
    }

    fn cwd() -> PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn create_and_wait_captures_output() {
        let manager = manager();
        let id = manager
            .create("echo hello", &cwd(), &HashMap::new())
            .await
            .unwrap();

        let code = manager.wait(&id, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(code, 0);

        let output = manager.read_output(&id, true).await.unwrap();
        assert!(output.contains("hello"));
    }

    #[tokio::test]
    async fn read_output_is_incremental() {
        let manager = manager();
        let id = manager
            .create("echo first; echo second", &cwd(), &HashMap::new())
            .await
            .unwrap();
        manager.wait(&id, Some(Duration::from_secs(5))).await.unwrap();

        let first = manager.read_output(&id, true).await.unwrap();
        assert!(first.contains("first"));

        // Nothing new after the buffers are drained.
        let second = manager.read_output(&id, true).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn stderr_reported_in_own_section() {
        let manager = manager();
        let id = manager
            .create("echo out; echo err >&2", &cwd(), &HashMap::new())
            .await
            .unwrap();
        manager.wait(&id, Some(Duration::from_secs(5))).await.unwrap();

        let output = manager.read_output(&id, true).await.unwrap();
        assert!(output.contains("out"));
        assert!(output.contains("[stderr]"));
        assert!(output.contains("err"));

        let id2 = manager
            .create("echo only-err >&2", &cwd(), &HashMap::new())
            .await
            .unwrap();
        manager.wait(&id2, Some(Duration::from_secs(5))).await.unwrap();
        let no_stderr = manager.read_output(&id2, false).await.unwrap();
        assert!(!no_stderr.contains("only-err"));
    }

    #[tokio::test]
    async fn failing_command_marked_failed() {
        let manager = manager();
        let id = manager.create("exit 3", &cwd(), &HashMap::new()).await.unwrap();
        let code = manager.wait(&id, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(code, 3);

        let shell = manager.get(&id).await.unwrap();
        assert_eq!(shell.lock().await.status, ShellStatus::Failed);
    }

    #[tokio::test]
    async fn wait_timeout_marks_timed_out() {
        let manager = manager();
        let id = manager.create("sleep 30", &cwd(), &HashMap::new()).await.unwrap();

        let err = manager.wait(&id, Some(Duration::from_millis(200))).await;
        assert!(matches!(err, Err(Error::Timeout(_))));

        let shell = manager.get(&id).await.unwrap();
        assert_eq!(shell.lock().await.status, ShellStatus::TimedOut);

        manager.kill(&id).await.unwrap();
    }

    #[tokio::test]
    async fn kill_stops_running_shell() {
        let manager = manager();
        let id = manager.create("sleep 30", &cwd(), &HashMap::new()).await.unwrap();

        manager.kill(&id).await.unwrap();
        let shell = manager.get(&id).await.unwrap();
        assert_eq!(shell.lock().await.status, ShellStatus::Killed);
    }

    #[tokio::test]
    async fn ids_are_unique_and_stable() {
        let manager = manager();
        let a = manager.create("true", &cwd(), &HashMap::new()).await.unwrap();
        let b = manager.create("true", &cwd(), &HashMap::new()).await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("shell_"));

        // Same handle until cleanup removes it.
        let first = manager.get(&a).await.unwrap();
        let second = manager.get(&a).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn cleanup_removes_old_completed_only() {
        let manager = manager();
        let done = manager.create("true", &cwd(), &HashMap::new()).await.unwrap();
        manager.wait(&done, Some(Duration::from_secs(5))).await.unwrap();
        let running = manager.create("sleep 30", &cwd(), &HashMap::new()).await.unwrap();

        let removed = manager.cleanup_completed(Duration::ZERO).await;
        assert_eq!(removed, 1);
        assert!(manager.get(&done).await.is_none());
        assert!(manager.get(&running).await.is_some());

        manager.kill(&running).await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_respects_grace_window() {
        let manager = manager();
        let id = manager.create("true", &cwd(), &HashMap::new()).await.unwrap();
        manager.wait(&id, Some(Duration::from_secs(5))).await.unwrap();

        let removed = manager.cleanup_completed(Duration::from_secs(3600)).await;
        assert_eq!(removed, 0);
        assert!(manager.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn kill_all_counts_running() {
        let manager = manager();
        manager.create("sleep 30", &cwd(), &HashMap::new()).await.unwrap();
        manager.create("sleep 30", &cwd(), &HashMap::new()).await.unwrap();
        let finished = manager.create("true", &cwd(), &HashMap::new()).await.unwrap();
        manager.wait(&finished, Some(Duration::from_secs(5))).await.unwrap();

        assert_eq!(manager.kill_all().await, 2);
        assert!(manager.list_running().await.is_empty());
    }

    #[tokio::test]
    async fn list_snapshots() {
        let manager = manager();
        let id = manager.create("true", &cwd(), &HashMap::new()).await.unwrap();
        manager.wait(&id, Some(Duration::from_secs(5))).await.unwrap();

        let all = manager.list().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].status, ShellStatus::Completed);
        assert!(all[0].completed_at.is_some());
    }
}
