//! Process-tree termination
//!
//! A command line runs through a shell, so the process the runner spawns is
//! usually the parent of the real tool. Killing only the shell would leave the
//! tool running and holding the output pipes open. Each child is therefore
//! placed in its own process group (Unix) or Job Object (Windows) so the whole
//! tree can be force-killed on timeout.

use tokio::process::{Child, Command};

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows_job;

/// Tracks the OS grouping of one spawned child.
pub(crate) struct ProcessTree {
    #[cfg(unix)]
    pgid: Option<i32>,
    #[cfg(windows)]
    job: Option<windows_job::JobObjectHandle>,
}

impl ProcessTree {
    /// Configure `cmd` so its child starts a new process group.
    pub(crate) fn prepare(cmd: &mut Command) {
        #[cfg(unix)]
        unix::new_process_group(cmd);

        #[cfg(not(unix))]
        let _ = cmd;
    }

    /// Start tracking a freshly spawned child.
    pub(crate) fn attach(child: &Child) -> Self {
        #[cfg(unix)]
        {
            Self {
                pgid: child.id().and_then(|pid| i32::try_from(pid).ok()),
            }
        }

        #[cfg(windows)]
        {
            let job = match windows_job::create_job_object() {
                Ok(job) => match windows_job::assign_to_job(&job, child) {
                    Ok(()) => Some(job),
                    Err(error) => {
                        tracing::warn!(%error, "Child not placed in Job Object; only the shell will be killed on timeout");
                        None
                    }
                },
                Err(error) => {
                    tracing::warn!(%error, "Job Object unavailable; only the shell will be killed on timeout");
                    None
                }
            };
            Self { job }
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = child;
            Self {}
        }
    }

    /// Force-kill the child and everything it started. No graceful signal.
    pub(crate) fn kill(&mut self, child: &mut Child) {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid.take() {
                unix::kill_process_group(pgid);
            }
        }

        #[cfg(windows)]
        {
            if let Some(job) = self.job.take() {
                windows_job::terminate_job(&job);
            }
        }

        if let Err(err) = child.start_kill() {
            // Already reaped or already dead; nothing left to kill.
            tracing::debug!(error = %err, "start_kill on child failed");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;

    #[tokio::test]
    async fn test_kill_terminates_shell_and_grandchild() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("sleep 30; echo never")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null());
        ProcessTree::prepare(&mut cmd);

        let mut child = cmd.spawn().unwrap();
        let mut tree = ProcessTree::attach(&child);
        tree.kill(&mut child);

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child should die promptly")
            .unwrap();
        assert!(!status.success());
    }
}
