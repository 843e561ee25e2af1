use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Command;

/// Make the child the leader of a new process group.
pub(super) fn new_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

/// Send SIGKILL to every process in the group.
pub(super) fn kill_process_group(pgid: i32) {
    if let Err(errno) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // ESRCH: the group already exited
        tracing::debug!(pgid, error = %errno, "killpg failed");
    }
}
