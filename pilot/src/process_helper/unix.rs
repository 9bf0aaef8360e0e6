use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

use crate::internal_prelude::*;

/// Check whether a process with the given pid exists.
pub fn process_exists(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };

    // No signal is sent, but the permission and existence checks are still performed.
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // The process exists, we're just not allowed to signal it.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Forcefully kill a browser process and everything it spawned.
///
/// Browsers are started as leaders of their own process group, so the whole group is killed.
/// If that fails, e.g. because the process isn't a group leader, only the process is killed.
pub fn kill_process(pid: u32) -> std::io::Result<()> {
    let pid = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid pid"))?;
    // Pid 0 and -1 address our own group and every process respectively.
    if pid <= 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("refusing to kill pid {pid}"),
        ));
    }
    let pid = Pid::from_raw(pid);

    if killpg(pid, Signal::SIGKILL).is_ok() {
        return Ok(());
    }
    debug!("Failed to kill process group {pid}, killing the process directly.");

    match kill(pid, Signal::SIGKILL) {
        Ok(()) => Ok(()),
        // The process is already gone.
        Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(errno.into()),
    }
}
