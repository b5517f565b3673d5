// Signals used to end a target: the graceful request sent by `stop`, and the
// parent-death signal installed in the child so it never outlives a crashed
// supervisor.

use std::io;
use std::process::ExitStatus;

use tokio::process::Command;

// Conventional shell encoding for "terminated by signal N".
#[cfg(unix)]
const EXIT_CODE_SIGNAL_BASE: i32 = 128;

/// Have the target receive SIGTERM if the supervisor dies first.
///
/// The hook runs between fork and exec and only makes raw syscalls.
#[cfg(target_os = "linux")]
pub(crate) fn bind_to_supervisor(command: &mut Command) {
    let supervisor_pid = std::process::id();
    unsafe {
        command.pre_exec(move || {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                return Err(io::Error::last_os_error());
            }
            // Reparented before the signal was armed: nobody would deliver it.
            if u32::try_from(libc::getppid()).ok() != Some(supervisor_pid) {
                return Err(io::Error::from_raw_os_error(libc::ESRCH));
            }
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn bind_to_supervisor(_command: &mut Command) {}

/// Ask the process to terminate (SIGTERM).
#[cfg(unix)]
pub(crate) fn request_graceful_stop(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid).map_err(io::Error::other)?;
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// No graceful signal exists here; callers escalate straight to a kill.
#[cfg(not(unix))]
pub(crate) fn request_graceful_stop(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "graceful termination is not supported on this platform",
    ))
}

/// Exit code as a shell would report it: the process's own code, or
/// `128 + signal` when it was killed by a signal.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return EXIT_CODE_SIGNAL_BASE + signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::unix::process::ExitStatusExt;

    #[tokio::test]
    async fn bound_target_still_spawns_and_exits() {
        let mut command = Command::new("sh");
        command.args(["-c", "exit 7"]);
        bind_to_supervisor(&mut command);
        let status = command.status().await.expect("spawn bound target");
        assert_eq!(exit_code(status), 7);
    }

    #[test]
    fn signalled_exit_maps_to_shell_convention() {
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGKILL)), 128 + libc::SIGKILL);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
    }
}
