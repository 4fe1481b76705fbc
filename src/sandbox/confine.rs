use std::{
    ffi::CString,
    io,
    os::fd::RawFd,
};

use rustix::{fd::BorrowedFd, thread::UnshareFlags};

use super::Stage;

/// Size of the message sent by the child when a stage fails: one byte for
/// the stage, and the errno as a big-endian `i32`.
pub(super) const REPORT_LEN: usize = 5;

/// Steps executed in the child process, between `fork` and `exec`.
///
/// Everything here must be async-signal-safe: no allocations, no locks.
/// The root path is converted to a `CString` before forking.
pub(super) struct Confinement {
    pub(super) root: CString,
    pub(super) pid_namespace: bool,
    pub(super) report_fd: RawFd,
}

impl Confinement {
    pub(super) fn enter(&self) -> io::Result<()> {
        rustix::process::chroot(self.root.as_c_str())
            .map_err(|e| self.fail(Stage::Confining, e.raw_os_error()))?;

        rustix::process::chdir(c"/").map_err(|e| self.fail(Stage::Confining, e.raw_os_error()))?;

        if self.pid_namespace {
            rustix::thread::unshare(UnshareFlags::NEWPID)
                .map_err(|e| self.fail(Stage::Isolating, e.raw_os_error()))?;

            // The new namespace applies to the children of this process,
            // so the command is executed by a new child, which is PID 1.
            //
            // SAFETY: the child only calls async-signal-safe functions
            // until `exec`, and the parent only waits for it.
            match unsafe { libc::fork() } {
                -1 => {
                    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
                    return Err(self.fail(Stage::Isolating, errno));
                }

                0 => (),

                pid => wait_and_exit(pid),
            }
        }

        Ok(())
    }

    fn fail(&self, stage: Stage, errno: i32) -> io::Error {
        let mut report = [0; REPORT_LEN];
        report[0] = stage as u8;
        report[1..].copy_from_slice(&errno.to_be_bytes());

        // If the report is lost, the parent sees a launch failure.
        // SAFETY: `report_fd` is the write end of the pipe created by the
        // parent, and it stays open until `exec` closes it.
        let fd = unsafe { BorrowedFd::borrow_raw(self.report_fd) };
        let _ = rustix::io::write(fd, &report);

        io::Error::from_raw_os_error(errno)
    }
}

/// Decode a message written by [`Confinement::fail`].
pub(super) fn parse_report(report: &[u8]) -> Option<(Stage, io::Error)> {
    let (&stage, errno) = report.split_first()?;
    let errno = i32::from_be_bytes(errno.try_into().ok()?);
    Some((Stage::from_code(stage)?, io::Error::from_raw_os_error(errno)))
}

/// Wait until `pid` terminates, and exit with the same status.
///
/// If `pid` was killed by a signal, the same signal is sent to the
/// current process.
fn wait_and_exit(pid: libc::pid_t) -> ! {
    let mut status = 0;

    loop {
        // SAFETY: `status` is a valid pointer for the whole call.
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };

        if ret == pid {
            break;
        }

        if ret == -1 && io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            // SAFETY: `_exit` does not run any handler of the parent
            // process, which could be invalid after `fork`.
            unsafe { libc::_exit(1) };
        }
    }

    // SAFETY: `kill` and `_exit` are async-signal-safe, and they only
    // affect the current process.
    unsafe {
        if libc::WIFSIGNALED(status) {
            let signal = libc::WTERMSIG(status);
            libc::kill(libc::getpid(), signal);
            libc::_exit(128 + signal);
        }

        libc::_exit(libc::WEXITSTATUS(status))
    }
}

#[test]
fn decode_reports() {
    let mut report = vec![Stage::Isolating as u8];
    report.extend_from_slice(&libc::EPERM.to_be_bytes());

    let (stage, error) = parse_report(&report).unwrap();
    assert_eq!(stage, Stage::Isolating);
    assert_eq!(error.raw_os_error(), Some(libc::EPERM));

    assert!(parse_report(&[]).is_none());
    assert!(parse_report(&report[..3]).is_none());
    assert!(parse_report(&[200, 0, 0, 0, 1]).is_none());
}
