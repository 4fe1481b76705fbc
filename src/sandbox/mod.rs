//! Execute a command inside a root directory.

mod confine;
mod stage;


use std::{
    ffi::{CString, OsStr},
    fmt, fs,
    io::{self, Read},
    os::{
        fd::AsRawFd,
        unix::{ffi::OsStrExt, process::CommandExt, process::ExitStatusExt},
    },
    path::Path,
    process::{Command, Stdio},
};

use rustix::pipe::{pipe_with, PipeFlags};

use crate::{EventHandler, NoEventHandler};

use confine::{parse_report, Confinement, REPORT_LEN};

pub use stage::{CopyWithParents, Materialize};

/// Destination of the standard output and error of the command.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Use the same files as the current process.
    #[default]
    Inherit,

    /// Send to `/dev/null`.
    Discard,
}

#[derive(Clone, Debug)]
pub struct SandboxOptions {
    /// Execute the command in a new PID namespace.
    pub pid_namespace: bool,

    pub output: OutputMode,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        SandboxOptions {
            pid_namespace: true,
            output: OutputMode::Inherit,
        }
    }
}

/// Step of the sandbox setup where an error happened.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    /// Copy the command to the root directory.
    Staging,

    /// Change the root directory of the child process.
    Confining,

    /// Create the PID namespace.
    Isolating,
}

impl Stage {
    fn from_code(code: u8) -> Option<Stage> {
        [Stage::Staging, Stage::Confining, Stage::Isolating]
            .into_iter()
            .find(|s| *s as u8 == code)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Staging => "staging the command",
            Stage::Confining => "changing the root directory",
            Stage::Isolating => "creating the PID namespace",
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error("Sandbox failed while {stage}: {source}")]
    Setup { stage: Stage, source: io::Error },

    #[error("Failed to launch the command: {0}")]
    ChildExecution(io::Error),

    #[error("Command was killed by signal {0}")]
    ChildSignaled(i32),

    #[error("Failed to wait for the command: {0}")]
    Wait(io::Error),
}

impl SandboxError {
    fn setup(stage: Stage, source: impl Into<io::Error>) -> Self {
        SandboxError::Setup {
            stage,
            source: source.into(),
        }
    }
}

/// Launch commands confined to a root directory.
///
/// The current process is never confined: `chroot` and `unshare` are
/// only applied to the child process.
///
/// # Examples
///
/// ```no_run
/// # use oci_run::*;
/// # use std::path::Path;
/// let code = Sandbox::new(Path::new("/tmp/busybox"))
///     .options(SandboxOptions { pid_namespace: false, output: OutputMode::Discard })
///     .run(Path::new("/bin/true"), ["--version"])
///     .unwrap();
/// ```
pub struct Sandbox<'a, M = CopyWithParents, E = NoEventHandler> {
    root: &'a Path,
    options: SandboxOptions,
    materializer: M,
    event_handler: E,
}

impl<'a> Sandbox<'a> {
    pub fn new(root: &'a Path) -> Self {
        Sandbox {
            root,
            options: SandboxOptions::default(),
            materializer: CopyWithParents,
            event_handler: NoEventHandler,
        }
    }
}

impl<'a, M, E> Sandbox<'a, M, E> {
    pub fn options(mut self, options: SandboxOptions) -> Self {
        self.options = options;
        self
    }

    pub fn materializer<M2: Materialize>(self, materializer: M2) -> Sandbox<'a, M2, E> {
        Sandbox {
            root: self.root,
            options: self.options,
            materializer,
            event_handler: self.event_handler,
        }
    }

    pub fn event_handler<E2: EventHandler>(self, event_handler: E2) -> Sandbox<'a, M, E2> {
        Sandbox {
            root: self.root,
            options: self.options,
            materializer: self.materializer,
            event_handler,
        }
    }
}

impl<M: Materialize, E: EventHandler> Sandbox<'_, M, E> {
    /// Copy `command` into the root directory, and execute it with `args`.
    ///
    /// `command` must be an absolute path in the host. It is executed from
    /// the same path, inside the root. The standard input is empty.
    ///
    /// Returns the exit code of the command.
    ///
    /// With a PID namespace, this function only returns when the command
    /// is terminated, since the intermediate process keeps the launch
    /// status open until then.
    pub fn run<I, S>(&self, command: &Path, args: I) -> Result<i32, SandboxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let root = fs::canonicalize(self.root).map_err(|e| SandboxError::setup(Stage::Staging, e))?;

        if !root.is_dir() {
            return Err(SandboxError::setup(
                Stage::Staging,
                io::Error::from_raw_os_error(libc::ENOTDIR),
            ));
        }

        if !command.is_absolute() {
            return Err(SandboxError::setup(
                Stage::Staging,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Command must be an absolute path: {}", command.display()),
                ),
            ));
        }

        let staged = self
            .materializer
            .materialize(command, &root)
            .map_err(|e| SandboxError::setup(Stage::Staging, e))?;

        self.event_handler.command_staged(&staged);

        let root_cstr = CString::new(root.as_os_str().as_bytes())
            .map_err(|e| SandboxError::setup(Stage::Confining, e))?;

        let (report_reader, report_writer) =
            pipe_with(PipeFlags::CLOEXEC).map_err(|e| SandboxError::setup(Stage::Confining, e))?;

        let confinement = Confinement {
            root: root_cstr,
            pid_namespace: self.options.pid_namespace,
            report_fd: report_writer.as_raw_fd(),
        };

        let output = || match self.options.output {
            OutputMode::Inherit => Stdio::inherit(),
            OutputMode::Discard => Stdio::null(),
        };

        let mut process = Command::new(command);
        process
            .args(args)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output());

        // SAFETY: `Confinement::enter` only uses async-signal-safe functions.
        unsafe {
            process.pre_exec(move || confinement.enter());
        }

        let spawned = process.spawn();

        // Close the write end, so reading the report stops when all
        // children have closed theirs.
        drop(report_writer);

        let mut child = match spawned {
            Ok(child) => child,

            Err(e) => {
                let mut report = Vec::with_capacity(REPORT_LEN);
                let _ = fs::File::from(report_reader)
                    .take(REPORT_LEN as u64)
                    .read_to_end(&mut report);

                return Err(match parse_report(&report) {
                    Some((stage, source)) => SandboxError::Setup { stage, source },
                    None => SandboxError::ChildExecution(e),
                });
            }
        };

        // With a PID namespace, the command has already exited.
        self.event_handler.command_spawned(child.id());

        let status = child.wait().map_err(SandboxError::Wait)?;

        match (status.code(), status.signal()) {
            (Some(code), _) => Ok(code),
            (None, Some(signal)) => Err(SandboxError::ChildSignaled(signal)),
            (None, None) => Err(SandboxError::Wait(io::Error::other(format!(
                "Unexpected process status: {status}"
            )))),
        }
    }
}

/// Execute `command` confined to `root`, with the default materializer.
///
/// See [`Sandbox::run`].
///
/// ```no_run
/// use std::path::Path;
/// use oci_run::{run_sandboxed, SandboxOptions};
///
/// let code = run_sandboxed(
///     Path::new("/tmp/rootfs"),
///     Path::new("/bin/echo"),
///     ["hello"],
///     SandboxOptions::default(),
/// )?;
///
/// assert_eq!(code, 0);
/// # Ok::<(), oci_run::SandboxError>(())
/// ```
pub fn run_sandboxed<I, S>(
    root: &Path,
    command: &Path,
    args: I,
    options: SandboxOptions,
) -> Result<i32, SandboxError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Sandbox::new(root).options(options).run(command, args)
}
