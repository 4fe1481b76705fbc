use std::{ffi::OsString, path::Path, path::PathBuf, process::ExitCode, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use oci_run::{
    Digest, EventHandler, Installer, OutputMode, Sandbox, SandboxError, SandboxOptions,
    DEFAULT_REGISTRY,
};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Show more details (-v for progress, -vv for requests).
    ///
    /// Ignored if `RUST_LOG` is set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download an image and execute a command in its root filesystem.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Registry to download the image from.
    #[arg(long, env = "OCI_RUN_REGISTRY", default_value = DEFAULT_REGISTRY)]
    registry: String,

    /// Deadline for all requests to the registry.
    #[arg(long, env = "OCI_RUN_TIMEOUT", value_name = "SECONDS", default_value_t = 60)]
    timeout: u64,

    /// Execute the command in the current PID namespace.
    #[arg(long)]
    no_pid_namespace: bool,

    /// Send the output of the command to /dev/null.
    #[arg(long)]
    discard_output: bool,

    /// Don't remove the root directory after the command is terminated.
    #[arg(long)]
    keep_root: bool,

    /// Directory to create the root directory and to download the layers.
    #[arg(long, env = "OCI_RUN_SCRATCH_DIR", value_name = "DIR")]
    scratch_dir: Option<PathBuf>,

    /// Image reference, as `name:tag`.
    image: String,

    /// Absolute path of the command, in the host, and its arguments.
    ///
    /// Everything after the image is passed to the command, even if it
    /// looks like an option of this program.
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<OsString>,
}

impl RunArgs {
    /// Path of the command, and its arguments.
    fn command_line(&self) -> (&Path, &[OsString]) {
        match self.command.split_first() {
            Some((command, args)) => (Path::new(command), args),
            None => (Path::new(""), &[]),
        }
    }
}

/// Send events from the library to `tracing`.
struct TracingEvents;

impl EventHandler for TracingEvents {
    fn registry_request(&self, url: &str) {
        tracing::debug!(url, "Registry request");
    }

    fn registry_auth(&self, url: &str) {
        tracing::info!(url, "Requesting token");
    }

    fn manifest_received(&self, layers: usize) {
        tracing::info!(layers, "Manifest received");
    }

    fn layer_download_start(&self, digest: &Digest) {
        tracing::info!(%digest, "Downloading layer");
    }

    fn download_progress_bytes(&self, bytes: usize) {
        tracing::trace!(bytes, "Received");
    }

    fn layer_extracted(&self, digest: &Digest) {
        tracing::debug!(%digest, "Layer extracted");
    }

    fn finished(&self) {
        tracing::info!("Image installed");
    }

    fn command_staged(&self, path: &Path) {
        tracing::debug!(path = %path.display(), "Command staged");
    }

    fn command_spawned(&self, pid: u32) {
        tracing::debug!(pid, "Command spawned");
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout is reserved for the command.
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run(args) => run(args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns the exit code for the current process.
fn run(args: RunArgs) -> anyhow::Result<u8> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("oci-run-");

    let scratch = match &args.scratch_dir {
        Some(dir) => builder.tempdir_in(dir),
        None => builder.tempdir(),
    }
    .context("Failed to create the root directory")?;

    let root = scratch.path().join("root");

    // Removed when dropped, unless the root is kept.
    let _scratch = if args.keep_root {
        let path = scratch.into_path();
        tracing::warn!(root = %path.join("root").display(), "Root directory will be kept");
        None
    } else {
        Some(scratch)
    };

    let mut installer = Installer::new(&args.registry)
        .timeout(Duration::from_secs(args.timeout))
        .event_handler(TracingEvents);

    if let Some(dir) = &args.scratch_dir {
        installer = installer.scratch_dir(dir);
    }

    installer
        .install(&args.image, &root)
        .with_context(|| format!("Failed to install {}", args.image))?;

    let options = SandboxOptions {
        pid_namespace: !args.no_pid_namespace,
        output: if args.discard_output {
            OutputMode::Discard
        } else {
            OutputMode::Inherit
        },
    };

    let (command, command_args) = args.command_line();

    let result = Sandbox::new(&root)
        .options(options)
        .event_handler(TracingEvents)
        .run(command, command_args);

    match result {
        Ok(code) => Ok(u8::try_from(code).unwrap_or(1)),

        Err(SandboxError::ChildSignaled(signal)) => {
            tracing::warn!(signal, "Command was killed by a signal");
            Ok(u8::try_from(128 + signal).unwrap_or(1))
        }

        Err(e) => {
            Err(e).with_context(|| format!("Failed to execute {}", command.display()))
        }
    }
}
