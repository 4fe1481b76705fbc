use std::{
    io,
    path::{Path, PathBuf},
    process::Command,
};

use oci_run::{CopyWithParents, Materialize};

pub const SHELL: &str = "/bin/sh";

/// Copy the shared libraries needed by the shell into `root`, so
/// `/bin/sh` can be executed after `chroot`.
///
/// Returns `false` if the libraries can't be found.
pub fn stage_shell_libraries(root: &Path) -> bool {
    let libraries = match shared_libraries(Path::new(SHELL)) {
        Some(l) => l,
        None => return false,
    };

    for library in libraries {
        if let Err(e) = CopyWithParents.materialize(&library, root) {
            eprintln!("Failed to copy {}: {e}", library.display());
            return false;
        }
    }

    true
}

/// Shared libraries loaded by `binary`, from the output of `ldd`.
///
/// Returns `None` if `ldd` is not available. A static binary has no
/// libraries.
pub fn shared_libraries(binary: &Path) -> Option<Vec<PathBuf>> {
    match Command::new("ldd").arg(binary).output() {
        Ok(output) => Some(parse_ldd(&String::from_utf8_lossy(&output.stdout))),
        Err(e) => {
            eprintln!("ldd is not available: {e}");
            None
        }
    }
}

/// Extract paths from the output of `ldd`.
///
/// Lines are like `libc.so.6 => /lib/libc.so.6 (0x...)` or
/// `/lib64/ld-linux-x86-64.so.2 (0x...)`.
pub fn parse_ldd(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let path = match line.split_once("=>") {
                Some((_, target)) => target.trim(),
                None => line,
            };

            path.split_whitespace()
                .next()
                .filter(|p| p.starts_with('/'))
                .map(PathBuf::from)
        })
        .collect()
}

/// [`Materialize`] implementation that copies nothing.
pub struct NoCopy;

impl Materialize for NoCopy {
    fn materialize(&self, path: &Path, root: &Path) -> io::Result<PathBuf> {
        Ok(root.join(path.strip_prefix("/").unwrap_or(path)))
    }
}
