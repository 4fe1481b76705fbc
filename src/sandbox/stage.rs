use std::{
    fs::{self, File},
    io,
    os::unix::fs::PermissionsExt,
    path::{Component, Path, PathBuf},
};

use rustix::{fd::AsFd, fs::Mode};

use crate::fs::{replace_file, Directory};

/// Place a host file inside a root directory.
pub trait Materialize {
    /// Copy `path` into `root`, so it is reachable at the same absolute
    /// path once `root` is the root directory of a process.
    ///
    /// Returns the path of the copy.
    fn materialize(&self, path: &Path, root: &Path) -> io::Result<PathBuf>;
}

impl<M: Materialize + ?Sized> Materialize for &M {
    fn materialize(&self, path: &Path, root: &Path) -> io::Result<PathBuf> {
        (**self).materialize(path, root)
    }
}

/// [`Materialize`] implementation that copies the file, and creates its
/// parent directories.
///
/// Paths are resolved inside `root`, so a symlink in the image (like
/// `/bin -> /usr/bin`) is followed to `root/usr/bin`, never to the host.
/// If there is a file in the destination, it is replaced.
pub struct CopyWithParents;

impl Materialize for CopyWithParents {
    fn materialize(&self, path: &Path, root: &Path) -> io::Result<PathBuf> {
        let (parent, file_name) = split_absolute(path)?;

        let mut source = File::open(path)?;
        let mode = source.metadata()?.permissions().mode() & 0o7777;

        let root_dir = Directory::new(root)?;
        let parent_fd = root_dir.open_directory(&parent, true)?;

        let mut output = File::from(replace_file(
            parent_fd.as_fd(),
            &file_name,
            Mode::from_raw_mode(mode),
        )?);

        io::copy(&mut source, &mut output)?;

        // Mode in `openat2` is filtered by umask.
        output.set_permissions(fs::Permissions::from_mode(mode))?;

        Ok(root.join(parent.join(file_name)))
    }
}

/// Split an absolute path in its parent (relative to `/`) and its file name.
fn split_absolute(path: &Path) -> io::Result<(PathBuf, PathBuf)> {
    let invalid = || {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Expected an absolute path to a file: {}", path.display()),
        )
    };

    if !path.is_absolute() {
        return Err(invalid());
    }

    let mut parent = PathBuf::new();
    let mut file_name = None;

    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => continue,

            Component::Normal(part) => {
                if let Some(previous) = file_name.replace(part) {
                    parent.push(previous);
                }
            }

            Component::Prefix(_) | Component::ParentDir => return Err(invalid()),
        }
    }

    let file_name = file_name.ok_or_else(invalid)?;
    Ok((parent, PathBuf::from(file_name)))
}
