use std::{io, path::Path};

use rustix::{
    fd::{AsFd, BorrowedFd, OwnedFd},
    fs::{mkdirat, openat, openat2, unlinkat, AtFlags, Mode, OFlags, ResolveFlags},
    io::Errno,
    path::Arg,
};

/// Provides some functions to create files and directories under a specific path.
///
/// It relies on a file descriptor to ensure that new entries are never created
/// outside the root, even if the root contains symlinks to absolute paths.
pub(crate) struct Directory {
    fd: OwnedFd,
}

impl AsFd for Directory {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Directory {
    pub fn new<P: Arg>(target: P) -> Result<Self, Errno> {
        let fd = openat(
            rustix::fs::CWD,
            target,
            OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )?;

        Ok(Directory { fd })
    }

    /// Return a file descriptor for a directory. Symlinks are resolved
    /// as if this directory were `/`.
    ///
    /// If `create` is `true`, the directory (and its parents) are created
    /// if they do not exist.
    pub fn open_directory<P>(&self, path: P, create: bool) -> Result<OwnedFd, Errno>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();

        // Only one attempt to create the directory. A dangling symlink
        // makes `mkdirat` fail with `EEXIST` but `openat2` with `ENOENT`.
        let mut created = false;

        loop {
            let result = openat2(
                self,
                path,
                OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC,
                Mode::empty(),
                ResolveFlags::IN_ROOT | ResolveFlags::NO_MAGICLINKS,
            );

            match result {
                Err(e) if create && !created && e.kind() == io::ErrorKind::NotFound => (),
                r => return r,
            }

            let file_name = match path.file_name() {
                Some(f) => f,
                None => return Err(Errno::NOENT),
            };

            // `mkdirat` needs the parent, opened with `RESOLVE_IN_ROOT`, so
            // symlinks in the path are not followed outside this directory.
            let owned_slot;
            let parent = match path.parent() {
                None => &self.fd,
                Some(p) if p.as_os_str().is_empty() => &self.fd,
                Some(p) => {
                    owned_slot = self.open_directory(p, create)?;
                    &owned_slot
                }
            };

            match mkdirat(parent.as_fd(), file_name, Mode::from_raw_mode(0o755)) {
                Ok(()) => (),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => (),
                Err(e) => return Err(e),
            }

            created = true;
        }
    }
}

/// Create a regular file `file_name` in `parent`, replacing any
/// non-directory entry with the same name.
pub(crate) fn replace_file(
    parent: BorrowedFd,
    file_name: &Path,
    mode: Mode,
) -> Result<OwnedFd, Errno> {
    loop {
        let result = openat2(
            parent,
            file_name,
            OFlags::CREATE | OFlags::EXCL | OFlags::WRONLY | OFlags::CLOEXEC,
            mode,
            ResolveFlags::BENEATH,
        );

        match result {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                unlinkat(parent, file_name, AtFlags::empty())?;
            }

            r => return r,
        }
    }
}
