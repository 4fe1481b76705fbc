use std::{cell::RefCell, fmt, io::Write, path::Path, rc::Rc};

use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};

#[derive(Copy, Clone, Debug)]
pub enum Compression {
    None,
    Gzip,
    #[cfg(feature = "zstd")]
    Zstd,
}

#[derive(Clone, Debug)]
pub struct Blob {
    /// Digest, with the `sha256:` prefix.
    pub digest: String,

    /// Content sent by the registry.
    pub data: Box<[u8]>,
}

impl Blob {
    pub fn new(data: impl Into<Box<[u8]>>) -> Blob {
        let data = data.into();

        let mut hasher = Sha256::new();
        hasher.update(&data);
        let digest = format!("sha256:{}", HexString(hasher.finalize()));

        Blob { digest, data }
    }

    /// Return a builder to create an archive.
    pub fn archive(compression: Compression) -> BlobArchive {
        let buffer = SharedBuffer(Rc::new(Vec::with_capacity(4096).into()));

        let stream: Box<dyn Write> = match compression {
            Compression::Gzip => Box::new(GzEncoder::new(buffer.clone(), Default::default())),

            #[cfg(feature = "zstd")]
            Compression::Zstd => Box::new(
                zstd::stream::write::Encoder::new(buffer.clone(), 0)
                    .unwrap()
                    .auto_finish(),
            ),

            Compression::None => Box::new(buffer.clone()),
        };

        BlobArchive {
            buffer,
            archive: tar::Builder::new(stream),
        }
    }

    /// Keep the digest, but replace the content.
    pub fn corrupted(mut self) -> Blob {
        let mut data = self.data.into_vec();
        data.extend_from_slice(b"garbage");
        self.data = data.into();
        self
    }
}

pub struct BlobArchive {
    buffer: SharedBuffer,
    archive: tar::Builder<Box<dyn Write>>,
}

#[derive(Clone)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl BlobArchive {
    pub fn build(mut self) -> Blob {
        self.archive.finish().unwrap();
        drop(self.archive.into_inner().unwrap());

        Blob::new(self.buffer.0.take())
    }

    pub fn directory(mut self, path: impl AsRef<Path>) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_mode(0o755);
        header.set_entry_type(tar::EntryType::dir());
        header.set_size(0);
        header.set_cksum();
        self.archive.append(&header, &b""[..]).unwrap();
        self
    }

    pub fn regular(self, path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> Self {
        self.file(path, data, 0o644)
    }

    pub fn executable(self, path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> Self {
        self.file(path, data, 0o755)
    }

    fn file(mut self, path: impl AsRef<Path>, data: impl AsRef<[u8]>, mode: u32) -> Self {
        let data = data.as_ref();
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_mode(mode);
        header.set_entry_type(tar::EntryType::file());
        header.set_size(data.len() as u64);
        header.set_cksum();
        self.archive.append(&header, data).unwrap();
        self
    }

    /// Add a file from the host, at the same path.
    pub fn host_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path.strip_prefix("/").unwrap_or(path);
        self.archive.append_path_with_name(path, name).unwrap();
        self
    }

    pub fn symlink(mut self, path: impl AsRef<Path>, target: impl AsRef<Path>) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o755);
        header.set_entry_type(tar::EntryType::symlink());
        header.set_size(0);
        self.archive.append_link(&mut header, path, target).unwrap();
        self
    }
}

/// Encode a byte buffer as hex string.
struct HexString<T>(T);

impl<T: AsRef<[u8]>> fmt::Display for HexString<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0
            .as_ref()
            .iter()
            .try_for_each(|byte| write!(f, "{:02x}", byte))
    }
}
