use std::{
    fs::File,
    io::{self, BufReader, Read, Seek},
    path::Path,
};

/// Unpack a layer archive into a directory.
pub trait Extract {
    /// Unpack the archive at `archive` into `dest`.
    ///
    /// Existing files in `dest` are replaced by the ones in the archive.
    fn extract(&self, archive: &Path, dest: &Path) -> io::Result<()>;
}

impl<X: Extract + ?Sized> Extract for &X {
    fn extract(&self, archive: &Path, dest: &Path) -> io::Result<()> {
        (**self).extract(archive, dest)
    }
}

/// [`Extract`] implementation for tarballs, uncompressed or compressed
/// with gzip or zstd.
///
/// The compression is detected from the first bytes of the file, since
/// the manifest does not include the media type of the layers.
pub struct TarExtractor;

#[derive(Debug, PartialEq)]
enum Compression {
    None,
    Gzip,
    #[cfg(feature = "zstd")]
    Zstd,
}

impl Compression {
    fn detect(magic: &[u8]) -> Compression {
        match magic {
            [0x1f, 0x8b, ..] => Compression::Gzip,

            #[cfg(feature = "zstd")]
            [0x28, 0xb5, 0x2f, 0xfd, ..] => Compression::Zstd,

            _ => Compression::None,
        }
    }
}

impl Extract for TarExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> io::Result<()> {
        let mut tarball = File::open(archive)?;

        let mut magic = Vec::with_capacity(4);
        (&mut tarball).take(4).read_to_end(&mut magic)?;
        tarball.rewind()?;

        let reader: Box<dyn Read> = match Compression::detect(&magic) {
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(BufReader::new(tarball))),

            #[cfg(feature = "zstd")]
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(tarball)?),

            Compression::None => Box::new(BufReader::new(tarball)),
        };

        let mut archive = tar::Archive::new(reader);
        archive.set_overwrite(true);
        archive.set_preserve_permissions(true);
        archive.set_preserve_mtime(true);
        archive.unpack(dest)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_mode(0o755);
            header.set_entry_type(tar::EntryType::file());
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder.append(&header, data.as_bytes()).unwrap();
        }

        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;

        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), Default::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn detect_compression() {
        assert_eq!(Compression::detect(&[0x1f, 0x8b, 8, 0]), Compression::Gzip);
        assert_eq!(Compression::detect(b"bin/"), Compression::None);
        assert_eq!(Compression::detect(&[]), Compression::None);

        #[cfg(feature = "zstd")]
        assert_eq!(
            Compression::detect(&[0x28, 0xb5, 0x2f, 0xfd]),
            Compression::Zstd
        );
    }

    #[test]
    fn later_archives_replace_files() {
        let work = tempfile::tempdir().unwrap();
        let dest = work.path().join("root");
        fs::create_dir(&dest).unwrap();

        let first = work.path().join("first");
        fs::write(&first, tarball(&[("etc/motd", "one"), ("bin/tool", "#!")])).unwrap();

        let second = work.path().join("second");
        fs::write(&second, gzip(&tarball(&[("etc/motd", "two")]))).unwrap();

        TarExtractor.extract(&first, &dest).unwrap();
        TarExtractor.extract(&second, &dest).unwrap();

        assert_eq!(fs::read(dest.join("etc/motd")).unwrap(), b"two");
        assert_eq!(fs::read(dest.join("bin/tool")).unwrap(), b"#!");
    }

    #[test]
    fn reject_invalid_archive() {
        let work = tempfile::tempdir().unwrap();

        let archive = work.path().join("broken");
        fs::write(&archive, gzip(b"this is not a tarball, but it is long enough to fail")).unwrap();

        assert!(TarExtractor.extract(&archive, work.path()).is_err());
    }
}
