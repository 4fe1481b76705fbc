mod extractor;

use std::{
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    digest::Digest,
    reference::{ParseError, Reference},
    registry::{BearerToken, Client, RegistryError, DEFAULT_REGISTRY},
    EventHandler, NoEventHandler,
};

pub use extractor::{Extract, TarExtractor};

/// Default deadline for all requests to the registry.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum InstallError {
    #[error("Invalid image reference: {0}")]
    InvalidReference(#[from] ParseError),

    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("Failed to extract layer {digest}: {detail}")]
    Extraction { digest: String, detail: String },

    #[error("I/O error in {1}: {0}")]
    Io(io::Error, PathBuf),
}

macro_rules! try_io {
    ($path:expr, $e:expr $(,)?) => {
        $e.map_err(|e| InstallError::Io(io::Error::from(e), $path.into()))?
    };
}

/// Download an image and unpack its layers in a directory.
///
/// # Examples
///
/// ```no_run
/// # use oci_run::*;
/// # use std::{path::Path, time::Duration};
/// Installer::new("registry-1.docker.io")
///     .timeout(Duration::from_secs(30))
///     .install("library/busybox:latest", Path::new("/tmp/busybox"))
///     .unwrap();
/// ```
pub struct Installer<E = NoEventHandler, X = TarExtractor> {
    registry: String,
    timeout: Duration,
    scratch_dir: Option<PathBuf>,
    extractor: X,
    event_handler: E,
}

impl Installer {
    pub fn new(registry: impl Into<String>) -> Self {
        Installer {
            registry: registry.into(),
            timeout: DEFAULT_TIMEOUT,
            scratch_dir: None,
            extractor: TarExtractor,
            event_handler: NoEventHandler,
        }
    }
}

impl Default for Installer {
    fn default() -> Self {
        Installer::new(DEFAULT_REGISTRY)
    }
}

impl<E, X> Installer<E, X> {
    /// Deadline for all requests to the registry.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory to store the layers while they are downloaded.
    ///
    /// If not set, it uses [`std::env::temp_dir`].
    pub fn scratch_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(path.into());
        self
    }

    pub fn extractor<X2: Extract>(self, extractor: X2) -> Installer<E, X2> {
        Installer {
            registry: self.registry,
            timeout: self.timeout,
            scratch_dir: self.scratch_dir,
            extractor,
            event_handler: self.event_handler,
        }
    }

    pub fn event_handler<E2: EventHandler>(self, event_handler: E2) -> Installer<E2, X> {
        Installer {
            registry: self.registry,
            timeout: self.timeout,
            scratch_dir: self.scratch_dir,
            extractor: self.extractor,
            event_handler,
        }
    }
}

impl<E: EventHandler, X: Extract> Installer<E, X> {
    /// Download the image `image` (written as `name:tag`), and extract
    /// its layers to `dest_root`.
    ///
    /// If `dest_root` exists, it must be empty.
    ///
    /// Layers are extracted in the order of the manifest, so files in
    /// a layer replace the files from the previous ones. If a layer
    /// fails, the installation is aborted, and the layers already
    /// extracted are kept in `dest_root`.
    pub fn install(&self, image: &str, dest_root: &Path) -> Result<(), InstallError> {
        let reference = Reference::try_from(image)?;

        try_io!(dest_root, check_empty_dir(dest_root));

        let client = Client::new(&self.registry, self.timeout, &self.event_handler);
        let repository = reference.repository();

        // Try without credentials. If the registry needs a token, the
        // response includes where to get it.
        let (manifest, token) = match client.fetch_manifest(&repository, reference.tag, None) {
            Ok(manifest) => (manifest, None),

            Err(RegistryError::Unauthorized(challenge)) => {
                let token = client.request_token(&challenge)?;
                let manifest = client.fetch_manifest(&repository, reference.tag, Some(&token))?;
                (manifest, Some(token))
            }

            Err(e) => return Err(e.into()),
        };

        self.event_handler.manifest_received(manifest.layers.len());

        for layer in &manifest.layers {
            let digest = &layer.blob_sum;

            self.event_handler.layer_download_start(digest);

            let archive = self.download_layer(&client, &repository, digest, token.as_ref())?;

            self.extractor
                .extract(archive.path(), dest_root)
                .map_err(|e| InstallError::Extraction {
                    digest: digest.to_string(),
                    detail: e.to_string(),
                })?;

            let archive_path = archive.path().to_owned();
            try_io!(archive_path, archive.close());

            self.event_handler.layer_extracted(digest);
        }

        self.event_handler.finished();

        Ok(())
    }

    /// Download a blob to a temporary file. The file is removed when
    /// the returned instance is dropped.
    fn download_layer(
        &self,
        client: &Client<&E>,
        repository: &str,
        digest: &Digest,
        token: Option<&BearerToken>,
    ) -> Result<tempfile::NamedTempFile, InstallError> {
        let scratch_dir = match &self.scratch_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir(),
        };

        let mut input = client.download_blob(repository, digest, token)?;

        let mut file = try_io!(
            &scratch_dir,
            tempfile::Builder::new()
                .prefix("layer-")
                .tempfile_in(&scratch_dir),
        );

        let file_path = file.path().to_owned();

        let mut data = [0u8; 8 * 1024];
        let mut output = BufWriter::new(file.as_file_mut());

        loop {
            let n = input
                .read(&mut data[..])
                .map_err(|e| client.map_download_error(digest, e))?;

            if n == 0 {
                break;
            }

            self.event_handler.download_progress_bytes(n);

            try_io!(&file_path, output.write_all(&data[..n]));
        }

        try_io!(&file_path, output.flush());
        drop(output);

        Ok(file)
    }
}

/// Install `image` from the default registry, with the default options.
///
/// ```no_run
/// use std::path::Path;
///
/// oci_run::install_image("busybox:latest", Path::new("/tmp/rootfs"))?;
/// # Ok::<(), oci_run::InstallError>(())
/// ```
pub fn install_image(image: &str, dest_root: &Path) -> Result<(), InstallError> {
    Installer::default().install(image, dest_root)
}

/// Check if the `target` directory is empty.
///
/// The directory is created if it does not exist.
fn check_empty_dir(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return std::fs::create_dir_all(path);
    }

    if std::fs::read_dir(path)?.next().is_some() {
        return Err(io::Error::from_raw_os_error(libc::ENOTEMPTY));
    }

    Ok(())
}

#[test]
fn reject_non_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("root");

    // Created if missing.
    check_empty_dir(&target).unwrap();
    assert!(target.is_dir());

    check_empty_dir(&target).unwrap();

    std::fs::write(target.join("file"), "x").unwrap();

    let err = check_empty_dir(&target).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOTEMPTY));
}
