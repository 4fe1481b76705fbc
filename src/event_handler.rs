use std::path::Path;

use crate::digest::Digest;

/// Handler to receive notifications for events while an image is
/// installed and a command is launched.
///
/// All methods are optional.
#[expect(unused_variables)]
pub trait EventHandler {
    /// HTTP request to the registry.
    fn registry_request(&self, url: &str) {}

    /// Registry requires an [authentication token][token]. `url` is the
    /// token endpoint, including its query.
    ///
    /// [token]: https://distribution.github.io/distribution/spec/auth/token/
    fn registry_auth(&self, url: &str) {}

    /// The manifest was received. `layers` is the number of layers
    /// to download.
    fn manifest_received(&self, layers: usize) {}

    fn layer_download_start(&self, digest: &Digest) {}

    /// Some data (in `bytes`) has been received.
    ///
    /// This method is invoked very frequently.
    fn download_progress_bytes(&self, bytes: usize) {}

    /// A layer was unpacked in the root directory.
    fn layer_extracted(&self, digest: &Digest) {}

    /// All layers have been unpacked.
    fn finished(&self) {}

    /// The command was copied into the root directory, at `path`.
    fn command_staged(&self, path: &Path) {}

    /// The process for the command was created. `pid` is its identifier
    /// in the namespace of the caller.
    ///
    /// With a PID namespace, the command is executed by a child of `pid`,
    /// and this method is invoked only after the command is terminated,
    /// because the process is not returned before that.
    fn command_spawned(&self, pid: u32) {}
}

/// [`EventHandler`] instance to ignore all events.
pub struct NoEventHandler;

impl EventHandler for NoEventHandler {}

impl<E: EventHandler + ?Sized> EventHandler for &E {
    fn registry_request(&self, url: &str) {
        (**self).registry_request(url)
    }

    fn registry_auth(&self, url: &str) {
        (**self).registry_auth(url)
    }

    fn manifest_received(&self, layers: usize) {
        (**self).manifest_received(layers)
    }

    fn layer_download_start(&self, digest: &Digest) {
        (**self).layer_download_start(digest)
    }

    fn download_progress_bytes(&self, bytes: usize) {
        (**self).download_progress_bytes(bytes)
    }

    fn layer_extracted(&self, digest: &Digest) {
        (**self).layer_extracted(digest)
    }

    fn finished(&self) {
        (**self).finished()
    }

    fn command_staged(&self, path: &Path) {
        (**self).command_staged(path)
    }

    fn command_spawned(&self, pid: u32) {
        (**self).command_spawned(pid)
    }
}
