//! Download container images from a registry, and execute commands
//! confined to their root filesystem.

mod digest;
mod event_handler;
mod fs;
mod installer;
mod manifest;
mod registry;

pub mod reference;
pub mod sandbox;

pub use digest::{Digest, DigestAlgorithm, DigestError};
pub use event_handler::{EventHandler, NoEventHandler};
pub use installer::{install_image, Extract, InstallError, Installer, TarExtractor, DEFAULT_TIMEOUT};
pub use manifest::{LayerDescriptor, Manifest};
pub use reference::{ParseError, Reference};
pub use registry::{
    AuthChallenge, BearerToken, ChallengeError, Client, RegistryError, DEFAULT_REGISTRY,
};
pub use sandbox::{
    run_sandboxed, CopyWithParents, Materialize, OutputMode, Sandbox, SandboxError,
    SandboxOptions, Stage,
};
