mod parser;

use std::{borrow::Cow, fmt};

/// Errors from [`Reference::try_from`].
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Missing ':' between the image name and its tag.")]
    MissingSeparator,

    #[error("Found more than one ':' in the image reference.")]
    TooManySeparators,

    #[error("Missing image name.")]
    EmptyName,

    #[error("Missing image tag.")]
    EmptyTag,
}

/// Reference to an image in a registry, written as `name:tag`.
///
/// Exactly one `:` is accepted. A port number in the reference (like
/// `localhost:5000/foo:1`) is not supported, since the registry is
/// configured separately.
///
/// # Examples
///
/// ```
/// # use oci_run::*;
/// let reference = Reference::try_from("library/busybox:latest").unwrap();
/// assert_eq!(reference.name, "library/busybox");
/// assert_eq!(reference.tag, "latest");
///
/// assert!(Reference::try_from("busybox").is_err());
/// assert!(Reference::try_from("busybox:1:2").is_err());
/// ```
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Reference<'a> {
    /// Image name, as written in the reference.
    pub name: &'a str,

    /// Image tag.
    pub tag: &'a str,
}

/// Namespace used by Docker Hub for official images.
const DEFAULT_NAMESPACE: &str = "library";

impl<'a> Reference<'a> {
    /// Repository path used in the registry API.
    ///
    /// Names without a `/` are official images, stored in the
    /// `library` namespace.
    ///
    /// ```
    /// # use oci_run::*;
    /// let reference = Reference::try_from("busybox:latest").unwrap();
    /// assert_eq!(reference.repository(), "library/busybox");
    ///
    /// let reference = Reference::try_from("nixos/nix:latest").unwrap();
    /// assert_eq!(reference.repository(), "nixos/nix");
    /// ```
    pub fn repository(&self) -> Cow<'a, str> {
        if self.name.contains('/') {
            Cow::Borrowed(self.name)
        } else {
            Cow::Owned(format!("{DEFAULT_NAMESPACE}/{}", self.name))
        }
    }
}

impl fmt::Display for Reference<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl<'a> TryFrom<&'a str> for Reference<'a> {
    type Error = ParseError;

    fn try_from(reference: &'a str) -> Result<Self, Self::Error> {
        parser::parse(reference)
    }
}
