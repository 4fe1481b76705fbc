use std::{
    fmt,
    io::{self, Read},
};

use sha2::Digest as _;

/// Hash function of a [`Digest`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum DigestAlgorithm {
    SHA256,
    SHA512,
}

impl DigestAlgorithm {
    /// Length of the hash value, as an hexadecimal string.
    fn hex_len(self) -> usize {
        match self {
            DigestAlgorithm::SHA256 => 256 / 8 * 2,
            DigestAlgorithm::SHA512 => 512 / 8 * 2,
        }
    }

    fn hasher(self) -> Box<dyn digest::DynDigest> {
        match self {
            DigestAlgorithm::SHA256 => Box::new(sha2::Sha256::new()),
            DigestAlgorithm::SHA512 => Box::new(sha2::Sha512::new()),
        }
    }
}

/// Content address of a blob, like `sha256:4fd0…`.
///
/// # Examples
///
/// ```
/// # use oci_run::*;
/// const HASH: &str = "a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4";
///
/// let digest = Digest::try_from(format!("sha256:{HASH}")).unwrap();
/// assert_eq!(digest.algorithm(), DigestAlgorithm::SHA256);
/// assert_eq!(digest.hash_value(), HASH);
/// ```
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct Digest {
    source: String,
    algorithm: DigestAlgorithm,
}

/// Errors from the digest parser.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DigestError {
    #[error("Invalid digest algorithm.")]
    InvalidAlgorithm,

    #[error("Invalid digest value.")]
    InvalidValue,
}

impl Digest {
    /// The digest as received (`algorithm:hash_value`).
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn hash_value(&self) -> &str {
        self.source
            .split_once(':')
            .map(|(_, h)| h)
            .unwrap_or_default()
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Wrap `reader` to verify that its contents match this digest.
    ///
    /// Bytes are passed through unchanged. When `reader` reaches EOF,
    /// the computed hash is compared with the expected one, and an
    /// [`InvalidData`](io::ErrorKind::InvalidData) error is returned
    /// if they differ.
    pub fn verify_reader<R: Read>(&self, reader: R) -> impl Read {
        VerifyingReader {
            hasher: self.algorithm.hasher(),
            expected: self.hash_value().to_ascii_lowercase(),
            reader,
            finished: false,
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        let (algorithm, value) = match source.split_once(':') {
            Some(("sha256", v)) => (DigestAlgorithm::SHA256, v),
            Some(("sha512", v)) => (DigestAlgorithm::SHA512, v),
            _ => return Err(DigestError::InvalidAlgorithm),
        };

        if value.len() != algorithm.hex_len() || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::InvalidValue);
        }

        Ok(Digest { source, algorithm })
    }
}

struct VerifyingReader<R> {
    hasher: Box<dyn digest::DynDigest>,
    expected: String,
    reader: R,
    finished: bool,
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.finished {
            return Ok(0);
        }

        let n = self.reader.read(buf)?;
        if n == 0 {
            self.finished = true;
            self.check()?;
            return Ok(0);
        }

        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

impl<R> VerifyingReader<R> {
    fn check(&mut self) -> io::Result<()> {
        let computed = HexString(self.hasher.finalize_reset()).to_string();

        if computed != self.expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Content does not match the digest. Expected {}, got {computed}.",
                    self.expected
                ),
            ));
        }

        Ok(())
    }
}

/// Encode a byte buffer as hex string.
pub(crate) struct HexString<T>(pub T);

impl<T: AsRef<[u8]>> fmt::Display for HexString<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0
            .as_ref()
            .iter()
            .try_for_each(|byte| write!(f, "{:02x}", byte))
    }
}

#[test]
fn encode_hex_bytes() {
    assert_eq!(HexString(b"\x01\x20\xf0").to_string(), "0120f0");
}

#[test]
fn parse_digests() {
    assert_eq!(
        Digest::try_from("md5:0000".to_owned()),
        Err(DigestError::InvalidAlgorithm)
    );

    assert_eq!(
        Digest::try_from("sha256".to_owned()),
        Err(DigestError::InvalidAlgorithm)
    );

    assert_eq!(
        Digest::try_from("sha256:0000".to_owned()),
        Err(DigestError::InvalidValue)
    );

    assert_eq!(
        Digest::try_from(format!("sha256:{:064}", "x")),
        Err(DigestError::InvalidValue)
    );

    let digest = Digest::try_from(format!("sha512:{:0128}", 0)).unwrap();
    assert_eq!(digest.algorithm(), DigestAlgorithm::SHA512);
    assert_eq!(digest.to_string(), format!("sha512:{:0128}", 0));
}

#[test]
fn reject_invalid_content() {
    use std::io::Cursor;

    /// Digest for `abc`
    const DIGEST: &str = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";

    let digest = Digest::try_from(format!("sha256:{DIGEST}")).unwrap();
    let mut output = Vec::new();

    // Uppercase digests are accepted.
    digest
        .verify_reader(Cursor::new("abc"))
        .read_to_end(&mut output)
        .unwrap();

    assert_eq!(output, b"abc");

    // A truncated body is rejected.
    output.clear();
    let err = digest
        .verify_reader(Cursor::new("ab"))
        .read_to_end(&mut output)
        .unwrap_err();

    assert_eq!(err.kind(), io::ErrorKind::InvalidData);

    let msg = err.into_inner().unwrap().to_string();
    assert!(msg.contains(&DIGEST.to_ascii_lowercase()));
    assert!(msg.contains("fb8e20fc2e4c3f248c60c39bd652f3c1347298bb977b8b4d5903b85055620603"));
}
