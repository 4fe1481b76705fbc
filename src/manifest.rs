//! Image manifest, schema version 1.
//!
//! See <https://distribution.github.io/distribution/spec/deprecated-schema-v1/>.

use crate::digest::Digest;

#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub tag: String,

    #[serde(default)]
    pub architecture: String,

    pub schema_version: i64,

    /// Filesystem layers, in the order they must be applied.
    #[serde(rename = "fsLayers")]
    pub layers: Vec<LayerDescriptor>,

    /// Signatures are decoded, but never verified.
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub blob_sum: Digest,
}

#[derive(serde::Deserialize, Debug, Default)]
#[serde(default)]
pub struct Signature {
    pub header: SignatureHeader,
    pub signature: String,
    pub protected: String,
}

#[derive(serde::Deserialize, Debug, Default)]
#[serde(default)]
pub struct SignatureHeader {
    pub jwk: Jwk,
    pub alg: String,
}

/// JSON Web Key of a signature.
#[derive(serde::Deserialize, Debug, Default)]
#[serde(default)]
pub struct Jwk {
    pub crv: String,
    pub kid: String,
    pub kty: String,
    pub x: String,
    pub y: String,
}

#[test]
fn decode_signed_manifest() {
    let json = r#"
        {
           "schemaVersion": 1,
           "name": "library/busybox",
           "tag": "latest",
           "architecture": "amd64",
           "fsLayers": [
              { "blobSum": "sha256:a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4" },
              { "blobSum": "sha256:3f4d90098f5b5a6f6a76e9d217da85aa39b2081e30fa1f7d287138d6e7bf0ad7" }
           ],
           "history": [ { "v1Compatibility": "{}" } ],
           "signatures": [
              {
                 "header": {
                    "jwk": {
                       "crv": "P-256",
                       "kid": "ABCD:EFGH",
                       "kty": "EC",
                       "x": "X0",
                       "y": "Y0"
                    },
                    "alg": "ES256"
                 },
                 "signature": "c2ln",
                 "protected": "cHJvdGVjdGVk"
              }
           ]
        }
    "#;

    let manifest: Manifest = serde_json::from_str(json).unwrap();

    assert_eq!(manifest.name, "library/busybox");
    assert_eq!(manifest.schema_version, 1);
    assert_eq!(manifest.architecture, "amd64");

    let layers: Vec<_> = manifest.layers.iter().map(|l| l.blob_sum.hash_value()).collect();
    assert_eq!(
        layers,
        [
            "a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4",
            "3f4d90098f5b5a6f6a76e9d217da85aa39b2081e30fa1f7d287138d6e7bf0ad7"
        ]
    );

    assert_eq!(manifest.signatures.len(), 1);
    assert_eq!(manifest.signatures[0].header.alg, "ES256");
    assert_eq!(manifest.signatures[0].header.jwk.crv, "P-256");
}

#[test]
fn reject_invalid_blob_sum() {
    let json = r#"{"schemaVersion": 1, "fsLayers": [{"blobSum": "md5:00"}]}"#;
    assert!(serde_json::from_str::<Manifest>(json).is_err());
}
