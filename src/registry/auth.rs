//! Bearer token authentication.
//!
//! See <https://distribution.github.io/distribution/spec/auth/token/>.

use std::{str::FromStr, time::Duration};

/// Minimum number of parameters in a `WWW-Authenticate` header.
const MIN_PARAMS: usize = 3;

/// Parameters from a `WWW-Authenticate` header, sent by the registry
/// in a `401` response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthChallenge {
    /// URL of the token endpoint.
    pub realm: String,
    pub service: String,
    pub scope: String,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ChallengeError {
    #[error("Missing 'Bearer' scheme.")]
    MissingScheme,

    #[error("Expected at least {MIN_PARAMS} parameters, found {0}.")]
    TooFewParams(usize),

    #[error("Invalid parameter: {0:?}")]
    InvalidParam(String),
}

impl FromStr for AuthChallenge {
    type Err = ChallengeError;

    /// Parse a header like:
    ///
    /// ```text
    /// Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/debian:pull"
    /// ```
    ///
    /// Parameters are identified by name; unknown names are ignored.
    /// A value that is not a valid quoted string is read as empty.
    fn from_str(header: &str) -> Result<Self, Self::Err> {
        let params = header
            .strip_prefix("Bearer ")
            .ok_or(ChallengeError::MissingScheme)?;

        let segments: Vec<&str> = params.split(',').collect();
        if segments.len() < MIN_PARAMS {
            return Err(ChallengeError::TooFewParams(segments.len()));
        }

        let mut challenge = AuthChallenge::default();

        for segment in segments {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ChallengeError::InvalidParam(segment.to_owned()))?;

            let field = match key.trim_ascii() {
                "realm" => &mut challenge.realm,
                "service" => &mut challenge.service,
                "scope" => &mut challenge.scope,
                _ => continue,
            };

            *field = unquote(value.trim_ascii()).unwrap_or_default();
        }

        Ok(challenge)
    }
}

/// Remove the quotes of a quoted-string, and resolve its escape
/// sequences.
///
/// Return `None` if `value` is not a valid quoted-string.
fn unquote(value: &str) -> Option<String> {
    let inner = value.strip_prefix('"')?.strip_suffix('"')?;

    let mut output = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => output.push(chars.next()?),
            '"' => return None,
            c => output.push(c),
        }
    }

    Some(output)
}

/// Token to access the registry, from the `realm` of an [`AuthChallenge`].
///
/// It is requested once, and never refreshed.
#[derive(Clone, Debug, PartialEq)]
pub struct BearerToken {
    token: String,
    expires_in: Option<u64>,
}

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        BearerToken {
            token: token.into(),
            expires_in: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Lifetime of the token, if the token endpoint sent it.
    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_in.map(Duration::from_secs)
    }

    /// Value for the `Authorization` header.
    pub(crate) fn header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Build a token from the JSON response of the token endpoint.
    ///
    /// The response must include either `token` or `access_token`.
    pub(crate) fn from_response(body: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        #[derive(serde::Deserialize, Debug)]
        struct Tokens {
            token: Option<String>,
            access_token: Option<String>,
            expires_in: Option<u64>,
        }

        let tokens: Tokens = serde_json::from_slice(body)?;

        Ok(tokens
            .token
            .or(tokens.access_token)
            .map(|token| BearerToken {
                token,
                expires_in: tokens.expires_in,
            }))
    }
}
