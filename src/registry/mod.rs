mod auth;

use std::{
    io::{self, Read},
    net::SocketAddr,
    str::FromStr,
    time::{Duration, Instant},
};

use crate::{digest::Digest, manifest::Manifest, EventHandler};

pub use auth::{AuthChallenge, BearerToken, ChallengeError};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Host of the registry used when none is configured.
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// Media types for the `Accept` header of manifest requests.
const MANIFEST_MEDIA_TYPES: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws, \
                                    application/vnd.docker.distribution.manifest.v1+json";

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] Box<ureq::Transport>),

    #[error("Deadline exceeded.")]
    DeadlineExceeded,

    #[error("Registry responded with HTTP status {0}.")]
    Status(u16),

    #[error("Authentication required (realm {}).", .0.realm)]
    Unauthorized(AuthChallenge),

    #[error("Invalid WWW-Authenticate header: {0}")]
    InvalidChallenge(#[from] ChallengeError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing authentication token.")]
    MissingToken,

    #[error("Failed to download {digest}: HTTP status {status}.")]
    BlobStatus { digest: String, status: u16 },

    #[error("Failed to download {digest}: {source}")]
    Download { digest: String, source: io::Error },

    #[error("Failed to read the response: {0}")]
    Body(io::Error),
}

impl From<ureq::Transport> for RegistryError {
    fn from(value: ureq::Transport) -> Self {
        RegistryError::Transport(Box::new(value))
    }
}

/// Client for the registry API.
///
/// All requests share the same deadline, computed when the client is
/// created. Requests sent after the deadline fail with
/// [`RegistryError::DeadlineExceeded`].
pub struct Client<E> {
    agent: ureq::Agent,
    base_url: String,
    deadline: Option<Instant>,
    event_handler: E,
}

impl<E: EventHandler> Client<E> {
    /// Create a new client for `registry`, which can be a hostname
    /// (with an optional port) or a URL.
    ///
    /// If there is no URI scheme, it tries to guess it:
    ///
    /// * If it is a loopback IP (like `127.0.0.1`), or if the port
    ///   is `:80`, it uses `http://`.
    /// * In any other case, it uses `https://`.
    pub fn new(registry: &str, timeout: Duration, event_handler: E) -> Self {
        let agent = ureq::AgentBuilder::new().user_agent(USER_AGENT).build();
        Self::with_agent(agent, registry, timeout, event_handler)
    }

    /// Like [`Client::new`], but requests are sent with `agent`, instead
    /// of an agent with the default settings.
    ///
    /// The deadline computed from `timeout` is applied on top of the
    /// timeouts configured in `agent`.
    pub fn with_agent(
        agent: ureq::Agent,
        registry: &str,
        timeout: Duration,
        event_handler: E,
    ) -> Self {
        let registry = registry.trim_end_matches('/');

        let base_url = if registry.starts_with("http://") || registry.starts_with("https://") {
            format!("{registry}/v2")
        } else {
            format!("{}{registry}/v2", guess_scheme(registry))
        };

        Client {
            agent,
            base_url,
            deadline: Instant::now().checked_add(timeout),
            event_handler,
        }
    }

    /// Get the manifest of the image `name`, for the tag or digest
    /// in `reference`.
    ///
    /// If the registry requires authentication, it returns
    /// [`RegistryError::Unauthorized`] with the parameters to request
    /// a token.
    pub fn fetch_manifest(
        &self,
        name: &str,
        reference: &str,
        token: Option<&BearerToken>,
    ) -> Result<Manifest, RegistryError> {
        let url = format!("{}/{name}/manifests/{reference}", self.base_url);
        let request = self.agent.get(&url).set("Accept", MANIFEST_MEDIA_TYPES);

        let response = self.send(request, token)?;

        match response.status() {
            200 => Ok(serde_json::from_reader(response.into_reader())?),

            401 => match response.header("www-authenticate") {
                Some(header) => Err(RegistryError::Unauthorized(header.parse()?)),
                None => Err(RegistryError::Status(401)),
            },

            status => Err(RegistryError::Status(status)),
        }
    }

    /// Request a token from the realm of `challenge`.
    ///
    /// `service` and `scope` are sent in the query string.
    pub fn request_token(&self, challenge: &AuthChallenge) -> Result<BearerToken, RegistryError> {
        let request = self
            .agent
            .get(&challenge.realm)
            .query("service", &challenge.service)
            .query("scope", &challenge.scope);

        self.event_handler.registry_auth(request.url());

        let response = self.send(request, None)?;
        if response.status() != 200 {
            return Err(RegistryError::Status(response.status()));
        }

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| self.map_body_error(e))?;

        BearerToken::from_response(&body)?.ok_or(RegistryError::MissingToken)
    }

    /// Send a `GET` request to download a blob.
    ///
    /// The returned reader fails with an [`InvalidData`][io::ErrorKind::InvalidData]
    /// error if the content does not match `digest`.
    pub fn download_blob(
        &self,
        name: &str,
        digest: &Digest,
        token: Option<&BearerToken>,
    ) -> Result<impl Read, RegistryError> {
        let url = format!("{}/{name}/blobs/{digest}", self.base_url);
        let response = self.send(self.agent.get(&url), token)?;

        if response.status() != 200 {
            return Err(RegistryError::BlobStatus {
                digest: digest.to_string(),
                status: response.status(),
            });
        }

        Ok(digest.verify_reader(response.into_reader()))
    }

    /// Send a request, and return the response for any HTTP status.
    fn send(
        &self,
        mut request: ureq::Request,
        token: Option<&BearerToken>,
    ) -> Result<ureq::Response, RegistryError> {
        if let Some(deadline) = self.deadline {
            match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => request = request.timeout(remaining),
                _ => return Err(RegistryError::DeadlineExceeded),
            }
        }

        if let Some(token) = token {
            request = request.set("Authorization", &token.header_value());
        }

        self.event_handler.registry_request(request.url());

        match request.call() {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(_, response)) => Ok(response),
            Err(ureq::Error::Transport(_)) if self.expired() => Err(RegistryError::DeadlineExceeded),
            Err(ureq::Error::Transport(e)) => Err(e.into()),
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| d <= Instant::now())
    }

    /// Errors while reading a response body are reported as
    /// [`RegistryError::DeadlineExceeded`] when the deadline has passed.
    pub(crate) fn map_body_error(&self, error: io::Error) -> RegistryError {
        if self.expired() {
            RegistryError::DeadlineExceeded
        } else {
            RegistryError::Body(error)
        }
    }

    /// Like [`map_body_error`][Self::map_body_error], for errors while
    /// reading the stream from [`download_blob`][Self::download_blob].
    pub(crate) fn map_download_error(&self, digest: &Digest, error: io::Error) -> RegistryError {
        if self.expired() {
            RegistryError::DeadlineExceeded
        } else {
            RegistryError::Download {
                digest: digest.to_string(),
                source: error,
            }
        }
    }
}

fn guess_scheme(registry: &str) -> &'static str {
    const HTTP: &str = "http://";
    const HTTPS: &str = "https://";

    if registry.ends_with(":80") {
        return HTTP;
    }

    match SocketAddr::from_str(registry) {
        Ok(address) if address.ip().is_loopback() => HTTP,
        _ => HTTPS,
    }
}

#[test]
fn guess_registry_scheme() {
    assert_eq!(guess_scheme("registry-1.docker.io"), "https://");
    assert_eq!(guess_scheme("example.com:80"), "http://");
    assert_eq!(guess_scheme("127.0.0.1:5000"), "http://");
    assert_eq!(guess_scheme("[::1]:5000"), "http://");
    assert_eq!(guess_scheme("10.1.2.3:5000"), "https://");
}
