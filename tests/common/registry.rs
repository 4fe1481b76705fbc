use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tiny_http::{Header, Request, Response, Server};

use super::blobs::Blob;

pub const SERVICE: &str = "test-registry";

/// Requests received by a [`TestRegistry`].
#[derive(Default, Debug)]
pub struct Stats {
    manifests: AtomicUsize,
    tokens: AtomicUsize,
    blobs: Mutex<Vec<String>>,
}

impl Stats {
    pub fn manifest_requests(&self) -> usize {
        self.manifests.load(Ordering::SeqCst)
    }

    pub fn token_requests(&self) -> usize {
        self.tokens.load(Ordering::SeqCst)
    }

    /// Digests of the requested blobs, in order.
    pub fn blob_requests(&self) -> Vec<String> {
        self.blobs.lock().unwrap().clone()
    }

    pub fn total(&self) -> usize {
        self.manifest_requests() + self.token_requests() + self.blob_requests().len()
    }
}

/// Registry serving a single image, with a schema 1 manifest.
pub struct TestRegistry {
    repository: String,
    tag: String,
    layers: Vec<Blob>,
    missing: Vec<String>,
    token: Option<String>,
    reject_token: bool,
    deny_manifest: bool,
}

impl TestRegistry {
    pub fn new(repository: &str, tag: &str) -> Self {
        TestRegistry {
            repository: repository.into(),
            tag: tag.into(),
            layers: Vec::new(),
            missing: Vec::new(),
            token: None,
            reject_token: false,
            deny_manifest: false,
        }
    }

    /// Add a layer to the manifest. Layers are applied in the order
    /// they are added.
    pub fn layer(mut self, blob: Blob) -> Self {
        self.layers.push(blob);
        self
    }

    /// Add a layer to the manifest, but respond `404` when it is requested.
    pub fn missing_layer(mut self, blob: Blob) -> Self {
        self.missing.push(blob.digest.clone());
        self.layers.push(blob);
        self
    }

    /// Require a bearer token for every request, except for the token
    /// endpoint.
    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Token endpoint responds with `401`.
    pub fn reject_token(mut self) -> Self {
        self.reject_token = true;
        self
    }

    /// Token endpoint issues tokens, but the manifest always responds
    /// with `401` and a challenge.
    pub fn deny_manifest(mut self) -> Self {
        self.deny_manifest = true;
        self
    }

    /// Start the registry in a random port.
    ///
    /// Returns the port number of the server.
    pub fn start(self) -> (u16, Arc<Stats>) {
        let server = Server::http("127.0.0.1:0").expect("start registry server");
        let port = server.server_addr().to_ip().unwrap().port();

        let stats = Arc::new(Stats::default());

        let running = Running {
            server,
            port,
            manifest_path: format!("/v2/{}/manifests/{}", self.repository, self.tag),
            blobs_prefix: format!("/v2/{}/blobs/", self.repository),
            registry: self,
            stats: Arc::clone(&stats),
        };

        std::thread::spawn(move || running.run());

        (port, stats)
    }
}

struct Running {
    server: Server,
    port: u16,
    manifest_path: String,
    blobs_prefix: String,
    registry: TestRegistry,
    stats: Arc<Stats>,
}

impl Running {
    fn run(self) {
        let timeout = Duration::from_secs(30);

        while let Ok(Some(request)) = self.server.recv_timeout(timeout) {
            self.handle(request);
        }
    }

    fn handle(&self, request: Request) {
        if request.method() != &tiny_http::Method::Get {
            return;
        }

        let url = request.url().to_owned();

        // Token endpoint.
        if url.starts_with("/token?") {
            self.stats.tokens.fetch_add(1, Ordering::SeqCst);
            self.send_token(request);
            return;
        }

        let is_manifest = url == self.manifest_path;
        if is_manifest {
            self.stats.manifests.fetch_add(1, Ordering::SeqCst);
        }

        let blob_digest = url.strip_prefix(&self.blobs_prefix);
        if let Some(digest) = blob_digest {
            self.stats.blobs.lock().unwrap().push(digest.to_owned());
        }

        if !self.authorized(&request) || (is_manifest && self.registry.deny_manifest) {
            let challenge = format!(
                r#"Bearer realm="http://127.0.0.1:{}/token",service="{SERVICE}",scope="repository:{}:pull""#,
                self.port, self.registry.repository,
            );

            let response = Response::from_data(vec![])
                .with_status_code(401)
                .with_header(Header::from_bytes("WWW-Authenticate", challenge).unwrap());

            request.respond(response).expect("Send response");
            return;
        }

        if is_manifest {
            self.send_manifest(request);
            return;
        }

        if let Some(digest) = blob_digest {
            let blob = self
                .registry
                .layers
                .iter()
                .find(|l| l.digest == digest && !self.registry.missing.contains(&l.digest));

            if let Some(blob) = blob {
                send_body(request, 200, blob.data.clone());
                return;
            }
        }

        send_body(request, 404, &b"Not Found"[..]);
    }

    fn authorized(&self, request: &Request) -> bool {
        let token = match &self.registry.token {
            Some(t) => t,
            None => return true,
        };

        let expected = format!("Bearer {token}");

        request
            .headers()
            .iter()
            .any(|h| h.field.equiv("authorization") && h.value.as_str() == expected)
    }

    fn send_token(&self, request: Request) {
        match &self.registry.token {
            Some(token) if !self.registry.reject_token => {
                let body = serde_json::json!({ "token": token, "expires_in": 300 });
                send_body(request, 200, body.to_string());
            }

            _ => send_body(request, 401, &b"denied"[..]),
        }
    }

    fn send_manifest(&self, request: Request) {
        let layers: Vec<_> = self
            .registry
            .layers
            .iter()
            .map(|l| serde_json::json!({ "blobSum": l.digest }))
            .collect();

        let manifest = serde_json::json!({
            "schemaVersion": 1,
            "name": self.registry.repository,
            "tag": self.registry.tag,
            "architecture": "amd64",
            "fsLayers": layers,
            "history": [],
        });

        send_body(request, 200, manifest.to_string());
    }
}

fn send_body(request: Request, status: u16, body: impl Into<Vec<u8>>) {
    let response = Response::from_data(body).with_status_code(status);
    request.respond(response).expect("Send response");
}
