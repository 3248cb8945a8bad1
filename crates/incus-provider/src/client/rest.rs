// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! REST client for the Incus `/1.0` API.
//!
//! Two transports are supported:
//!
//! - HTTPS with a client certificate, through `reqwest` (rustls)
//! - the local unix socket, through `hyper` HTTP/1.1 over `UnixStream`
//!
//! Every response is wrapped in an envelope whose `type` is `sync`, `async`
//! or `error`. Async responses name an operation that is waited on through
//! `GET /1.0/operations/<id>/wait`.

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, ETAG, HOST, HeaderMap, IF_MATCH};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixStream;
use tracing::debug;
use url::{Position, Url};

use super::api::{
    CreateInstanceSpec, Image, ImageAliasesEntry, InstanceFull, InstanceKind, InstanceStatePut,
    OperationMetadata, Project, ResponseEnvelope,
};
use super::{BackendClient, BackendError, Connector, Operation, Result};
use crate::config::ProviderConfig;

const API_VERSION: &str = "1.0";
const UNIX_BASE_URL: &str = "http://unix.socket/";

enum Transport {
    Http(reqwest::Client),
    Unix(PathBuf),
}

struct RawResponse {
    status: u16,
    etag: String,
    body: Bytes,
}

/// Incus API client.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct IncusClient {
    transport: Arc<Transport>,
    base: Url,
    project: Option<String>,
}

impl std::fmt::Debug for IncusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncusClient")
            .field("base", &self.base.as_str())
            .field("project", &self.project)
            .finish()
    }
}

impl IncusClient {
    /// Build a client from the provider configuration.
    pub fn connect(config: &ProviderConfig) -> Result<Self> {
        if let Some(socket) = &config.unix_socket_path {
            return Self::unix(socket);
        }

        let raw = config
            .url
            .as_deref()
            .ok_or_else(|| BackendError::Transport("no backend url configured".to_string()))?;
        let base = Url::parse(raw)
            .map_err(|e| BackendError::Transport(format!("invalid url {raw}: {e}")))?;

        let mut builder = reqwest::Client::builder().use_rustls_tls();
        if let (Some(cert), Some(key)) = (&config.client_certificate, &config.client_key) {
            let mut pem = read_file("client certificate", cert)?;
            pem.push(b'\n');
            pem.extend(read_file("client key", key)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| BackendError::Transport(format!("loading client identity: {e}")))?;
            builder = builder.identity(identity);
        }
        if let Some(path) = &config.tls_server_certificate {
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(read_certificate("server certificate", path)?);
        }
        if let Some(path) = &config.tls_ca {
            builder = builder.add_root_certificate(read_certificate("CA certificate", path)?);
        }
        let http = builder
            .build()
            .map_err(|e| BackendError::Transport(format!("building HTTP client: {e}")))?;

        Ok(Self::with_http_client(base, http))
    }

    /// Client talking to `base` through an existing HTTP client.
    pub fn with_http_client(base: Url, http: reqwest::Client) -> Self {
        Self {
            transport: Arc::new(Transport::Http(http)),
            base,
            project: None,
        }
    }

    /// Client talking to the backend's unix socket.
    pub fn unix(socket: impl Into<PathBuf>) -> Result<Self> {
        let base = Url::parse(UNIX_BASE_URL)
            .map_err(|e| BackendError::Transport(format!("invalid socket base url: {e}")))?;
        Ok(Self {
            transport: Arc::new(Transport::Unix(socket.into())),
            base,
            project: None,
        })
    }

    /// Project this client is scoped to.
    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Transport(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);

        let mut pairs: Vec<(&str, &str)> = query.to_vec();
        if let Some(project) = &self.project {
            pairs.push(("project", project.as_str()));
        }
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        etag: &str,
    ) -> Result<RawResponse> {
        debug!(method = %method, url = %url, "Backend request");
        match &*self.transport {
            Transport::Http(http) => {
                let mut req = http.request(method, url);
                if !etag.is_empty() {
                    req = req.header(IF_MATCH, etag);
                }
                if let Some(body) = body {
                    req = req.header(CONTENT_TYPE, "application/json").body(body);
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| BackendError::Transport(e.to_string()))?;
                let status = resp.status().as_u16();
                let etag = etag_of(resp.headers());
                let body = resp
                    .bytes()
                    .await
                    .map_err(|e| BackendError::Transport(e.to_string()))?;
                Ok(RawResponse { status, etag, body })
            }
            Transport::Unix(socket) => {
                let stream = UnixStream::connect(socket).await.map_err(|e| {
                    BackendError::Transport(format!("connecting to {}: {e}", socket.display()))
                })?;
                let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
                    .await
                    .map_err(|e| BackendError::Transport(format!("HTTP handshake failed: {e}")))?;
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        debug!(error = %e, "Backend connection closed");
                    }
                });

                let mut builder = Request::builder()
                    .method(method)
                    .uri(&url[Position::BeforePath..])
                    .header(HOST, "unix.socket");
                if !etag.is_empty() {
                    builder = builder.header(IF_MATCH, etag);
                }
                let payload = match body {
                    Some(body) => {
                        builder = builder.header(CONTENT_TYPE, "application/json");
                        Full::new(Bytes::from(body))
                    }
                    None => Full::new(Bytes::new()),
                };
                let request = builder
                    .body(payload)
                    .map_err(|e| BackendError::Transport(format!("building request: {e}")))?;

                let response = sender
                    .send_request(request)
                    .await
                    .map_err(|e| BackendError::Transport(e.to_string()))?;
                let status = response.status().as_u16();
                let etag = etag_of(response.headers());
                let body = response
                    .into_body()
                    .collect()
                    .await
                    .map_err(|e| BackendError::Transport(e.to_string()))?
                    .to_bytes();
                Ok(RawResponse { status, etag, body })
            }
        }
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<&B>,
        etag: &str,
    ) -> Result<(ResponseEnvelope, String)> {
        let url = self.endpoint(segments, query)?;
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| BackendError::Decode(format!("encoding request: {e}")))?;
        let raw = self.send(method, url, body, etag).await?;
        decode_envelope(raw)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<(T, String)> {
        let (envelope, etag) = self
            .request::<()>(Method::GET, segments, query, None, "")
            .await?;
        let value = serde_json::from_value(envelope.metadata)
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok((value, etag))
    }

    async fn submit<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
        etag: &str,
    ) -> Result<Box<dyn Operation>> {
        let (envelope, _) = self.request(method, segments, &[], body, etag).await?;
        if envelope.operation.is_empty() {
            return Err(BackendError::Decode(format!(
                "expected an async response, got {:?}",
                envelope.kind
            )));
        }
        let id = envelope
            .metadata
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| last_segment(&envelope.operation).to_string());
        Ok(Box::new(RestOperation {
            client: self.clone(),
            id,
        }))
    }
}

fn etag_of(headers: &HeaderMap) -> String {
    headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn decode_envelope(raw: RawResponse) -> Result<(ResponseEnvelope, String)> {
    let envelope: ResponseEnvelope = match serde_json::from_slice(&raw.body) {
        Ok(envelope) => envelope,
        Err(_) if raw.status >= 400 => {
            let text = String::from_utf8_lossy(&raw.body).trim().to_string();
            let message = if text.is_empty() {
                format!("HTTP {}", raw.status)
            } else {
                text
            };
            return Err(BackendError::from_status(raw.status, message));
        }
        Err(e) => return Err(BackendError::Decode(e.to_string())),
    };
    if envelope.kind == "error" || raw.status >= 400 {
        let code = if envelope.error_code != 0 {
            envelope.error_code
        } else {
            raw.status
        };
        return Err(BackendError::from_status(code, envelope.error));
    }
    Ok((envelope, raw.etag))
}

/// Last path segment of an API URL, without query.
fn last_segment(url: &str) -> &str {
    let path = url.split('?').next().unwrap_or_default();
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

fn read_file(what: &str, path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| BackendError::Transport(format!("reading {what} {}: {e}", path.display())))
}

fn read_certificate(what: &str, path: &Path) -> Result<reqwest::Certificate> {
    let pem = read_file(what, path)?;
    reqwest::Certificate::from_pem(&pem)
        .map_err(|e| BackendError::Transport(format!("parsing {what} {}: {e}", path.display())))
}

/// Operation tracked through the operations endpoint.
struct RestOperation {
    client: IncusClient,
    id: String,
}

#[async_trait]
impl Operation for RestOperation {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(&self) -> Result<()> {
        let (meta, _) = self
            .client
            .get::<OperationMetadata>(
                &[API_VERSION, "operations", self.id.as_str(), "wait"],
                &[("timeout", "-1")],
            )
            .await?;
        if meta.status_code >= 400 || !meta.err.is_empty() {
            let err = if meta.err.is_empty() {
                meta.status
            } else {
                meta.err
            };
            return Err(BackendError::from_operation(err));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendClient for IncusClient {
    async fn get_project(&self, name: &str) -> Result<Project> {
        let (project, _) = self.get(&[API_VERSION, "projects", name], &[]).await?;
        Ok(project)
    }

    fn use_project(&self, project: &str) -> Arc<dyn BackendClient> {
        Arc::new(Self {
            transport: Arc::clone(&self.transport),
            base: self.base.clone(),
            project: Some(project.to_string()),
        })
    }

    async fn get_profile_names(&self) -> Result<Vec<String>> {
        let (urls, _): (Vec<String>, _) = self.get(&[API_VERSION, "profiles"], &[]).await?;
        Ok(urls
            .iter()
            .map(|url| last_segment(url).to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }

    async fn create_instance(&self, spec: &CreateInstanceSpec) -> Result<Box<dyn Operation>> {
        self.submit(Method::POST, &[API_VERSION, "instances"], Some(spec), "")
            .await
    }

    async fn update_instance_state(
        &self,
        name: &str,
        state: &InstanceStatePut,
        etag: &str,
    ) -> Result<Box<dyn Operation>> {
        self.submit(
            Method::PUT,
            &[API_VERSION, "instances", name, "state"],
            Some(state),
            etag,
        )
        .await
    }

    async fn get_instance_full(&self, name: &str) -> Result<(InstanceFull, String)> {
        self.get(&[API_VERSION, "instances", name], &[("recursion", "1")])
            .await
    }

    async fn delete_instance(&self, name: &str) -> Result<Box<dyn Operation>> {
        self.submit::<()>(Method::DELETE, &[API_VERSION, "instances", name], None, "")
            .await
    }

    async fn get_instances_full(&self, kind: Option<InstanceKind>) -> Result<Vec<InstanceFull>> {
        let mut query = vec![("recursion", "2")];
        if let Some(kind) = kind {
            query.push(("instance-type", kind.as_str()));
        }
        let (instances, _) = self.get(&[API_VERSION, "instances"], &query).await?;
        Ok(instances)
    }

    async fn get_image_alias_architectures(
        &self,
        kind: InstanceKind,
        alias: &str,
    ) -> Result<HashMap<String, ImageAliasesEntry>> {
        let (entry, _): (ImageAliasesEntry, _) = self
            .get(&[API_VERSION, "images", "aliases", alias], &[])
            .await?;
        if !entry.kind.is_empty() && entry.kind != kind.as_str() {
            return Err(BackendError::not_found(format!(
                "alias {alias} is a {} image",
                entry.kind
            )));
        }
        let (image, _) = self.get_image(&entry.target).await?;
        Ok(HashMap::from([(image.architecture, entry)]))
    }

    async fn get_image(&self, fingerprint: &str) -> Result<(Image, String)> {
        self.get(&[API_VERSION, "images", fingerprint], &[]).await
    }
}

/// Opens [`IncusClient`]s from the provider configuration.
#[derive(Debug, Clone)]
pub struct RestConnector {
    config: ProviderConfig,
}

impl RestConnector {
    /// Create a connector for `config`.
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for RestConnector {
    async fn connect(&self) -> Result<Arc<dyn BackendClient>> {
        let client = IncusClient::connect(&self.config)?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> IncusClient {
        IncusClient::with_http_client(
            Url::parse("https://incus.example.com:8443").unwrap(),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn test_endpoint_escapes_segments_and_adds_project() {
        let base = client();
        let url = base
            .endpoint(&["1.0", "instances", "a b"], &[("recursion", "1")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://incus.example.com:8443/1.0/instances/a%20b?recursion=1"
        );

        let scoped = IncusClient {
            project: Some("runners".to_string()),
            ..base
        };
        let url = scoped.endpoint(&["1.0", "profiles"], &[]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://incus.example.com:8443/1.0/profiles?project=runners"
        );
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("/1.0/profiles/default"), "default");
        assert_eq!(last_segment("/1.0/profiles/gpu?project=runners"), "gpu");
        assert_eq!(last_segment("/1.0/operations/abc/"), "abc");
    }

    #[test]
    fn test_decode_error_envelope() {
        let raw = RawResponse {
            status: 404,
            etag: String::new(),
            body: Bytes::from_static(
                br#"{"type":"error","error":"Instance not found","error_code":404}"#,
            ),
        };
        let err = decode_envelope(raw).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Instance not found");
    }

    #[test]
    fn test_decode_non_json_error() {
        let raw = RawResponse {
            status: 502,
            etag: String::new(),
            body: Bytes::new(),
        };
        let err = decode_envelope(raw).unwrap_err();
        assert_eq!(err.to_string(), "HTTP 502");
    }

    #[test]
    fn test_unix_client_uses_relative_uri() {
        let client = IncusClient::unix("/var/lib/incus/unix.socket").unwrap();
        let url = client.endpoint(&["1.0", "instances"], &[]).unwrap();
        assert_eq!(&url[Position::BeforePath..], "/1.0/instances");
    }
}
