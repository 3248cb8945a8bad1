// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for incus-provider.
//!
//! The provider reads a TOML file whose path the orchestrator passes in
//! `GARM_PROVIDER_CONFIG_FILE`:
//!
//! ```toml
//! unix_socket_path = "/var/lib/incus/unix.socket"
//! project_name = "runners"
//! include_default_profile = true
//! instance_type = "container"
//! secure_boot = false
//!
//! [image_remotes.images]
//! addr = "https://images.linuxcontainers.org"
//! public = true
//! protocol = "simplestreams"
//! ```
//!
//! Without a unix socket, `url`, `client_certificate` and `client_key` are
//! required instead.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

use crate::client::api::InstanceKind;

/// Project used when none is configured.
pub const DEFAULT_PROJECT_NAME: &str = "runner-project";

/// Provider configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderConfig {
    /// Path to the local backend socket. Takes precedence over `url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_socket_path: Option<PathBuf>,
    /// Project instances are created in.
    #[serde(default)]
    pub project_name: String,
    /// Apply the `default` profile before the flavor profile.
    #[serde(default)]
    pub include_default_profile: bool,
    /// HTTPS endpoint of a remote backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Client certificate (PEM) for the HTTPS endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<PathBuf>,
    /// Client key (PEM) for the HTTPS endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,
    /// Server certificate (PEM) to trust, for self-signed endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_server_certificate: Option<PathBuf>,
    /// CA bundle (PEM) the server certificate is signed by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca: Option<PathBuf>,
    /// Enable secure boot on virtual machines.
    #[serde(default)]
    pub secure_boot: bool,
    /// `container` or `virtual-machine`. Anything else means virtual machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    /// Image remotes by name.
    #[serde(default)]
    pub image_remotes: BTreeMap<String, ImageRemote>,
}

/// A named source of images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImageRemote {
    /// Remote address.
    pub addr: String,
    /// Whether the remote is public.
    #[serde(default)]
    pub public: bool,
    /// Protocol spoken by the remote.
    #[serde(default)]
    pub protocol: RemoteProtocol,
    /// Skip TLS verification when talking to the remote.
    #[serde(default)]
    pub skip_verify: bool,
}

/// Image remote protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum RemoteProtocol {
    /// Simplestreams index.
    #[default]
    #[serde(rename = "simplestreams")]
    SimpleStreams,
}

impl RemoteProtocol {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteProtocol::SimpleStreams => "simplestreams",
        }
    }
}

impl fmt::Display for RemoteProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProviderConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ProviderConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check connection settings and image remotes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.unix_socket_path {
            Some(socket) => must_exist("unix_socket_path", socket)?,
            None => {
                let raw = self
                    .url
                    .as_deref()
                    .filter(|u| !u.is_empty())
                    .ok_or(ConfigError::MissingField("url"))?;
                let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
                    field: "url",
                    reason: e.to_string(),
                })?;
                if url.scheme() != "https" {
                    return Err(ConfigError::InvalidUrl {
                        field: "url",
                        reason: format!("scheme must be https, got {}", url.scheme()),
                    });
                }
                let cert = self
                    .client_certificate
                    .as_ref()
                    .ok_or(ConfigError::MissingField("client_certificate"))?;
                must_exist("client_certificate", cert)?;
                let key = self
                    .client_key
                    .as_ref()
                    .ok_or(ConfigError::MissingField("client_key"))?;
                must_exist("client_key", key)?;
            }
        }

        if let Some(cert) = &self.tls_server_certificate {
            must_exist("tls_server_certificate", cert)?;
        }
        if let Some(ca) = &self.tls_ca {
            must_exist("tls_ca", ca)?;
        }

        for (name, remote) in &self.image_remotes {
            remote.validate().map_err(|reason| ConfigError::InvalidRemote {
                name: name.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Project name, falling back to [`DEFAULT_PROJECT_NAME`].
    pub fn project_name(&self) -> &str {
        if self.project_name.is_empty() {
            DEFAULT_PROJECT_NAME
        } else {
            &self.project_name
        }
    }

    /// Kind of instance to create.
    pub fn instance_kind(&self) -> InstanceKind {
        match self.instance_type.as_deref() {
            Some("container") => InstanceKind::Container,
            _ => InstanceKind::VirtualMachine,
        }
    }
}

impl ImageRemote {
    fn validate(&self) -> Result<(), String> {
        let url = Url::parse(&self.addr).map_err(|e| format!("invalid addr {:?}: {e}", self.addr))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(format!("addr scheme must be http or https, got {other}")),
        }
    }
}

fn must_exist(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    std::fs::metadata(path)
        .map(|_| ())
        .map_err(|source| ConfigError::Inaccessible {
            field,
            path: path.to_path_buf(),
            source,
        })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A required field is missing.
    #[error("missing {0}")]
    MissingField(&'static str),
    /// A URL field is malformed.
    #[error("invalid {field}: {reason}")]
    InvalidUrl {
        /// Field name.
        field: &'static str,
        /// What is wrong.
        reason: String,
    },
    /// A referenced file does not exist or cannot be accessed.
    #[error("failed to access {field} {path}: {source}")]
    Inaccessible {
        /// Field name.
        field: &'static str,
        /// Referenced path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// An image remote is invalid.
    #[error("invalid image remote {name}: {reason}")]
    InvalidRemote {
        /// Remote name.
        name: String,
        /// What is wrong.
        reason: String,
    },
    /// No image remote is configured.
    #[error("no image remotes configured")]
    NoImageRemotes,
}
