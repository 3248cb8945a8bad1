// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Incus REST API payloads.
//!
//! Only the fields this provider reads or writes are modelled; everything
//! else in the backend's documents is ignored on decode.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Kind of instance the backend runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub enum InstanceKind {
    /// System container.
    #[serde(rename = "container")]
    Container,
    /// Full virtual machine.
    #[default]
    #[serde(rename = "virtual-machine")]
    VirtualMachine,
}

impl InstanceKind {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceKind::Container => "container",
            InstanceKind::VirtualMachine => "virtual-machine",
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the root disk of a new instance comes from.
///
/// A locally known image is referenced by fingerprint; an image on a remote
/// is fetched by the backend itself at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "SourceWire")]
pub enum InstanceSource {
    /// Image already present on the backend.
    Fingerprint(String),
    /// Image fetched from a remote by the backend.
    Remote {
        /// Alias on the remote.
        alias: String,
        /// Remote address.
        server: String,
        /// Remote protocol.
        protocol: String,
    },
}

impl InstanceSource {
    /// Fingerprint of a local image, if this is one.
    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            InstanceSource::Fingerprint(fp) => Some(fp),
            InstanceSource::Remote { .. } => None,
        }
    }

    /// Alias on the remote, if this is a remote source.
    pub fn alias(&self) -> Option<&str> {
        match self {
            InstanceSource::Remote { alias, .. } => Some(alias),
            InstanceSource::Fingerprint(_) => None,
        }
    }

    /// Remote address, if this is a remote source.
    pub fn server(&self) -> Option<&str> {
        match self {
            InstanceSource::Remote { server, .. } => Some(server),
            InstanceSource::Fingerprint(_) => None,
        }
    }

    /// Remote protocol, if this is a remote source.
    pub fn protocol(&self) -> Option<&str> {
        match self {
            InstanceSource::Remote { protocol, .. } => Some(protocol),
            InstanceSource::Fingerprint(_) => None,
        }
    }
}

#[derive(Serialize)]
struct SourceWire {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
}

impl From<InstanceSource> for SourceWire {
    fn from(source: InstanceSource) -> Self {
        let mut wire = SourceWire {
            kind: "image",
            fingerprint: None,
            alias: None,
            server: None,
            protocol: None,
        };
        match source {
            InstanceSource::Fingerprint(fp) => wire.fingerprint = Some(fp),
            InstanceSource::Remote {
                alias,
                server,
                protocol,
            } => {
                wire.alias = Some(alias);
                wire.server = Some(server);
                wire.protocol = Some(protocol);
            }
        }
        wire
    }
}

/// `POST /1.0/instances` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateInstanceSpec {
    /// Instance name.
    pub name: String,
    /// Backend architecture name.
    pub architecture: String,
    /// Profiles applied in order.
    pub profiles: Vec<String>,
    /// Human readable description.
    pub description: String,
    /// Flat instance configuration.
    pub config: BTreeMap<String, String>,
    /// Root disk source.
    pub source: InstanceSource,
    /// Instance kind.
    #[serde(rename = "type")]
    pub kind: InstanceKind,
}

/// Requested state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateAction {
    /// Boot the instance.
    Start,
    /// Shut the instance down.
    Stop,
}

impl StateAction {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StateAction::Start => "start",
            StateAction::Stop => "stop",
        }
    }
}

/// `PUT /1.0/instances/<name>/state` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatePut {
    /// Transition to perform.
    pub action: StateAction,
    /// Backend side timeout in seconds, `-1` for none.
    pub timeout: i64,
    /// Force the transition.
    pub force: bool,
    /// Keep runtime state.
    #[serde(default)]
    pub stateful: bool,
}

impl InstanceStatePut {
    /// A transition without a backend side timeout.
    pub fn new(action: StateAction, force: bool) -> Self {
        Self {
            action,
            timeout: -1,
            force,
            stateful: false,
        }
    }
}

/// An instance record with its runtime state (`recursion=2`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFull {
    /// Instance name.
    #[serde(default)]
    pub name: String,
    /// Backend architecture name.
    #[serde(default)]
    pub architecture: String,
    /// Backend status (`Running`, `Stopped`, `Frozen`, `Error`, ...).
    #[serde(default)]
    pub status: String,
    /// Instance kind as reported by the backend.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Local configuration.
    #[serde(default)]
    pub config: HashMap<String, String>,
    /// Configuration including profile and image derived keys.
    #[serde(default)]
    pub expanded_config: HashMap<String, String>,
    /// Runtime state, absent for instances that never ran.
    #[serde(default)]
    pub state: Option<InstanceState>,
}

/// Runtime state of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    /// Backend status.
    #[serde(default)]
    pub status: String,
    /// Network interfaces by name.
    #[serde(default)]
    pub network: Option<BTreeMap<String, InstanceStateNetwork>>,
}

/// One network interface of a running instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStateNetwork {
    /// Addresses on the interface.
    #[serde(default)]
    pub addresses: Vec<InstanceStateNetworkAddress>,
    /// Interface state (`up`, `down`).
    #[serde(default)]
    pub state: String,
    /// Interface type.
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// One address of a network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStateNetworkAddress {
    /// `inet` or `inet6`.
    #[serde(default)]
    pub family: String,
    /// Address literal.
    #[serde(default)]
    pub address: String,
    /// Prefix length.
    #[serde(default)]
    pub netmask: String,
    /// `global`, `link` or `local`.
    #[serde(default)]
    pub scope: String,
}

/// An image alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAliasesEntry {
    /// Alias name.
    #[serde(default)]
    pub name: String,
    /// Fingerprint the alias points at.
    #[serde(default)]
    pub target: String,
    /// Image kind (`container` or `virtual-machine`).
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Description.
    #[serde(default)]
    pub description: String,
}

/// An image known to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Content fingerprint.
    #[serde(default)]
    pub fingerprint: String,
    /// Backend architecture name.
    #[serde(default)]
    pub architecture: String,
    /// Image kind.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Image properties (`os`, `release`, ...).
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// A backend project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project name.
    #[serde(default)]
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
}

/// Envelope every API response is wrapped in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseEnvelope {
    /// `sync`, `async` or `error`.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Status code of a successful request.
    #[serde(default)]
    pub status_code: u16,
    /// Operation URL of an async request.
    #[serde(default)]
    pub operation: String,
    /// HTTP status of a failed request.
    #[serde(default)]
    pub error_code: u16,
    /// Error text of a failed request.
    #[serde(default)]
    pub error: String,
    /// Payload.
    #[serde(default)]
    pub metadata: Value,
}

/// Metadata of a background operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// Operation UUID.
    #[serde(default)]
    pub id: String,
    /// Status text.
    #[serde(default)]
    pub status: String,
    /// Status code (200 success, 400 failure, ...).
    #[serde(default)]
    pub status_code: u16,
    /// Error text of a failed operation.
    #[serde(default)]
    pub err: String,
}
