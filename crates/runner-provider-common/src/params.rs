// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parameter and instance types exchanged with the orchestrator.
//!
//! Field names follow the orchestrator's JSON wire format, which mixes
//! `snake_case` and `kebab-case` keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Operating system family of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OsType {
    /// Any Linux distribution.
    Linux,
    /// Microsoft Windows.
    Windows,
    /// Not known or not reported.
    #[default]
    Unknown,
}

impl OsType {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Linux => "linux",
            OsType::Windows => "windows",
            OsType::Unknown => "unknown",
        }
    }
}

impl From<String> for OsType {
    fn from(value: String) -> Self {
        OsType::from(value.as_str())
    }
}

impl From<&str> for OsType {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "linux" => OsType::Linux,
            "windows" => OsType::Windows,
            _ => OsType::Unknown,
        }
    }
}

impl From<OsType> for String {
    fn from(value: OsType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture in the orchestrator's vocabulary.
///
/// Values outside the known set are kept verbatim in [`OsArch::Other`] so that
/// callers can report exactly what was requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OsArch {
    /// 64-bit x86.
    Amd64,
    /// 64-bit ARM.
    Arm64,
    /// 32-bit ARM.
    Arm,
    /// No architecture given.
    #[default]
    Unspecified,
    /// An architecture this crate does not know about.
    Other(String),
}

impl OsArch {
    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            OsArch::Amd64 => "amd64",
            OsArch::Arm64 => "arm64",
            OsArch::Arm => "arm",
            OsArch::Unspecified => "",
            OsArch::Other(s) => s,
        }
    }

    /// Whether no architecture was given.
    pub fn is_unspecified(&self) -> bool {
        matches!(self, OsArch::Unspecified)
    }
}

impl From<String> for OsArch {
    fn from(value: String) -> Self {
        match value.as_str() {
            "amd64" => OsArch::Amd64,
            "arm64" => OsArch::Arm64,
            "arm" => OsArch::Arm,
            "" => OsArch::Unspecified,
            _ => OsArch::Other(value),
        }
    }
}

impl From<&str> for OsArch {
    fn from(value: &str) -> Self {
        OsArch::from(value.to_string())
    }
}

impl From<OsArch> for String {
    fn from(value: OsArch) -> Self {
        match value {
            OsArch::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for OsArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse instance status reported back to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Instance is running.
    Running,
    /// Instance exists but is stopped.
    Stopped,
    /// Any other or transitional state.
    #[default]
    Unknown,
}

/// Visibility class of an instance address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    /// Reachable from outside the host.
    Public,
    /// Reachable only on a private network.
    Private,
}

/// A network address of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// IP address literal.
    pub address: String,
    /// Visibility class.
    #[serde(rename = "type")]
    pub address_type: AddressType,
}

/// Normalized, provider-agnostic view of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderInstance {
    /// Identifier assigned by the provider (equal to the name).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider_id: String,
    /// Instance name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// OS family.
    #[serde(default)]
    pub os_type: OsType,
    /// OS name, lower case.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os_name: String,
    /// OS release.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os_version: String,
    /// CPU architecture.
    #[serde(default)]
    pub os_arch: OsArch,
    /// Addresses reported by the backend.
    #[serde(default)]
    pub addresses: Vec<Address>,
    /// Coarse status.
    #[serde(default)]
    pub status: InstanceStatus,
}

/// A downloadable runner tool archive offered by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunnerApplicationDownload {
    /// Target OS (`linux`, `win`, `osx`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Target architecture (`x64`, `arm64`, `arm`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// Download URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Archive file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Bearer token required for the download, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_download_token: Option<String>,
    /// Expected SHA-256 of the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_checksum: Option<String>,
}

/// Knobs that influence the rendered boot configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserDataOptions {
    /// Skip package upgrades on first boot.
    #[serde(default)]
    pub disable_updates_on_boot: bool,
    /// Extra packages to install on first boot.
    #[serde(default)]
    pub extra_packages: Vec<String>,
    /// Trace the install script.
    #[serde(default)]
    pub enable_boot_debug: bool,
}

/// Everything the orchestrator hands over when it asks for a new instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BootstrapInstance {
    /// Instance name, unique within the backend namespace.
    #[serde(default)]
    pub name: String,
    /// Tool archives the orchestrator offers.
    #[serde(default)]
    pub tools: Vec<RunnerApplicationDownload>,
    /// Repository, organization or enterprise URL the runner registers with.
    #[serde(default)]
    pub repo_url: String,
    /// URL the instance reports status to.
    #[serde(default, rename = "callback-url")]
    pub callback_url: String,
    /// URL the instance fetches its metadata from.
    #[serde(default, rename = "metadata-url")]
    pub metadata_url: String,
    /// Token authenticating the instance against callback/metadata URLs.
    #[serde(default, rename = "instance-token")]
    pub instance_token: String,
    /// SSH public keys to authorize.
    #[serde(default, rename = "ssh-keys")]
    pub ssh_keys: Vec<String>,
    /// Provider specific tuning, validated by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_specs: Option<Value>,
    /// Runner group the runner joins.
    #[serde(default, rename = "github-runner-group")]
    pub runner_group: String,
    /// Base64 encoded PEM bundle of extra CA certificates.
    #[serde(default, rename = "ca-cert-bundle")]
    pub ca_cert_bundle: Option<String>,
    /// Requested CPU architecture.
    #[serde(default, rename = "arch")]
    pub os_arch: OsArch,
    /// Requested OS family.
    #[serde(default)]
    pub os_type: OsType,
    /// Provider specific flavor (an Incus profile).
    #[serde(default)]
    pub flavor: String,
    /// Image reference.
    #[serde(default)]
    pub image: String,
    /// Runner labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Pool the instance belongs to.
    #[serde(default)]
    pub pool_id: String,
    /// Boot configuration knobs.
    #[serde(default)]
    pub user_data_options: UserDataOptions,
    /// Whether the runner uses just-in-time configuration.
    #[serde(default)]
    pub jit_config_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_os_arch_wire_roundtrip_keeps_unknown_values() {
        let arch: OsArch = serde_json::from_value(json!("bad-arch")).unwrap();
        assert_eq!(arch, OsArch::Other("bad-arch".to_string()));
        assert_eq!(serde_json::to_value(&arch).unwrap(), json!("bad-arch"));

        let arch: OsArch = serde_json::from_value(json!("")).unwrap();
        assert!(arch.is_unspecified());
    }

    #[test]
    fn test_os_type_is_case_insensitive() {
        assert_eq!(OsType::from("Windows"), OsType::Windows);
        assert_eq!(OsType::from("linux"), OsType::Linux);
        assert_eq!(OsType::from("plan9"), OsType::Unknown);
    }

    #[test]
    fn test_bootstrap_instance_from_orchestrator_json() {
        let params: BootstrapInstance = serde_json::from_value(json!({
            "name": "runner-1",
            "tools": [{"os": "linux", "architecture": "x64", "download_url": "https://example.com/r.tgz", "filename": "r.tgz"}],
            "repo_url": "https://github.com/org/repo",
            "callback-url": "https://garm/api/v1/callbacks",
            "metadata-url": "https://garm/api/v1/metadata",
            "instance-token": "tok",
            "ssh-keys": ["ssh-ed25519 AAAA"],
            "extra_specs": {"disable_updates": true},
            "arch": "arm64",
            "os_type": "linux",
            "flavor": "default",
            "image": "ubuntu",
            "labels": ["self-hosted"],
            "pool_id": "pool-1",
            "user_data_options": {"disable_updates_on_boot": false, "extra_packages": [], "enable_boot_debug": false},
            "jit_config_enabled": true
        }))
        .unwrap();

        assert_eq!(params.name, "runner-1");
        assert_eq!(params.os_arch, OsArch::Arm64);
        assert_eq!(params.os_type, OsType::Linux);
        assert_eq!(params.callback_url, "https://garm/api/v1/callbacks");
        assert_eq!(params.tools[0].filename.as_deref(), Some("r.tgz"));
        assert_eq!(params.extra_specs, Some(json!({"disable_updates": true})));
        assert!(params.jit_config_enabled);
    }

    #[test]
    fn test_provider_instance_serialization() {
        let instance = ProviderInstance {
            provider_id: "runner-1".to_string(),
            name: "runner-1".to_string(),
            os_type: OsType::Linux,
            os_name: "ubuntu".to_string(),
            os_version: "24.04".to_string(),
            os_arch: OsArch::Amd64,
            addresses: vec![Address {
                address: "10.0.0.2".to_string(),
                address_type: AddressType::Public,
            }],
            status: InstanceStatus::Running,
        };

        let value = serde_json::to_value(&instance).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["os_arch"], "amd64");
        assert_eq!(value["addresses"][0]["type"], "public");
    }
}
