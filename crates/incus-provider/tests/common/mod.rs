// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for incus-provider integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use incus_provider::boot::{BootConfigRenderer, ToolResolver};
use incus_provider::client::api::{InstanceFull, InstanceKind, InstanceState};
use incus_provider::config::RemoteProtocol;
use incus_provider::spec::{CONTROLLER_ID_KEY, OS_TYPE_KEY, POOL_ID_KEY};
use incus_provider::{ImageRemote, IncusProvider, MockBackend, ProviderConfig, ReadinessPolicy};
use runner_provider_common::{
    BootstrapInstance, OsArch, OsType, RunnerApplicationDownload,
};

pub const CONTROLLER_ID: &str = "controller-1";
pub const POOL_ID: &str = "pool-1";
pub const PROJECT: &str = "runners";
pub const FINGERPRINT: &str = "123abc";
pub const ADDRESS: &str = "10.10.0.0";

/// Provider configuration creating instances of `kind`.
pub fn config(kind: InstanceKind) -> ProviderConfig {
    ProviderConfig {
        project_name: PROJECT.to_string(),
        include_default_profile: true,
        instance_type: Some(kind.as_str().to_string()),
        image_remotes: BTreeMap::from([(
            "images".to_string(),
            ImageRemote {
                addr: "https://images.linuxcontainers.org".to_string(),
                public: true,
                protocol: RemoteProtocol::SimpleStreams,
                skip_verify: false,
            },
        )]),
        ..Default::default()
    }
}

/// Backend with the runner project, a `container` profile and an `ubuntu`
/// image for both instance kinds. Running instances get [`ADDRESS`] on the
/// second fetch.
pub fn backend() -> MockBackend {
    MockBackend::new()
        .with_project(PROJECT)
        .with_profile("container")
        .with_image(
            "ubuntu",
            InstanceKind::Container,
            "x86_64",
            FINGERPRINT,
            "Ubuntu",
            "24.04",
        )
        .with_image(
            "ubuntu",
            InstanceKind::VirtualMachine,
            "x86_64",
            "456def",
            "Ubuntu",
            "24.04",
        )
        .with_address_after(ADDRESS, 1)
}

pub fn tools() -> Vec<RunnerApplicationDownload> {
    ["linux", "win"]
        .into_iter()
        .flat_map(|os| {
            ["x64", "arm64"].into_iter().map(move |arch| RunnerApplicationDownload {
                os: Some(os.to_string()),
                architecture: Some(arch.to_string()),
                download_url: Some(format!("https://example.com/runner-{os}-{arch}.tar.gz")),
                filename: Some(format!("runner-{os}-{arch}.tar.gz")),
                ..Default::default()
            })
        })
        .collect()
}

pub fn bootstrap(name: &str) -> BootstrapInstance {
    BootstrapInstance {
        name: name.to_string(),
        tools: tools(),
        repo_url: "https://github.com/example/repo".to_string(),
        callback_url: "https://garm.example.com/api/v1/callbacks".to_string(),
        metadata_url: "https://garm.example.com/api/v1/metadata".to_string(),
        instance_token: "token".to_string(),
        os_arch: OsArch::Amd64,
        os_type: OsType::Linux,
        flavor: "container".to_string(),
        image: "ubuntu".to_string(),
        labels: vec!["self-hosted".to_string()],
        pool_id: POOL_ID.to_string(),
        ..Default::default()
    }
}

/// Provider over `backend` with fast readiness polling.
pub fn provider(backend: &MockBackend, config: ProviderConfig) -> IncusProvider {
    builder(backend, config).build().unwrap()
}

pub fn builder(
    backend: &MockBackend,
    config: ProviderConfig,
) -> incus_provider::IncusProviderBuilder {
    IncusProvider::builder()
        .config(config)
        .controller_id(CONTROLLER_ID)
        .connector(Arc::new(backend.clone()))
        .readiness(ReadinessPolicy {
            attempts: 5,
            delay: Duration::from_millis(10),
        })
}

/// An existing instance record tagged with `controller` and `pool`.
pub fn tagged_instance(name: &str, status: &str, controller: &str, pool: &str) -> InstanceFull {
    let config = HashMap::from([
        (CONTROLLER_ID_KEY.to_string(), controller.to_string()),
        (POOL_ID_KEY.to_string(), pool.to_string()),
        (OS_TYPE_KEY.to_string(), "linux".to_string()),
    ]);
    InstanceFull {
        name: name.to_string(),
        architecture: "x86_64".to_string(),
        status: status.to_string(),
        kind: "container".to_string(),
        expanded_config: config.clone(),
        config,
        state: Some(InstanceState {
            status: status.to_string(),
            network: None,
        }),
        ..Default::default()
    }
}

/// Renderer recording the arguments it was called with.
#[derive(Default)]
pub struct RecordingRenderer {
    pub calls: Mutex<Vec<(BootstrapInstance, RunnerApplicationDownload, String)>>,
}

impl BootConfigRenderer for RecordingRenderer {
    fn render(
        &self,
        params: &BootstrapInstance,
        tools: &RunnerApplicationDownload,
        runner_name: &str,
    ) -> incus_provider::Result<String> {
        self.calls.lock().unwrap().push((
            params.clone(),
            tools.clone(),
            runner_name.to_string(),
        ));
        Ok(format!("boot config for {runner_name}"))
    }
}

/// Tool resolver always returning the same archive.
pub struct FixedTools(pub RunnerApplicationDownload);

impl ToolResolver for FixedTools {
    fn resolve(
        &self,
        _os_type: OsType,
        _os_arch: &OsArch,
        _tools: &[RunnerApplicationDownload],
    ) -> incus_provider::Result<RunnerApplicationDownload> {
        Ok(self.0.clone())
    }
}
