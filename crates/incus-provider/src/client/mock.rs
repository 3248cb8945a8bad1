// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock backend for testing.
//!
//! An in-memory backend that behaves like a small Incus host: profiles,
//! aliased images, and instances with a start/stop state machine. Failures
//! and hanging calls can be scripted per method, and instances can be made
//! to acquire their address only after a number of polls.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::api::{
    CreateInstanceSpec, Image, ImageAliasesEntry, InstanceFull, InstanceKind, InstanceState,
    InstanceStateNetwork, InstanceStateNetworkAddress, InstanceStatePut, Project, StateAction,
};
use super::{BackendClient, BackendError, Connector, Operation, Result};

/// Scripted address assignment.
#[derive(Debug, Clone)]
struct AddressPlan {
    address: String,
    after_polls: u32,
}

#[derive(Debug, Default)]
struct MockState {
    projects: BTreeSet<String>,
    profiles: Vec<String>,
    aliases: HashMap<(InstanceKind, String), HashMap<String, ImageAliasesEntry>>,
    images: HashMap<String, Image>,
    instances: BTreeMap<String, InstanceFull>,
    polls: HashMap<String, u32>,
    address: Option<AddressPlan>,
    created: Vec<CreateInstanceSpec>,
    state_requests: Vec<(String, InstanceStatePut)>,
    calls: Vec<String>,
    failures: HashMap<&'static str, BackendError>,
    hanging: HashSet<&'static str>,
    scoped_project: Option<String>,
    connects: usize,
}

/// In-memory backend.
///
/// Clones share state, so a test keeps one handle for assertions while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// Create an empty backend with the `default` project and profile.
    pub fn new() -> Self {
        let backend = Self::default();
        {
            let mut state = backend.lock();
            state.projects.insert("default".to_string());
            state.profiles.push("default".to_string());
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a project.
    pub fn with_project(self, name: &str) -> Self {
        self.lock().projects.insert(name.to_string());
        self
    }

    /// Add a profile.
    pub fn with_profile(self, name: &str) -> Self {
        self.lock().profiles.push(name.to_string());
        self
    }

    /// Add an image of `kind`/`architecture` reachable through `alias`.
    pub fn with_image(
        self,
        alias: &str,
        kind: InstanceKind,
        architecture: &str,
        fingerprint: &str,
        os: &str,
        release: &str,
    ) -> Self {
        {
            let mut state = self.lock();
            state
                .aliases
                .entry((kind, alias.to_string()))
                .or_default()
                .insert(
                    architecture.to_string(),
                    ImageAliasesEntry {
                        name: alias.to_string(),
                        target: fingerprint.to_string(),
                        kind: kind.as_str().to_string(),
                        description: String::new(),
                    },
                );
            state.images.insert(
                fingerprint.to_string(),
                Image {
                    fingerprint: fingerprint.to_string(),
                    architecture: architecture.to_string(),
                    kind: kind.as_str().to_string(),
                    properties: HashMap::from([
                        ("os".to_string(), os.to_string()),
                        ("release".to_string(), release.to_string()),
                    ]),
                },
            );
        }
        self
    }

    /// Add an existing instance.
    pub fn with_instance(self, instance: InstanceFull) -> Self {
        self.lock().instances.insert(instance.name.clone(), instance);
        self
    }

    /// Running instances get `address` on their first interface once they
    /// have been fetched `after_polls` times.
    pub fn with_address_after(self, address: &str, after_polls: u32) -> Self {
        self.lock().address = Some(AddressPlan {
            address: address.to_string(),
            after_polls,
        });
        self
    }

    /// Make every call to `method` fail with `err`.
    ///
    /// `operation_wait` scripts the result of waiting on operations.
    pub fn fail(&self, method: &'static str, err: BackendError) {
        self.lock().failures.insert(method, err);
    }

    /// Make every call to `method` never return.
    pub fn hang(&self, method: &'static str) {
        self.lock().hanging.insert(method);
    }

    /// Create requests received so far.
    pub fn created_specs(&self) -> Vec<CreateInstanceSpec> {
        self.lock().created.clone()
    }

    /// State change requests received so far.
    pub fn state_requests(&self) -> Vec<(String, InstanceStatePut)> {
        self.lock().state_requests.clone()
    }

    /// Names of the methods called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of times a connection was opened.
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// Project the last scoped client was created for.
    pub fn scoped_project(&self) -> Option<String> {
        self.lock().scoped_project.clone()
    }

    /// Current record of an instance.
    pub fn instance(&self, name: &str) -> Option<InstanceFull> {
        self.lock().instances.get(name).cloned()
    }

    async fn enter(&self, method: &'static str) -> Result<()> {
        let (hang, failure) = {
            let mut state = self.lock();
            state.calls.push(method.to_string());
            (
                state.hanging.contains(method),
                state.failures.get(method).cloned(),
            )
        };
        if hang {
            std::future::pending::<()>().await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn operation(&self, result: Result<()>) -> Box<dyn Operation> {
        let state = self.lock();
        let id = format!("op-{}", state.calls.len());
        Box::new(MockOperation {
            id,
            result,
            hang: state.hanging.contains("operation_wait"),
            scripted: state.failures.get("operation_wait").cloned(),
        })
    }
}

/// Operation whose outcome is decided at submission time.
struct MockOperation {
    id: String,
    result: Result<()>,
    hang: bool,
    scripted: Option<BackendError>,
}

#[async_trait]
impl Operation for MockOperation {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(&self) -> Result<()> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(err) = &self.scripted {
            return Err(err.clone());
        }
        self.result.clone()
    }
}

fn network_with(address: &str) -> BTreeMap<String, InstanceStateNetwork> {
    BTreeMap::from([
        (
            "eth0".to_string(),
            InstanceStateNetwork {
                addresses: vec![
                    InstanceStateNetworkAddress {
                        family: "inet".to_string(),
                        address: address.to_string(),
                        netmask: "24".to_string(),
                        scope: "global".to_string(),
                    },
                    InstanceStateNetworkAddress {
                        family: "inet6".to_string(),
                        address: "fe80::216:3eff:fe00:1".to_string(),
                        netmask: "64".to_string(),
                        scope: "link".to_string(),
                    },
                ],
                state: "up".to_string(),
                kind: "broadcast".to_string(),
            },
        ),
        (
            "lo".to_string(),
            InstanceStateNetwork {
                addresses: vec![InstanceStateNetworkAddress {
                    family: "inet".to_string(),
                    address: "127.0.0.1".to_string(),
                    netmask: "8".to_string(),
                    scope: "local".to_string(),
                }],
                state: "up".to_string(),
                kind: "loopback".to_string(),
            },
        ),
    ])
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn get_project(&self, name: &str) -> Result<Project> {
        self.enter("get_project").await?;
        if !self.lock().projects.contains(name) {
            return Err(BackendError::not_found("Project not found"));
        }
        Ok(Project {
            name: name.to_string(),
            description: String::new(),
        })
    }

    fn use_project(&self, project: &str) -> Arc<dyn BackendClient> {
        self.lock().scoped_project = Some(project.to_string());
        Arc::new(self.clone())
    }

    async fn get_profile_names(&self) -> Result<Vec<String>> {
        self.enter("get_profile_names").await?;
        Ok(self.lock().profiles.clone())
    }

    async fn create_instance(&self, spec: &CreateInstanceSpec) -> Result<Box<dyn Operation>> {
        self.enter("create_instance").await?;
        {
            let mut state = self.lock();
            if state.instances.contains_key(&spec.name) {
                return Err(BackendError::from_status(409, "Instance already exists"));
            }
            let mut expanded: HashMap<String, String> = spec
                .config
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if let Some(image) = spec.source.fingerprint().and_then(|fp| state.images.get(fp)) {
                for (key, value) in &image.properties {
                    expanded.insert(format!("image.{key}"), value.clone());
                }
            }
            let instance = InstanceFull {
                name: spec.name.clone(),
                architecture: spec.architecture.clone(),
                status: "Stopped".to_string(),
                kind: spec.kind.as_str().to_string(),
                description: spec.description.clone(),
                config: spec.config.clone().into_iter().collect(),
                expanded_config: expanded,
                state: Some(InstanceState {
                    status: "Stopped".to_string(),
                    network: None,
                }),
            };
            state.instances.insert(spec.name.clone(), instance);
            state.created.push(spec.clone());
        }
        Ok(self.operation(Ok(())))
    }

    async fn update_instance_state(
        &self,
        name: &str,
        put: &InstanceStatePut,
        _etag: &str,
    ) -> Result<Box<dyn Operation>> {
        self.enter("update_instance_state").await?;
        let result = {
            let mut state = self.lock();
            state.state_requests.push((name.to_string(), put.clone()));
            let Some(instance) = state.instances.get_mut(name) else {
                return Err(BackendError::not_found("Instance not found"));
            };
            match put.action {
                StateAction::Stop if instance.status == "Stopped" => {
                    Err(BackendError::InstanceAlreadyStopped)
                }
                StateAction::Start if instance.status == "Running" => Err(
                    BackendError::from_status(400, "The instance is already running"),
                ),
                action => {
                    let status = match action {
                        StateAction::Start => "Running",
                        StateAction::Stop => "Stopped",
                    };
                    instance.status = status.to_string();
                    instance.state = Some(InstanceState {
                        status: status.to_string(),
                        network: None,
                    });
                    Ok(())
                }
            }
        };
        Ok(self.operation(result))
    }

    async fn get_instance_full(&self, name: &str) -> Result<(InstanceFull, String)> {
        self.enter("get_instance_full").await?;
        let mut state = self.lock();
        let polls = {
            let counter = state.polls.entry(name.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let plan = state.address.clone();
        let Some(instance) = state.instances.get_mut(name) else {
            return Err(BackendError::not_found("Instance not found"));
        };
        if let Some(plan) = plan
            && instance.status == "Running"
            && polls > plan.after_polls
            && let Some(runtime) = instance.state.as_mut()
        {
            runtime.network = Some(network_with(&plan.address));
        }
        Ok((instance.clone(), format!("etag-{polls}")))
    }

    async fn delete_instance(&self, name: &str) -> Result<Box<dyn Operation>> {
        self.enter("delete_instance").await?;
        if self.lock().instances.remove(name).is_none() {
            return Err(BackendError::not_found("Instance not found"));
        }
        Ok(self.operation(Ok(())))
    }

    async fn get_instances_full(&self, kind: Option<InstanceKind>) -> Result<Vec<InstanceFull>> {
        self.enter("get_instances_full").await?;
        Ok(self
            .lock()
            .instances
            .values()
            .filter(|i| kind.is_none_or(|k| i.kind.is_empty() || i.kind == k.as_str()))
            .cloned()
            .collect())
    }

    async fn get_image_alias_architectures(
        &self,
        kind: InstanceKind,
        alias: &str,
    ) -> Result<HashMap<String, ImageAliasesEntry>> {
        self.enter("get_image_alias_architectures").await?;
        self.lock()
            .aliases
            .get(&(kind, alias.to_string()))
            .cloned()
            .ok_or_else(|| BackendError::not_found("Image alias not found"))
    }

    async fn get_image(&self, fingerprint: &str) -> Result<(Image, String)> {
        self.enter("get_image").await?;
        self.lock()
            .images
            .get(fingerprint)
            .cloned()
            .map(|image| (image, String::new()))
            .ok_or_else(|| BackendError::not_found("Image not found"))
    }
}

#[async_trait]
impl Connector for MockBackend {
    async fn connect(&self) -> Result<Arc<dyn BackendClient>> {
        self.enter("connect").await?;
        self.lock().connects += 1;
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::api::InstanceSource;

    fn spec(name: &str) -> CreateInstanceSpec {
        CreateInstanceSpec {
            name: name.to_string(),
            architecture: "x86_64".to_string(),
            profiles: vec!["default".to_string()],
            description: String::new(),
            config: BTreeMap::new(),
            source: InstanceSource::Fingerprint("123abc".to_string()),
            kind: InstanceKind::Container,
        }
    }

    #[tokio::test]
    async fn test_start_stop_state_machine() {
        let backend = MockBackend::new();
        backend.create_instance(&spec("a")).await.unwrap().wait().await.unwrap();

        let stop = InstanceStatePut::new(StateAction::Stop, true);
        let op = backend.update_instance_state("a", &stop, "").await.unwrap();
        assert!(matches!(op.wait().await, Err(BackendError::InstanceAlreadyStopped)));

        let start = InstanceStatePut::new(StateAction::Start, false);
        let op = backend.update_instance_state("a", &start, "").await.unwrap();
        op.wait().await.unwrap();
        assert_eq!(backend.instance("a").unwrap().status, "Running");
    }

    #[tokio::test]
    async fn test_address_assigned_after_polls() {
        let backend = MockBackend::new().with_address_after("10.0.0.2", 1);
        backend.create_instance(&spec("a")).await.unwrap();
        let start = InstanceStatePut::new(StateAction::Start, false);
        backend.update_instance_state("a", &start, "").await.unwrap();

        let (first, _) = backend.get_instance_full("a").await.unwrap();
        assert!(first.state.unwrap().network.is_none());
        let (second, _) = backend.get_instance_full("a").await.unwrap();
        assert!(second.state.unwrap().network.unwrap().contains_key("eth0"));
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let backend = MockBackend::new();
        backend.fail("get_profile_names", BackendError::Transport("refused".to_string()));
        let err = backend.get_profile_names().await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
        assert_eq!(backend.calls(), vec!["get_profile_names"]);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let backend = MockBackend::new();
        let err = backend.delete_instance("missing").await.err().unwrap();
        assert!(err.is_not_found());
    }
}
