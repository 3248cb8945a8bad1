// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle engine.
//!
//! [`IncusProvider`] holds no state of its own beyond the memoized backend
//! connection: every query re-derives instance state from the backend.
//!
//! ```text
//! create:  extra specs ─▶ SpecBuilder ─▶ create op ─▶ start op ─▶ poll for IPv4
//! delete:  force stop (not found = done, already stopped = ok) ─▶ delete op
//! list:    all instances ─▶ controller tag ─▶ pool tag (optional) ─▶ translate
//! ```

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use runner_provider_common::{
    BootstrapInstance, ErrorKind, ExternalProvider, ProviderError, ProviderInstance,
};

use crate::boot::{BootConfigRenderer, ToolResolver};
use crate::client::api::{InstanceStatePut, StateAction};
use crate::client::{BackendClient, Connector, RestConnector};
use crate::config::ProviderConfig;
use crate::error::{Error, Result, ResultExt};
use crate::extra_specs;
use crate::image::{ImageResolver, REMOTE_SEPARATOR};
use crate::operation::{DEFAULT_OPERATION_TIMEOUT, run_bounded, submit_and_wait};
use crate::spec::{CONTROLLER_ID_KEY, POOL_ID_KEY, SpecBuilder};
use crate::translate::to_provider_instance;

/// How long to wait for a new instance to report an IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Number of fetches.
    pub attempts: u32,
    /// Pause between fetches.
    pub delay: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            delay: Duration::from_secs(5),
        }
    }
}

/// Builder for [`IncusProvider`].
#[derive(Default)]
pub struct IncusProviderBuilder {
    config: Option<ProviderConfig>,
    controller_id: Option<String>,
    connector: Option<Arc<dyn Connector>>,
    tool_resolver: Option<Arc<dyn ToolResolver>>,
    renderer: Option<Arc<dyn BootConfigRenderer>>,
    readiness: ReadinessPolicy,
    operation_timeout: Option<Duration>,
}

impl IncusProviderBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider configuration (required).
    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the controller identifier stamped on and filtered by (required).
    pub fn controller_id(mut self, id: impl Into<String>) -> Self {
        self.controller_id = Some(id.into());
        self
    }

    /// Set how the backend is reached.
    ///
    /// Default: [`RestConnector`] over the configured transport.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the runner tool resolver.
    pub fn tool_resolver(mut self, resolver: Arc<dyn ToolResolver>) -> Self {
        self.tool_resolver = Some(resolver);
        self
    }

    /// Replace the boot configuration renderer.
    pub fn renderer(mut self, renderer: Arc<dyn BootConfigRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Set the readiness polling policy.
    ///
    /// Default: 20 attempts, 5 seconds apart.
    pub fn readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    /// Set the bound on each backend operation.
    ///
    /// Default: 60 seconds
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Build the provider.
    ///
    /// Returns an error if required fields are missing or no image remote is
    /// configured.
    pub fn build(self) -> Result<IncusProvider> {
        let config = self.config.ok_or(Error::Builder("config"))?;
        let controller_id = self
            .controller_id
            .filter(|id| !id.is_empty())
            .ok_or(Error::Builder("controller_id"))?;
        if config.image_remotes.is_empty() {
            return Err(crate::config::ConfigError::NoImageRemotes.into());
        }

        let config = Arc::new(config);
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(RestConnector::new(config.as_ref().clone())));

        let mut specs = SpecBuilder::new(config.clone(), controller_id.clone());
        if let Some(resolver) = self.tool_resolver {
            specs = specs.with_tool_resolver(resolver);
        }
        if let Some(renderer) = self.renderer {
            specs = specs.with_renderer(renderer);
        }

        Ok(IncusProvider {
            config,
            controller_id,
            connector,
            client: OnceCell::new(),
            specs,
            readiness: self.readiness,
            operation_timeout: self.operation_timeout.unwrap_or(DEFAULT_OPERATION_TIMEOUT),
        })
    }
}

/// Runner lifecycle on an Incus backend.
pub struct IncusProvider {
    config: Arc<ProviderConfig>,
    controller_id: String,
    connector: Arc<dyn Connector>,
    client: OnceCell<Arc<dyn BackendClient>>,
    specs: SpecBuilder,
    readiness: ReadinessPolicy,
    operation_timeout: Duration,
}

impl IncusProvider {
    /// Create a new builder.
    pub fn builder() -> IncusProviderBuilder {
        IncusProviderBuilder::new()
    }

    /// Controller identifier this provider owns instances for.
    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }

    /// The project-scoped client, connecting on first use.
    pub async fn client(&self) -> Result<Arc<dyn BackendClient>> {
        let client = self
            .client
            .get_or_try_init(|| async {
                let project = self.config.project_name();
                let client = self
                    .connector
                    .connect()
                    .await
                    .map_err(|source| Error::Connect {
                        context: "creating Incus client".to_string(),
                        source,
                    })?;
                client
                    .get_project(project)
                    .await
                    .map_err(|source| Error::Connect {
                        context: format!("fetching project {project}"),
                        source,
                    })?;
                debug!(project, "Connected to backend");
                Ok::<_, Error>(client.use_project(project))
            })
            .await?;
        Ok(client.clone())
    }

    /// Create, start, and wait for an instance to get an address.
    pub async fn create_instance(&self, params: BootstrapInstance) -> Result<ProviderInstance> {
        let name = params.name.clone();
        info!(instance = %name, pool_id = %params.pool_id, "Creating instance");

        let extra_specs =
            extra_specs::parse(params.extra_specs.as_ref()).context("parsing extra specs")?;
        let client = self.client().await.context("fetching client")?;
        let spec = self
            .specs
            .build(&params, &extra_specs, client.as_ref())
            .await
            .context("fetching create args")?;

        let create_client = client.clone();
        submit_and_wait("create", &name, self.operation_timeout, async move {
            create_client.create_instance(&spec).await
        })
        .await
        .context("creating instance")?;

        self.set_state(&name, StateAction::Start, false)
            .await
            .context("starting instance")?;

        let instance = self
            .wait_instance_has_ip(&name)
            .await
            .context("fetching instance")?;
        info!(
            instance = %name,
            status = ?instance.status,
            addresses = instance.addresses.len(),
            "Instance created"
        );
        Ok(instance)
    }

    /// Describe one instance.
    pub async fn get_instance(&self, name: &str) -> Result<ProviderInstance> {
        let client = self.client().await.context("fetching client")?;
        match client.get_instance_full(name).await {
            Ok((instance, _)) => Ok(to_provider_instance(&instance)),
            Err(e) if e.is_not_found() => {
                debug!(instance = %name, error = %e, "Instance not found");
                Err(Error::InstanceNotFound(name.to_string()).context("fetching instance"))
            }
            Err(e) => Err(Error::from(e).context("fetching instance")),
        }
    }

    /// Instances owned by this controller, limited to `pool_id` unless empty.
    pub async fn list_instances(&self, pool_id: &str) -> Result<Vec<ProviderInstance>> {
        let client = self.client().await.context("fetching client")?;
        let records = run_bounded("listing", "instances", self.operation_timeout, async move {
            client.get_instances_full(None).await.map_err(Error::from)
        })
        .await
        .context("fetching instances")?;

        let owned: Vec<ProviderInstance> = records
            .iter()
            .filter(|instance| {
                instance.expanded_config.get(CONTROLLER_ID_KEY) == Some(&self.controller_id)
            })
            .filter(|instance| {
                pool_id.is_empty()
                    || instance.expanded_config.get(POOL_ID_KEY).map(String::as_str)
                        == Some(pool_id)
            })
            .map(to_provider_instance)
            .collect();

        debug!(
            pool_id,
            total = records.len(),
            owned = owned.len(),
            "Listed instances"
        );
        Ok(owned)
    }

    /// Stop and delete an instance. A missing instance counts as deleted.
    pub async fn delete_instance(&self, name: &str) -> Result<()> {
        info!(instance = %name, "Deleting instance");
        self.client().await.context("fetching client")?;

        match self.set_state(name, StateAction::Stop, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!(instance = %name, "Instance not found, nothing to delete");
                return Ok(());
            }
            Err(e) if e.is_already_stopped() => {
                debug!(instance = %name, "Instance already stopped");
            }
            Err(e) => return Err(e.context("stopping instance")),
        }

        let client = self.client().await.context("fetching client")?;
        let target = name.to_string();
        match submit_and_wait("delete", name, self.operation_timeout, async move {
            client.delete_instance(&target).await
        })
        .await
        {
            Ok(()) => {
                info!(instance = %name, "Instance deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(instance = %name, "Instance disappeared during delete");
                Ok(())
            }
            Err(e) => Err(e.context("removing instance")),
        }
    }

    /// Delete every instance owned by this controller, one at a time.
    pub async fn remove_all_instances(&self) -> Result<()> {
        let instances = self
            .list_instances("")
            .await
            .context("fetching instance list")?;
        info!(count = instances.len(), "Removing all instances");

        for instance in instances {
            self.delete_instance(&instance.name)
                .await
                .with_context(|| format!("removing instance {}", instance.name))?;
        }
        Ok(())
    }

    /// Start an instance.
    pub async fn start(&self, name: &str) -> Result<()> {
        self.set_state(name, StateAction::Start, false).await
    }

    /// Stop an instance.
    pub async fn stop(&self, name: &str, force: bool) -> Result<()> {
        self.set_state(name, StateAction::Stop, force).await
    }

    async fn set_state(&self, name: &str, action: StateAction, force: bool) -> Result<()> {
        let client = self.client().await.context("fetching client")?;
        let request = InstanceStatePut::new(action, force);
        let target = name.to_string();
        debug!(instance = %name, action = action.as_str(), force, "Changing instance state");

        submit_and_wait(action.as_str(), name, self.operation_timeout, async move {
            client.update_instance_state(&target, &request, "").await
        })
        .await
        .with_context(|| format!("setting state to {}", action.as_str()))
    }

    /// Poll until the instance reports an IPv4 address.
    ///
    /// A missing instance is polled again. When attempts run out the last
    /// fetched state is returned as is.
    async fn wait_instance_has_ip(&self, name: &str) -> Result<ProviderInstance> {
        let mut last = None;

        for attempt in 1..=self.readiness.attempts {
            match self.get_instance(name).await {
                Ok(instance) => {
                    if has_ipv4(&instance) {
                        debug!(instance = %name, attempt, "Instance has an address");
                        return Ok(instance);
                    }
                    last = Some(instance);
                }
                Err(e) if e.is_not_found() => {
                    debug!(instance = %name, attempt, "Instance not visible yet");
                }
                Err(e) => return Err(e),
            }

            if attempt < self.readiness.attempts {
                tokio::time::sleep(self.readiness.delay).await;
            }
        }

        warn!(
            instance = %name,
            attempts = self.readiness.attempts,
            "Instance did not report an IPv4 address"
        );
        last.ok_or_else(|| Error::InstanceNotFound(name.to_string()))
    }
}

fn has_ipv4(instance: &ProviderInstance) -> bool {
    instance
        .addresses
        .iter()
        .any(|addr| addr.address.parse::<Ipv4Addr>().is_ok())
}

#[async_trait]
impl ExternalProvider for IncusProvider {
    async fn create_instance(
        &self,
        params: BootstrapInstance,
    ) -> std::result::Result<ProviderInstance, ProviderError> {
        Ok(IncusProvider::create_instance(self, params).await?)
    }

    async fn get_instance(
        &self,
        instance: &str,
    ) -> std::result::Result<ProviderInstance, ProviderError> {
        Ok(IncusProvider::get_instance(self, instance).await?)
    }

    async fn list_instances(
        &self,
        pool_id: &str,
    ) -> std::result::Result<Vec<ProviderInstance>, ProviderError> {
        Ok(IncusProvider::list_instances(self, pool_id).await?)
    }

    async fn delete_instance(&self, instance: &str) -> std::result::Result<(), ProviderError> {
        Ok(IncusProvider::delete_instance(self, instance).await?)
    }

    async fn remove_all_instances(&self) -> std::result::Result<(), ProviderError> {
        Ok(IncusProvider::remove_all_instances(self).await?)
    }

    async fn stop(&self, instance: &str, force: bool) -> std::result::Result<(), ProviderError> {
        Ok(IncusProvider::stop(self, instance, force).await?)
    }

    async fn start(&self, instance: &str) -> std::result::Result<(), ProviderError> {
        Ok(IncusProvider::start(self, instance).await?)
    }

    fn get_version(&self) -> String {
        format!("v{}", env!("CARGO_PKG_VERSION"))
    }

    async fn validate_pool_info(
        &self,
        image: &str,
        _flavor: &str,
        extra_specs: &str,
    ) -> std::result::Result<(), ProviderError> {
        extra_specs::parse_str(extra_specs).context("validating extra specs")?;
        if image.contains(REMOTE_SEPARATOR) {
            ImageResolver::new(&self.config.image_remotes)
                .parse_image_name(image)
                .context("validating image")?;
        }
        Ok(())
    }

    fn get_config_json_schema(&self) -> std::result::Result<String, ProviderError> {
        let schema = schemars::schema_for!(ProviderConfig);
        serde_json::to_string(&schema)
            .map_err(|e| ProviderError::new(ErrorKind::Internal, e.to_string()))
    }

    fn get_extra_specs_json_schema(&self) -> std::result::Result<String, ProviderError> {
        serde_json::to_string(&extra_specs::schema())
            .map_err(|e| ProviderError::new(ErrorKind::Internal, e.to_string()))
    }
}
