// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Create request assembly.
//!
//! ```text
//! BootstrapInstance + ExtraSpecs
//!        │
//!        ├── profiles      default (optional) + flavor, checked against the backend
//!        ├── architecture  arch::to_backend
//!        ├── source        ImageResolver
//!        ├── tools         ToolResolver
//!        ├── user-data     BootConfigRenderer (+ #ps1_sysnative on Windows)
//!        ▼
//! CreateInstanceSpec { config: user-data, os tags, owner tags, secure boot (VM) }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use runner_provider_common::{BootstrapInstance, OsType};

use crate::arch;
use crate::boot::{BootConfigRenderer, CloudConfigRenderer, DefaultToolResolver, ToolResolver};
use crate::client::BackendClient;
use crate::client::api::{CreateInstanceSpec, InstanceKind};
use crate::config::ProviderConfig;
use crate::error::{Error, Result, ResultExt};
use crate::extra_specs::ExtraSpecs;
use crate::image::ImageResolver;

/// Config key carrying the rendered boot configuration.
pub const USER_DATA_KEY: &str = "user.user-data";
/// Config key tagging the OS family.
pub const OS_TYPE_KEY: &str = "user.os-type";
/// Config key tagging the orchestrator architecture.
pub const OS_ARCH_KEY: &str = "user.os-arch";
/// Config key tagging the owning controller.
pub const CONTROLLER_ID_KEY: &str = "user.runner-controller-id";
/// Config key tagging the owning pool.
pub const POOL_ID_KEY: &str = "user.runner-pool-id";
/// Config key toggling secure boot on virtual machines.
pub const SECURE_BOOT_KEY: &str = "security.secureboot";

/// Profile applied before the flavor when configured.
pub const DEFAULT_PROFILE: &str = "default";
/// Description stamped on created instances.
pub const INSTANCE_DESCRIPTION: &str = "Github runner provisioned by garm";
/// First line of Windows user-data, selecting the PowerShell interpreter.
pub const WINDOWS_USER_DATA_MARKER: &str = "#ps1_sysnative";

/// Builds backend create requests from bootstrap parameters.
pub struct SpecBuilder {
    config: Arc<ProviderConfig>,
    controller_id: String,
    tools: Arc<dyn ToolResolver>,
    renderer: Arc<dyn BootConfigRenderer>,
}

impl SpecBuilder {
    /// Create a builder with the default tool resolver and renderer.
    pub fn new(config: Arc<ProviderConfig>, controller_id: impl Into<String>) -> Self {
        Self {
            config,
            controller_id: controller_id.into(),
            tools: Arc::new(DefaultToolResolver),
            renderer: Arc::new(CloudConfigRenderer),
        }
    }

    /// Replace the tool resolver.
    pub fn with_tool_resolver(mut self, tools: Arc<dyn ToolResolver>) -> Self {
        self.tools = tools;
        self
    }

    /// Replace the boot configuration renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn BootConfigRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Profiles for `flavor`, which must exist on the backend.
    pub async fn get_profiles(&self, flavor: &str, client: &dyn BackendClient) -> Result<Vec<String>> {
        let mut profiles = Vec::new();
        if self.config.include_default_profile {
            profiles.push(DEFAULT_PROFILE.to_string());
        }

        let available = client
            .get_profile_names()
            .await
            .context("fetching profile names")?;
        if !available.iter().any(|p| p == flavor) {
            return Err(Error::ProfileNotFound(flavor.to_string()));
        }
        profiles.push(flavor.to_string());
        Ok(profiles)
    }

    /// Assemble the create request for `params`.
    pub async fn build(
        &self,
        params: &BootstrapInstance,
        extra_specs: &ExtraSpecs,
        client: &dyn BackendClient,
    ) -> Result<CreateInstanceSpec> {
        if params.name.is_empty() {
            return Err(Error::MissingName);
        }

        let profiles = self
            .get_profiles(&params.flavor, client)
            .await
            .context("fetching profiles")?;

        let architecture = arch::to_backend(&params.os_arch)?;
        let kind = self.config.instance_kind();

        let source = ImageResolver::new(&self.config.image_remotes)
            .resolve(&params.image, kind, architecture, client)
            .await
            .context("getting instance source")?;

        let tools = self
            .tools
            .resolve(params.os_type, &params.os_arch, &params.tools)
            .context("getting tools")?;

        // Pool extra specs own the user data options.
        let mut bootstrap = params.clone();
        let options = &mut bootstrap.user_data_options;
        options.disable_updates_on_boot = extra_specs.disable_updates.unwrap_or_default();
        options.extra_packages = extra_specs.extra_packages.clone();
        options.enable_boot_debug = extra_specs.enable_boot_debug.unwrap_or_default();

        let runner_name = if extra_specs.use_lowercase_hostnames == Some(true) {
            params.name.to_lowercase()
        } else {
            params.name.clone()
        };
        let mut user_data = self
            .renderer
            .render(&bootstrap, &tools, &runner_name)
            .context("generating cloud-config")?;
        if params.os_type == OsType::Windows {
            user_data = format!("{WINDOWS_USER_DATA_MARKER}\n{user_data}");
        }

        let mut config = BTreeMap::from([
            (USER_DATA_KEY.to_string(), user_data),
            (OS_TYPE_KEY.to_string(), params.os_type.as_str().to_string()),
            (OS_ARCH_KEY.to_string(), params.os_arch.to_string()),
            (CONTROLLER_ID_KEY.to_string(), self.controller_id.clone()),
            (POOL_ID_KEY.to_string(), params.pool_id.clone()),
        ]);
        if kind == InstanceKind::VirtualMachine {
            config.insert(
                SECURE_BOOT_KEY.to_string(),
                self.config.secure_boot.to_string(),
            );
        }

        debug!(
            instance = %params.name,
            architecture,
            kind = %kind,
            profiles = ?profiles,
            "Built create request"
        );

        Ok(CreateInstanceSpec {
            name: params.name.clone(),
            architecture: architecture.to_string(),
            profiles,
            description: INSTANCE_DESCRIPTION.to_string(),
            config,
            source,
            kind,
        })
    }
}
