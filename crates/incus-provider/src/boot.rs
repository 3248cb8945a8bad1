// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Collaborators used to assemble the boot configuration.
//!
//! [`SpecBuilder`](crate::spec::SpecBuilder) takes both as injected strategy
//! objects; tests substitute them to observe what the builder passes in.

use runner_provider_common::cloudconfig;
use runner_provider_common::tools::select_tools;
use runner_provider_common::{BootstrapInstance, OsArch, OsType, RunnerApplicationDownload};

use crate::error::Result;

/// Picks the runner tool archive for an instance.
pub trait ToolResolver: Send + Sync {
    /// Select the archive for `os_type`/`os_arch` among `tools`.
    fn resolve(
        &self,
        os_type: OsType,
        os_arch: &OsArch,
        tools: &[RunnerApplicationDownload],
    ) -> Result<RunnerApplicationDownload>;
}

/// Produces the boot configuration handed to the instance.
pub trait BootConfigRenderer: Send + Sync {
    /// Render the boot configuration for `params`.
    fn render(
        &self,
        params: &BootstrapInstance,
        tools: &RunnerApplicationDownload,
        runner_name: &str,
    ) -> Result<String>;
}

/// Matches archives by OS and architecture.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultToolResolver;

impl ToolResolver for DefaultToolResolver {
    fn resolve(
        &self,
        os_type: OsType,
        os_arch: &OsArch,
        tools: &[RunnerApplicationDownload],
    ) -> Result<RunnerApplicationDownload> {
        Ok(select_tools(os_type, os_arch, tools)?)
    }
}

/// cloud-init on Linux, a PowerShell script on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudConfigRenderer;

impl BootConfigRenderer for CloudConfigRenderer {
    fn render(
        &self,
        params: &BootstrapInstance,
        tools: &RunnerApplicationDownload,
        runner_name: &str,
    ) -> Result<String> {
        Ok(cloudconfig::render(params, tools, runner_name)?)
    }
}
