// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External execution protocol.
//!
//! The orchestrator runs a provider as a short-lived process per command. The
//! command and its arguments arrive in environment variables, bootstrap
//! parameters arrive as JSON on stdin, and the result leaves as JSON on stdout.
//! Failures are reported through the exit status (see [`ErrorKind::exit_code`])
//! with the error text on stderr.
//!
//! | Variable | Required | Description |
//! |----------|----------|-------------|
//! | `GARM_COMMAND` | Yes | Command to execute |
//! | `GARM_CONTROLLER_ID` | Yes | Controller identifier stamped on instances |
//! | `GARM_PROVIDER_CONFIG_FILE` | Yes | Provider configuration file |
//! | `GARM_POOL_ID` | Per command | Pool the command applies to |
//! | `GARM_INSTANCE_ID` | Per command | Instance the command applies to |
//! | `GARM_INTERFACE_VERSION` | No | `v0.1.0` (default) or `v0.1.1` |
//! | `GARM_POOL_EXTRASPECS` | No | Pool extra specs (`v0.1.1`) |
//! | `GARM_POOL_IMAGE` | No | Pool image for `ValidatePoolInfo` |
//! | `GARM_POOL_FLAVOR` | No | Pool flavor for `ValidatePoolInfo` |

use async_trait::async_trait;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::error::{ErrorKind, ProviderError};
use crate::params::{BootstrapInstance, ProviderInstance};

/// Original interface version.
pub const INTERFACE_VERSION_V010: &str = "v0.1.0";

/// Interface version adding pool validation and schema commands.
pub const INTERFACE_VERSION_V011: &str = "v0.1.1";

/// Errors raised while parsing the environment or running a command.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// A required environment variable is missing.
    #[error("missing {0}")]
    MissingVar(&'static str),

    /// The command is not part of the requested interface version.
    #[error("unknown GARM_COMMAND: {0}")]
    UnknownCommand(String),

    /// The interface version is not supported.
    #[error("unsupported interface version: {0}")]
    UnsupportedInterfaceVersion(String),

    /// The provider config file could not be accessed.
    #[error("error accessing config file {path}: {source}")]
    ConfigFile {
        /// Path that was checked.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading stdin failed.
    #[error("failed to read stdin: {0}")]
    Stdin(#[source] std::io::Error),

    /// Bootstrap parameters on stdin were not valid JSON.
    #[error("failed to decode bootstrap params: {0}")]
    InvalidBootstrapParams(#[source] serde_json::Error),

    /// The command result could not be serialized.
    #[error("failed to marshal response: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The provider failed to execute the command.
    #[error("{context}: {source}")]
    Provider {
        /// What the command was doing.
        context: &'static str,
        /// The provider's error.
        #[source]
        source: ProviderError,
    },
}

impl ExecutionError {
    /// The error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::Provider { source, .. } => source.kind(),
            ExecutionError::Serialize(_) | ExecutionError::Stdin(_) => ErrorKind::Internal,
            _ => ErrorKind::BadRequest,
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

/// Result type for execution.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Protocol revision negotiated with the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterfaceVersion {
    /// `v0.1.0`, also assumed when no version is given.
    #[default]
    V010,
    /// `v0.1.1`.
    V011,
}

impl FromStr for InterfaceVersion {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | INTERFACE_VERSION_V010 => Ok(InterfaceVersion::V010),
            INTERFACE_VERSION_V011 => Ok(InterfaceVersion::V011),
            other => Err(ExecutionError::UnsupportedInterfaceVersion(other.to_string())),
        }
    }
}

/// Commands the orchestrator may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionCommand {
    /// Create and boot a new instance.
    CreateInstance,
    /// Delete an instance.
    DeleteInstance,
    /// Describe one instance.
    GetInstance,
    /// List the instances of a pool.
    ListInstances,
    /// Boot a stopped instance.
    StartInstance,
    /// Stop a running instance.
    StopInstance,
    /// Delete every instance owned by the controller.
    RemoveAllInstances,
    /// Report the provider version.
    GetVersion,
    /// Report the supported interface versions (`v0.1.1`).
    GetSupportedInterfaceVersions,
    /// Validate pool image/flavor/extra specs (`v0.1.1`).
    ValidatePoolInfo,
    /// Report the provider configuration schema (`v0.1.1`).
    GetConfigJsonSchema,
    /// Report the extra specs schema (`v0.1.1`).
    GetExtraSpecsJsonSchema,
}

impl ExecutionCommand {
    /// Wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionCommand::CreateInstance => "CreateInstance",
            ExecutionCommand::DeleteInstance => "DeleteInstance",
            ExecutionCommand::GetInstance => "GetInstance",
            ExecutionCommand::ListInstances => "ListInstances",
            ExecutionCommand::StartInstance => "StartInstance",
            ExecutionCommand::StopInstance => "StopInstance",
            ExecutionCommand::RemoveAllInstances => "RemoveAllInstances",
            ExecutionCommand::GetVersion => "GetVersion",
            ExecutionCommand::GetSupportedInterfaceVersions => "GetSupportedInterfaceVersions",
            ExecutionCommand::ValidatePoolInfo => "ValidatePoolInfo",
            ExecutionCommand::GetConfigJsonSchema => "GetConfigJSONSchema",
            ExecutionCommand::GetExtraSpecsJsonSchema => "GetExtraSpecsJSONSchema",
        }
    }

    fn requires_v011(&self) -> bool {
        matches!(
            self,
            ExecutionCommand::GetSupportedInterfaceVersions
                | ExecutionCommand::ValidatePoolInfo
                | ExecutionCommand::GetConfigJsonSchema
                | ExecutionCommand::GetExtraSpecsJsonSchema
        )
    }
}

impl FromStr for ExecutionCommand {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self> {
        let cmd = match s {
            "CreateInstance" => ExecutionCommand::CreateInstance,
            "DeleteInstance" => ExecutionCommand::DeleteInstance,
            "GetInstance" => ExecutionCommand::GetInstance,
            "ListInstances" => ExecutionCommand::ListInstances,
            "StartInstance" => ExecutionCommand::StartInstance,
            "StopInstance" => ExecutionCommand::StopInstance,
            "RemoveAllInstances" => ExecutionCommand::RemoveAllInstances,
            "GetVersion" => ExecutionCommand::GetVersion,
            "GetSupportedInterfaceVersions" => ExecutionCommand::GetSupportedInterfaceVersions,
            "ValidatePoolInfo" => ExecutionCommand::ValidatePoolInfo,
            "GetConfigJSONSchema" => ExecutionCommand::GetConfigJsonSchema,
            "GetExtraSpecsJSONSchema" => ExecutionCommand::GetExtraSpecsJsonSchema,
            other => return Err(ExecutionError::UnknownCommand(other.to_string())),
        };
        Ok(cmd)
    }
}

impl fmt::Display for ExecutionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations a provider exposes to the orchestrator.
#[async_trait]
pub trait ExternalProvider: Send + Sync {
    /// Create a new instance and return it once it has booted.
    async fn create_instance(
        &self,
        params: BootstrapInstance,
    ) -> std::result::Result<ProviderInstance, ProviderError>;

    /// Describe a single instance.
    async fn get_instance(
        &self,
        instance: &str,
    ) -> std::result::Result<ProviderInstance, ProviderError>;

    /// List instances owned by this controller, optionally limited to a pool.
    async fn list_instances(
        &self,
        pool_id: &str,
    ) -> std::result::Result<Vec<ProviderInstance>, ProviderError>;

    /// Delete an instance. Deleting a missing instance succeeds.
    async fn delete_instance(&self, instance: &str) -> std::result::Result<(), ProviderError>;

    /// Delete every instance owned by this controller.
    async fn remove_all_instances(&self) -> std::result::Result<(), ProviderError>;

    /// Stop an instance.
    async fn stop(&self, instance: &str, force: bool) -> std::result::Result<(), ProviderError>;

    /// Start an instance.
    async fn start(&self, instance: &str) -> std::result::Result<(), ProviderError>;

    /// Provider version string.
    fn get_version(&self) -> String;

    /// Interface versions this provider implements.
    fn get_supported_interface_versions(&self) -> Vec<String> {
        vec![
            INTERFACE_VERSION_V010.to_string(),
            INTERFACE_VERSION_V011.to_string(),
        ]
    }

    /// Check that a pool definition can be served by this provider.
    async fn validate_pool_info(
        &self,
        image: &str,
        flavor: &str,
        extra_specs: &str,
    ) -> std::result::Result<(), ProviderError>;

    /// JSON schema of the provider configuration.
    fn get_config_json_schema(&self) -> std::result::Result<String, ProviderError>;

    /// JSON schema of the pool extra specs.
    fn get_extra_specs_json_schema(&self) -> std::result::Result<String, ProviderError>;
}

/// Parsed execution environment of one provider invocation.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Command to run.
    pub command: ExecutionCommand,
    /// Negotiated interface version.
    pub interface_version: InterfaceVersion,
    /// Controller identifier.
    pub controller_id: String,
    /// Pool identifier (may be empty).
    pub pool_id: String,
    /// Provider configuration file.
    pub provider_config_file: PathBuf,
    /// Instance identifier (may be empty).
    pub instance_id: String,
    /// Pool extra specs as raw JSON (may be empty).
    pub pool_extra_specs: String,
    /// Pool image, used by `ValidatePoolInfo`.
    pub pool_image: String,
    /// Pool flavor, used by `ValidatePoolInfo`.
    pub pool_flavor: String,
    /// Bootstrap parameters for `CreateInstance`.
    pub bootstrap_params: BootstrapInstance,
}

impl Environment {
    /// Read the environment of the current process, including stdin.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), std::io::stdin().lock())
    }

    /// Build the environment from a variable lookup and a stdin reader.
    ///
    /// Stdin is only consumed for `CreateInstance`.
    pub fn from_lookup<F, R>(lookup: F, mut stdin: R) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
        R: Read,
    {
        let var = |key: &str| lookup(key).unwrap_or_default();

        let interface_version: InterfaceVersion = var("GARM_INTERFACE_VERSION").parse()?;
        let raw_command = var("GARM_COMMAND");
        if raw_command.is_empty() {
            return Err(ExecutionError::MissingVar("GARM_COMMAND"));
        }
        let command: ExecutionCommand = raw_command.parse()?;
        if command.requires_v011() && interface_version == InterfaceVersion::V010 {
            return Err(ExecutionError::UnknownCommand(raw_command));
        }

        let bootstrap_params = if command == ExecutionCommand::CreateInstance {
            let mut buf = String::new();
            stdin
                .read_to_string(&mut buf)
                .map_err(ExecutionError::Stdin)?;
            serde_json::from_str(&buf).map_err(ExecutionError::InvalidBootstrapParams)?
        } else {
            BootstrapInstance::default()
        };

        let env = Self {
            command,
            interface_version,
            controller_id: var("GARM_CONTROLLER_ID"),
            pool_id: var("GARM_POOL_ID"),
            provider_config_file: PathBuf::from(var("GARM_PROVIDER_CONFIG_FILE")),
            instance_id: var("GARM_INSTANCE_ID"),
            pool_extra_specs: var("GARM_POOL_EXTRASPECS"),
            pool_image: var("GARM_POOL_IMAGE"),
            pool_flavor: var("GARM_POOL_FLAVOR"),
            bootstrap_params,
        };
        env.validate()?;
        Ok(env)
    }

    /// Check that every variable the command needs is present.
    pub fn validate(&self) -> Result<()> {
        if self.provider_config_file.as_os_str().is_empty() {
            return Err(ExecutionError::MissingVar("GARM_PROVIDER_CONFIG_FILE"));
        }
        if let Err(source) = std::fs::symlink_metadata(&self.provider_config_file) {
            return Err(ExecutionError::ConfigFile {
                path: self.provider_config_file.clone(),
                source,
            });
        }
        if self.controller_id.is_empty() {
            return Err(ExecutionError::MissingVar("GARM_CONTROLLER_ID"));
        }

        match self.command {
            ExecutionCommand::CreateInstance => {
                if self.bootstrap_params.name.is_empty() {
                    return Err(ExecutionError::MissingVar("bootstrap params"));
                }
                if self.pool_id.is_empty() {
                    return Err(ExecutionError::MissingVar("GARM_POOL_ID"));
                }
            }
            ExecutionCommand::DeleteInstance
            | ExecutionCommand::GetInstance
            | ExecutionCommand::StartInstance
            | ExecutionCommand::StopInstance => {
                if self.instance_id.is_empty() {
                    return Err(ExecutionError::MissingVar("GARM_INSTANCE_ID"));
                }
                if self.interface_version == InterfaceVersion::V011 && self.pool_id.is_empty() {
                    return Err(ExecutionError::MissingVar("GARM_POOL_ID"));
                }
            }
            ExecutionCommand::ListInstances => {
                if self.pool_id.is_empty() {
                    return Err(ExecutionError::MissingVar("GARM_POOL_ID"));
                }
            }
            ExecutionCommand::RemoveAllInstances
            | ExecutionCommand::GetVersion
            | ExecutionCommand::GetSupportedInterfaceVersions
            | ExecutionCommand::ValidatePoolInfo
            | ExecutionCommand::GetConfigJsonSchema
            | ExecutionCommand::GetExtraSpecsJsonSchema => {}
        }
        Ok(())
    }

    /// Run the command against a provider and return what goes to stdout.
    pub async fn run<P>(&self, provider: &P) -> Result<String>
    where
        P: ExternalProvider + ?Sized,
    {
        debug!(command = %self.command, "Running provider command");

        let wrap = |context: &'static str| {
            move |source: ProviderError| ExecutionError::Provider { context, source }
        };

        let out = match self.command {
            ExecutionCommand::CreateInstance => {
                let instance = provider
                    .create_instance(self.bootstrap_params.clone())
                    .await
                    .map_err(wrap("failed to create instance in provider"))?;
                to_json(&instance)?
            }
            ExecutionCommand::GetInstance => {
                let instance = provider
                    .get_instance(&self.instance_id)
                    .await
                    .map_err(wrap("failed to get instance from provider"))?;
                to_json(&instance)?
            }
            ExecutionCommand::ListInstances => {
                let instances = provider
                    .list_instances(&self.pool_id)
                    .await
                    .map_err(wrap("failed to list instances from provider"))?;
                to_json(&instances)?
            }
            ExecutionCommand::DeleteInstance => {
                provider
                    .delete_instance(&self.instance_id)
                    .await
                    .map_err(wrap("failed to delete instance from provider"))?;
                String::new()
            }
            ExecutionCommand::RemoveAllInstances => {
                provider
                    .remove_all_instances()
                    .await
                    .map_err(wrap("failed to destroy environment"))?;
                String::new()
            }
            ExecutionCommand::StartInstance => {
                provider
                    .start(&self.instance_id)
                    .await
                    .map_err(wrap("failed to start instance"))?;
                String::new()
            }
            ExecutionCommand::StopInstance => {
                provider
                    .stop(&self.instance_id, true)
                    .await
                    .map_err(wrap("failed to stop instance"))?;
                String::new()
            }
            ExecutionCommand::GetVersion => provider.get_version(),
            ExecutionCommand::GetSupportedInterfaceVersions => {
                to_json(&provider.get_supported_interface_versions())?
            }
            ExecutionCommand::ValidatePoolInfo => {
                provider
                    .validate_pool_info(&self.pool_image, &self.pool_flavor, &self.pool_extra_specs)
                    .await
                    .map_err(wrap("failed to validate pool info"))?;
                String::new()
            }
            ExecutionCommand::GetConfigJsonSchema => provider
                .get_config_json_schema()
                .map_err(wrap("failed to get config JSON schema"))?,
            ExecutionCommand::GetExtraSpecsJsonSchema => provider
                .get_extra_specs_json_schema()
                .map_err(wrap("failed to get extra specs JSON schema"))?,
        };
        Ok(out)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(ExecutionError::Serialize)
}
