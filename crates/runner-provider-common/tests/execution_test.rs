// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the execution module - environment parsing and command dispatch.

use async_trait::async_trait;
use runner_provider_common::error::{EXIT_CODE_FAILURE, EXIT_CODE_NOT_FOUND};
use runner_provider_common::execution::{ExecutionError, InterfaceVersion};
use runner_provider_common::{
    BootstrapInstance, Environment, ExecutionCommand, ExternalProvider, InstanceStatus,
    ProviderError, ProviderInstance,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Records calls and answers with canned data.
#[derive(Default)]
struct FakeProvider {
    calls: Mutex<Vec<String>>,
    missing: bool,
}

impl FakeProvider {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn instance(name: &str) -> ProviderInstance {
        ProviderInstance {
            provider_id: name.to_string(),
            name: name.to_string(),
            status: InstanceStatus::Running,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExternalProvider for FakeProvider {
    async fn create_instance(
        &self,
        params: BootstrapInstance,
    ) -> Result<ProviderInstance, ProviderError> {
        self.record(format!("create {}", params.name));
        Ok(Self::instance(&params.name))
    }

    async fn get_instance(&self, instance: &str) -> Result<ProviderInstance, ProviderError> {
        self.record(format!("get {instance}"));
        if self.missing {
            return Err(ProviderError::not_found(format!("instance {instance}")));
        }
        Ok(Self::instance(instance))
    }

    async fn list_instances(&self, pool_id: &str) -> Result<Vec<ProviderInstance>, ProviderError> {
        self.record(format!("list {pool_id}"));
        Ok(vec![Self::instance("a"), Self::instance("b")])
    }

    async fn delete_instance(&self, instance: &str) -> Result<(), ProviderError> {
        self.record(format!("delete {instance}"));
        Ok(())
    }

    async fn remove_all_instances(&self) -> Result<(), ProviderError> {
        self.record("remove_all".to_string());
        Ok(())
    }

    async fn stop(&self, instance: &str, force: bool) -> Result<(), ProviderError> {
        self.record(format!("stop {instance} force={force}"));
        Ok(())
    }

    async fn start(&self, instance: &str) -> Result<(), ProviderError> {
        self.record(format!("start {instance}"));
        Ok(())
    }

    fn get_version(&self) -> String {
        "v1.2.3".to_string()
    }

    async fn validate_pool_info(
        &self,
        image: &str,
        flavor: &str,
        extra_specs: &str,
    ) -> Result<(), ProviderError> {
        self.record(format!("validate {image} {flavor} {extra_specs}"));
        Ok(())
    }

    fn get_config_json_schema(&self) -> Result<String, ProviderError> {
        Ok("{\"type\":\"object\"}".to_string())
    }

    fn get_extra_specs_json_schema(&self) -> Result<String, ProviderError> {
        Ok("{}".to_string())
    }
}

fn vars(config: &NamedTempFile, extra: &[(&str, &str)]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(
        "GARM_PROVIDER_CONFIG_FILE".to_string(),
        config.path().display().to_string(),
    );
    map.insert("GARM_CONTROLLER_ID".to_string(), "controller-1".to_string());
    for (k, v) in extra {
        map.insert(k.to_string(), v.to_string());
    }
    map
}

fn parse(map: HashMap<String, String>, stdin: &str) -> Result<Environment, ExecutionError> {
    Environment::from_lookup(|key| map.get(key).cloned(), Cursor::new(stdin.to_string()))
}

// ============================================================================
// Environment parsing
// ============================================================================

#[test]
fn test_create_instance_reads_stdin() {
    let config = NamedTempFile::new().unwrap();
    let env = parse(
        vars(&config, &[("GARM_COMMAND", "CreateInstance"), ("GARM_POOL_ID", "pool-1")]),
        r#"{"name": "runner-1", "image": "ubuntu", "flavor": "default", "os_type": "linux"}"#,
    )
    .unwrap();

    assert_eq!(env.command, ExecutionCommand::CreateInstance);
    assert_eq!(env.interface_version, InterfaceVersion::V010);
    assert_eq!(env.bootstrap_params.name, "runner-1");
    assert_eq!(env.bootstrap_params.image, "ubuntu");
}

#[test]
fn test_create_instance_rejects_invalid_json() {
    let config = NamedTempFile::new().unwrap();
    let err = parse(
        vars(&config, &[("GARM_COMMAND", "CreateInstance"), ("GARM_POOL_ID", "pool-1")]),
        "not json",
    )
    .unwrap_err();
    assert!(matches!(err, ExecutionError::InvalidBootstrapParams(_)));
    assert_eq!(err.exit_code(), EXIT_CODE_FAILURE);
}

#[test]
fn test_missing_command() {
    let config = NamedTempFile::new().unwrap();
    let err = parse(vars(&config, &[]), "").unwrap_err();
    assert!(matches!(err, ExecutionError::MissingVar("GARM_COMMAND")));
}

#[test]
fn test_missing_config_file() {
    let map: HashMap<String, String> = [
        ("GARM_COMMAND", "GetVersion"),
        ("GARM_CONTROLLER_ID", "controller-1"),
        ("GARM_PROVIDER_CONFIG_FILE", "/nonexistent/provider.toml"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let err = parse(map, "").unwrap_err();
    assert!(matches!(err, ExecutionError::ConfigFile { .. }));
}

#[test]
fn test_instance_commands_require_instance_id() {
    let config = NamedTempFile::new().unwrap();
    let err = parse(vars(&config, &[("GARM_COMMAND", "GetInstance")]), "").unwrap_err();
    assert!(matches!(err, ExecutionError::MissingVar("GARM_INSTANCE_ID")));
}

#[test]
fn test_v011_instance_commands_require_pool_id() {
    let config = NamedTempFile::new().unwrap();
    let err = parse(
        vars(
            &config,
            &[
                ("GARM_COMMAND", "DeleteInstance"),
                ("GARM_INSTANCE_ID", "runner-1"),
                ("GARM_INTERFACE_VERSION", "v0.1.1"),
            ],
        ),
        "",
    )
    .unwrap_err();
    assert!(matches!(err, ExecutionError::MissingVar("GARM_POOL_ID")));
}

#[test]
fn test_v011_commands_rejected_under_v010() {
    let config = NamedTempFile::new().unwrap();
    let err = parse(
        vars(&config, &[("GARM_COMMAND", "GetSupportedInterfaceVersions")]),
        "",
    )
    .unwrap_err();
    assert!(matches!(err, ExecutionError::UnknownCommand(_)));
}

#[test]
fn test_unsupported_interface_version() {
    let config = NamedTempFile::new().unwrap();
    let err = parse(
        vars(
            &config,
            &[("GARM_COMMAND", "GetVersion"), ("GARM_INTERFACE_VERSION", "v9")],
        ),
        "",
    )
    .unwrap_err();
    assert!(matches!(err, ExecutionError::UnsupportedInterfaceVersion(_)));
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_run_get_instance_outputs_json() {
    let config = NamedTempFile::new().unwrap();
    let env = parse(
        vars(&config, &[("GARM_COMMAND", "GetInstance"), ("GARM_INSTANCE_ID", "runner-1")]),
        "",
    )
    .unwrap();
    let provider = FakeProvider::default();

    let out = env.run(&provider).await.unwrap();
    let instance: ProviderInstance = serde_json::from_str(&out).unwrap();
    assert_eq!(instance.name, "runner-1");
    assert_eq!(provider.calls(), vec!["get runner-1"]);
}

#[tokio::test]
async fn test_run_list_instances_outputs_array() {
    let config = NamedTempFile::new().unwrap();
    let env = parse(
        vars(&config, &[("GARM_COMMAND", "ListInstances"), ("GARM_POOL_ID", "pool-1")]),
        "",
    )
    .unwrap();
    let provider = FakeProvider::default();

    let out = env.run(&provider).await.unwrap();
    let instances: Vec<ProviderInstance> = serde_json::from_str(&out).unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(provider.calls(), vec!["list pool-1"]);
}

#[tokio::test]
async fn test_run_stop_is_always_forced() {
    let config = NamedTempFile::new().unwrap();
    let env = parse(
        vars(&config, &[("GARM_COMMAND", "StopInstance"), ("GARM_INSTANCE_ID", "runner-1")]),
        "",
    )
    .unwrap();
    let provider = FakeProvider::default();

    let out = env.run(&provider).await.unwrap();
    assert!(out.is_empty());
    assert_eq!(provider.calls(), vec!["stop runner-1 force=true"]);
}

#[tokio::test]
async fn test_run_not_found_maps_to_exit_code_30() {
    let config = NamedTempFile::new().unwrap();
    let env = parse(
        vars(&config, &[("GARM_COMMAND", "GetInstance"), ("GARM_INSTANCE_ID", "gone")]),
        "",
    )
    .unwrap();
    let provider = FakeProvider {
        missing: true,
        ..Default::default()
    };

    let err = env.run(&provider).await.unwrap_err();
    assert_eq!(err.exit_code(), EXIT_CODE_NOT_FOUND);
    assert!(err.to_string().starts_with("failed to get instance from provider"));
}

#[tokio::test]
async fn test_run_validate_pool_info_passes_pool_fields() {
    let config = NamedTempFile::new().unwrap();
    let env = parse(
        vars(
            &config,
            &[
                ("GARM_COMMAND", "ValidatePoolInfo"),
                ("GARM_INTERFACE_VERSION", "v0.1.1"),
                ("GARM_POOL_IMAGE", "ubuntu"),
                ("GARM_POOL_FLAVOR", "default"),
                ("GARM_POOL_EXTRASPECS", "{}"),
            ],
        ),
        "",
    )
    .unwrap();
    let provider = FakeProvider::default();

    env.run(&provider).await.unwrap();
    assert_eq!(provider.calls(), vec!["validate ubuntu default {}"]);
}

#[tokio::test]
async fn test_run_version_and_interface_versions() {
    let config = NamedTempFile::new().unwrap();
    let provider = FakeProvider::default();

    let env = parse(vars(&config, &[("GARM_COMMAND", "GetVersion")]), "").unwrap();
    assert_eq!(env.run(&provider).await.unwrap(), "v1.2.3");

    let env = parse(
        vars(
            &config,
            &[
                ("GARM_COMMAND", "GetSupportedInterfaceVersions"),
                ("GARM_INTERFACE_VERSION", "v0.1.1"),
            ],
        ),
        "",
    )
    .unwrap();
    assert_eq!(env.run(&provider).await.unwrap(), r#"["v0.1.0","v0.1.1"]"#);
}
