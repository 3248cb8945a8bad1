// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pool extra specs.
//!
//! Pools may carry a JSON object of provider specific tuning. It is checked
//! against the schema generated from [`ExtraSpecs`], so unknown keys and
//! wrongly typed values are rejected with a readable message.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Provider specific pool tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExtraSpecs {
    /// Packages installed on first boot, in addition to the defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_packages: Vec<String>,
    /// Skip package upgrades on first boot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_updates: Option<bool>,
    /// Trace the runner install script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_boot_debug: Option<bool>,
    /// Lower-case the hostname handed to the boot configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_lowercase_hostnames: Option<bool>,
    /// Base64 encoded replacement for the runner install template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_install_template: Option<String>,
    /// Base64 encoded scripts run before the runner is installed, by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pre_install_scripts: BTreeMap<String, String>,
    /// Extra values available to the install template.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_context: BTreeMap<String, String>,
}

/// JSON schema of [`ExtraSpecs`].
pub fn schema() -> Value {
    serde_json::to_value(schemars::schema_for!(ExtraSpecs)).unwrap_or(Value::Null)
}

/// Validate and decode raw extra specs. Absent or `null` specs are empty.
pub fn parse(raw: Option<&Value>) -> Result<ExtraSpecs> {
    let value = match raw {
        None | Some(Value::Null) => return Ok(ExtraSpecs::default()),
        Some(value) => value,
    };

    let schema = schema();
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| Error::ExtraSpecs(format!("building schema: {e}")))?;
    let problems: Vec<String> = validator
        .iter_errors(value)
        .map(|e| e.to_string())
        .collect();
    if !problems.is_empty() {
        return Err(Error::ExtraSpecs(problems.join("; ")));
    }

    serde_json::from_value(value.clone()).map_err(|e| Error::ExtraSpecs(e.to_string()))
}

/// Like [`parse`], for extra specs passed as a JSON string.
pub fn parse_str(raw: &str) -> Result<ExtraSpecs> {
    if raw.trim().is_empty() {
        return Ok(ExtraSpecs::default());
    }
    let value: Value =
        serde_json::from_str(raw).map_err(|e| Error::ExtraSpecs(format!("decoding: {e}")))?;
    parse(Some(&value))
}
