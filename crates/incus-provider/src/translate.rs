// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend instance records to [`ProviderInstance`].

use runner_provider_common::os::os_to_os_type;
use runner_provider_common::{Address, AddressType, InstanceStatus, OsType, ProviderInstance};

use crate::arch;
use crate::client::api::InstanceFull;
use crate::spec::OS_TYPE_KEY;

/// Image metadata key carrying the OS name.
pub const IMAGE_OS_KEY: &str = "image.os";
/// Image metadata key carrying the OS release.
pub const IMAGE_RELEASE_KEY: &str = "image.release";

const GLOBAL_SCOPE: &str = "global";

/// Coarse status for a backend status string.
pub fn status_from_backend(status: &str) -> InstanceStatus {
    match status {
        "Running" => InstanceStatus::Running,
        "Stopped" => InstanceStatus::Stopped,
        _ => InstanceStatus::Unknown,
    }
}

/// Normalize a backend instance record.
pub fn to_provider_instance(instance: &InstanceFull) -> ProviderInstance {
    let os_name = instance
        .expanded_config
        .get(IMAGE_OS_KEY)
        .map(|os| os.to_lowercase())
        .unwrap_or_default();
    let os_version = instance
        .expanded_config
        .get(IMAGE_RELEASE_KEY)
        .cloned()
        .unwrap_or_default();

    let os_type = os_to_os_type(&os_name)
        .or_else(|| {
            instance
                .expanded_config
                .get(OS_TYPE_KEY)
                .map(|t| OsType::from(t.as_str()))
        })
        .unwrap_or_default();

    let addresses = instance
        .state
        .iter()
        .filter_map(|state| state.network.as_ref())
        .flat_map(|network| network.values())
        .flat_map(|iface| iface.addresses.iter())
        .filter(|addr| addr.scope == GLOBAL_SCOPE)
        .map(|addr| Address {
            address: addr.address.clone(),
            address_type: AddressType::Public,
        })
        .collect();

    ProviderInstance {
        provider_id: instance.name.clone(),
        name: instance.name.clone(),
        os_type,
        os_name,
        os_version,
        os_arch: arch::to_orchestrator(&instance.architecture),
        addresses,
        status: instance
            .state
            .as_ref()
            .map_or(InstanceStatus::Unknown, |state| status_from_backend(&state.status)),
    }
}
