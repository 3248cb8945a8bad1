// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Architecture name translation.
//!
//! | Orchestrator | Backend |
//! |--------------|---------|
//! | `amd64` | `x86_64` |
//! | `arm64` | `aarch64` |
//! | `arm` | `armv7l` |

use runner_provider_common::OsArch;

use crate::error::{Error, Result};

/// Backend name for `arch`. An unspecified architecture means `amd64`.
pub fn to_backend(arch: &OsArch) -> Result<&'static str> {
    match arch {
        OsArch::Amd64 | OsArch::Unspecified => Ok("x86_64"),
        OsArch::Arm64 => Ok("aarch64"),
        OsArch::Arm => Ok("armv7l"),
        OsArch::Other(other) => Err(Error::UnsupportedArchitecture(other.clone())),
    }
}

/// Orchestrator name for a backend architecture, unspecified when unknown.
pub fn to_orchestrator(arch: &str) -> OsArch {
    match arch {
        "x86_64" => OsArch::Amd64,
        "aarch64" => OsArch::Arm64,
        "armv7l" => OsArch::Arm,
        _ => OsArch::Unspecified,
    }
}
