// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner Provider Common - orchestrator-facing building blocks.
//!
//! This crate holds everything a runner provider shares with the orchestrator
//! that invokes it, independent of the virtualization backend the provider drives.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                           │
//! │         (env vars + stdin in, JSON on stdout, exit code)      │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                runner-provider-common (This Crate)            │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌─────────┐  │
//! │  │ execution  │  │   params   │  │cloudconfig │  │  tools  │  │
//! │  └────────────┘  └────────────┘  └────────────┘  └─────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!                               │ ExternalProvider
//!                               ▼
//!                ┌─────────────────────────────┐
//!                │   Provider implementation    │
//!                │      (e.g. incus-provider)   │
//!                └─────────────────────────────┘
//! ```
//!
//! # Commands
//!
//! | Command | Input | Output |
//! |---------|-------|--------|
//! | `CreateInstance` | bootstrap params on stdin | `ProviderInstance` JSON |
//! | `GetInstance` | `GARM_INSTANCE_ID` | `ProviderInstance` JSON |
//! | `ListInstances` | `GARM_POOL_ID` | `[ProviderInstance]` JSON |
//! | `DeleteInstance` | `GARM_INSTANCE_ID` | - |
//! | `RemoveAllInstances` | - | - |
//! | `StartInstance` / `StopInstance` | `GARM_INSTANCE_ID` | - |
//! | `GetVersion` | - | version string |
//!
//! Interface `v0.1.1` adds `GetSupportedInterfaceVersions`, `ValidatePoolInfo`,
//! `GetConfigJSONSchema` and `GetExtraSpecsJSONSchema`.
//!
//! # Modules
//!
//! - [`params`]: bootstrap parameters and normalized instance model
//! - [`error`]: error kinds shared across the provider boundary
//! - [`execution`]: environment parsing and command dispatch
//! - [`tools`]: runner tool download selection
//! - [`os`]: OS name classification
//! - [`cloudconfig`]: boot configuration rendering

#![deny(missing_docs)]

/// Boot configuration (cloud-init / PowerShell) rendering.
pub mod cloudconfig;

/// Error kinds and the error type crossing the provider boundary.
pub mod error;

/// External execution protocol: environment, commands, dispatch.
pub mod execution;

/// OS name classification.
pub mod os;

/// Bootstrap parameters and normalized instance model.
pub mod params;

/// Runner tool download selection.
pub mod tools;

pub use error::{ErrorKind, ProviderError};
pub use execution::{Environment, ExecutionCommand, ExternalProvider};
pub use params::{
    Address, AddressType, BootstrapInstance, InstanceStatus, OsArch, OsType, ProviderInstance,
    RunnerApplicationDownload, UserDataOptions,
};
