// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Incus Provider - runner instance lifecycle on Incus.
//!
//! Drives an Incus host to create, list, start, stop and delete runner
//! instances on behalf of an orchestrator, and reports them back in the
//! normalized [`ProviderInstance`](runner_provider_common::ProviderInstance)
//! shape.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 runner-provider-common                        │
//! │            (Environment, ExternalProvider)                    │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 incus-provider (This Crate)                   │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌─────────┐  │
//! │  │  provider  │─▶│    spec    │─▶│   image    │  │  arch   │  │
//! │  └────────────┘  └────────────┘  └────────────┘  └─────────┘  │
//! │        │  ┌────────────┐  ┌────────────┐                       │
//! │        ├─▶│ operation  │  │ translate  │                       │
//! │        │  └────────────┘  └────────────┘                       │
//! └────────┼─────────────────────────────────────────────────────┘
//!          │ BackendClient
//!          ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │   IncusClient (HTTPS / unix socket)   │   MockBackend (tests) │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Instance Tags
//!
//! The backend has no notion of controllers or pools, so ownership is
//! recorded in instance config keys at creation:
//!
//! | Key | Value |
//! |-----|-------|
//! | `user.runner-controller-id` | controller identifier |
//! | `user.runner-pool-id` | pool identifier |
//! | `user.os-type` | `linux` / `windows` |
//! | `user.os-arch` | `amd64` / `arm64` / `arm` |
//! | `user.user-data` | rendered boot configuration |
//! | `security.secureboot` | `true` / `false` (virtual machines only) |

#![deny(missing_docs)]

/// Architecture name translation.
pub mod arch;

/// Tool resolution and boot configuration collaborators.
pub mod boot;

/// Backend client trait, REST client and mock.
pub mod client;

/// Provider configuration.
pub mod config;

/// Error types.
pub mod error;

/// Pool extra specs.
pub mod extra_specs;

/// Image reference resolution.
pub mod image;

/// Bounded backend operations.
pub mod operation;

/// Lifecycle engine.
pub mod provider;

/// Create request assembly.
pub mod spec;

/// Backend record normalization.
pub mod translate;

pub use client::{BackendClient, BackendError, Connector, IncusClient, MockBackend, RestConnector};
pub use config::{ConfigError, ImageRemote, ProviderConfig};
pub use error::{Error, Result};
pub use extra_specs::ExtraSpecs;
pub use provider::{IncusProvider, IncusProviderBuilder, ReadinessPolicy};
pub use spec::SpecBuilder;
