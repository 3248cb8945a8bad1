// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend client abstraction.
//!
//! The lifecycle engine only talks to the virtualization backend through
//! [`BackendClient`]. Two implementations ship with the crate:
//!
//! | Implementation | Transport | Use |
//! |----------------|-----------|-----|
//! | [`IncusClient`] | HTTPS (client certificate) or unix socket | production |
//! | [`MockBackend`] | in-memory | tests |
//!
//! Mutating calls return an [`Operation`] that completes asynchronously on the
//! backend; the caller decides how long to wait for it.

pub mod api;
pub mod mock;
pub mod rest;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use api::{
    CreateInstanceSpec, Image, ImageAliasesEntry, InstanceFull, InstanceKind, InstanceStatePut,
    Project,
};

pub use mock::MockBackend;
pub use rest::{IncusClient, RestConnector};

/// Message the backend reports when stopping an instance that is not running.
pub const INSTANCE_ALREADY_STOPPED: &str = "The instance is already stopped";

/// Errors reported by a backend client.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The backend rejected the request.
    #[error("{message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Backend error text.
        message: String,
    },

    /// Stopping an instance that is already stopped.
    #[error("{}", INSTANCE_ALREADY_STOPPED)]
    InstanceAlreadyStopped,

    /// A background operation finished unsuccessfully.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// The backend could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with something that could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl BackendError {
    /// A `404 Not Found` status error.
    pub fn not_found(message: impl Into<String>) -> Self {
        BackendError::Status {
            code: 404,
            message: message.into(),
        }
    }

    /// Build the error for a failed request or operation, recognising the
    /// conditions callers branch on.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if message == INSTANCE_ALREADY_STOPPED {
            return BackendError::InstanceAlreadyStopped;
        }
        BackendError::Status { code, message }
    }

    /// Build the error for a background operation that failed with `err`.
    pub fn from_operation(err: impl Into<String>) -> Self {
        let err = err.into();
        if err == INSTANCE_ALREADY_STOPPED {
            return BackendError::InstanceAlreadyStopped;
        }
        BackendError::OperationFailed(err)
    }

    /// Whether the target does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::Status { code: 404, .. })
    }
}

/// Result type for backend calls.
pub type Result<T> = std::result::Result<T, BackendError>;

/// A background operation running on the backend.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Operation identifier.
    fn id(&self) -> &str;

    /// Wait until the operation reaches a terminal state.
    ///
    /// Bound the wait by dropping the future (e.g. `tokio::time::timeout`).
    async fn wait(&self) -> Result<()>;
}

/// Capability set the lifecycle engine needs from the backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Fetch a project.
    async fn get_project(&self, name: &str) -> Result<Project>;

    /// A client whose calls are scoped to `project`.
    fn use_project(&self, project: &str) -> Arc<dyn BackendClient>;

    /// Names of all profiles.
    async fn get_profile_names(&self) -> Result<Vec<String>>;

    /// Create an instance.
    async fn create_instance(&self, spec: &CreateInstanceSpec) -> Result<Box<dyn Operation>>;

    /// Change the runtime state of an instance. An empty `etag` skips the
    /// concurrency check.
    async fn update_instance_state(
        &self,
        name: &str,
        state: &InstanceStatePut,
        etag: &str,
    ) -> Result<Box<dyn Operation>>;

    /// Fetch an instance with its runtime state, along with its etag.
    async fn get_instance_full(&self, name: &str) -> Result<(InstanceFull, String)>;

    /// Delete an instance.
    async fn delete_instance(&self, name: &str) -> Result<Box<dyn Operation>>;

    /// All instances of the given kind (`None` for every kind) with their
    /// runtime state.
    async fn get_instances_full(&self, kind: Option<InstanceKind>) -> Result<Vec<InstanceFull>>;

    /// Per-architecture entries of an image alias.
    async fn get_image_alias_architectures(
        &self,
        kind: InstanceKind,
        alias: &str,
    ) -> Result<HashMap<String, ImageAliasesEntry>>;

    /// Fetch an image by fingerprint, along with its etag.
    async fn get_image(&self, fingerprint: &str) -> Result<(Image, String)>;
}

/// Produces an unscoped backend client.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to the backend.
    async fn connect(&self) -> Result<Arc<dyn BackendClient>>;
}
