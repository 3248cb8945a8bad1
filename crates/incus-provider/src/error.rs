// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for incus-provider.

use runner_provider_common::cloudconfig::CloudConfigError;
use runner_provider_common::tools::ToolsError;
use runner_provider_common::{ErrorKind, ProviderError};
use thiserror::Error;

use crate::client::BackendError;
use crate::config::ConfigError;

/// Provider errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The backend reported a failure.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The backend connection could not be set up.
    #[error("{context}: {source}")]
    Connect {
        /// Setup step that failed.
        context: String,
        /// Cause.
        #[source]
        source: BackendError,
    },

    /// The create request carries no instance name.
    #[error("missing name")]
    MissingName,

    /// The requested flavor is not a backend profile.
    #[error("looking for profile {0}")]
    ProfileNotFound(String),

    /// The architecture has no backend equivalent.
    #[error("architecture {0} is not supported")]
    UnsupportedArchitecture(String),

    /// The image reference names no remote.
    #[error("image does not include a remote")]
    ImageWithoutRemote,

    /// The image reference names an unknown remote.
    #[error("could not find {name} in {known:?}: not found")]
    RemoteNotFound {
        /// Remote name from the image reference.
        name: String,
        /// Configured remote names.
        known: Vec<String>,
    },

    /// No local image matches the alias for the architecture.
    #[error("no image found for arch {arch} and image type {kind} with name {name}")]
    ImageNotFound {
        /// Backend architecture.
        arch: String,
        /// Instance kind.
        kind: String,
        /// Alias.
        name: String,
    },

    /// The instance does not exist.
    #[error("instance {0} not found")]
    InstanceNotFound(String),

    /// A bounded wait expired.
    #[error("timed out waiting for {action} of {target}")]
    Timeout {
        /// What was being waited for.
        action: &'static str,
        /// Instance (or set of instances) concerned.
        target: String,
    },

    /// Pool extra specs are malformed.
    #[error("invalid extra specs: {0}")]
    ExtraSpecs(String),

    /// No runner tools match the instance.
    #[error(transparent)]
    Tools(#[from] ToolsError),

    /// Boot configuration rendering failed.
    #[error(transparent)]
    BootConfig(#[from] CloudConfigError),

    /// A required builder field is missing.
    #[error("{0} is required")]
    Builder(&'static str),

    /// A background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),

    /// Error with the operation that produced it.
    #[error("{context}: {source}")]
    Context {
        /// What was being done.
        context: String,
        /// Cause.
        #[source]
        source: Box<Error>,
    },
}

/// Result type using the provider error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap this error with `context`.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error below any context layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classification, looking through context layers.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Error::Backend(e) if e.is_not_found() => ErrorKind::NotFound,
            Error::Backend(_) | Error::Connect { .. } => ErrorKind::Transport,
            Error::ProfileNotFound(_)
            | Error::RemoteNotFound { .. }
            | Error::ImageNotFound { .. }
            | Error::InstanceNotFound(_) => ErrorKind::NotFound,
            Error::MissingName
            | Error::ImageWithoutRemote
            | Error::ExtraSpecs(_)
            | Error::Config(_)
            | Error::Builder(_) => ErrorKind::BadRequest,
            Error::UnsupportedArchitecture(_) => ErrorKind::InvalidArgument,
            Error::Timeout { .. } => ErrorKind::Timeout,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether the target does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Whether the backend refused to stop an instance that is not running.
    pub fn is_already_stopped(&self) -> bool {
        matches!(
            self.root(),
            Error::Backend(BackendError::InstanceAlreadyStopped)
        )
    }
}

impl From<Error> for ProviderError {
    fn from(err: Error) -> Self {
        ProviderError::new(err.kind(), err.to_string())
    }
}

/// Attach operation context to fallible results.
pub trait ResultExt<T> {
    /// Wrap the error with a fixed context.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wrap the error with a lazily built context.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
