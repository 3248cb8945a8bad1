// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error kinds shared across the provider boundary.

use thiserror::Error;

/// Exit status signalling that the requested entity does not exist.
pub const EXIT_CODE_NOT_FOUND: i32 = 30;

/// Exit status for every other failure.
pub const EXIT_CODE_FAILURE: i32 = 1;

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The target (instance, image, alias, remote, profile) does not exist.
    NotFound,
    /// Caller supplied arguments are invalid.
    BadRequest,
    /// An argument value is outside the supported set.
    InvalidArgument,
    /// A bounded wait expired.
    Timeout,
    /// The backend or its transport failed.
    Transport,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Process exit status the orchestrator expects for this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::NotFound => EXIT_CODE_NOT_FOUND,
            _ => EXIT_CODE_FAILURE,
        }
    }
}

/// Error returned by an [`ExternalProvider`](crate::execution::ExternalProvider).
///
/// Providers keep their own rich error types internally and flatten them into
/// this at the boundary, keeping the classification.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    kind: ErrorKind,
    message: String,
}

impl ProviderError {
    /// Create a new provider error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a [`ErrorKind::NotFound`] error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for a [`ErrorKind::BadRequest`] error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// The error classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Prefix the message with additional context, keeping the kind.
    pub fn context(self, context: impl AsRef<str>) -> Self {
        Self {
            kind: self.kind,
            message: format!("{}: {}", context.as_ref(), self.message),
        }
    }
}
