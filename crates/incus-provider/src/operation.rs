// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded execution of backend calls.
//!
//! Backend calls run on their own task so that an expired bound aborts the
//! call instead of leaving it running behind the caller.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::client::{BackendError, Operation};
use crate::error::{Error, Result, ResultExt};

/// Bound applied to backend operations when none is configured.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Run `fut` for at most `timeout`.
///
/// On expiry the task is aborted and [`Error::Timeout`] is returned with
/// `action` and `target` describing what was waited for.
pub async fn run_bounded<T, F>(
    action: &'static str,
    target: &str,
    timeout: Duration,
    fut: F,
) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let mut handle = tokio::spawn(fut);
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(Error::Task(join.to_string())),
        Err(_) => {
            handle.abort();
            warn!(action, target, ?timeout, "Backend call timed out");
            Err(Error::Timeout {
                action,
                target: target.to_string(),
            })
        }
    }
}

/// Submit an asynchronous backend operation, then wait for it to finish.
///
/// Submission and completion are bounded separately, each by `timeout`.
pub async fn submit_and_wait<F>(
    action: &'static str,
    target: &str,
    timeout: Duration,
    submit: F,
) -> Result<()>
where
    F: Future<Output = std::result::Result<Box<dyn Operation>, BackendError>> + Send + 'static,
{
    let op = run_bounded(action, target, timeout, async move {
        submit.await.map_err(Error::from)
    })
    .await?;

    run_bounded(action, target, timeout, async move {
        op.wait().await.map_err(Error::from)
    })
    .await
    .with_context(|| format!("waiting for {action}"))
}
