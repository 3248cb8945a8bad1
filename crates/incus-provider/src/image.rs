// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Image reference resolution.
//!
//! An image reference is either a bare alias (`ubuntu/24.04`), resolved
//! against images already present on the backend, or `<remote>:<alias>`
//! (`images:ubuntu/24.04`), which the backend fetches from the configured
//! remote when the instance is created.

use std::collections::BTreeMap;
use tracing::debug;

use crate::client::BackendClient;
use crate::client::api::{InstanceKind, InstanceSource};
use crate::config::ImageRemote;
use crate::error::{Error, Result, ResultExt};

/// Separates the remote name from the alias.
pub const REMOTE_SEPARATOR: char = ':';

/// Resolves image references against the configured remotes and the backend.
#[derive(Debug, Clone, Copy)]
pub struct ImageResolver<'a> {
    remotes: &'a BTreeMap<String, ImageRemote>,
}

impl<'a> ImageResolver<'a> {
    /// Create a resolver over `remotes`.
    pub fn new(remotes: &'a BTreeMap<String, ImageRemote>) -> Self {
        Self { remotes }
    }

    /// Split `<remote>:<alias>` and look the remote up.
    pub fn parse_image_name(&self, image: &str) -> Result<(&'a ImageRemote, String)> {
        let (name, alias) = image
            .split_once(REMOTE_SEPARATOR)
            .ok_or(Error::ImageWithoutRemote)?;
        let remote = self
            .remotes
            .get(name)
            .ok_or_else(|| Error::RemoteNotFound {
                name: name.to_string(),
                known: self.remotes.keys().cloned().collect(),
            })?;
        Ok((remote, alias.to_string()))
    }

    /// Resolve `image` to the source of a new instance of `kind` on `arch`
    /// (backend vocabulary).
    pub async fn resolve(
        &self,
        image: &str,
        kind: InstanceKind,
        arch: &str,
        client: &dyn BackendClient,
    ) -> Result<InstanceSource> {
        if !image.contains(REMOTE_SEPARATOR) {
            return self.resolve_local(image, kind, arch, client).await;
        }

        let (remote, alias) = self.parse_image_name(image)?;
        debug!(image, server = %remote.addr, "Image will be fetched from remote");
        Ok(InstanceSource::Remote {
            alias,
            server: remote.addr.clone(),
            protocol: remote.protocol.as_str().to_string(),
        })
    }

    async fn resolve_local(
        &self,
        alias: &str,
        kind: InstanceKind,
        arch: &str,
        client: &dyn BackendClient,
    ) -> Result<InstanceSource> {
        let entries = client
            .get_image_alias_architectures(kind, alias)
            .await
            .context("resolving alias")?;
        let entry = entries.get(arch).ok_or_else(|| Error::ImageNotFound {
            arch: arch.to_string(),
            kind: kind.to_string(),
            name: alias.to_string(),
        })?;
        let (image, _) = client
            .get_image(&entry.target)
            .await
            .context("fetching image")?;
        debug!(alias, fingerprint = %image.fingerprint, "Resolved local image");
        Ok(InstanceSource::Fingerprint(image.fingerprint))
    }
}
