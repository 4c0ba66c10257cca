/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

use super::{Communicator, FileMeta};
use crate::error::BoxError;

/// A [`Communicator`] for machines whose filesystem is reachable locally, e.g. a chroot or a
/// mounted image.
///
/// Remote paths are resolved below `root`; a leading `/` is ignored and `..` components are
/// rejected.
#[derive(Debug, Clone)]
pub struct LocalCommunicator {
    root: PathBuf,
}

impl LocalCommunicator {
    /// Create a communicator rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory remote paths are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, remote_path: &str) -> Result<PathBuf, BoxError> {
        let relative = Path::new(remote_path.trim_start_matches('/'));
        let mut target = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => target.push(part),
                Component::CurDir => {}
                _ => return Err(format!("remote path {remote_path:?} escapes the root").into()),
            }
        }
        if target == self.root {
            return Err(format!("remote path {remote_path:?} names no file").into());
        }
        Ok(target)
    }
}

#[async_trait]
impl Communicator for LocalCommunicator {
    async fn upload(
        &self,
        remote_path: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
        meta: &FileMeta,
    ) -> Result<(), BoxError> {
        let target = self.resolve(remote_path)?;

        // Create parent directories if they don't exist
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&target).await?;
        let written = tokio::io::copy(body, &mut file).await?;
        file.flush().await?;
        tracing::debug!(target = %target.display(), written, "local upload complete");

        if written != meta.size() {
            return Err(format!(
                "short upload to {}: wrote {written} of {} bytes",
                target.display(),
                meta.size()
            )
            .into());
        }

        apply_mode(&target, meta).await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn apply_mode(target: &Path, meta: &FileMeta) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    match meta.mode() {
        Some(mode) => fs::set_permissions(target, std::fs::Permissions::from_mode(mode)).await,
        None => Ok(()),
    }
}

#[cfg(not(unix))]
async fn apply_mode(_target: &Path, _meta: &FileMeta) -> std::io::Result<()> {
    Ok(())
}
