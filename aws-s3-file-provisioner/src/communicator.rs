/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::BoxError;

/// Communicator writing into a directory on the local filesystem
pub mod local;

pub use self::local::LocalCommunicator;

/// Transfers files onto the machine being provisioned.
///
/// Implementations are supplied by the host and are already connected to the target machine
/// when the provisioner runs.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Upload everything read from `body` to `remote_path` on the target machine.
    ///
    /// `meta` describes the local file the body is read from.
    async fn upload(
        &self,
        remote_path: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
        meta: &FileMeta,
    ) -> Result<(), BoxError>;
}

/// Metadata of a local file being uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    name: String,
    size: u64,
    mode: Option<u32>,
    modified: Option<SystemTime>,
}

impl FileMeta {
    /// Create metadata for a file of `size` bytes
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mode: None,
            modified: None,
        }
    }

    /// Capture metadata from the local filesystem
    pub fn from_metadata(name: impl Into<String>, metadata: &std::fs::Metadata) -> Self {
        Self {
            name: name.into(),
            size: metadata.len(),
            mode: unix_mode(metadata),
            modified: metadata.modified().ok(),
        }
    }

    /// Base name of the file
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length of the file in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Unix permission bits, when known
    pub fn mode(&self) -> Option<u32> {
        self.mode
    }

    /// Last modification time, when known
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

#[cfg(unix)]
fn unix_mode(metadata: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &std::fs::Metadata) -> Option<u32> {
    None
}
