/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/* Automatically managed default lints */
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
/* End of automatically managed default lints */

//! AWS S3 File Provisioner
//!
//! Copies a single object from Amazon S3 (or an S3 compatible store) onto a machine that is
//! being provisioned. A run downloads the object to a local staging file, uploads the staging
//! file through the host supplied [`Communicator`](crate::communicator::Communicator) and then
//! removes the staging file.
//!
//! ```no_run
//! use aws_s3_file_provisioner::communicator::LocalCommunicator;
//! use aws_s3_file_provisioner::ui::BasicUi;
//! use aws_s3_file_provisioner::Provisioner;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn provision() -> Result<(), aws_s3_file_provisioner::error::Error> {
//!     let raw = serde_json::json!({
//!         "url": "s3://my-bucket/configs/app.toml",
//!         "destination": "/etc/app/app.toml",
//!     });
//!     let provisioner = Provisioner::builder()
//!         .prepare([raw.as_object().unwrap().clone()])?;
//!
//!     let ui = BasicUi::new(std::io::stdout());
//!     let comm = LocalCommunicator::new("/mnt/image-root");
//!     provisioner
//!         .provision(&CancellationToken::new(), &ui, &comm, None)
//!         .await
//! }
//! ```

#![warn(
    missing_debug_implementations,
    missing_docs,
    rustdoc::missing_crate_level_docs,
    unreachable_pub,
    rust_2018_idioms
)]

/// Error types emitted by `aws-s3-file-provisioner`
pub mod error;

/// Provisioner configuration and validation
pub mod config;

/// Source object locators
pub mod source;

/// Placeholder rendering with per-run generated data
pub mod interpolate;

/// Retrieval of remote objects to local disk
pub mod getter;

/// Transfer of local files onto the provisioned machine
pub mod communicator;

/// User facing status output
pub mod ui;

/// Types and helpers for I/O
pub mod io;

/// The provisioner and its transfer orchestration
pub mod provisioner;

pub use self::config::TransferConfig;
pub use self::provisioner::Provisioner;
