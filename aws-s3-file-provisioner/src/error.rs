/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

/// A boxed error that is `Send` and `Sync`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

use aws_sdk_s3::error::ProvideErrorMetadata;

/// Errors returned by this library
///
/// NOTE: Use [`aws_sdk_s3::error::DisplayErrorContext`] or similar to display
/// the entire error cause/source chain.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: BoxError,
}

/// General categories of provisioning errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The provisioner configuration failed validation. The source is always a
    /// [`ValidationErrors`] listing every problem found.
    InvalidConfig,

    /// The source locator could not be resolved to an object
    InvalidSource,

    /// Retrieving the source object failed
    FetchFailed,

    /// The source object (bucket or key) does not exist
    NotFound,

    /// Placeholder rendering failed for the given field
    RenderFailed(RenderTarget),

    /// I/O errors on the local staging file
    IOError,

    /// The communicator failed to upload the staging file
    UploadFailed,

    /// The staging file could not be removed after a successful upload
    CleanupFailed,
}

/// The configuration value whose placeholders failed to render.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RenderTarget {
    /// The local staging path
    Source,
    /// The remote destination path
    Destination,
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderTarget::Source => f.write_str("source"),
            RenderTarget::Destination => f.write_str("destination"),
        }
    }
}

impl Error {
    /// Creates a new provisioning [`Error`] from a known kind of error as well as an arbitrary
    /// error source.
    pub fn new<E>(kind: ErrorKind, err: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            kind,
            source: err.into(),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the individual validation failures when this is an
    /// [`ErrorKind::InvalidConfig`] error.
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        self.source.downcast_ref::<ValidationErrors>()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::InvalidConfig => write!(f, "invalid configuration: {}", self.source),
            ErrorKind::InvalidSource => write!(f, "invalid source locator"),
            ErrorKind::FetchFailed => write!(f, "failed to fetch source object"),
            ErrorKind::NotFound => write!(f, "source object not found"),
            ErrorKind::RenderFailed(target) => write!(f, "error interpolating {target}"),
            ErrorKind::IOError => write!(f, "I/O error"),
            ErrorKind::UploadFailed => write!(f, "upload failed"),
            ErrorKind::CleanupFailed => write!(f, "clean up failed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::new(ErrorKind::IOError, value)
    }
}

impl From<ValidationErrors> for Error {
    fn from(value: ValidationErrors) -> Self {
        Self::new(ErrorKind::InvalidConfig, value)
    }
}

impl<E, R> From<aws_sdk_s3::error::SdkError<E, R>> for Error
where
    E: std::error::Error + ProvideErrorMetadata + Send + Sync + 'static,
    R: Send + Sync + fmt::Debug + 'static,
{
    fn from(value: aws_sdk_s3::error::SdkError<E, R>) -> Self {
        let kind = match value.code() {
            Some("NotFound" | "NoSuchKey" | "NoSuchBucket") => ErrorKind::NotFound,
            _ => ErrorKind::FetchFailed,
        };

        Error::new(kind, value)
    }
}

pub(crate) fn invalid_source<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::InvalidSource, err)
}

pub(crate) fn from_kind<E>(kind: ErrorKind) -> impl FnOnce(E) -> Error
where
    E: Into<BoxError>,
{
    |err| Error::new(kind, err)
}

/// A single configuration problem found while preparing the provisioner.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    /// The raw configuration could not be decoded
    Decode(String),

    /// A key the provisioner does not recognise
    UnknownKey(String),

    /// Neither `AWS_ACCESS_KEY` nor `s3_access_key` was given
    MissingAccessKey,

    /// Neither `AWS_SECRET_KEY` nor `s3_secret_key` was given
    MissingSecretKey,

    /// No `url` (or `source`) was given
    MissingSource,

    /// The source is not a well formed absolute URI
    BadSource(url::ParseError),

    /// No `destination` was given
    MissingDestination,

    /// The destination ends in `/` and so names no file
    DestinationNotAFile(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Decode(msg) => write!(f, "failed to decode configuration: {msg}"),
            ValidationError::UnknownKey(key) => write!(f, "unknown configuration key: {key:?}"),
            ValidationError::MissingAccessKey => write!(
                f,
                "AWS_ACCESS_KEY environment variable or inline s3_access_key is required"
            ),
            ValidationError::MissingSecretKey => write!(
                f,
                "AWS_SECRET_KEY environment variable or inline s3_secret_key is required"
            ),
            ValidationError::MissingSource => write!(f, "url (or source) is required"),
            ValidationError::BadSource(err) => write!(f, "bad source: {err}"),
            ValidationError::MissingDestination => {
                write!(f, "destination for S3 download is required")
            }
            ValidationError::DestinationNotAFile(dest) => {
                write!(f, "destination {dest:?} must name a file, not a directory")
            }
        }
    }
}

/// Every [`ValidationError`] found in one pass over the configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub(crate) fn push(&mut self, err: ValidationError) {
        self.errors.push(err);
    }

    /// Returns true when no problems were recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of problems recorded
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterate the recorded problems in the order they were found
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    /// Returns true if an equal problem was recorded
    pub fn contains(&self, err: &ValidationError) -> bool {
        self.errors.contains(err)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.errors.len();
        write!(f, "{n} error{} occurred:", if n == 1 { "" } else { "s" })?;
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}
