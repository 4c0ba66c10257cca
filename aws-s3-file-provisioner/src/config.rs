/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::{Error, ValidationError, ValidationErrors};

/// Inline and environment credential resolution
pub mod credentials;

pub use self::credentials::CredentialResolver;

/// A raw key/value configuration map as supplied by the host.
pub type RawConfig = serde_json::Map<String, Value>;

/// Keys starting with this prefix are reserved for the host and never rejected.
pub const HOST_KEY_PREFIX: &str = "packer_";

const KNOWN_KEYS: &[&str] = &[
    "url",
    "source",
    "s3_access_key",
    "s3_secret_key",
    "destination",
    "packer_build_name",
    "packer_builder_type",
];

#[derive(Debug, Default, Deserialize)]
struct DecodedConfig {
    #[serde(alias = "source")]
    url: Option<String>,
    s3_access_key: Option<String>,
    s3_secret_key: Option<String>,
    destination: Option<String>,
    packer_build_name: Option<String>,
    packer_builder_type: Option<String>,
}

/// Validated configuration for a single provisioner.
///
/// Construct with [`TransferConfig::decode`] from host supplied maps, or with
/// [`TransferConfig::builder`]. Once built the configuration is never modified.
#[derive(Clone)]
pub struct TransferConfig {
    source: Url,
    source_str: String,
    access_key: Option<String>,
    secret_key: Option<String>,
    destination: String,
    build_name: Option<String>,
    build_type: Option<String>,
}

impl TransferConfig {
    /// Create a new `TransferConfig` builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Merge `raws` (later maps override earlier ones, `null` values are skipped), decode and
    /// validate them.
    ///
    /// Every problem found is reported at once through
    /// [`Error::validation_errors`](crate::error::Error::validation_errors).
    pub fn decode<I>(raws: I, credentials: &CredentialResolver) -> Result<TransferConfig, Error>
    where
        I: IntoIterator<Item = RawConfig>,
    {
        let mut merged = RawConfig::new();
        for raw in raws {
            for (key, value) in raw {
                if !value.is_null() {
                    merged.insert(key, value);
                }
            }
        }

        let mut errs = ValidationErrors::default();
        merged.retain(|key, _| {
            if KNOWN_KEYS.contains(&key.as_str()) {
                true
            } else {
                if !key.starts_with(HOST_KEY_PREFIX) {
                    errs.push(ValidationError::UnknownKey(key.clone()));
                }
                false
            }
        });

        let decoded = match serde_json::from_value::<DecodedConfig>(Value::Object(merged)) {
            Ok(decoded) => decoded,
            Err(err) => {
                errs.push(ValidationError::Decode(err.to_string()));
                return Err(errs.into());
            }
        };

        let builder = Builder {
            source: decoded.url,
            access_key: decoded.s3_access_key,
            secret_key: decoded.s3_secret_key,
            destination: decoded.destination,
            build_name: decoded.packer_build_name,
            build_type: decoded.packer_builder_type,
        };
        builder.validate(errs, credentials)
    }

    /// The parsed source locator, without any credentials attached
    pub fn source(&self) -> &Url {
        &self.source
    }

    /// The source exactly as configured
    pub fn source_str(&self) -> &str {
        &self.source_str
    }

    /// Inline access key, if configured
    pub fn access_key(&self) -> Option<&str> {
        self.access_key.as_deref()
    }

    /// Inline secret key, if configured
    pub fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    /// Remote destination path, possibly containing placeholders
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Name of the host build this provisioner runs in
    pub fn build_name(&self) -> Option<&str> {
        self.build_name.as_deref()
    }

    /// Type of the host builder this provisioner runs in
    pub fn build_type(&self) -> Option<&str> {
        self.build_type.as_deref()
    }

    /// The source locator with inline credentials appended as query parameters.
    pub fn effective_source(&self) -> Url {
        crate::source::with_credentials(&self.source, self.access_key(), self.secret_key())
    }
}

impl fmt::Debug for TransferConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferConfig")
            .field("source", &self.source_str)
            .field("access_key", &self.access_key)
            .field(
                "secret_key",
                &self.secret_key.as_ref().map(|_| "** redacted **"),
            )
            .field("destination", &self.destination)
            .field("build_name", &self.build_name)
            .field("build_type", &self.build_type)
            .finish()
    }
}

/// Fluent style builder for [TransferConfig]
#[derive(Debug, Clone, Default)]
pub struct Builder {
    source: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    destination: Option<String>,
    build_name: Option<String>,
    build_type: Option<String>,
}

impl Builder {
    /// URI of the object to retrieve, e.g. `s3://bucket/key`
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Inline access key id. Falls back to `AWS_ACCESS_KEY` when unset.
    pub fn access_key(mut self, access_key: impl Into<String>) -> Self {
        self.access_key = Some(access_key.into());
        self
    }

    /// Inline secret access key. Falls back to `AWS_SECRET_KEY` when unset.
    pub fn secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Path on the provisioned machine to upload to
    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Host build name exposed to placeholders as `build_name`
    pub fn build_name(mut self, build_name: impl Into<String>) -> Self {
        self.build_name = Some(build_name.into());
        self
    }

    /// Host builder type exposed to placeholders as `build_type`
    pub fn build_type(mut self, build_type: impl Into<String>) -> Self {
        self.build_type = Some(build_type.into());
        self
    }

    /// Consumes the builder and validates it into a [`TransferConfig`]
    pub fn build(self, credentials: &CredentialResolver) -> Result<TransferConfig, Error> {
        self.validate(ValidationErrors::default(), credentials)
    }

    fn validate(
        self,
        mut errs: ValidationErrors,
        credentials: &CredentialResolver,
    ) -> Result<TransferConfig, Error> {
        if credentials.access_key(self.access_key.as_deref()).is_none() {
            errs.push(ValidationError::MissingAccessKey);
        }

        if credentials.secret_key(self.secret_key.as_deref()).is_none() {
            errs.push(ValidationError::MissingSecretKey);
        }

        let source = match self.source {
            None => {
                errs.push(ValidationError::MissingSource);
                None
            }
            Some(s) if s.is_empty() => {
                errs.push(ValidationError::MissingSource);
                None
            }
            Some(s) => match Url::parse(&s) {
                Ok(url) => Some((url, s)),
                Err(err) => {
                    errs.push(ValidationError::BadSource(err));
                    None
                }
            },
        };

        let destination = self.destination.unwrap_or_default();
        if destination.is_empty() {
            errs.push(ValidationError::MissingDestination);
        } else if destination.ends_with('/') {
            errs.push(ValidationError::DestinationNotAFile(destination.clone()));
        }

        match source {
            Some((source, source_str)) if errs.is_empty() => Ok(TransferConfig {
                source,
                source_str,
                access_key: self.access_key.filter(|v| !v.is_empty()),
                secret_key: self.secret_key.filter(|v| !v.is_empty()),
                destination,
                build_name: self.build_name,
                build_type: self.build_type,
            }),
            _ => Err(errs.into()),
        }
    }
}
