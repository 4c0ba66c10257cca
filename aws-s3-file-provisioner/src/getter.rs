/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;
use url::Url;

use crate::config::credentials::KeyPair;
use crate::config::CredentialResolver;
use crate::error::{self, Error, ErrorKind};
use crate::source::S3Location;

const PROVIDER_NAME: &str = "s3-file-provisioner";
const ENDPOINT_DEFAULT_REGION: &str = "us-east-1";

/// Retrieves a remote object to a local path.
#[async_trait]
pub trait Getter: Send + Sync + fmt::Debug {
    /// Fetch the object named by `source` into the file at `local`, replacing it if it exists.
    async fn fetch(&self, local: &Path, source: &Url) -> Result<(), Error>;
}

/// [`Getter`] for objects stored in Amazon S3 or an S3 compatible store.
///
/// See [`S3Location`] for the accepted locator forms. The access key and the secret key are
/// each taken from the locator query parameters, falling back to `AWS_ACCESS_KEY` and
/// `AWS_SECRET_KEY` respectively. Without a complete pair the SDK default provider chain is
/// used.
#[derive(Debug, Clone, Default)]
pub struct S3Getter {
    client: Option<aws_sdk_s3::Client>,
    credentials: CredentialResolver,
}

impl S3Getter {
    /// Create a new `S3Getter` builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Static credentials for `location`. Each half comes from the locator when present and
    /// from the environment otherwise.
    fn key_pair_for(&self, location: &S3Location) -> Option<KeyPair> {
        self.credentials.resolve(location.access_key(), location.secret_key())
    }

    async fn client_for(&self, location: &S3Location) -> aws_sdk_s3::Client {
        if let Some(client) = &self.client {
            return client.clone();
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        let region = location
            .region()
            .or_else(|| location.endpoint().map(|_| ENDPOINT_DEFAULT_REGION));
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_owned()));
        }

        if let Some(key_pair) = self.key_pair_for(location) {
            loader = loader.credentials_provider(Credentials::new(
                key_pair.access_key(),
                key_pair.secret_key(),
                location.session_token().map(str::to_owned),
                None,
                PROVIDER_NAME,
            ));
        }

        let sdk_config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = location.endpoint() {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }
        aws_sdk_s3::Client::from_conf(s3_config.build())
    }
}

#[async_trait]
impl Getter for S3Getter {
    async fn fetch(&self, local: &Path, source: &Url) -> Result<(), Error> {
        let location = S3Location::parse(source)?;
        let span = tracing::debug_span!(
            "s3-get",
            bucket = location.bucket(),
            key = location.key()
        );
        fetch_object(self.client_for(&location).await, &location, local)
            .instrument(span)
            .await
    }
}

async fn fetch_object(
    client: aws_sdk_s3::Client,
    location: &S3Location,
    local: &Path,
) -> Result<(), Error> {
    let mut resp = client
        .get_object()
        .bucket(location.bucket())
        .key(location.key())
        .set_version_id(location.version().map(str::to_owned))
        .send()
        .await
        .map_err(|err| {
            let missing = err
                .as_service_error()
                .map_or(false, |e| e.is_no_such_key());
            if missing {
                Error::new(ErrorKind::NotFound, err)
            } else {
                Error::from(err)
            }
        })?;

    // Create parent directories if they don't exist
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let dest = fs::File::create(local).await?;
    match write_body(&mut resp.body, dest).await {
        Ok(written) => {
            tracing::debug!(written, local = %local.display(), "object fetched");
            Ok(())
        }
        Err(err) => {
            // a partial download is never left behind
            if let Err(rm_err) = fs::remove_file(local).await {
                tracing::debug!("failed to remove partial download: {rm_err}");
            }
            Err(err)
        }
    }
}

async fn write_body(body: &mut ByteStream, mut dest: fs::File) -> Result<u64, Error> {
    let mut written = 0u64;
    while let Some(chunk) = body
        .try_next()
        .await
        .map_err(error::from_kind(ErrorKind::FetchFailed))?
    {
        dest.write_all(&chunk).await?;
        written += chunk.len() as u64;
        tracing::trace!("wrote chunk size: {}", chunk.len());
    }
    dest.flush().await?;
    Ok(written)
}

/// Fluent style builder for [S3Getter]
#[derive(Debug, Clone, Default)]
pub struct Builder {
    client: Option<aws_sdk_s3::Client>,
    credentials: Option<CredentialResolver>,
}

impl Builder {
    /// Set an explicit S3 client to use for every fetch.
    ///
    /// Region, endpoint and credentials carried by the locator are ignored when a client is
    /// set.
    pub fn client(mut self, client: aws_sdk_s3::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Resolver for the environment credential fallback. Default is the process environment.
    pub fn credentials(mut self, credentials: CredentialResolver) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Consumes the builder and constructs a [`S3Getter`]
    pub fn build(self) -> S3Getter {
        S3Getter {
            client: self.client,
            credentials: self.credentials.unwrap_or_default(),
        }
    }
}
