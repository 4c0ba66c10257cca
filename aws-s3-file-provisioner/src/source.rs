/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::config::credentials::KeyPair;
use crate::error::{self, Error};

/// Query parameter carrying the access key id
pub const ACCESS_KEY_PARAM: &str = "aws_access_key_id";

/// Query parameter carrying the secret access key
pub const SECRET_KEY_PARAM: &str = "aws_access_key_secret";

/// Query parameter carrying a session token
pub const SESSION_TOKEN_PARAM: &str = "aws_access_token";

/// Query parameter overriding the bucket region
pub const REGION_PARAM: &str = "region";

/// Query parameter selecting an object version
pub const VERSION_PARAM: &str = "version";

const AMAZONAWS_SUFFIX: &str = ".amazonaws.com";
const DEFAULT_REGION: &str = "us-east-1";

/// Returns a copy of `source` with the non-empty credentials appended as query parameters.
///
/// `source` itself is never modified.
pub fn with_credentials(source: &Url, access_key: Option<&str>, secret_key: Option<&str>) -> Url {
    let params = [(ACCESS_KEY_PARAM, access_key), (SECRET_KEY_PARAM, secret_key)];
    let mut url = source.clone();
    if params.iter().any(|(_, v)| v.is_some_and(|v| !v.is_empty())) {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in params {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                pairs.append_pair(name, value);
            }
        }
    }
    url
}

/// An S3 object resolved from a source locator.
///
/// Supported locator forms:
///
/// * `s3://bucket/key`
/// * `https://s3.amazonaws.com/bucket/key` and `https://s3[.-]<region>.amazonaws.com/bucket/key`
/// * `https://bucket.s3.amazonaws.com/key` and `https://bucket.s3[.-]<region>.amazonaws.com/key`
/// * any other `http(s)` host, treated as a path style S3 compatible endpoint
///
/// The `region`, `version`, `aws_access_key_id`, `aws_access_key_secret` and `aws_access_token`
/// query parameters are honored for every form.
#[derive(Clone, PartialEq, Eq)]
pub struct S3Location {
    bucket: String,
    key: String,
    region: Option<String>,
    endpoint: Option<String>,
    version: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    session_token: Option<String>,
}

impl S3Location {
    /// Resolve `url` into the object it names
    pub fn parse(url: &Url) -> Result<S3Location, Error> {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| error::invalid_source(format!("{url} has no host")))?;

        let path = url.path().trim_start_matches('/');
        let (bucket, key, region, endpoint) = match url.scheme() {
            "s3" => (host.to_owned(), path.to_owned(), None, None),
            "http" | "https" => match host.strip_suffix(AMAZONAWS_SUFFIX) {
                Some(prefix) => parse_aws_host(url, prefix, path)?,
                None => {
                    let endpoint = match url.port() {
                        Some(port) => format!("{}://{host}:{port}", url.scheme()),
                        None => format!("{}://{host}", url.scheme()),
                    };
                    let (bucket, key) = split_path_style(path);
                    (bucket, key, None, Some(endpoint))
                }
            },
            other => {
                return Err(error::invalid_source(format!(
                    "unsupported source scheme {other:?}"
                )))
            }
        };

        if bucket.is_empty() {
            return Err(error::invalid_source(format!("{url} names no bucket")));
        }

        let key = percent_decode_str(&key)
            .decode_utf8()
            .map_err(error::invalid_source)?
            .into_owned();
        if key.is_empty() {
            return Err(error::invalid_source(format!("{url} names no object key")));
        }

        let query = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .filter(|v| !v.is_empty())
        };

        Ok(S3Location {
            bucket,
            key,
            region: query(REGION_PARAM).or(region),
            endpoint,
            version: query(VERSION_PARAM),
            access_key: query(ACCESS_KEY_PARAM),
            secret_key: query(SECRET_KEY_PARAM),
            session_token: query(SESSION_TOKEN_PARAM),
        })
    }

    /// Bucket holding the object
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Region of the bucket when the locator determines one
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Custom endpoint for S3 compatible stores
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Object version id
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Access key id carried by the locator
    pub fn access_key(&self) -> Option<&str> {
        self.access_key.as_deref()
    }

    /// Secret access key carried by the locator
    pub fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    /// Static credentials carried by the locator, when it has both halves
    pub fn credentials(&self) -> Option<KeyPair> {
        Some(KeyPair::new(self.access_key()?, self.secret_key()?))
    }

    /// Session token carried by the locator
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl fmt::Debug for S3Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Location")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("version", &self.version)
            .field("access_key", &self.access_key)
            .field(
                "secret_key",
                &self.secret_key.as_ref().map(|_| "** redacted **"),
            )
            .finish_non_exhaustive()
    }
}

type HostParts = (String, String, Option<String>, Option<String>);

/// `prefix` is the host with `.amazonaws.com` removed, e.g. `bucket.s3.us-west-2`.
fn parse_aws_host(url: &Url, prefix: &str, path: &str) -> Result<HostParts, Error> {
    let labels: Vec<&str> = prefix.split('.').collect();
    let s3_idx = labels
        .iter()
        .position(|l| *l == "s3" || l.starts_with("s3-"))
        .ok_or_else(|| error::invalid_source(format!("{url} is not an S3 endpoint")))?;

    let region = match labels[s3_idx].strip_prefix("s3-") {
        Some(region) => region.to_owned(),
        None => labels[s3_idx + 1..]
            .last()
            .map(|r| (*r).to_owned())
            .unwrap_or_else(|| DEFAULT_REGION.to_owned()),
    };

    let virtual_bucket = labels[..s3_idx].join(".");
    let (bucket, key) = if virtual_bucket.is_empty() {
        split_path_style(path)
    } else {
        (virtual_bucket, path.to_owned())
    };
    Ok((bucket, key, Some(region), None))
}

fn split_path_style(path: &str) -> (String, String) {
    let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
    (bucket.to_owned(), key.to_owned())
}
