/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::pin::Pin;
use std::task::{Context, Poll};

use aws_sdk_s3::operation::get_object::{GetObjectError, GetObjectOutput};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::error::NoSuchKey;
use aws_smithy_mocks_experimental::{mock, Rule};
use aws_smithy_types::body::SdkBody;
use bytes::Bytes;
use http_body_1x::Frame;

// re-exported for use by `mock_client_with_stubbed_http_client!`
pub use aws_smithy_mocks_experimental;
pub use aws_smithy_runtime;
pub use aws_smithy_types;
pub use http_02x;

/// Create an S3 client whose responses come from `rules` and whose HTTP client always answers
/// `200 OK` with an empty body, so no request ever leaves the process.
#[macro_export]
macro_rules! mock_client_with_stubbed_http_client {
    ($aws_crate: ident, $rules: expr) => {
        $crate::mock_client_with_stubbed_http_client!(
            $aws_crate,
            $crate::aws_smithy_mocks_experimental::RuleMode::Sequential,
            $rules
        )
    };
    ($aws_crate: ident, $rule_mode: expr, $rules: expr) => {{
        let client = $crate::aws_smithy_mocks_experimental::mock_client!($aws_crate, $rule_mode, $rules);
        $aws_crate::Client::from_conf(
            client
                .config()
                .to_builder()
                .http_client(
                    $crate::aws_smithy_runtime::client::http::test_util::infallible_client_fn(
                        |_req| {
                            $crate::http_02x::Response::builder()
                                .status(200)
                                .body($crate::aws_smithy_types::body::SdkBody::empty())
                                .unwrap()
                        },
                    ),
                )
                .build(),
        )
    }};
}

/// A `GetObject` rule answering requests for `bucket`/`key` with `data`.
pub fn get_object_rule(bucket: &'static str, key: &'static str, data: Vec<u8>) -> Rule {
    mock!(aws_sdk_s3::Client::get_object)
        .match_requests(move |r| r.bucket() == Some(bucket) && r.key() == Some(key))
        .then_output(move || {
            GetObjectOutput::builder()
                .content_length(data.len() as i64)
                .body(ByteStream::from(data.clone()))
                .build()
        })
}

/// A `GetObject` rule failing every request with `NoSuchKey`.
pub fn no_such_key_rule() -> Rule {
    mock!(aws_sdk_s3::Client::get_object)
        .then_error(|| GetObjectError::NoSuchKey(NoSuchKey::builder().build()))
}

/// A `GetObject` rule whose body yields `data` and then fails, as a dropped connection would.
pub fn get_object_rule_failing_after(data: Vec<u8>) -> Rule {
    mock!(aws_sdk_s3::Client::get_object).then_output(move || {
        let body = FailingBody {
            data: Some(Bytes::from(data.clone())),
        };
        GetObjectOutput::builder()
            .body(ByteStream::new(SdkBody::from_body_1_x(body)))
            .build()
    })
}

struct FailingBody {
    data: Option<Bytes>,
}

impl http_body_1x::Body for FailingBody {
    type Data = Bytes;
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.data.take() {
            Some(data) => Poll::Ready(Some(Ok(Frame::data(data)))),
            None => Poll::Ready(Some(Err("connection reset by peer".into()))),
        }
    }
}

/// `size` random alphanumeric bytes
pub fn rand_data(size: usize) -> Vec<u8> {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(size)
        .map(|x| x as u8)
        .collect()
}

/// A fresh temporary directory to stage downloads in.
pub fn staging_dir() -> tempfile::TempDir {
    tempfile::TempDir::with_prefix("s3-file-provisioner").unwrap()
}

/// Build a raw provisioner configuration map from a JSON object literal.
pub fn raw_config(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().expect("configuration must be an object").clone()
}
