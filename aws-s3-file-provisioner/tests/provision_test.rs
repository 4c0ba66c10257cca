/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_s3_file_provisioner::communicator::{Communicator, FileMeta, LocalCommunicator};
use aws_s3_file_provisioner::error::{BoxError, ErrorKind};
use aws_s3_file_provisioner::getter::S3Getter;
use aws_s3_file_provisioner::ui::{BasicUi, ProgressTracker, Ui};
use aws_s3_file_provisioner::Provisioner;
use aws_types::os_shim_internal::Env;
use serde_json::json;
use test_common::mock_client_with_stubbed_http_client;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

fn provisioner(client: aws_sdk_s3::Client, staging: &Path, destination: &str) -> Provisioner {
    let raw = test_common::raw_config(json!({
        "source": "s3://bucket/key",
        "s3_access_key": "ak",
        "s3_secret_key": "sk",
        "destination": destination,
    }));
    Provisioner::builder()
        .env(Env::from_slice(&[]))
        .staging_dir(staging)
        .getter(S3Getter::builder().client(client).build())
        .prepare([raw])
        .unwrap()
}

/// A communicator that refuses every upload
#[derive(Debug)]
struct BrokenComm;

#[async_trait]
impl Communicator for BrokenComm {
    async fn upload(
        &self,
        _remote_path: &str,
        _body: &mut (dyn AsyncRead + Send + Unpin),
        _meta: &FileMeta,
    ) -> Result<(), BoxError> {
        Err("remote disk full".into())
    }
}

#[derive(Debug, Default)]
struct CountingUi {
    lines: Mutex<Vec<String>>,
    progress: std::sync::Arc<Mutex<(u64, u64, bool)>>,
}

#[derive(Debug)]
struct CountingTracker(std::sync::Arc<Mutex<(u64, u64, bool)>>);

impl ProgressTracker for CountingTracker {
    fn add(&self, n: u64) {
        self.0.lock().unwrap().0 += n;
    }

    fn close(&self) {
        self.0.lock().unwrap().2 = true;
    }
}

impl Ui for CountingUi {
    fn say(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_owned());
    }

    fn error(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("error: {message}"));
    }

    fn track_progress(&self, _name: &str, current: u64, total: u64) -> Box<dyn ProgressTracker> {
        *self.progress.lock().unwrap() = (current, total, false);
        Box::new(CountingTracker(self.progress.clone()))
    }
}

#[tokio::test]
async fn test_end_to_end_provision() {
    let data = test_common::rand_data(64 * 1024);
    let rule = test_common::get_object_rule("bucket", "key", data.clone());
    let client = mock_client_with_stubbed_http_client!(aws_sdk_s3, &[&rule]);

    let staging = test_common::staging_dir();
    let remote = tempfile::tempdir().unwrap();
    let p = provisioner(client, staging.path(), "/tmp/out");
    assert!(p.staging_path().ends_with("out"));

    let ui = CountingUi::default();
    let comm = LocalCommunicator::new(remote.path());
    p.provision(&CancellationToken::new(), &ui, &comm, None)
        .await
        .unwrap();

    assert_eq!(1, rule.num_calls());
    assert_eq!(data, std::fs::read(remote.path().join("tmp/out")).unwrap());
    assert!(!p.staging_path().exists());

    let (done, total, closed) = *ui.progress.lock().unwrap();
    assert_eq!(data.len() as u64, done);
    assert_eq!(data.len() as u64, total);
    assert!(closed);

    let lines = ui.lines.lock().unwrap();
    assert_eq!("Downloading s3://bucket/key => /tmp/out", lines[0]);
    assert!(lines[1].starts_with("Uploading "), "{lines:?}");
    assert!(lines[1].ends_with(" => /tmp/out"), "{lines:?}");
    assert_eq!(2, lines.len());
}

#[tokio::test]
async fn test_upload_failure_leaves_staging_file() {
    let data = test_common::rand_data(1024);
    let rule = test_common::get_object_rule("bucket", "key", data.clone());
    let client = mock_client_with_stubbed_http_client!(aws_sdk_s3, &[&rule]);

    let staging = test_common::staging_dir();
    let p = provisioner(client, staging.path(), "/etc/app/app.toml");
    let ui = BasicUi::new(Vec::new());

    let err = p
        .provision(&CancellationToken::new(), &ui, &BrokenComm, None)
        .await
        .unwrap_err();

    assert_eq!(&ErrorKind::UploadFailed, err.kind());
    assert_eq!(data, std::fs::read(p.staging_path()).unwrap());
    let out = String::from_utf8(ui.into_inner()).unwrap();
    assert!(out.ends_with("error: Upload failed: remote disk full\n"), "{out}");
}

#[tokio::test]
async fn test_missing_object() {
    let rule = test_common::no_such_key_rule();
    let client = mock_client_with_stubbed_http_client!(aws_sdk_s3, &[&rule]);

    let staging = test_common::staging_dir();
    let remote = tempfile::tempdir().unwrap();
    let p = provisioner(client, staging.path(), "/tmp/out");
    let ui = BasicUi::new(Vec::new());

    let err = p
        .provision(
            &CancellationToken::new(),
            &ui,
            &LocalCommunicator::new(remote.path()),
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(&ErrorKind::NotFound, err.kind());
    assert!(!p.staging_path().exists());
    assert!(!remote.path().join("tmp/out").exists());
}

#[tokio::test]
async fn test_generated_data_renders_destination() {
    let data = test_common::rand_data(100);
    let rule = test_common::get_object_rule("bucket", "key", data.clone());
    let client = mock_client_with_stubbed_http_client!(aws_sdk_s3, &[&rule]);

    let staging = test_common::staging_dir();
    let remote = tempfile::tempdir().unwrap();
    let p = provisioner(client, staging.path(), "/home/{{ .User }}/{{ .ID }}.bin");
    let generated = test_common::raw_config(json!({ "User": "ec2-user", "ID": "i-0abc" }));

    p.provision(
        &CancellationToken::new(),
        &BasicUi::new(Vec::new()),
        &LocalCommunicator::new(remote.path()),
        Some(generated),
    )
    .await
    .unwrap();

    assert_eq!(
        data,
        std::fs::read(remote.path().join("home/ec2-user/i-0abc.bin")).unwrap()
    );
    assert_eq!(0, std::fs::read_dir(staging.path()).unwrap().count());
}

#[tokio::test]
async fn test_invalid_configuration_lists_problems() {
    let raw = test_common::raw_config(json!({ "url": "not a uri" }));
    let err = Provisioner::builder()
        .env(Env::from_slice(&[]))
        .prepare([raw])
        .unwrap_err();

    assert_eq!(&ErrorKind::InvalidConfig, err.kind());
    let message = err.to_string();
    assert!(message.contains("4 errors occurred"), "{message}");
    assert!(message.contains("bad source"), "{message}");
}
