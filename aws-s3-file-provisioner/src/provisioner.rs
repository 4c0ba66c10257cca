/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aws_types::os_shim_internal::Env;
use path_clean::PathClean;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::communicator::{Communicator, FileMeta};
use crate::config::{CredentialResolver, RawConfig, TransferConfig};
use crate::error::{Error, ErrorKind, RenderTarget};
use crate::getter::{Getter, S3Getter};
use crate::interpolate::{GeneratedData, RenderContext};
use crate::io::ProgressReader;
use crate::ui::Ui;

const DEFAULT_STAGING_DIR: &str = ".";

/// Copies one S3 object onto a machine being provisioned.
///
/// Each call to [`Provisioner::provision`] is an independent run: the object is fetched to a
/// staging file named after the last segment of the destination, uploaded through the
/// communicator and then removed.
///
/// Every run of one instance stages at the same [`staging_path`](Provisioner::staging_path),
/// so runs on an instance must not overlap. Concurrent runs need their own instances with
/// distinct staging directories.
#[derive(Debug, Clone)]
pub struct Provisioner {
    config: TransferConfig,
    getter: Arc<dyn Getter>,
    staging_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    Idle,
    Fetching,
    Fetched,
    Uploading,
    Uploaded,
    CleanedUp,
    Failed,
}

#[derive(Debug)]
struct Run {
    state: TransferState,
}

impl Run {
    fn new() -> Self {
        Self {
            state: TransferState::Idle,
        }
    }

    fn advance(&mut self, next: TransferState) {
        tracing::debug!(from = ?self.state, to = ?next, "transfer state");
        self.state = next;
    }
}

impl Provisioner {
    /// Create a new `Provisioner` builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The validated configuration
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// The local path the object is fetched to, before placeholder rendering.
    ///
    /// This is the last `/` separated segment of the destination inside the staging directory.
    pub fn staging_path(&self) -> PathBuf {
        self.staging_dir.join(staging_name(self.config.destination()))
    }

    /// Run one transfer against the machine reachable through `comm`.
    ///
    /// `generated_data` holds the values placeholders in the destination may refer to. The
    /// cancellation token is accepted for the host's benefit; a run is not interrupted once it
    /// has started.
    #[tracing::instrument(skip_all, level = "debug", name = "provision", fields(
        destination = self.config.destination()
    ))]
    pub async fn provision(
        &self,
        cancel: &CancellationToken,
        ui: &dyn Ui,
        comm: &dyn Communicator,
        generated_data: Option<GeneratedData>,
    ) -> Result<(), Error> {
        if cancel.is_cancelled() {
            tracing::debug!("cancellation requested before the run started; continuing");
        }

        let mut run = Run::new();
        let result = self.run(&mut run, ui, comm, generated_data).await;
        if let Err(err) = &result {
            tracing::error!(state = ?run.state, "provisioning failed: {err}");
            run.advance(TransferState::Failed);
        }
        result
    }

    async fn run(
        &self,
        run: &mut Run,
        ui: &dyn Ui,
        comm: &dyn Communicator,
        generated_data: Option<GeneratedData>,
    ) -> Result<(), Error> {
        let mut ctx =
            RenderContext::new().with_build(self.config.build_name(), self.config.build_type());
        ctx.merge_data(generated_data.unwrap_or_default());

        let source = self.config.effective_source();
        let staging = self.staging_path();

        run.advance(TransferState::Fetching);
        let fetched = self.getter.fetch(&staging, &source).await;
        ui.say(&format!(
            "Downloading {} => {}",
            self.config.source_str(),
            self.config.destination()
        ));
        fetched?;
        run.advance(TransferState::Fetched);

        let src = self.render_staging(&ctx, &staging).await?;
        let dst = ctx
            .render(self.config.destination())
            .map_err(|err| Error::new(ErrorKind::RenderFailed(RenderTarget::Destination), err))?;

        let metadata = fs::metadata(&src).await?;
        let name = staging_name(&dst);
        let meta = FileMeta::from_metadata(name, &metadata);

        run.advance(TransferState::Uploading);
        {
            let file = fs::File::open(&src).await?;
            let mut reader = ProgressReader::new(file, ui.track_progress(name, 0, meta.size()));
            ui.say(&format!("Uploading {} => {dst}", src.display()));
            if let Err(err) = comm.upload(&dst, &mut reader, &meta).await {
                ui.error(&format!("Upload failed: {err}"));
                return Err(Error::new(ErrorKind::UploadFailed, err));
            }
            tracing::debug!(bytes = reader.bytes_read(), "upload complete");
        }
        run.advance(TransferState::Uploaded);

        if let Err(err) = fs::remove_file(&src).await {
            ui.error(&format!("Clean up failed: {err}"));
            return Err(Error::new(ErrorKind::CleanupFailed, err));
        }
        run.advance(TransferState::CleanedUp);
        Ok(())
    }

    /// Render placeholders in the staging file name, moving the fetched file if the name
    /// changes.
    async fn render_staging(&self, ctx: &RenderContext, staging: &Path) -> Result<PathBuf, Error> {
        let raw = staging_name(self.config.destination());
        let rendered = ctx
            .render(raw)
            .map_err(|err| Error::new(ErrorKind::RenderFailed(RenderTarget::Source), err))?;
        if rendered == raw {
            return Ok(staging.to_path_buf());
        }
        if rendered.is_empty() || rendered.contains('/') {
            return Err(Error::new(
                ErrorKind::RenderFailed(RenderTarget::Source),
                format!("{raw:?} rendered to {rendered:?}, which is not a file name"),
            ));
        }

        let target = self.staging_dir.join(&rendered);
        fs::rename(staging, &target).await?;
        tracing::debug!(from = %staging.display(), to = %target.display(), "renamed staging file");
        Ok(target)
    }
}

fn staging_name(destination: &str) -> &str {
    match destination.rfind('/') {
        Some(i) => &destination[i + 1..],
        None => destination,
    }
}

/// Fluent style builder for [Provisioner]
#[derive(Debug, Clone, Default)]
pub struct Builder {
    getter: Option<Arc<dyn Getter>>,
    staging_dir: Option<PathBuf>,
    env: Option<Env>,
}

impl Builder {
    /// Set the getter used to fetch the source object.
    ///
    /// Defaults to an [`S3Getter`] using the SDK default configuration.
    pub fn getter(mut self, getter: impl Getter + 'static) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Directory the object is staged in. Defaults to the current directory.
    pub fn staging_dir(mut self, staging_dir: impl AsRef<Path>) -> Self {
        self.staging_dir = Some(staging_dir.as_ref().clean());
        self
    }

    /// Environment snapshot credentials fall back to. Defaults to the process environment.
    pub fn env(mut self, env: Env) -> Self {
        self.env = Some(env);
        self
    }

    /// Merge and validate `raws` into a ready [`Provisioner`].
    ///
    /// See [`TransferConfig::decode`] for how the maps are combined.
    pub fn prepare<I>(self, raws: I) -> Result<Provisioner, Error>
    where
        I: IntoIterator<Item = RawConfig>,
    {
        let credentials = CredentialResolver::new(self.env.unwrap_or_else(Env::real));
        let config = TransferConfig::decode(raws, &credentials)?;
        let getter = match self.getter {
            Some(getter) => getter,
            None => Arc::new(S3Getter::builder().credentials(credentials).build()),
        };

        Ok(Provisioner {
            config,
            getter,
            staging_dir: self
                .staging_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_DIR)),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::BoxError;
    use crate::ui::BasicUi;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::io::{AsyncRead, AsyncReadExt};
    use url::Url;

    #[derive(Debug)]
    struct StaticGetter(Result<Vec<u8>, ErrorKind>);

    #[async_trait]
    impl Getter for StaticGetter {
        async fn fetch(&self, local: &Path, _source: &Url) -> Result<(), Error> {
            match &self.0 {
                Ok(data) => Ok(fs::write(local, data).await?),
                Err(kind) => Err(Error::new(kind.clone(), "stubbed fetch failure")),
            }
        }
    }

    /// Reports success without writing anything
    #[derive(Debug)]
    struct NoFileGetter;

    #[async_trait]
    impl Getter for NoFileGetter {
        async fn fetch(&self, _local: &Path, _source: &Url) -> Result<(), Error> {
            Ok(())
        }
    }

    /// Consumes the upload, then moves the local file out from under the provisioner
    #[derive(Debug)]
    struct MovingComm {
        from: PathBuf,
        to: PathBuf,
    }

    #[async_trait]
    impl Communicator for MovingComm {
        async fn upload(
            &self,
            _remote_path: &str,
            body: &mut (dyn AsyncRead + Send + Unpin),
            _meta: &FileMeta,
        ) -> Result<(), BoxError> {
            let mut data = Vec::new();
            body.read_to_end(&mut data).await?;
            fs::rename(&self.from, &self.to).await?;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct RecordingComm {
        fail: bool,
        uploads: Mutex<Vec<(String, Vec<u8>, FileMeta)>>,
    }

    #[async_trait]
    impl Communicator for RecordingComm {
        async fn upload(
            &self,
            remote_path: &str,
            body: &mut (dyn AsyncRead + Send + Unpin),
            meta: &FileMeta,
        ) -> Result<(), BoxError> {
            if self.fail {
                return Err("connection reset".into());
            }
            let mut data = Vec::new();
            body.read_to_end(&mut data).await?;
            self.uploads
                .lock()
                .unwrap()
                .push((remote_path.to_owned(), data, meta.clone()));
            Ok(())
        }
    }

    fn provisioner(
        staging: &Path,
        destination: &str,
        getter: impl Getter + 'static,
    ) -> Provisioner {
        let raw = json!({
            "url": "s3://bucket/key",
            "destination": destination,
            "s3_access_key": "ak",
            "s3_secret_key": "sk",
            "packer_build_name": "web",
        });
        Provisioner::builder()
            .env(Env::from_slice(&[]))
            .staging_dir(staging)
            .getter(getter)
            .prepare([raw.as_object().unwrap().clone()])
            .unwrap()
    }

    fn output(ui: BasicUi<Vec<u8>>) -> String {
        String::from_utf8(ui.into_inner()).unwrap()
    }

    #[test]
    fn test_staging_path_uses_last_segment() {
        let p = provisioner(Path::new("stage/./dir"), "a/b/c.txt", StaticGetter(Ok(vec![])));
        assert_eq!(Path::new("stage/dir/c.txt"), p.staging_path());
        assert!(p.staging_path().ends_with("c.txt"));
    }

    #[test]
    fn test_default_staging_dir() {
        let raw = json!({
            "url": "s3://bucket/key",
            "destination": "/tmp/out",
            "s3_access_key": "ak",
            "s3_secret_key": "sk",
        });
        let p = Provisioner::builder()
            .env(Env::from_slice(&[]))
            .prepare([raw.as_object().unwrap().clone()])
            .unwrap();
        assert_eq!(Path::new("./out"), p.staging_path());
    }

    #[test]
    fn test_prepare_reports_validation_errors() {
        let err = Provisioner::builder()
            .env(Env::from_slice(&[]))
            .prepare([RawConfig::new()])
            .unwrap_err();
        assert_eq!(&ErrorKind::InvalidConfig, err.kind());
        assert_eq!(4, err.validation_errors().unwrap().len());
    }

    #[tokio::test]
    async fn test_successful_run_removes_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = provisioner(dir.path(), "/tmp/out", StaticGetter(Ok(b"hello".to_vec())));
        let ui = BasicUi::new(Vec::new());
        let comm = RecordingComm::default();

        p.provision(&CancellationToken::new(), &ui, &comm, None)
            .await
            .unwrap();

        assert!(!p.staging_path().exists());
        let uploads = comm.uploads.lock().unwrap();
        assert_eq!(1, uploads.len());
        let (path, data, meta) = &uploads[0];
        assert_eq!("/tmp/out", path);
        assert_eq!(b"hello", &data[..]);
        assert_eq!(5, meta.size());
        assert_eq!("out", meta.name());

        let out = output(ui);
        assert!(out.starts_with("Downloading s3://bucket/key => /tmp/out\n"), "{out}");
        assert!(out.contains("Uploading "), "{out}");
        assert!(!out.contains("aws_access_key"), "{out}");
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = provisioner(dir.path(), "/tmp/out", StaticGetter(Ok(b"hello".to_vec())));
        let ui = BasicUi::new(Vec::new());
        let comm = RecordingComm {
            fail: true,
            ..Default::default()
        };

        let err = p
            .provision(&CancellationToken::new(), &ui, &comm, None)
            .await
            .unwrap_err();

        assert_eq!(&ErrorKind::UploadFailed, err.kind());
        assert!(p.staging_path().exists());
        assert!(output(ui).contains("error: Upload failed: connection reset\n"));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let p = provisioner(dir.path(), "/tmp/out", StaticGetter(Err(ErrorKind::NotFound)));
        let ui = BasicUi::new(Vec::new());
        let comm = RecordingComm::default();

        let err = p
            .provision(&CancellationToken::new(), &ui, &comm, None)
            .await
            .unwrap_err();

        assert_eq!(&ErrorKind::NotFound, err.kind());
        assert!(comm.uploads.lock().unwrap().is_empty());
        assert_eq!("Downloading s3://bucket/key => /tmp/out\n", output(ui));
    }

    #[tokio::test]
    async fn test_destination_is_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let p = provisioner(
            dir.path(),
            "/srv/{{ .ID }}/{{ build_name }}.conf",
            StaticGetter(Ok(b"conf".to_vec())),
        );
        let ui = BasicUi::new(Vec::new());
        let comm = RecordingComm::default();
        let data = json!({ "ID": "i-1234" }).as_object().unwrap().clone();

        p.provision(&CancellationToken::new(), &ui, &comm, Some(data))
            .await
            .unwrap();

        let uploads = comm.uploads.lock().unwrap();
        assert_eq!("/srv/i-1234/web.conf", uploads[0].0);
        assert_eq!("web.conf", uploads[0].2.name());
        assert!(!p.staging_path().exists());
        assert!(!dir.path().join("web.conf").exists());
    }

    #[tokio::test]
    async fn test_render_failure_names_field() {
        let dir = tempfile::tempdir().unwrap();
        let ui = BasicUi::new(Vec::new());
        let comm = RecordingComm::default();

        let p = provisioner(
            dir.path(),
            "/srv/{{ .Missing }}/out",
            StaticGetter(Ok(b"x".to_vec())),
        );
        let err = p
            .provision(&CancellationToken::new(), &ui, &comm, None)
            .await
            .unwrap_err();
        assert_eq!(
            &ErrorKind::RenderFailed(RenderTarget::Destination),
            err.kind()
        );
        assert_eq!("error interpolating destination", err.to_string());

        let p = provisioner(
            dir.path(),
            "/srv/{{ .Missing }}",
            StaticGetter(Ok(b"x".to_vec())),
        );
        let err = p
            .provision(&CancellationToken::new(), &ui, &comm, None)
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::RenderFailed(RenderTarget::Source), err.kind());
        assert!(comm.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_is_advisory() {
        let dir = tempfile::tempdir().unwrap();
        let p = provisioner(dir.path(), "out", StaticGetter(Ok(b"x".to_vec())));
        let ui = BasicUi::new(Vec::new());
        let comm = RecordingComm::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        p.provision(&cancel, &ui, &comm, None).await.unwrap();
        assert_eq!(1, comm.uploads.lock().unwrap().len());
    }

    #[tokio::test]
    async fn test_missing_staging_file_fails_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        let p = provisioner(dir.path(), "/tmp/out", NoFileGetter);
        let ui = BasicUi::new(Vec::new());
        let comm = RecordingComm::default();

        let err = p
            .provision(&CancellationToken::new(), &ui, &comm, None)
            .await
            .unwrap_err();

        assert_eq!(&ErrorKind::IOError, err.kind());
        assert!(comm.uploads.lock().unwrap().is_empty());
        assert_eq!("Downloading s3://bucket/key => /tmp/out\n", output(ui));
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let p = provisioner(dir.path(), "/tmp/out", StaticGetter(Ok(b"hello".to_vec())));
        let ui = BasicUi::new(Vec::new());
        let moved = dir.path().join("moved");
        let comm = MovingComm {
            from: p.staging_path(),
            to: moved.clone(),
        };

        let err = p
            .provision(&CancellationToken::new(), &ui, &comm, None)
            .await
            .unwrap_err();

        assert_eq!(&ErrorKind::CleanupFailed, err.kind());
        assert_eq!(b"hello".to_vec(), std::fs::read(&moved).unwrap());
        let out = output(ui);
        assert!(out.contains("\nerror: Clean up failed: "), "{out}");
    }

    #[tokio::test]
    async fn test_instances_with_own_staging_dirs_run_concurrently() {
        let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let pa = provisioner(a.path(), "/tmp/out", StaticGetter(Ok(b"first".to_vec())));
        let pb = provisioner(b.path(), "/tmp/out", StaticGetter(Ok(b"second".to_vec())));
        assert_ne!(pa.staging_path(), pb.staging_path());

        let ui = BasicUi::new(Vec::new());
        let (ca, cb) = (RecordingComm::default(), RecordingComm::default());
        let cancel = CancellationToken::new();
        let (ra, rb) = tokio::join!(
            pa.provision(&cancel, &ui, &ca, None),
            pb.provision(&cancel, &ui, &cb, None)
        );
        ra.unwrap();
        rb.unwrap();

        assert_eq!(b"first", &ca.uploads.lock().unwrap()[0].1[..]);
        assert_eq!(b"second", &cb.uploads.lock().unwrap()[0].1[..]);
    }
}
