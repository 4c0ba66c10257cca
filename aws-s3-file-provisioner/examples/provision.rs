/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */
use std::error::Error;
use std::path::PathBuf;

use aws_s3_file_provisioner::communicator::LocalCommunicator;
use aws_s3_file_provisioner::ui::BasicUi;
use aws_s3_file_provisioner::Provisioner;
use aws_sdk_s3::error::DisplayErrorContext;
use clap::Parser;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "provision")]
#[command(about = "Copies an S3 object into a directory standing in for a provisioned machine.")]
pub struct Args {
    /// Object to copy, e.g. s3://bucket/key
    #[arg(required = true)]
    source: String,

    /// Path on the provisioned machine to copy to
    #[arg(required = true)]
    destination: String,

    /// Directory the provisioned machine's filesystem is rooted at
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Directory to stage the download in
    #[arg(long, default_value = ".")]
    staging_dir: PathBuf,

    /// Generated data for placeholders, as NAME=VALUE (may be repeated)
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected NAME=VALUE, got {s:?}"))
}

async fn run(args: Args) -> Result<(), BoxError> {
    let mut raw = Map::new();
    raw.insert("url".into(), Value::String(args.source));
    raw.insert("destination".into(), Value::String(args.destination));

    let provisioner = Provisioner::builder()
        .staging_dir(&args.staging_dir)
        .prepare([raw])?;
    tracing::debug!("prepared {:?}", provisioner.config());

    let generated = args
        .vars
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect::<Map<_, _>>();

    let ui = BasicUi::new(std::io::stdout());
    let comm = LocalCommunicator::new(args.root);
    provisioner
        .provision(&CancellationToken::new(), &ui, &comm, Some(generated))
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_ids(true)
        .init();

    if let Err(err) = run(args).await {
        tracing::error!("provisioning failed: {}", DisplayErrorContext(err.as_ref()));
    }

    Ok(())
}
