//! dmcore-demo - interactive driver for the data-movement engine
//!
//! Exercises `TransferManager` against the in-memory blob store double: no
//! real remote backend is wired up here, only the engine's own transfer
//! scheduling, chunking, and journal-backed resume.

use clap::Parser;
use dmcore::blob::InMemoryBlobStore;
use dmcore::config::CliArgs;
use dmcore::error::Result;
use dmcore::location::{BlobType, Credentials, RequestOptions, TransferLocation};
use dmcore::manager::TransferManager;
use dmcore::progress::ProgressReporter;
use dmcore::transfer::TransferContext;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> Result<()> {
    let config = args.engine_config();
    let blob_client = Arc::new(InMemoryBlobStore::new());
    let manager = TransferManager::new(config, blob_client);

    let context = TransferContext::default();
    let credentials = Credentials {
        token: "demo-token".to_string(),
    };

    let reporter = if args.quiet {
        ProgressReporter::disabled()
    } else {
        ProgressReporter::new()
    };

    let progress = if args.directory {
        let source = TransferLocation::LocalDirectoryPath { dir: args.source.clone() };
        let destination = TransferLocation::RemoteBlobDirectory {
            container_uri: args.destination.display().to_string(),
            prefix: String::new(),
            credentials,
            request_options: RequestOptions::default(),
        };
        manager
            .upload_directory(source, destination, context, args.overwrite)
            .await?
    } else {
        let rel_path = args
            .source
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        let source = TransferLocation::LocalFilePath {
            path: args.source.clone(),
            rel_path,
        };
        let destination = TransferLocation::RemoteBlob {
            uri: args.destination.display().to_string(),
            snapshot: None,
            blob_type: BlobType::Block,
            credentials,
            access_condition: None,
            request_options: RequestOptions::default(),
        };
        manager
            .upload(source, destination, context, args.overwrite, args.journal.as_deref())
            .await?
    };

    let snapshot = progress.snapshot();
    reporter.set_total_bytes(snapshot.bytes);
    reporter.set_total_files(snapshot.total_accounted());
    reporter.increment_bytes(snapshot.bytes);
    reporter.increment_files(snapshot.total_accounted());
    reporter.finish_success(&format!(
        "{} files transferred, {} skipped, {} failed",
        snapshot.files_transferred, snapshot.files_skipped, snapshot.files_failed
    ));

    Ok(())
}
