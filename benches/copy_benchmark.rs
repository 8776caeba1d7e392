//! Performance benchmarks for the transfer engine
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dmcore::blob::InMemoryBlobStore;
use dmcore::config::EngineConfig;
use dmcore::enumerate::{Enumerator, LocalEnumerator};
use dmcore::location::{BlobType, Credentials, RequestOptions, TransferLocation};
use dmcore::manager::TransferManager;
use dmcore::transfer::TransferContext;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// Create a test file of the specified size.
fn create_test_file(dir: &std::path::Path, name: &str, size: usize) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();

    let chunk_size = 64 * 1024;
    let chunk: Vec<u8> = (0..chunk_size).map(|i| (i % 256) as u8).collect();
    let mut remaining = size;

    while remaining > 0 {
        let to_write = remaining.min(chunk_size);
        file.write_all(&chunk[..to_write]).unwrap();
        remaining -= to_write;
    }

    path
}

fn remote_destination(uri: String) -> TransferLocation {
    TransferLocation::RemoteBlob {
        uri,
        snapshot: None,
        blob_type: BlobType::Block,
        credentials: Credentials { token: "bench-token".to_string() },
        access_condition: None,
        request_options: RequestOptions::default(),
    }
}

fn bench_upload_small_files(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let src_dir = TempDir::new().unwrap();

    for i in 0..100 {
        create_test_file(src_dir.path(), &format!("file_{i}.txt"), 1024);
    }

    c.bench_function("upload_directory_100_small_files", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = Arc::new(InMemoryBlobStore::new());
                let manager = TransferManager::new(EngineConfig::default().with_parallel_operations(4), store);

                let source_root = TransferLocation::LocalDirectoryPath { dir: src_dir.path().to_path_buf() };
                let dest_root = TransferLocation::RemoteBlobDirectory {
                    container_uri: "bench-container".to_string(),
                    prefix: String::new(),
                    credentials: Credentials { token: "bench-token".to_string() },
                    request_options: RequestOptions::default(),
                };

                let progress = manager
                    .upload_directory(source_root, dest_root, TransferContext::default(), true)
                    .await
                    .unwrap();
                black_box(progress.snapshot());
            });
        });
    });
}

fn bench_upload_large_file(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("large_file_upload");

    for size in [1024 * 1024, 10 * 1024 * 1024, 100 * 1024 * 1024].iter() {
        let src_dir = TempDir::new().unwrap();
        let src_file = create_test_file(src_dir.path(), "large.bin", *size);

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(
            BenchmarkId::new("sync_copy", humansize::format_size(*size as u64, humansize::BINARY)),
            size,
            |b, _| {
                b.iter(|| {
                    rt.block_on(async {
                        let store = Arc::new(InMemoryBlobStore::new());
                        let manager = TransferManager::new(EngineConfig::default(), store);
                        let source = TransferLocation::LocalFilePath {
                            path: src_file.clone(),
                            rel_path: Some("large.bin".to_string()),
                        };
                        let destination = remote_destination("bench-container/large.bin".to_string());
                        let progress = manager
                            .upload(source, destination, TransferContext::default(), true, None)
                            .await
                            .unwrap();
                        black_box(progress.snapshot());
                    });
                });
            },
        );
    }

    group.finish();
}

fn bench_directory_enumeration(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();

    for i in 0..10 {
        let subdir = dir.path().join(format!("subdir_{i}"));
        std::fs::create_dir_all(&subdir).unwrap();

        for j in 0..100 {
            create_test_file(&subdir, &format!("file_{j}.txt"), 1024);
        }
    }

    c.bench_function("enumerate_1000_files", |b| {
        b.iter(|| {
            let mut enumerator = LocalEnumerator::new(dir.path(), false).unwrap();
            let mut count = 0usize;
            while enumerator.next().unwrap().is_some() {
                count += 1;
            }
            black_box(count)
        });
    });
}

criterion_group!(
    benches,
    bench_upload_small_files,
    bench_upload_large_file,
    bench_directory_enumeration
);

criterion_main!(benches);
