//! Performance benchmarks for DocuTree core operations
//!
//! Run with: `cargo bench -p docutree-core`
//!
//! These benchmarks measure critical path performance:
//! - Ranked search over a populated index
//! - KV resolution through a deep folder chain with components at every level
//! - Normalization of a large document (page creation + propagation + reindex)

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use docutree_core::db::MemoryStore;
use docutree_core::services::{DocumentService, NewDocument, PendingJobs};
use docutree_core::{ComponentField, DocumentUpdate, KvType, SearchConfig};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Setup a service over a fresh in-memory store
fn setup_test_service() -> (DocumentService, PendingJobs) {
    let jobs = PendingJobs::new();
    let service = DocumentService::from_store(
        Arc::new(MemoryStore::new()),
        SearchConfig::default(),
        Arc::new(jobs.clone()),
    );
    (service, jobs)
}

/// Create `documents` documents of `pages` pages each and normalize them
async fn populate(service: &DocumentService, jobs: &PendingJobs, documents: usize, pages: u32) {
    let folder = service
        .create_folder(None, "Bench", "benchmark corpus")
        .await
        .unwrap();
    for i in 0..documents {
        service
            .create_document(
                NewDocument::new(format!("doc-{}.pdf", i), "ENG", "bench.pdf", 1024, pages)
                    .in_folder(&folder.id),
            )
            .await
            .unwrap();
    }
    for job in jobs.drain() {
        service.pipeline().normalize(&job.document_id).await.unwrap();
    }
}

/// Benchmark ranked search
///
/// 100 documents x 10 pages = 1,100 indexed nodes plus the folder.
fn bench_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (service, jobs) = setup_test_service();
    rt.block_on(populate(&service, &jobs, 100, 10));

    let mut group = c.benchmark_group("search");

    group.bench_function("partial_match_all_pages", |b| {
        b.iter(|| {
            rt.block_on(async {
                let hits = service.search(black_box("doc-")).await.unwrap();
                black_box(hits.len())
            })
        });
    });

    group.bench_function("exact_title_single_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let hits = service.search(black_box("doc-42.pdf")).await.unwrap();
                black_box(hits.len())
            })
        });
    });

    group.finish();
}

/// Benchmark KV resolution through 20 nested folders
fn bench_resolve(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (service, _jobs) = setup_test_service();

    let leaf = rt.block_on(async {
        let mut parent: Option<String> = None;
        for depth in 0..20 {
            let folder = service
                .create_folder(parent.as_deref(), &format!("level-{}", depth), "")
                .await
                .unwrap();
            service
                .define_component(
                    &folder.id,
                    &format!("schema-{}", depth),
                    vec![
                        ComponentField::new(format!("key-{}", depth), KvType::Text).with_value("v"),
                        ComponentField::new("shared", KvType::Integer).with_value(depth),
                    ],
                )
                .await
                .unwrap();
            parent = Some(folder.id);
        }
        let leaf = parent.unwrap();
        service.add_kv(&leaf, "shared", json!(-1)).await.unwrap();
        leaf
    });

    c.bench_function("resolve_20_levels", |b| {
        b.iter(|| {
            rt.block_on(async {
                let resolved = service.resolve_kv(black_box(&leaf)).await.unwrap();
                black_box(resolved.len())
            })
        });
    });
}

/// Benchmark normalizing a 500-page document from scratch, then shrinking it
fn bench_normalize(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("normalization");
    group.sample_size(10); // Fewer samples for expensive operations

    group.bench_function("create_500_pages", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let mut total = std::time::Duration::ZERO;
                for _ in 0..iters {
                    let (service, jobs) = setup_test_service();
                    let doc = service
                        .create_document(NewDocument::new("big.pdf", "ENG", "big.pdf", 1, 500))
                        .await
                        .unwrap();
                    jobs.drain();

                    let start = std::time::Instant::now();
                    service.pipeline().normalize(&doc.id).await.unwrap();
                    total += start.elapsed();
                }
                total
            })
        });
    });

    group.bench_function("shrink_500_to_100_pages", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let mut total = std::time::Duration::ZERO;
                for _ in 0..iters {
                    let (service, jobs) = setup_test_service();
                    let doc = service
                        .create_document(NewDocument::new("big.pdf", "ENG", "big.pdf", 1, 500))
                        .await
                        .unwrap();
                    service.pipeline().normalize(&doc.id).await.unwrap();
                    service
                        .update_document(&doc.id, DocumentUpdate::new().with_declared_page_count(100))
                        .await
                        .unwrap();
                    jobs.drain();

                    let start = std::time::Instant::now();
                    service.pipeline().normalize(&doc.id).await.unwrap();
                    total += start.elapsed();
                }
                total
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_search, bench_resolve, bench_normalize);
criterion_main!(benches);
