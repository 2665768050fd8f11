//! Development Normalization Runner
//!
//! Wires the DocuTree core services together the way a host application would:
//! an in-memory store (optionally loaded from a JSON snapshot), a background
//! `NormalizationProcessor`, and a `DocumentService` submitting jobs to it.
//!
//! It then builds a small demo tree, waits for the submitted normalization jobs
//! to finish, and prints search and KV results.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin dev-normalize
//!
//! # Verbose core logging, persisted state between runs
//! RUST_LOG=docutree_core=debug DOCUTREE_SNAPSHOT_PATH=/tmp/docutree.json \
//!     cargo run --bin dev-normalize
//! ```
//!
//! # Configuration
//!
//! Reads `DOCUTREE_*` variables through `CoreConfig::from_env`.

use docutree_core::{
    db::MemoryStore,
    services::{DocumentService, NewDocument, NormalizationEvent, NormalizationPipeline},
    ComponentField, CoreConfig, KvType, NormalizationProcessor,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = CoreConfig::from_env();
    println!("🔧 Initializing dev-normalize...");

    let store = match &config.snapshot_path {
        Some(path) if path.exists() => {
            println!("📂 Loading snapshot from {}", path.display());
            Arc::new(MemoryStore::load_snapshot(path).await?)
        }
        _ => Arc::new(MemoryStore::new()),
    };

    let pipeline = NormalizationPipeline::from_store(store.clone(), config.search.clone());
    let processor = NormalizationProcessor::new(pipeline.clone(), &config.normalization);
    let mut events = processor.subscribe();
    let service = DocumentService::new(pipeline, Arc::new(processor.queue()));

    // Demo tree
    let folder = service
        .create_folder(None, "Receipts", "stoner rock merch receipts")
        .await?;
    service
        .define_component(
            &folder.id,
            "invoice",
            vec![
                ComponentField::new("shop", KvType::Text).with_value("unknown"),
                ComponentField::new("total", KvType::Number),
                ComponentField::new("paid_on", KvType::Date),
            ],
        )
        .await?;

    let documents = vec![
        NewDocument::new("kyuss.pdf", "ENG", "kyuss.pdf", 1222, 3).in_folder(&folder.id),
        NewDocument::new("fu-manchu.pdf", "ENG", "fu-manchu.pdf", 980, 2).in_folder(&folder.id),
    ];
    let mut pending = Vec::new();
    for new_doc in documents {
        let doc = service.create_document(new_doc).await?;
        println!("📄 Created {} ({})", doc.title, doc.id);
        pending.push(doc.id);
    }

    // Wait for the background jobs
    while !pending.is_empty() {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv()).await??;
        pending.retain(|id| id != event.document_id());
        match event {
            NormalizationEvent::Completed(report) => println!(
                "✅ Normalized {}: {} page(s) created",
                report.document_id,
                report.created.len()
            ),
            NormalizationEvent::Failed { document_id, error } => {
                tracing::error!("❌ Normalization of {} failed: {}", document_id, error)
            }
        }
    }

    let first_doc = service
        .children(&folder.id)
        .await?
        .into_iter()
        .find(|n| n.title == "kyuss.pdf");
    if let Some(doc) = first_doc {
        if let Some(page) = service.children(&doc.id).await?.into_iter().next() {
            service
                .set_page_text(&page.id, "Some cool content in page model")
                .await?;
            service.add_kv(&page.id, "total", json!(42.5)).await?;

            let resolved = service.resolve_kv(&page.id).await?;
            println!("\n🔑 KV of {} ({} own):", page.title, service.count_own_kv(&page.id).await?);
            for entry in resolved.iter() {
                println!("   {} = {} ({:?})", entry.key, entry.value, entry.source);
            }
        }
    }

    for term in ["kyuss", "cool", "stoner", "andromeda"] {
        let hits = service.search(term).await?;
        println!("\n🔍 search({:?}) -> {} hit(s)", term, hits.len());
        for hit in hits {
            println!("   [{}] {} {} (score {})", hit.node_type, hit.title, hit.node_id, hit.score);
        }
    }

    processor.shutdown().await;

    if let Some(path) = &config.snapshot_path {
        store.save_snapshot(path).await?;
        println!("\n💾 Snapshot written to {}", path.display());
    }
    Ok(())
}
