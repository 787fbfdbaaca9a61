//! Document retrieval by ID.
//!
//! Fetches a stored document and its chunks through the [`DocumentStore`].
//! Used by the `docvec get` CLI command.

use anyhow::{bail, Result};
use serde::Serialize;

use docvec_core::models::{Document, DocumentChunk};
use docvec_core::store::DocumentStore;

use crate::backends::Services;
use crate::config::Config;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    #[serde(flatten)]
    pub document: Document,
    pub chunks: Vec<DocumentChunk>,
}

/// Load a document and its chunks, failing when the id is unknown.
pub async fn get_document(store: &dyn DocumentStore, id: &str) -> Result<DocumentResponse> {
    let document = match store.get_document(id).await? {
        Some(doc) => doc,
        None => bail!("document not found: {}", id),
    };
    let chunks = store.get_chunks(id).await?;
    Ok(DocumentResponse { document, chunks })
}

/// CLI entry point: print a document, its statistics, and its chunks.
pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let services = Services::open(config).await?;
    let response = get_document(services.documents.as_ref(), id).await;
    services.close().await;
    let DocumentResponse { document: doc, chunks } = response?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&DocumentResponse {
                document: doc,
                chunks
            })?
        );
        return Ok(());
    }

    println!("--- Document ---");
    println!("id:         {}", doc.id);
    println!("title:      {}", doc.title);
    println!("file:       {}", doc.file_name);
    println!("type:       {}", doc.doc_type);
    println!("status:     {}", doc.status);
    println!("language:   {}", doc.metadata.language);
    println!("size:       {} bytes", doc.metadata.size_bytes);
    println!("words:      {}", doc.metadata.word_count);
    if !doc.metadata.tags.is_empty() {
        println!("tags:       {}", doc.metadata.tags.join(", "));
    }
    println!("created_at: {}", doc.created_at.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("updated_at: {}", doc.updated_at.format("%Y-%m-%dT%H:%M:%SZ"));
    for error in &doc.errors {
        println!("error:      {}", error);
    }
    if let Some(stats) = &doc.statistics {
        println!(
            "readability: {:.1}  complexity: {:.1}  reading time: {:.1} min",
            stats.readability, stats.complexity, stats.reading_time_minutes
        );
    }
    println!();

    println!("--- Content ---");
    println!("{}", doc.content);
    println!();

    println!("--- Chunks ({}) ---", chunks.len());
    for chunk in &chunks {
        println!(
            "[chunk {}] words {}..{}, ~{} tokens",
            chunk.index, chunk.start_offset, chunk.end_offset, chunk.token_count
        );
        println!("{}", chunk.content);
        println!();
    }

    Ok(())
}
