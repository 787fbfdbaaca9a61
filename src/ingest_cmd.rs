//! `docvec ingest` and `docvec analyze` commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use docvec_core::analyze::analyze;
use docvec_core::chunk::chunk_text;
use docvec_core::models::{DocumentType, IngestRequest, ProcessingOptions, ProcessingStatus};
use docvec_core::store::DocumentStore;

use crate::backends::Services;
use crate::config::Config;
use crate::extract::{extract_file, normalize_whitespace, ExtractLimits};
use crate::ingest::{Pipeline, CANCELLED_MESSAGE};
use crate::progress::ProgressMode;
use crate::queue::{IngestEvent, IngestionCoordinator};

/// Per-run ingestion options from the command line.
#[derive(Debug, Clone, Default)]
pub struct IngestArgs {
    pub file_type: Option<String>,
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
    pub namespace: Option<String>,
}

#[derive(Debug, Default)]
struct Tally {
    success: u64,
    partial: u64,
    failed: u64,
    cancelled: u64,
    vectors: u64,
}

/// Queue every file through the coordinator and wait for all of them.
pub async fn run_ingest(
    config: &Config,
    paths: &[PathBuf],
    collection_id: &str,
    args: IngestArgs,
    progress: ProgressMode,
) -> Result<()> {
    if paths.is_empty() {
        bail!("no files given");
    }

    let services = Services::open(config).await?;
    services
        .vectors
        .get_collection(collection_id)
        .await
        .with_context(|| format!("cannot ingest into collection {}", collection_id))?;

    let documents: Arc<dyn DocumentStore> = services.documents.clone();
    let pipeline = Arc::new(Pipeline::from_config(
        config,
        services.vectors.clone(),
        documents,
        services.generator.clone(),
    ));
    let coordinator = IngestionCoordinator::start(pipeline, config.ingestion.concurrency);
    let mut events = coordinator.subscribe();
    let reporter = progress.reporter();

    let mut submitted = Vec::new();
    let mut rejected = 0u64;
    for path in paths {
        let request = match build_request(path, collection_id, &args) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Warning: skipping {}: {}", path.display(), e);
                rejected += 1;
                continue;
            }
        };
        let id = request.id.clone();
        match coordinator.submit(request).await {
            Ok(_) => submitted.push(id),
            Err(e) => {
                eprintln!("Warning: could not queue {}: {}", path.display(), e);
                rejected += 1;
            }
        }
    }

    let total = submitted.len() as u64;
    let mut done = 0u64;
    let mut vectors = 0u64;
    while done < total {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                // Terminal events may be gone; the tally below reads the store.
                tracing::warn!(missed, "progress reporter fell behind");
                break;
            }
            Err(RecvError::Closed) => break,
        };
        if event.is_terminal() {
            done += 1;
        }
        if let IngestEvent::Completed { vectors: n, .. } = &event {
            vectors += *n as u64;
        }
        reporter.report(&event, done, total);
    }

    coordinator.wait_idle().await;
    coordinator.shutdown().await;

    let mut tally = Tally {
        failed: rejected,
        vectors,
        ..Default::default()
    };
    for id in &submitted {
        match services.documents.get_document(id).await? {
            Some(doc) => match doc.status {
                ProcessingStatus::Success => tally.success += 1,
                ProcessingStatus::Partial => tally.partial += 1,
                _ if doc.errors.iter().any(|e| e == CANCELLED_MESSAGE) => tally.cancelled += 1,
                _ => tally.failed += 1,
            },
            None => tally.failed += 1,
        }
    }
    services.close().await;

    println!("ingest {}", collection_id);
    println!("  documents: {}", paths.len());
    println!("  success: {}", tally.success);
    println!("  partial: {}", tally.partial);
    println!("  failed: {}", tally.failed);
    if tally.cancelled > 0 {
        println!("  cancelled: {}", tally.cancelled);
    }
    println!("  vectors inserted: {}", tally.vectors);

    if tally.failed > 0 {
        bail!("{} document(s) failed to ingest", tally.failed);
    }
    println!("ok");
    Ok(())
}

fn build_request(path: &Path, collection_id: &str, args: &IngestArgs) -> Result<IngestRequest> {
    if !path.is_file() {
        bail!("not a file");
    }
    let file_type = match &args.file_type {
        Some(t) => t.clone(),
        None => DocumentType::from_path(path)?.as_str().to_string(),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();

    Ok(IngestRequest {
        id: Uuid::new_v4().to_string(),
        file_path: path.to_path_buf(),
        file_name,
        file_type,
        collection_id: collection_id.to_string(),
        namespace: args.namespace.clone(),
        options: ProcessingOptions {
            chunk_size: args.chunk_size,
            chunk_overlap: args.overlap,
            ..Default::default()
        },
    })
}

/// Extract and analyze one file without storing anything.
pub async fn run_analyze(
    config: &Config,
    path: &Path,
    file_type: Option<String>,
    json: bool,
) -> Result<()> {
    let file_type = match file_type {
        Some(t) => t,
        None => DocumentType::from_path(path)?.as_str().to_string(),
    };
    let limits = ExtractLimits::from(&config.extraction);
    let owned = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || extract_file(&owned, &file_type, &limits))
        .await??;
    let text = normalize_whitespace(&text);

    let analysis = analyze(&text);
    let chunks = chunk_text(
        "analyze",
        &text,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    )?;

    if json {
        let out = serde_json::json!({
            "file": path.display().to_string(),
            "language": analysis.language,
            "tags": analysis.tags,
            "word_count": analysis.word_count,
            "character_count": analysis.character_count,
            "statistics": analysis.statistics,
            "chunks": chunks.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let s = &analysis.statistics;
    println!("analyze {}", path.display());
    println!("  language:     {}", analysis.language);
    println!("  words:        {}", analysis.word_count);
    println!("  characters:   {}", analysis.character_count);
    println!("  sentences:    {}", s.sentence_count);
    println!("  paragraphs:   {}", s.paragraph_count);
    println!("  readability:  {:.1}", s.readability);
    println!("  complexity:   {:.1}", s.complexity);
    println!("  reading time: {:.1} min", s.reading_time_minutes);
    println!("  code:         {}", if s.looks_like_code { "yes" } else { "no" });
    if !analysis.tags.is_empty() {
        println!("  tags:         {}", analysis.tags.join(", "));
    }
    println!(
        "  chunks:       {} (size {}, overlap {})",
        chunks.len(),
        config.chunking.chunk_size,
        config.chunking.chunk_overlap
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_guesses_type() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("notes.md");
        std::fs::write(&path, "hello").unwrap();

        let req = build_request(&path, "c1", &IngestArgs::default()).unwrap();
        assert_eq!(req.file_type, "plain-text");
        assert_eq!(req.file_name, "notes.md");
        assert_eq!(req.collection_id, "c1");

        let args = IngestArgs {
            file_type: Some("html".to_string()),
            chunk_size: Some(50),
            ..Default::default()
        };
        let req = build_request(&path, "c1", &args).unwrap();
        assert_eq!(req.file_type, "html");
        assert_eq!(req.options.chunk_size, Some(50));

        assert!(build_request(tmp.path(), "c1", &IngestArgs::default()).is_err());
    }
}
