//! `docvec collection` commands: create, list, stats, delete, reindex.

use anyhow::{Context, Result};

use docvec_core::models::{CollectionSpec, SimilarityMetric};

use crate::backends::Services;
use crate::config::Config;
use crate::stats::format_bytes;

/// Create a collection. The dimension defaults to the configured model's.
pub async fn run_create(
    config: &Config,
    name: &str,
    dimension: Option<usize>,
    metric: &str,
) -> Result<()> {
    let services = Services::open(config).await?;
    let metric: SimilarityMetric = metric.parse()?;
    let dimension = dimension.unwrap_or_else(|| services.generator.dims());

    let collection = services
        .vectors
        .create_collection(CollectionSpec::new(name, dimension).metric(metric))
        .await?;

    println!("{}", collection.id);
    eprintln!(
        "created collection '{}' ({} dims, {}, {} backend)",
        collection.name,
        collection.dimension,
        collection.metric,
        services.vectors.backend_name()
    );
    services.close().await;
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let services = Services::open(config).await?;
    let collections = services.vectors.list_collections().await?;

    if collections.is_empty() {
        println!("No collections.");
    } else {
        println!(
            "{:<38} {:<16} {:>6} {:<12} {:>8}",
            "ID", "NAME", "DIMS", "METRIC", "VECTORS"
        );
        for c in &collections {
            println!(
                "{:<38} {:<16} {:>6} {:<12} {:>8}",
                c.id, c.name, c.dimension, c.metric, c.vector_count
            );
        }
    }

    services.close().await;
    Ok(())
}

pub async fn run_stats(config: &Config, id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let collection = services.vectors.get_collection(id).await?;
    let stats = services.vectors.stats(id).await?;

    println!("collection {}", collection.id);
    println!("  name:       {}", collection.name);
    println!("  metric:     {}", collection.metric);
    println!("  dimension:  {}", stats.dimension);
    println!("  vectors:    {}", stats.count);
    println!("  memory:     {}", format_bytes(stats.estimated_memory_bytes));
    println!(
        "  updated:    {}",
        collection.updated_at.format("%Y-%m-%d %H:%M")
    );

    services.close().await;
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    services
        .vectors
        .delete_collection(id)
        .await
        .with_context(|| format!("failed to delete collection {}", id))?;
    println!("deleted collection {}", id);
    services.close().await;
    Ok(())
}

pub async fn run_reindex(config: &Config, id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    services.vectors.reindex(id).await?;
    println!("reindexed collection {}", id);
    services.close().await;
    Ok(())
}
