//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::meta::{GlobalStats, MetaDb};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub base_url: String,
    pub storage_url: String,
    pub remote_download: bool,
    pub outlinks: String,
    pub propagation_workers: usize,
    pub db_stats: GlobalStats,
}

/// Get system status
pub async fn cmd_status(config: &Config, db: &MetaDb) -> Result<StatusInfo> {
    info!("Getting status");

    let db_stats = db.get_global_stats().await?;

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        base_url: config.site.base_url.clone(),
        storage_url: config.site.storage_url.clone(),
        remote_download: config.content.remote_download,
        outlinks: config.content.outlinks.to_string(),
        propagation_workers: config.propagation.workers,
        db_stats,
    })
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(unset)"
    } else {
        value
    }
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 quarry Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("\nSite:");
    println!("  Base URL: {}", or_unset(&status.base_url));
    println!("  Storage URL: {}", or_unset(&status.storage_url));
    println!("\nContent policy:");
    println!(
        "  Remote images: {}",
        if status.remote_download {
            "download"
        } else {
            "leave as is"
        }
    );
    println!("  External links: {}", status.outlinks);
    println!("  Propagation workers: {}", status.propagation_workers);
    println!("\nDatabase Stats:");
    println!("  Categories: {}", status.db_stats.category_count);
    println!("  Materials: {}", status.db_stats.material_count);
    println!("  Usages: {}", status.db_stats.usage_count);
    println!("  Documents: {}", status.db_stats.document_count);
}
