//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub force: bool,
}

/// Where init put things
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub base_dir: String,
    pub config_path: String,
    pub db_path: String,
    pub upload_dir: String,
}

/// Write a default config and create the database schema
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let InitOptions {
        base_dir,
        config_path,
        force,
    } = options;

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.init_paths(Some(base_dir));
    config.paths.config_file = config_path;
    config.validate()?;
    config.save()?;

    let upload_dir = config.upload_dir();
    std::fs::create_dir_all(&upload_dir)?;

    let db = MetaDb::connect(&config).await?;
    if !db.is_initialized().await? {
        db.init_schema().await?;
    }

    info!("Initialized quarry at {:?}", config.paths.base_dir);

    Ok(InitReport {
        base_dir: config.paths.base_dir.display().to_string(),
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        upload_dir: upload_dir.display().to_string(),
    })
}

pub fn print_init(report: &InitReport) {
    println!("✓ Initialized quarry at {}", report.base_dir);
    println!("\nConfiguration: {}", report.config_path);
    println!("Database: {}", report.db_path);
    println!("Uploads: {}", report.upload_dir);
    println!("\nNext steps:");
    println!("  Set [site] base_url in the config file");
    println!("  quarry category save \"Footers\"              # Create a category");
    println!("  quarry material save --file snippet.html   # Store a material");
}
