//! quarry CLI entry point

use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use quarry::{
    commands::{
        cmd_delete_category, cmd_delete_material, cmd_find_materials, cmd_import_materials,
        cmd_init, cmd_list_categories, cmd_list_materials, cmd_propagate, cmd_put_document,
        cmd_refresh, cmd_save_category, cmd_save_material, cmd_show_document, cmd_show_material,
        cmd_status, print_categories, print_document_detail, print_import_report, print_init,
        print_material_detail, print_material_page, print_materials, print_propagation_report,
        print_reconcile_report, print_refresh_report, print_status, read_content, FindBy,
        InitOptions,
    },
    config::Config,
    error::Result,
    library::{MaterialLibrary, MaterialRequest},
    meta::MetaDb,
    progress::LogWriterFactory,
    propagate::{PropagationEvent, PropagationOutcome, PropagationPool},
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "quarry")]
#[command(version, about = "Reusable HTML materials with dedup and automatic propagation", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize quarry configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show system status
    Status,

    /// Manage materials
    Material {
        #[command(subcommand)]
        action: MaterialAction,
    },

    /// Manage material categories
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },

    /// Store documents that embed materials
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Push a material's current body into every document embedding it
    Propagate {
        /// Material ID
        id: i64,
    },

    /// Propagate every auto-update material
    Refresh,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// HTML given inline or read from a file
#[derive(Args)]
#[command(group(ArgGroup::new("source").required(true).args(["content", "file"])))]
struct ContentSource {
    /// HTML content
    #[arg(long)]
    content: Option<String>,

    /// Read HTML from a file ('-' for stdin)
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum MaterialAction {
    /// List materials, newest first
    List {
        /// Restrict to a category (0 = all)
        #[arg(long, default_value = "0")]
        category: i64,

        /// Substring match on title
        #[arg(short, long)]
        keyword: Option<String>,

        #[arg(long, default_value = "1")]
        page: u32,

        /// Page size (0 = configured default)
        #[arg(long, default_value = "0")]
        page_size: u32,
    },

    /// Show a material and where it is used
    Show { id: i64 },

    /// Create a material, or edit one with --id
    Save {
        /// Material to edit
        #[arg(long)]
        id: Option<i64>,

        /// Title (derived from the content when omitted)
        #[arg(short, long)]
        title: Option<String>,

        /// Category ID (0 = uncategorized)
        #[arg(long, default_value = "0")]
        category: i64,

        /// Propagate edits into embedding documents
        #[arg(long)]
        auto_update: bool,

        #[arg(long)]
        origin_url: Option<String>,

        #[arg(long)]
        keyword: Option<String>,

        #[command(flatten)]
        source: ContentSource,
    },

    /// Delete a material and its usage records
    Delete { id: i64 },

    /// Import a JSON array of materials
    Import { path: PathBuf },

    /// Look up materials
    #[command(group(ArgGroup::new("by").required(true).args(["title", "origin_url", "keyword"])))]
    Find {
        /// Title prefix (markup is stripped)
        #[arg(long)]
        title: Option<String>,

        /// Exact origin URL
        #[arg(long)]
        origin_url: Option<String>,

        /// Exact keyword
        #[arg(long)]
        keyword: Option<String>,
    },
}

#[derive(Subcommand)]
enum CategoryAction {
    /// List active categories
    List,

    /// Create a category, or rename one with --id
    Save {
        title: String,

        #[arg(long)]
        id: Option<i64>,
    },

    /// Delete an empty category
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum DocAction {
    /// Store a document and record the materials it embeds
    Put {
        item_type: String,
        item_id: i64,

        #[command(flatten)]
        source: ContentSource,
    },

    /// Show a stored document
    Show { item_type: String, item_id: i64 },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory))
        .with(filter)
        .init();

    // Init doesn't need an existing config
    if let Commands::Init { force } = cli.command {
        let (base_dir, config_path) = init_paths(cli.config);
        let report = cmd_init(InitOptions {
            base_dir,
            config_path,
            force,
        })
        .await?;
        return print_json_or(cli.json, &report, print_init);
    }

    // Completions don't need config/db
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "quarry", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let db = MetaDb::connect(&config).await?;
    let lib = MaterialLibrary::from_config(&config, db.clone())?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Status => {
            let status = cmd_status(&config, &db).await?;
            print_json_or(cli.json, &status, print_status)?;
        }

        Commands::Material { action } => {
            handle_material(&config, lib, action, cli.json).await?;
        }

        Commands::Category { action } => match action {
            CategoryAction::List => {
                let categories = cmd_list_categories(&lib).await?;
                print_json_or(cli.json, &categories, |c| print_categories(c))?;
            }
            CategoryAction::Save { title, id } => {
                let category = cmd_save_category(&lib, id, title).await?;
                print_json_or(cli.json, &category, |c| {
                    println!("✓ Saved category #{} {}", c.id, c.title)
                })?;
            }
            CategoryAction::Delete { id } => {
                cmd_delete_category(&lib, id).await?;
                print_ok(cli.json, &format!("Deleted category #{}", id));
            }
        },

        Commands::Doc { action } => match action {
            DocAction::Put {
                item_type,
                item_id,
                source,
            } => {
                let content = read_content(source.content, source.file.as_deref())?;
                let report = cmd_put_document(&lib, &item_type, item_id, &content).await?;
                print_json_or(cli.json, &report, |r| {
                    print_reconcile_report(&item_type, item_id, r)
                })?;
            }
            DocAction::Show { item_type, item_id } => {
                let detail = cmd_show_document(&lib, &item_type, item_id).await?;
                print_json_or(cli.json, &detail, print_document_detail)?;
            }
        },

        Commands::Propagate { id } => {
            let report = cmd_propagate(&lib, id).await?;
            print_json_or(cli.json, &report, |r| print_propagation_report(id, r))?;
        }

        Commands::Refresh => {
            let report = cmd_refresh(&lib, !cli.json).await?;
            print_json_or(cli.json, &report, print_refresh_report)?;
        }
    }

    Ok(())
}

async fn handle_material(
    config: &Config,
    lib: MaterialLibrary,
    action: MaterialAction,
    json: bool,
) -> Result<()> {
    match action {
        MaterialAction::List {
            category,
            keyword,
            page,
            page_size,
        } => {
            let page = cmd_list_materials(&lib, category, keyword.as_deref(), page, page_size).await?;
            print_json_or(json, &page, print_material_page)?;
        }

        MaterialAction::Show { id } => {
            let detail = cmd_show_material(&lib, id).await?;
            print_json_or(json, &detail, print_material_detail)?;
        }

        MaterialAction::Save {
            id,
            title,
            category,
            auto_update,
            origin_url,
            keyword,
            source,
        } => {
            let content = read_content(source.content, source.file.as_deref())?;
            let req = MaterialRequest {
                id,
                title,
                category_id: category,
                content,
                auto_update,
                origin_url,
                keyword,
            };

            // Propagation runs on the pool; wait for it to drain before exiting
            let pool = PropagationPool::start(
                lib.propagator(),
                config.propagation.workers,
                config.propagation.events_capacity,
            );
            let mut events = pool.subscribe();
            let lib = lib.with_queue(pool.queue());

            let saved = cmd_save_material(&lib, req).await;
            pool.shutdown().await;
            let material = saved?;

            let mut finished = Vec::new();
            while let Ok(event) = events.try_recv() {
                finished.push(event);
            }

            if json {
                #[derive(Serialize)]
                struct SaveOutput<'a> {
                    material: &'a quarry::meta::Material,
                    propagation: &'a [PropagationEvent],
                }
                println!(
                    "{}",
                    serde_json::to_string_pretty(&SaveOutput {
                        material: &material,
                        propagation: &finished,
                    })?
                );
            } else {
                println!("✓ Saved material #{} {}", material.id, material.title);
                for event in &finished {
                    print_propagation_event(event);
                }
            }
        }

        MaterialAction::Delete { id } => {
            cmd_delete_material(&lib, id).await?;
            print_ok(json, &format!("Deleted material #{}", id));
        }

        MaterialAction::Import { path } => {
            let report = cmd_import_materials(&lib, &path).await?;
            print_json_or(json, &report, print_import_report)?;
        }

        MaterialAction::Find {
            title,
            origin_url,
            keyword,
        } => {
            let by = match (title, origin_url, keyword) {
                (Some(title), _, _) => FindBy::TitlePrefix(title),
                (None, Some(url), _) => FindBy::OriginUrl(url),
                (None, None, Some(keyword)) => FindBy::Keyword(keyword),
                (None, None, None) => unreachable!("clap requires one lookup"),
            };
            let materials = cmd_find_materials(&lib, by).await?;
            print_json_or(json, &materials, |m| print_materials(m))?;
        }
    }

    Ok(())
}

fn print_propagation_event(event: &PropagationEvent) {
    match &event.outcome {
        PropagationOutcome::Completed { report } => print_propagation_report(event.material_id, report),
        PropagationOutcome::Missing => {
            warn!(material_id = event.material_id, "Material vanished before propagation")
        }
        PropagationOutcome::Failed { error } => {
            warn!(material_id = event.material_id, %error, "Propagation failed")
        }
    }
}

fn print_json_or<T, F>(json: bool, value: &T, print: F) -> Result<()>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T),
{
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn print_ok(json: bool, message: &str) {
    if json {
        println!("{}", serde_json::json!({ "status": "ok", "message": message }));
    } else {
        println!("✓ {}", message);
    }
}

/// Base dir and config file for `init`; `--config` may name a file or a directory
fn init_paths(config: Option<PathBuf>) -> (PathBuf, PathBuf) {
    match config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        }
        Some(dir) => {
            let config_path = dir.join("config.toml");
            (dir, config_path)
        }
        None => {
            let base = Config::default_base_dir();
            let config_path = base.join("config.toml");
            (base, config_path)
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        return Err(quarry::Error::NotInitialized);
    }

    Config::load(&config_path)
}
