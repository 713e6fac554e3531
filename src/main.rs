use longbox::archive::ExtensionInspector;
use longbox::catalog::{CatalogClient, CatalogSource};
use longbox::config::Config;
use longbox::db::Database;
use longbox::import::{ComicImporter, EntityRefresher};
use longbox::library::LibraryManager;
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {}                      Scan the comics directory and import new archives", program);
    eprintln!("  {} refresh <kind> <id>  Re-fetch catalog details for one entity", program);
    eprintln!();
    eprintln!("  <kind> is one of: issue, series, publisher, character, team, arc, creator");
    eprintln!();
    eprintln!("Settings come from LONGBOX_* environment variables or a .env file.");
}

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();

    let result = match args.get(1).map(String::as_str) {
        None => run_import().await,
        Some("refresh") if args.len() == 4 => match args[3].parse::<i64>() {
            Ok(cvid) => run_refresh(&args[2], cvid).await,
            Err(_) => Err(format!("Invalid catalog id: {}", args[3])),
        },
        Some(_) => {
            print_usage(&args[0]);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn open_library(config: &Config) -> Result<(LibraryManager, Arc<dyn CatalogSource>), String> {
    tokio::fs::create_dir_all(&config.media_root)
        .await
        .map_err(|e| format!("Cannot create {}: {}", config.media_root.display(), e))?;

    let database_path = config
        .database_path
        .to_str()
        .ok_or_else(|| format!("Database path is not UTF-8: {:?}", config.database_path))?;
    let database = Database::new(database_path)
        .await
        .map_err(|e| format!("Failed to open database: {}", e))?;

    let catalog = CatalogClient::new(config)
        .await
        .map_err(|e| format!("Failed to open response cache: {}", e))?;

    let catalog: Arc<dyn CatalogSource> = Arc::new(catalog);
    Ok((LibraryManager::new(database, &config.media_root), catalog))
}

async fn run_import() -> Result<(), String> {
    let config = Config::load().map_err(|e| e.to_string())?;
    let (library, catalog) = open_library(&config).await?;

    let importer = ComicImporter::new(&config, library, catalog, Arc::new(ExtensionInspector));
    let summary = importer
        .import_comic_files()
        .await
        .map_err(|e| format!("Import failed: {}", e))?;

    info!("Removed: {:?}", summary.removed);
    info!("Skipped: {:?}", summary.skipped);
    Ok(())
}

async fn run_refresh(kind: &str, cvid: i64) -> Result<(), String> {
    let config = Config::load().map_err(|e| e.to_string())?;
    let (library, catalog) = open_library(&config).await?;
    let refresher = EntityRefresher::new(library, catalog);

    let refreshed = match kind {
        "issue" => refresher.refresh_issue(cvid).await,
        "series" => refresher.refresh_series(cvid).await,
        "publisher" => refresher.refresh_publisher(cvid).await,
        "character" => refresher.refresh_character(cvid).await,
        "team" => refresher.refresh_team(cvid).await,
        "arc" => refresher.refresh_arc(cvid).await,
        "creator" => refresher.refresh_creator(cvid).await,
        other => return Err(format!("Unknown entity kind: {}", other)),
    }
    .map_err(|e| format!("Refresh failed: {}", e))?;

    if refreshed {
        info!("Refreshed {} {}", kind, cvid);
    } else {
        info!("Nothing to refresh for {} {}", kind, cvid);
    }
    Ok(())
}
