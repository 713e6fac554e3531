#![allow(dead_code)]

use longbox::config::Config;
use longbox::db::Database;
use longbox::import::ComicImporter;
use longbox::library::LibraryManager;
use longbox::test_support::{MockCatalog, MockInspector};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A scratch library: comics directory, media root and database, with a mock
/// catalog and inspector wired into an importer
pub struct TestLibrary {
    pub comics_dir: TempDir,
    pub media_dir: TempDir,
    pub database: Database,
    pub library: LibraryManager,
    pub catalog: Arc<MockCatalog>,
    pub inspector: Arc<MockInspector>,
    pub importer: ComicImporter,
}

impl TestLibrary {
    pub async fn new() -> Self {
        Self::with_batch_size(100).await
    }

    pub async fn with_batch_size(batch_size: usize) -> Self {
        tracing_init();

        let comics_dir = TempDir::new().unwrap();
        let media_dir = TempDir::new().unwrap();
        let db_path = media_dir.path().join("longbox.db");

        let database = Database::new(db_path.to_str().unwrap())
            .await
            .expect("Failed to create database");
        let library = LibraryManager::new(database.clone(), media_dir.path());

        let catalog = Arc::new(MockCatalog::new());
        let inspector = Arc::new(MockInspector::new());

        let mut config = Config::new(comics_dir.path(), "0".repeat(40));
        config.media_root = media_dir.path().to_path_buf();
        config.database_path = db_path;
        config.batch_size = batch_size;

        let importer = ComicImporter::new(
            &config,
            library.clone(),
            catalog.clone(),
            inspector.clone(),
        );

        TestLibrary {
            comics_dir,
            media_dir,
            database,
            library,
            catalog,
            inspector,
            importer,
        }
    }

    /// Write a dummy archive under the comics directory with a fixed mtime
    /// `offset_secs` after a common base time
    pub fn write_archive(&self, relative: &str, offset_secs: u64) -> PathBuf {
        let path = self.comics_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, b"PK\x03\x04 not really a zip").unwrap();
        set_mtime(&path, offset_secs);
        path
    }

    /// Put an image file under the media root and return its stored path
    pub fn write_image(&self, file_name: &str) -> String {
        let dir = self.media_dir.path().join("images");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file_name), [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
        format!("images/{}", file_name)
    }

    pub fn media_path(&self, relative: &str) -> PathBuf {
        self.media_dir.path().join(relative)
    }

    pub async fn count(&self, table: &str) -> i64 {
        self.database.count_rows(table).await.unwrap()
    }
}

pub fn set_mtime(path: &Path, offset_secs: u64) {
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(base + Duration::from_secs(offset_secs))
        .unwrap();
}
