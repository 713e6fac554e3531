// # Import Service - Orchestrator
//
// One library scan, start to finish:
// - drop stored issues whose files are gone, outside the library or modified
// - skip files that already have an issue row
// - read metadata for the rest and hand it to the reconciler in batches
//
// Blocking filesystem work runs on the blocking pool; reconciliations run one
// at a time in scan order.

use crate::archive::{read_comic_metadata, ArchiveInspector, ComicMetadata};
use crate::catalog::CatalogSource;
use crate::config::Config;
use crate::db::DbIssue;
use crate::import::reconciler::{EntityReconciler, ReconcileOutcome, SkipReason};
use crate::import::scanner::{check_removed_or_modified, scan_comic_files, RemovalReason};
use crate::import::types::ImportSummary;
use crate::library::{LibraryError, LibraryManager};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Imports every comic archive under the configured directory
///
/// Running two scans against the same database at once is not supported;
/// callers must serialize calls to [`ComicImporter::import_comic_files`].
pub struct ComicImporter {
    comics_directory: PathBuf,
    batch_size: usize,
    library: LibraryManager,
    reconciler: EntityReconciler,
    inspector: Arc<dyn ArchiveInspector>,
}

impl ComicImporter {
    pub fn new(
        config: &Config,
        library: LibraryManager,
        catalog: Arc<dyn CatalogSource>,
        inspector: Arc<dyn ArchiveInspector>,
    ) -> Self {
        ComicImporter {
            comics_directory: config.comics_directory.clone(),
            batch_size: config.batch_size.max(1),
            reconciler: EntityReconciler::new(library.clone(), catalog),
            library,
            inspector,
        }
    }

    /// Bring the database in line with the comics directory
    ///
    /// Per-file problems (no catalog id, catalog unavailable, duplicates) are
    /// counted as skips and retried on the next scan. Database failures and an
    /// unreadable comics directory abort the scan.
    pub async fn import_comic_files(&self) -> Result<ImportSummary, LibraryError> {
        let mut summary = ImportSummary::default();

        let root = self.comics_directory.clone();
        let files = tokio::task::spawn_blocking(move || scan_comic_files(&root))
            .await
            .map_err(join_error)??;
        summary.files_scanned = files.len();

        self.remove_stale_issues(&mut summary).await?;

        let known = self.library.database().get_issue_files().await?;
        let pending: Vec<PathBuf> = files
            .into_iter()
            .map(|f| f.path)
            .filter(|path| {
                let seen = path.to_str().map(|p| known.contains(p)).unwrap_or(false);
                if seen {
                    summary.already_imported += 1;
                }
                !seen
            })
            .collect();

        info!(
            "{} new file(s) to inspect, {} already imported",
            pending.len(),
            summary.already_imported
        );

        let mut batch: Vec<ComicMetadata> = Vec::with_capacity(self.batch_size);
        for path in pending {
            let inspector = self.inspector.clone();
            let md = tokio::task::spawn_blocking(move || {
                read_comic_metadata(inspector.as_ref(), &path)
            })
            .await
            .map_err(join_error)?;

            match md {
                Some(md) => batch.push(md),
                None => summary.not_archives += 1,
            }

            if batch.len() >= self.batch_size {
                self.reconcile_batch(&mut batch, &mut summary).await?;
            }
        }
        self.reconcile_batch(&mut batch, &mut summary).await?;

        info!("Import finished: {}", summary);
        Ok(summary)
    }

    async fn remove_stale_issues(&self, summary: &mut ImportSummary) -> Result<(), LibraryError> {
        let issues = self.library.get_issues().await?;
        let root = self.comics_directory.clone();

        let stale: Vec<(DbIssue, RemovalReason)> = tokio::task::spawn_blocking(move || {
            issues
                .into_iter()
                .filter_map(|issue| {
                    check_removed_or_modified(&issue, &root).map(|reason| (issue, reason))
                })
                .collect()
        })
        .await
        .map_err(join_error)?;

        for (issue, reason) in stale {
            info!("Removing issue {} ({:?})", issue.file, reason);
            self.library.delete_issue(&issue.id).await?;
            summary.record_removal(reason);
        }
        Ok(())
    }

    async fn reconcile_batch(
        &self,
        batch: &mut Vec<ComicMetadata>,
        summary: &mut ImportSummary,
    ) -> Result<(), LibraryError> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!("Reconciling batch of {}", batch.len());

        for md in batch.drain(..) {
            match self.reconciler.reconcile(&md).await {
                Ok(ReconcileOutcome::Imported { .. }) => summary.imported += 1,
                Ok(ReconcileOutcome::Skipped(reason)) => summary.record_skip(reason),
                // One bad record doesn't stop the scan; store and I/O failures do
                Err(LibraryError::Import(message)) => {
                    warn!("Skipping {}: {}", md.path.display(), message);
                    summary.record_skip(SkipReason::ImportFailed);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn join_error(e: JoinError) -> LibraryError {
    LibraryError::Import(format!("Blocking task failed: {}", e))
}
