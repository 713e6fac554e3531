// # Import Module
//
// Library scan and catalog reconciliation:
//
// - **scanner**: Recursive file enumeration and staleness checks for stored issues
// - **EntityReconciler**: Metadata → publisher, series, issue and cross references
// - **ComicImporter**: Orchestrates one scan, batching files through the reconciler
// - **EntityRefresher**: Re-fetches catalog details for one stored entity
//
// Public API:
// - `ComicImporter::import_comic_files`: Run a scan
// - `ImportSummary`: What the scan did

mod reconciler;
mod refresh;
mod scanner;
mod service;
mod types;

pub use reconciler::{parse_roles, resolve_issue_cvid, EntityReconciler, ReconcileOutcome, SkipReason};
pub use refresh::EntityRefresher;
pub use scanner::{check_removed_or_modified, scan_comic_files, RemovalReason, ScannedFile};
pub use service::ComicImporter;
pub use types::ImportSummary;

use crate::catalog::CatalogRecord;
use crate::db::EntityDetails;

fn details_from(record: CatalogRecord) -> EntityDetails {
    EntityDetails {
        cvurl: record.url,
        desc: record.description,
        image: record.image,
    }
}
