use crate::import::reconciler::SkipReason;
use crate::import::scanner::RemovalReason;
use std::collections::HashMap;
use std::fmt;

/// Counts from one library scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Regular files found under the comics directory
    pub files_scanned: usize,
    /// Stored issues dropped before importing
    pub removed: HashMap<RemovalReason, usize>,
    /// Scanned files that already had an issue row
    pub already_imported: usize,
    /// Files the inspector did not recognise as comic archives
    pub not_archives: usize,
    pub imported: usize,
    pub skipped: HashMap<SkipReason, usize>,
}

impl ImportSummary {
    pub fn removed_total(&self) -> usize {
        self.removed.values().sum()
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub(crate) fn record_removal(&mut self, reason: RemovalReason) {
        *self.removed.entry(reason).or_default() += 1;
    }

    pub(crate) fn record_skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scanned, {} removed, {} already imported, {} not archives, {} imported, {} skipped",
            self.files_scanned,
            self.removed_total(),
            self.already_imported,
            self.not_archives,
            self.imported,
            self.skipped_total()
        )
    }
}
