// # Entity Reconciler
//
// Turns one archive's metadata into rows. Every catalog lookup happens first:
// the issue detail, the series and publisher when they are new or unlinked,
// and the details of cross references the library has not seen yet. The
// resulting graph is then written in one transaction, so a file is either
// fully imported or not at all.

use super::details_from;
use crate::archive::ComicMetadata;
use crate::catalog::{CatalogRef, CatalogSource, CatalogTarget, IssueDetail, SeriesDetail};
use crate::db::{
    DbIssue, DbPublisher, DbSeries, EntityDetails, EntityKind, IssueGraphWrite, NewCredit,
    NewEntity, NewIssueGraph, NewPublisher, NewTeam,
};
use crate::issue_number::format_issue_number;
use crate::library::{IssueGraphInsert, LibraryError, LibraryManager};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Why a metadata record produced no issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Nothing identifying in the metadata
    EmptyMetadata,
    /// Neither the notes nor the web link carry a catalog issue id
    NoCatalogId,
    /// The catalog returned nothing for the issue id
    CatalogUnavailable,
    /// The file or catalog id is already imported
    DuplicateFile,
    /// The file path is not valid UTF-8
    InvalidPath,
    /// The store rejected the record, e.g. no free slug could be found
    ImportFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Imported { issue_id: String },
    Skipped(SkipReason),
}

/// Catalog issue id from the tagger notes ("... [Issue ID 8192]") or the web
/// link (".../4000-8192/"), in that order
pub fn resolve_issue_cvid(md: &ComicMetadata) -> Option<i64> {
    static NOTES: OnceLock<Regex> = OnceLock::new();
    static WEB_LINK: OnceLock<Regex> = OnceLock::new();

    let from_notes = md.notes.as_deref().and_then(|notes| {
        NOTES
            .get_or_init(|| Regex::new(r"(\d+)\]").unwrap())
            .captures(notes)
            .and_then(|caps| caps[1].parse().ok())
    });

    from_notes.or_else(|| {
        md.web_link.as_deref().and_then(|link| {
            WEB_LINK
                .get_or_init(|| Regex::new(r"/\d+-(\d+)/").unwrap())
                .captures(link)
                .and_then(|caps| caps[1].parse().ok())
        })
    })
}

/// Split a credit's role string ("penciler, inker") into title-cased role names
pub fn parse_roles(role: &str) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    for part in role.split(',') {
        let name = part
            .split_whitespace()
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" ");
        if !name.is_empty() && !roles.contains(&name) {
            roles.push(name);
        }
    }
    roles
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn describe(md: &ComicMetadata) -> String {
    match (&md.series, &md.issue) {
        (Some(series), Some(issue)) => format!("{} #{}", series, issue),
        (Some(series), None) => series.clone(),
        _ => md.path.display().to_string(),
    }
}

/// A publisher is linked to the catalog once, when it first has no catalog id
fn needs_catalog_link(local: Option<&DbPublisher>) -> bool {
    local.map_or(true, |p| p.cvid.is_none())
}

/// Reconciles archive metadata against the catalog and the store
pub struct EntityReconciler {
    library: LibraryManager,
    catalog: Arc<dyn CatalogSource>,
}

impl EntityReconciler {
    pub fn new(library: LibraryManager, catalog: Arc<dyn CatalogSource>) -> Self {
        EntityReconciler { library, catalog }
    }

    /// Import one archive's metadata
    ///
    /// Missing ids, catalog failures and duplicate files are reported as
    /// skips; only store failures are errors. Nothing is written unless the
    /// whole issue graph is.
    pub async fn reconcile(&self, md: &ComicMetadata) -> Result<ReconcileOutcome, LibraryError> {
        if md.is_empty() {
            debug!("Empty metadata for {}", md.path.display());
            return Ok(ReconcileOutcome::Skipped(SkipReason::EmptyMetadata));
        }

        let Some(file) = md.path.to_str() else {
            warn!("Skipping non UTF-8 path {}", md.path.display());
            return Ok(ReconcileOutcome::Skipped(SkipReason::InvalidPath));
        };

        let Some(cvid) = resolve_issue_cvid(md) else {
            info!("No catalog id for: {}... skipping", describe(md));
            return Ok(ReconcileOutcome::Skipped(SkipReason::NoCatalogId));
        };

        if let Some(existing) = self.library.database().get_issue_by_cvid(cvid).await? {
            warn!(
                "Skipping {}: catalog issue {} is already imported from {}",
                file, cvid, existing.file
            );
            return Ok(ReconcileOutcome::Skipped(SkipReason::DuplicateFile));
        }

        let Some(detail) = self.catalog.fetch_issue(&CatalogTarget::Id(cvid)).await else {
            info!("No catalog issue {} for {}... skipping", cvid, describe(md));
            return Ok(ReconcileOutcome::Skipped(SkipReason::CatalogUnavailable));
        };

        let graph = self.plan(md, file, cvid, &detail).await?;

        let write = match self.library.create_issue_graph(&graph).await? {
            IssueGraphInsert::Created(write) => write,
            IssueGraphInsert::Duplicate(reason) => {
                warn!("Skipping {}: already imported ({})", file, reason);
                return Ok(ReconcileOutcome::Skipped(SkipReason::DuplicateFile));
            }
        };

        log_write(&write, graph.publisher.as_ref());
        Ok(ReconcileOutcome::Imported {
            issue_id: write.issue.id.clone(),
        })
    }

    /// Gather everything the issue needs from the store and the catalog
    async fn plan(
        &self,
        md: &ComicMetadata,
        file: &str,
        cvid: i64,
        detail: &IssueDetail,
    ) -> Result<NewIssueGraph, LibraryError> {
        let database = self.library.database();
        let known_series = database.get_series_by_cvid(detail.volume.cvid).await?;

        let mut named = match md.publisher.as_deref() {
            Some(name) => Some((name.to_string(), database.get_publisher_by_name(name).await?)),
            None => None,
        };
        let named_unlinked =
            matches!(&named, Some((_, local)) if needs_catalog_link(local.as_ref()));

        let series_detail = if known_series.is_none() || named_unlinked {
            self.catalog.fetch_series(&detail.volume.target()).await
        } else {
            None
        };
        let catalog_publisher = series_detail.as_ref().and_then(|sd| sd.publisher.clone());

        // A new series without a publisher in its metadata takes the catalog's
        if named.is_none() && known_series.is_none() {
            if let Some(name) = catalog_publisher
                .as_ref()
                .map(|p| p.name.clone())
                .filter(|name| !name.is_empty())
            {
                let local = database.get_publisher_by_name(&name).await?;
                named = Some((name, local));
            }
        }

        let publisher = match named {
            Some((name, local)) => {
                let catalog = if needs_catalog_link(local.as_ref()) {
                    self.publisher_details(&name, catalog_publisher.as_ref()).await
                } else {
                    None
                };
                Some(NewPublisher { name, catalog })
            }
            None => None,
        };

        let series = match known_series {
            Some(series) => series,
            None => new_series(&detail.volume, series_detail.as_ref(), md),
        };
        let (issue, slug_source) = new_issue(md, file, cvid, detail, &series);

        let mut characters = Vec::with_capacity(detail.characters.len());
        for reference in &detail.characters {
            characters.push(self.new_entity(EntityKind::Character, reference).await?);
        }
        let mut arcs = Vec::with_capacity(detail.arcs.len());
        for reference in &detail.arcs {
            arcs.push(self.new_entity(EntityKind::Arc, reference).await?);
        }
        let mut teams = Vec::with_capacity(detail.teams.len());
        for reference in &detail.teams {
            teams.push(self.new_team(reference).await?);
        }
        let mut credits = Vec::with_capacity(detail.persons.len());
        for person in &detail.persons {
            credits.push(NewCredit {
                creator: self
                    .new_entity(EntityKind::Creator, &person.reference)
                    .await?,
                roles: parse_roles(&person.role),
            });
        }

        Ok(NewIssueGraph {
            publisher,
            series,
            issue,
            slug_source,
            characters,
            arcs,
            teams,
            credits,
        })
    }

    /// Catalog id and details for a publisher that has none yet, found
    /// through its series
    async fn publisher_details(
        &self,
        name: &str,
        reference: Option<&CatalogRef>,
    ) -> Option<(i64, EntityDetails)> {
        let Some(reference) = reference else {
            info!("No catalog publisher for: {}", name);
            return None;
        };
        let Some(record) = self.catalog.fetch_publisher(&reference.target()).await else {
            info!("No publisher detail info available for: {}", name);
            return None;
        };
        Some((record.cvid, details_from(record)))
    }

    /// Cross reference to get-or-create; details are fetched only for
    /// entities the library does not have yet
    async fn new_entity(
        &self,
        kind: EntityKind,
        reference: &CatalogRef,
    ) -> Result<NewEntity, LibraryError> {
        let mut entity = NewEntity {
            cvid: reference.cvid,
            name: reference.name.clone(),
            details: None,
        };
        if self
            .library
            .database()
            .get_entity_by_cvid(kind, reference.cvid)
            .await?
            .is_some()
        {
            return Ok(entity);
        }

        let target = reference.target();
        let record = match kind {
            EntityKind::Character => self.catalog.fetch_character(&target).await,
            EntityKind::Arc => self.catalog.fetch_arc(&target).await,
            EntityKind::Creator => self.catalog.fetch_creator(&target).await,
            EntityKind::Team => self.catalog.fetch_team(&target).await.map(|d| d.record),
        };
        match record {
            Some(record) => entity.details = Some(details_from(record)),
            None => info!("No {} detail info available for: {}", kind.label(), reference.name),
        }
        Ok(entity)
    }

    async fn new_team(&self, reference: &CatalogRef) -> Result<NewTeam, LibraryError> {
        let mut team = NewTeam {
            team: NewEntity {
                cvid: reference.cvid,
                name: reference.name.clone(),
                details: None,
            },
            members: Vec::new(),
        };
        if self
            .library
            .database()
            .get_entity_by_cvid(EntityKind::Team, reference.cvid)
            .await?
            .is_some()
        {
            return Ok(team);
        }

        match self.catalog.fetch_team(&reference.target()).await {
            Some(detail) => {
                team.members = detail.members.iter().map(|m| m.cvid).collect();
                team.team.details = Some(details_from(detail.record));
            }
            None => info!("No team detail info available for: {}", reference.name),
        }
        Ok(team)
    }
}

fn new_series(
    volume: &CatalogRef,
    series_detail: Option<&SeriesDetail>,
    md: &ComicMetadata,
) -> DbSeries {
    let name = series_detail
        .map(|sd| sd.record.name.clone())
        .filter(|name| !name.is_empty())
        .or_else(|| Some(volume.name.clone()).filter(|name| !name.is_empty()))
        .or_else(|| md.series.clone())
        .unwrap_or_else(|| format!("Volume {}", volume.cvid));

    let mut series = DbSeries::new(volume.cvid, &name);
    match series_detail {
        Some(sd) => {
            series.cvurl = sd.record.url.clone();
            series.year = sd.record.year;
            series.desc = sd.record.description.clone();
        }
        None => info!("No series detail available for: {}", name),
    }
    series
}

/// The issue row and the text its slug is derived from
fn new_issue(
    md: &ComicMetadata,
    file: &str,
    cvid: i64,
    detail: &IssueDetail,
    series: &DbSeries,
) -> (DbIssue, String) {
    let raw_number = md
        .issue
        .clone()
        .or_else(|| detail.record.number.clone())
        .unwrap_or_default();
    let number = format_issue_number(&raw_number);

    let cover_date = detail.cover_date.or_else(|| md.cover_date());
    let slug_source = match md.cover_date().or(cover_date) {
        Some(date) => format!("{} {} {}", series.name, number, date.format("%Y")),
        None => format!("{} {}", series.name, number),
    };

    let mut issue = DbIssue::new(cvid, &series.id, &number, file, md.mod_ts);
    issue.name = md
        .title
        .clone()
        .unwrap_or_else(|| detail.record.name.clone());
    issue.cvurl = md.web_link.clone().or_else(|| detail.record.url.clone());
    issue.cover_date = cover_date;
    issue.page_count = md.page_count;
    issue.cover = detail.record.image.clone();
    issue.desc = if detail.record.description.is_empty() {
        md.comments.clone().unwrap_or_default()
    } else {
        detail.record.description.clone()
    };

    (issue, slug_source)
}

fn log_write(write: &IssueGraphWrite, publisher: Option<&NewPublisher>) {
    if let Some(publisher) = publisher {
        if write.publisher_created {
            info!("Created publisher '{}'", publisher.name);
        }
        if write.publisher_linked {
            info!("Added publisher: {}", publisher.name);
        }
    }
    if write.series_created {
        info!("Added series: {}", write.series.name);
    }
    info!("Added: {} #{}", write.series.name, write.issue.number);
    for (kind, name) in &write.created {
        info!("Added {}: {}", kind.label(), name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cvid_from_notes() {
        let md = ComicMetadata {
            notes: Some(
                "Tagged with ComicTagger 1.1.32 using info from Comic Vine on 2016-10-08.  [Issue ID 8192]"
                    .into(),
            ),
            web_link: Some("https://comicvine.gamespot.com/x/4000-1111/".into()),
            ..Default::default()
        };
        assert_eq!(resolve_issue_cvid(&md), Some(8192));
    }

    #[test]
    fn test_cvid_from_web_link() {
        let md = ComicMetadata {
            notes: Some("Scanned by someone".into()),
            web_link: Some("https://comicvine.gamespot.com/captain-atom-78-sharks/4000-8192/".into()),
            ..Default::default()
        };
        assert_eq!(resolve_issue_cvid(&md), Some(8192));
    }

    #[test]
    fn test_no_cvid() {
        let md = ComicMetadata {
            series: Some("Captain Atom".into()),
            issue: Some("78".into()),
            ..Default::default()
        };
        assert_eq!(resolve_issue_cvid(&md), None);
    }

    #[test]
    fn test_parse_roles() {
        assert_eq!(
            parse_roles("penciler, inker,cover, , PENCILER"),
            vec!["Penciler", "Inker", "Cover"]
        );
        assert_eq!(parse_roles("cover artist"), vec!["Cover Artist"]);
        assert!(parse_roles("").is_empty());
    }
}
