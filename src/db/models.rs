use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

use crate::slug::sort_name;

// String constants for SQL DEFAULT clauses (keep in sync with as_str())
pub(crate) const READ_STATUS_UNREAD: &str = "unread";
const READ_STATUS_PARTIALLY_READ: &str = "partially_read";
const READ_STATUS_READ: &str = "read";

// Every catalog-backed row carries the catalog's stable id (`cvid`), which is
// the reconciliation key for imports. Local primary keys are UUID strings.

/// Reading progress for an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum ReadStatus {
    Unread,
    PartiallyRead,
    Read,
}

impl ReadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadStatus::Unread => READ_STATUS_UNREAD,
            ReadStatus::PartiallyRead => READ_STATUS_PARTIALLY_READ,
            ReadStatus::Read => READ_STATUS_READ,
        }
    }
}

/// Kinds of catalog entity that hang off an issue as cross references.
///
/// They share one row shape (`DbEntity`) and differ only in table and join
/// table names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Arc,
    Character,
    Team,
    Creator,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Arc => "arcs",
            EntityKind::Character => "characters",
            EntityKind::Team => "teams",
            EntityKind::Creator => "creators",
        }
    }

    /// Join table linking this kind to issues, with its foreign key column.
    ///
    /// Creators are linked through `creator_credits` instead.
    pub fn issue_join(&self) -> Option<(&'static str, &'static str)> {
        match self {
            EntityKind::Arc => Some(("issue_arcs", "arc_id")),
            EntityKind::Character => Some(("issue_characters", "character_id")),
            EntityKind::Team => Some(("issue_teams", "team_id")),
            EntityKind::Creator => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Arc => "story arc",
            EntityKind::Character => "character",
            EntityKind::Team => "team",
            EntityKind::Creator => "creator",
        }
    }
}

/// Publisher of one or more series
///
/// Publishers are first created from the free-text name found in an archive's
/// metadata, before their catalog id is known. The id, description and logo
/// are filled in once the series lookup reveals it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbPublisher {
    pub id: String,
    pub cvid: Option<i64>,
    pub cvurl: Option<String>,
    pub name: String,
    pub slug: String,
    pub desc: String,
    /// Logo path relative to the media root
    pub logo: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DbPublisher {
    pub fn new(name: &str, slug: &str) -> Self {
        DbPublisher {
            id: Uuid::new_v4().to_string(),
            cvid: None,
            cvurl: None,
            name: name.to_string(),
            slug: slug.to_string(),
            desc: String::new(),
            logo: None,
            created_at: Utc::now(),
        }
    }
}

/// A comic series (the catalog calls these "volumes")
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbSeries {
    pub id: String,
    pub cvid: i64,
    pub cvurl: Option<String>,
    pub name: String,
    pub slug: String,
    /// Name used for alphabetical ordering (e.g., "Avengers, The")
    pub sort_title: String,
    pub publisher_id: Option<String>,
    pub year: Option<i32>,
    pub desc: String,
    pub created_at: DateTime<Utc>,
}

impl DbSeries {
    /// New series row; the slug is assigned when it is inserted
    pub fn new(cvid: i64, name: &str) -> Self {
        DbSeries {
            id: Uuid::new_v4().to_string(),
            cvid,
            cvurl: None,
            name: name.to_string(),
            slug: String::new(),
            sort_title: sort_name(name),
            publisher_id: None,
            year: None,
            desc: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// One comic archive on disk
///
/// `file` is unique: there is exactly one row per imported file. `mod_ts` is
/// the file's modification time at import; a mismatch on a later scan means
/// the file changed and the row gets re-imported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbIssue {
    pub id: String,
    pub cvid: i64,
    pub cvurl: Option<String>,
    pub series_id: String,
    pub name: String,
    pub slug: String,
    /// Padded issue number, e.g. "001" or "001.MU"
    pub number: String,
    pub cover_date: Option<NaiveDate>,
    pub desc: String,
    pub file: String,
    /// Cover path relative to the media root
    pub cover: Option<String>,
    pub status: ReadStatus,
    /// Last page read
    pub leaf: i32,
    pub page_count: i32,
    pub mod_ts: DateTime<Utc>,
    pub import_date: DateTime<Utc>,
}

impl DbIssue {
    /// New unread issue for a file; the slug is assigned when it is inserted
    pub fn new(
        cvid: i64,
        series_id: &str,
        number: &str,
        file: &str,
        mod_ts: DateTime<Utc>,
    ) -> Self {
        DbIssue {
            id: Uuid::new_v4().to_string(),
            cvid,
            cvurl: None,
            series_id: series_id.to_string(),
            name: String::new(),
            slug: String::new(),
            number: number.to_string(),
            cover_date: None,
            desc: String::new(),
            file: file.to_string(),
            cover: None,
            status: ReadStatus::Unread,
            leaf: 1,
            page_count: 0,
            mod_ts,
            import_date: Utc::now(),
        }
    }
}

/// Story arc, character, team or creator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbEntity {
    pub id: String,
    pub cvid: i64,
    pub cvurl: Option<String>,
    pub name: String,
    pub slug: String,
    pub desc: String,
    /// Image path relative to the media root
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DbEntity {
    pub fn new(cvid: i64, name: &str, slug: &str) -> Self {
        DbEntity {
            id: Uuid::new_v4().to_string(),
            cvid,
            cvurl: None,
            name: name.to_string(),
            slug: slug.to_string(),
            desc: String::new(),
            image: None,
            created_at: Utc::now(),
        }
    }
}

/// A creative function such as "Writer" or "Penciler", shared by all credits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbRole {
    pub id: String,
    pub name: String,
}

/// Links a creator to an issue; roles hang off it via `credit_roles`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbCreatorCredit {
    pub id: String,
    pub creator_id: String,
    pub issue_id: String,
}

/// Descriptive fields written back after a catalog detail fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityDetails {
    pub cvurl: Option<String>,
    pub desc: String,
    pub image: Option<String>,
}

/// A catalog entity to get-or-create while writing an issue graph
///
/// `details` is applied only when the row is created by that write.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub cvid: i64,
    pub name: String,
    pub details: Option<EntityDetails>,
}

/// A team plus the catalog ids of its members, linked when the team is created
#[derive(Debug, Clone, PartialEq)]
pub struct NewTeam {
    pub team: NewEntity,
    pub members: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCredit {
    pub creator: NewEntity,
    pub roles: Vec<String>,
}

/// A publisher looked up by name; `catalog` links it when it has no catalog id yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewPublisher {
    pub name: String,
    pub catalog: Option<(i64, EntityDetails)>,
}

/// Everything one archive contributes, written in a single transaction
#[derive(Debug, Clone, PartialEq)]
pub struct NewIssueGraph {
    pub publisher: Option<NewPublisher>,
    /// Inserted unless a series with its catalog id exists; slug and
    /// publisher are filled in by the write
    pub series: DbSeries,
    /// `series_id` and `slug` are filled in by the write
    pub issue: DbIssue,
    pub slug_source: String,
    pub characters: Vec<NewEntity>,
    pub arcs: Vec<NewEntity>,
    pub teams: Vec<NewTeam>,
    pub credits: Vec<NewCredit>,
}

/// Rows a committed issue graph created
#[derive(Debug, Clone, PartialEq)]
pub struct IssueGraphWrite {
    pub issue: DbIssue,
    pub series: DbSeries,
    pub series_created: bool,
    pub publisher_created: bool,
    pub publisher_linked: bool,
    /// Names of the entities this write created, per kind
    pub created: Vec<(EntityKind, String)>,
}

/// Rows removed by the orphan sweep that follows an issue deletion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrphanSweep {
    pub arcs: Vec<String>,
    pub characters: Vec<String>,
    pub teams: Vec<String>,
    pub series: Option<String>,
    /// Image files (relative to the media root) that belonged to removed rows
    pub images: Vec<String>,
}

impl OrphanSweep {
    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
            && self.characters.is_empty()
            && self.teams.is_empty()
            && self.series.is_none()
    }
}

/// Candidate rows that may become orphans once an issue is gone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrphanCandidates {
    pub arcs: Vec<String>,
    pub characters: Vec<String>,
    pub teams: Vec<String>,
    pub series_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_status_strings() {
        assert_eq!(ReadStatus::Unread.as_str(), "unread");
        assert_eq!(ReadStatus::PartiallyRead.as_str(), "partially_read");
        assert_eq!(ReadStatus::Read.as_str(), "read");
    }

    #[test]
    fn test_entity_kind_join_tables() {
        assert_eq!(
            EntityKind::Character.issue_join(),
            Some(("issue_characters", "character_id"))
        );
        assert_eq!(EntityKind::Creator.issue_join(), None);
        assert_eq!(EntityKind::Team.table(), "teams");
    }

    #[test]
    fn test_new_series_sorts_without_article() {
        let series = DbSeries::new(18436, "The Avengers");
        assert_eq!(series.sort_title, "Avengers, The");
        assert!(series.slug.is_empty());
    }

    #[test]
    fn test_new_issue_starts_unread() {
        let issue = DbIssue::new(8192, "series-id", "078", "/comics/a.cbz", Utc::now());
        assert_eq!(issue.status, ReadStatus::Unread);
        assert_eq!(issue.leaf, 1);
    }
}
