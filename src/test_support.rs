// Test support utilities for both unit and integration tests

use crate::archive::{ArchiveInspector, ComicMetadata};
use crate::catalog::{
    CatalogRecord, CatalogRef, CatalogSource, CatalogTarget, IssueDetail, PersonCredit,
    SeriesDetail, TeamDetail,
};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// In-memory catalog
///
/// Records are registered up front; anything unregistered fetches as `None`.
/// Every fetch is counted per kind so tests can assert on cache-free call
/// patterns.
#[derive(Default)]
pub struct MockCatalog {
    issues: Mutex<HashMap<i64, IssueDetail>>,
    series: Mutex<HashMap<i64, SeriesDetail>>,
    publishers: Mutex<HashMap<i64, CatalogRecord>>,
    characters: Mutex<HashMap<i64, CatalogRecord>>,
    arcs: Mutex<HashMap<i64, CatalogRecord>>,
    creators: Mutex<HashMap<i64, CatalogRecord>>,
    teams: Mutex<HashMap<i64, TeamDetail>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    stalled: Mutex<HashSet<(&'static str, i64)>>,
}

impl MockCatalog {
    #[allow(unused)] // Used in tests
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_issue(&self, detail: IssueDetail) {
        self.issues.lock().unwrap().insert(detail.record.cvid, detail);
    }

    pub fn add_series(&self, detail: SeriesDetail) {
        self.series.lock().unwrap().insert(detail.record.cvid, detail);
    }

    pub fn add_publisher(&self, record: CatalogRecord) {
        self.publishers.lock().unwrap().insert(record.cvid, record);
    }

    pub fn add_character(&self, record: CatalogRecord) {
        self.characters.lock().unwrap().insert(record.cvid, record);
    }

    pub fn add_arc(&self, record: CatalogRecord) {
        self.arcs.lock().unwrap().insert(record.cvid, record);
    }

    pub fn add_creator(&self, record: CatalogRecord) {
        self.creators.lock().unwrap().insert(record.cvid, record);
    }

    pub fn add_team(&self, detail: TeamDetail) {
        self.teams.lock().unwrap().insert(detail.record.cvid, detail);
    }

    /// Number of fetches made for a kind ("issue", "series", "publisher",
    /// "character", "arc", "creator", "team")
    pub fn calls(&self, kind: &str) -> usize {
        self.calls.lock().unwrap().get(kind).copied().unwrap_or(0)
    }

    /// Make fetches of one record never complete, until `resume_all`
    pub fn stall(&self, kind: &'static str, cvid: i64) {
        self.stalled.lock().unwrap().insert((kind, cvid));
    }

    pub fn resume_all(&self) {
        self.stalled.lock().unwrap().clear();
    }

    async fn count(&self, kind: &'static str, target: &CatalogTarget) {
        *self.calls.lock().unwrap().entry(kind).or_default() += 1;

        let stalled = target_id(target)
            .map(|id| self.stalled.lock().unwrap().contains(&(kind, id)))
            .unwrap_or(false);
        if stalled {
            std::future::pending::<()>().await;
        }
    }
}

/// Catalog id of a target; URLs end in `/<prefix>-<cvid>/`
fn target_id(target: &CatalogTarget) -> Option<i64> {
    match target {
        CatalogTarget::Id(id) => Some(*id),
        CatalogTarget::Url(url) => url
            .trim_end_matches('/')
            .rsplit('-')
            .next()
            .and_then(|id| id.parse().ok()),
    }
}

fn lookup<T: Clone>(map: &Mutex<HashMap<i64, T>>, target: &CatalogTarget) -> Option<T> {
    let id = target_id(target)?;
    map.lock().unwrap().get(&id).cloned()
}

#[async_trait::async_trait]
impl CatalogSource for MockCatalog {
    async fn fetch_issue(&self, target: &CatalogTarget) -> Option<IssueDetail> {
        self.count("issue", target).await;
        lookup(&self.issues, target)
    }

    async fn fetch_series(&self, target: &CatalogTarget) -> Option<SeriesDetail> {
        self.count("series", target).await;
        lookup(&self.series, target)
    }

    async fn fetch_publisher(&self, target: &CatalogTarget) -> Option<CatalogRecord> {
        self.count("publisher", target).await;
        lookup(&self.publishers, target)
    }

    async fn fetch_character(&self, target: &CatalogTarget) -> Option<CatalogRecord> {
        self.count("character", target).await;
        lookup(&self.characters, target)
    }

    async fn fetch_arc(&self, target: &CatalogTarget) -> Option<CatalogRecord> {
        self.count("arc", target).await;
        lookup(&self.arcs, target)
    }

    async fn fetch_creator(&self, target: &CatalogTarget) -> Option<CatalogRecord> {
        self.count("creator", target).await;
        lookup(&self.creators, target)
    }

    async fn fetch_team(&self, target: &CatalogTarget) -> Option<TeamDetail> {
        self.count("team", target).await;
        lookup(&self.teams, target)
    }
}

/// Inspector backed by a table of path → embedded metadata
///
/// Any file ending in .cbz is an archive; registered paths also expose
/// embedded metadata. Page count is fixed.
#[derive(Default)]
pub struct MockInspector {
    embedded: Mutex<HashMap<PathBuf, ComicMetadata>>,
}

impl MockInspector {
    pub const PAGE_COUNT: i32 = 24;

    #[allow(unused)] // Used in tests
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_embedded(&self, path: &Path, md: ComicMetadata) {
        self.embedded.lock().unwrap().insert(path.to_path_buf(), md);
    }
}

impl ArchiveInspector for MockInspector {
    fn is_comic_archive(&self, path: &Path) -> bool {
        path.is_file() && path.extension().map(|e| e == "cbz").unwrap_or(false)
    }

    fn page_count(&self, _path: &Path) -> Option<i32> {
        Some(Self::PAGE_COUNT)
    }

    fn read_embedded(&self, path: &Path) -> Option<ComicMetadata> {
        self.embedded.lock().unwrap().get(path).cloned()
    }
}

pub fn record(cvid: i64, name: &str) -> CatalogRecord {
    CatalogRecord {
        cvid,
        name: name.to_string(),
        url: Some(format!("https://comicvine.gamespot.com/x/{}/", cvid)),
        description: format!("About {}", name),
        ..Default::default()
    }
}

/// Captain Atom #78 as the catalog describes it, with its series, publisher,
/// cast and credits registered on `catalog`
///
/// The issue's cover is `cover` (a path relative to the media root).
pub fn seed_captain_atom(catalog: &MockCatalog, cover: Option<&str>) {
    let mut issue = record(8192, "Sharks");
    issue.number = Some("78".to_string());
    issue.description = "Captain Atom faces a deadly foe.".to_string();
    issue.image = cover.map(str::to_string);

    catalog.add_issue(IssueDetail {
        record: issue,
        cover_date: NaiveDate::from_ymd_opt(1989, 8, 1),
        volume: CatalogRef::new(3774, "Captain Atom"),
        characters: vec![
            CatalogRef::new(1253, "Captain Atom"),
            CatalogRef::new(2103, "Major Force"),
        ],
        arcs: vec![CatalogRef::new(55766, "Janus Directive")],
        teams: vec![CatalogRef::new(1410, "Justice League")],
        persons: vec![
            PersonCredit {
                reference: CatalogRef::new(40439, "Cary Bates"),
                role: "writer".to_string(),
            },
            PersonCredit {
                reference: CatalogRef::new(41322, "Rafael Kayanan"),
                role: "penciler, cover".to_string(),
            },
        ],
    });

    let mut series = record(3774, "Captain Atom");
    series.year = Some(1987);
    catalog.add_series(SeriesDetail {
        record: series,
        publisher: Some(CatalogRef::new(10, "DC Comics")),
    });
    catalog.add_publisher(record(10, "DC Comics"));
    catalog.add_character(record(1253, "Captain Atom"));
    catalog.add_character(record(2103, "Major Force"));
    catalog.add_arc(record(55766, "Janus Directive"));
    catalog.add_creator(record(40439, "Cary Bates"));
    catalog.add_creator(record(41322, "Rafael Kayanan"));
    catalog.add_team(TeamDetail {
        record: record(1410, "Justice League"),
        members: vec![
            CatalogRef::new(1253, "Captain Atom"),
            CatalogRef::new(9999, "Someone Unknown"),
        ],
    });
}

/// Embedded metadata as a tagger would write it for Captain Atom #78
pub fn captain_atom_metadata() -> ComicMetadata {
    ComicMetadata {
        series: Some("Captain Atom".to_string()),
        issue: Some("78".to_string()),
        title: Some("Sharks".to_string()),
        publisher: Some("DC Comics".to_string()),
        year: Some(1989),
        month: Some(8),
        notes: Some(
            "Tagged with ComicTagger 1.1.32 using info from Comic Vine. [Issue ID 8192]"
                .to_string(),
        ),
        ..Default::default()
    }
}
