use crate::db::{
    is_unique_violation, Database, DbEntity, DbIssue, DbSeries, EntityDetails, EntityKind,
    IssueGraphWrite, NewIssueGraph, OrphanSweep, ReadStatus,
};
use crate::slug::slugify;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Slug selection races with other writers; give up after this many lost races
const MAX_SLUG_ATTEMPTS: usize = 5;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Import error: {0}")]
    Import(String),
}

/// Result of inserting a new issue row
#[derive(Debug, Clone, PartialEq)]
pub enum IssueInsert {
    Created(DbIssue),
    /// The file path or catalog id is already taken; carries the constraint message
    Duplicate(String),
}

/// Result of writing an issue together with everything it references
#[derive(Debug, Clone, PartialEq)]
pub enum IssueGraphInsert {
    Created(Box<IssueGraphWrite>),
    /// The file path or catalog id is already taken; nothing was written
    Duplicate(String),
}

/// The library manager for entity persistence
///
/// Handles:
/// - Transactional writes of an issue with its publisher, series, cross
///   references and credits, with collision-free slugs
/// - Issue insertion and deletion (with the orphan sweep and image cleanup)
/// - Descriptive field updates and reading progress
#[derive(Debug, Clone)]
pub struct LibraryManager {
    database: Database,
    media_root: PathBuf,
}

impl LibraryManager {
    /// Create a new library manager
    ///
    /// `media_root` is the directory stored image paths are relative to.
    pub fn new(database: Database, media_root: impl Into<PathBuf>) -> Self {
        LibraryManager {
            database,
            media_root: media_root.into(),
        }
    }

    /// Direct access to the store for read queries
    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    /// Insert a series unless its catalog id is already known
    ///
    /// The slug is derived from the series name. Returns the stored row and
    /// whether it was created by this call.
    pub async fn create_series(
        &self,
        mut series: DbSeries,
    ) -> Result<(DbSeries, bool), LibraryError> {
        let base = slugify(&series.name);
        for _ in 0..MAX_SLUG_ATTEMPTS {
            series.slug = self.database.unique_slug("series", &base).await?;

            match self.database.insert_series_if_absent(&series).await {
                Ok(true) => {
                    info!("Created series '{}' (cvid {})", series.name, series.cvid);
                    return Ok((series, true));
                }
                Ok(false) => {
                    let existing = self.database.get_series_by_cvid(series.cvid).await?;
                    return existing.map(|s| (s, false)).ok_or_else(|| {
                        LibraryError::Import(format!(
                            "Series {} vanished after insert",
                            series.cvid
                        ))
                    });
                }
                Err(e) if is_unique_violation(&e) => {
                    debug!("Slug '{}' was taken concurrently, retrying", series.slug);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LibraryError::Import(format!(
            "No free slug for series '{}'",
            series.name
        )))
    }

    /// Fetch the arc, character, team or creator with this catalog id,
    /// creating it if needed
    pub async fn get_or_create_entity(
        &self,
        kind: EntityKind,
        cvid: i64,
        name: &str,
    ) -> Result<(DbEntity, bool), LibraryError> {
        if let Some(existing) = self.database.get_entity_by_cvid(kind, cvid).await? {
            return Ok((existing, false));
        }

        let base = slugify(name);
        for _ in 0..MAX_SLUG_ATTEMPTS {
            let slug = self.database.unique_slug(kind.table(), &base).await?;
            let entity = DbEntity::new(cvid, name, &slug);

            match self.database.insert_entity_if_absent(kind, &entity).await {
                Ok(true) => {
                    debug!("Created {} '{}' (cvid {})", kind.label(), name, cvid);
                    return Ok((entity, true));
                }
                Ok(false) => {
                    let existing = self.database.get_entity_by_cvid(kind, cvid).await?;
                    return existing.map(|e| (e, false)).ok_or_else(|| {
                        LibraryError::Import(format!(
                            "{} {} vanished after insert",
                            kind.label(),
                            cvid
                        ))
                    });
                }
                Err(e) if is_unique_violation(&e) => {
                    debug!("Slug '{}' was taken concurrently, retrying", slug);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LibraryError::Import(format!(
            "No free slug for {} '{}'",
            kind.label(),
            name
        )))
    }

    /// Insert a new issue with a collision-free slug derived from `slug_source`
    ///
    /// A file path or catalog id that is already taken is reported as
    /// `IssueInsert::Duplicate` rather than an error.
    pub async fn create_issue(
        &self,
        mut issue: DbIssue,
        slug_source: &str,
    ) -> Result<IssueInsert, LibraryError> {
        let base = slugify(slug_source);
        for _ in 0..MAX_SLUG_ATTEMPTS {
            issue.slug = self.database.unique_slug("issues", &base).await?;

            match self.database.insert_issue(&issue).await {
                Ok(()) => {
                    info!("Created issue '{}' for {}", issue.slug, issue.file);
                    return Ok(IssueInsert::Created(issue));
                }
                Err(e) if is_unique_violation(&e) => {
                    let message = constraint_message(&e);
                    if message.contains("issues.slug") {
                        debug!("Slug '{}' was taken concurrently, retrying", issue.slug);
                        continue;
                    }
                    return Ok(IssueInsert::Duplicate(message));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LibraryError::Import(format!(
            "No free slug for issue '{}'",
            slug_source
        )))
    }

    /// Write an issue and its publisher, series, cross references and credits
    /// in one transaction
    ///
    /// A lost slug race rolls back and retries the whole write. A file path or
    /// catalog id that is already taken is reported as
    /// `IssueGraphInsert::Duplicate`.
    pub async fn create_issue_graph(
        &self,
        graph: &NewIssueGraph,
    ) -> Result<IssueGraphInsert, LibraryError> {
        for _ in 0..MAX_SLUG_ATTEMPTS {
            match self.database.insert_issue_graph(graph).await {
                Ok(write) => {
                    info!("Created issue '{}' for {}", write.issue.slug, write.issue.file);
                    return Ok(IssueGraphInsert::Created(Box::new(write)));
                }
                Err(e) if is_unique_violation(&e) => {
                    let message = constraint_message(&e);
                    if is_duplicate_issue(&message) {
                        return Ok(IssueGraphInsert::Duplicate(message));
                    }
                    debug!("Slug was taken concurrently ({}), retrying", message);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LibraryError::Import(format!(
            "No free slug for issue '{}'",
            graph.slug_source
        )))
    }

    pub async fn attach_character_to_team(
        &self,
        character_id: &str,
        team_id: &str,
    ) -> Result<(), LibraryError> {
        self.database
            .attach_character_to_team(character_id, team_id)
            .await?;
        Ok(())
    }

    pub async fn update_publisher_details(
        &self,
        publisher_id: &str,
        cvid: Option<i64>,
        details: &EntityDetails,
    ) -> Result<(), LibraryError> {
        self.database
            .update_publisher_details(publisher_id, cvid, details)
            .await?;
        Ok(())
    }

    pub async fn update_series_details(
        &self,
        series_id: &str,
        year: Option<i32>,
        details: &EntityDetails,
    ) -> Result<(), LibraryError> {
        self.database
            .update_series_details(series_id, year, details)
            .await?;
        Ok(())
    }

    pub async fn update_issue_details(
        &self,
        issue_id: &str,
        name: Option<&str>,
        details: &EntityDetails,
    ) -> Result<(), LibraryError> {
        self.database
            .update_issue_details(issue_id, name, details)
            .await?;
        Ok(())
    }

    pub async fn update_entity_details(
        &self,
        kind: EntityKind,
        entity_id: &str,
        details: &EntityDetails,
    ) -> Result<(), LibraryError> {
        self.database
            .update_entity_details(kind, entity_id, details)
            .await?;
        Ok(())
    }

    /// Record reading progress for an issue
    pub async fn update_issue_status(
        &self,
        issue_id: &str,
        status: ReadStatus,
        leaf: i32,
    ) -> Result<(), LibraryError> {
        if leaf < 1 {
            return Err(LibraryError::Import(format!(
                "Invalid page {} for issue {}",
                leaf, issue_id
            )));
        }
        self.database
            .update_issue_status(issue_id, status, leaf)
            .await?;
        Ok(())
    }

    /// Get all issues in the library
    pub async fn get_issues(&self) -> Result<Vec<DbIssue>, LibraryError> {
        Ok(self.database.get_issues().await?)
    }

    /// Delete an issue, sweep the rows it orphaned and remove their image files
    ///
    /// Image files still referenced by another row are kept. Failing to remove
    /// an image is logged, never fatal.
    pub async fn delete_issue(&self, issue_id: &str) -> Result<OrphanSweep, LibraryError> {
        let sweep = self.database.delete_issue(issue_id).await?;

        if !sweep.is_empty() {
            info!(
                "Orphan sweep after issue {}: {} arcs, {} characters, {} teams, series removed: {}",
                issue_id,
                sweep.arcs.len(),
                sweep.characters.len(),
                sweep.teams.len(),
                sweep.series.is_some()
            );
        }

        for image in &sweep.images {
            if self.database.image_references(image).await? > 0 {
                continue;
            }
            let path = self.media_root.join(image);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed image {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove image {}: {}", path.display(), e),
            }
        }

        Ok(sweep)
    }
}

fn is_duplicate_issue(message: &str) -> bool {
    message.contains("issues.file") || message.contains("issues.cvid")
}

fn constraint_message(error: &sqlx::Error) -> String {
    match error {
        sqlx::Error::Database(db_error) => db_error.message().to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    async fn setup() -> (LibraryManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("library.db");
        let database = Database::new(db_path.to_str().unwrap()).await.unwrap();
        let manager = LibraryManager::new(database, temp_dir.path());
        (manager, temp_dir)
    }

    async fn make_series(manager: &LibraryManager, cvid: i64, name: &str) -> DbSeries {
        manager
            .create_series(DbSeries::new(cvid, name))
            .await
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn test_colliding_names_get_numbered_slugs() {
        let (manager, _dir) = setup().await;

        let mut slugs = Vec::new();
        for cvid in 1..=4 {
            let (entity, created) = manager
                .get_or_create_entity(EntityKind::Team, cvid, "Justice League")
                .await
                .unwrap();
            assert!(created);
            slugs.push(entity.slug);
        }

        assert_eq!(
            slugs,
            vec![
                "justice-league",
                "justice-league-1",
                "justice-league-2",
                "justice-league-3"
            ]
        );
    }

    #[tokio::test]
    async fn test_same_cvid_returns_existing_series() {
        let (manager, _dir) = setup().await;

        let first = make_series(&manager, 3816, "Captain Atom").await;
        let (second, created) = manager
            .create_series(DbSeries::new(3816, "Captain Atom"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.slug, "captain-atom");
    }

    #[tokio::test]
    async fn test_duplicate_file_is_reported() {
        let (manager, _dir) = setup().await;
        let series = make_series(&manager, 3816, "Captain Atom").await;

        let issue = DbIssue::new(8192, &series.id, "078", "/comics/ca-78.cbz", Utc::now());
        let created = manager
            .create_issue(issue, "Captain Atom 078 1989")
            .await
            .unwrap();
        assert!(matches!(created, IssueInsert::Created(ref i) if i.slug == "captain-atom-078-1989"));

        let again = DbIssue::new(8193, &series.id, "079", "/comics/ca-78.cbz", Utc::now());
        let result = manager.create_issue(again, "Captain Atom 079").await.unwrap();
        assert!(matches!(result, IssueInsert::Duplicate(ref msg) if msg.contains("issues.file")));
    }

    #[tokio::test]
    async fn test_delete_issue_removes_unshared_images() {
        let (manager, dir) = setup().await;
        let series = make_series(&manager, 3816, "Captain Atom").await;

        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("cover.jpg"), b"cover").unwrap();

        let mut issue = DbIssue::new(8192, &series.id, "078", "/comics/ca-78.cbz", Utc::now());
        issue.cover = Some("images/cover.jpg".to_string());
        let IssueInsert::Created(issue) = manager.create_issue(issue, "Captain Atom 078").await.unwrap()
        else {
            panic!("issue should be created");
        };

        let sweep = manager.delete_issue(&issue.id).await.unwrap();
        assert_eq!(sweep.series.as_deref(), Some(series.id.as_str()));
        assert!(!images.join("cover.jpg").exists());
    }

    #[tokio::test]
    async fn test_update_issue_status_rejects_page_zero() {
        let (manager, _dir) = setup().await;
        let result = manager
            .update_issue_status("missing", ReadStatus::PartiallyRead, 0)
            .await;
        assert!(matches!(result, Err(LibraryError::Import(_))));
    }
}
