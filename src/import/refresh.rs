//! Operator-triggered re-fetch of catalog details for a single stored entity.

use super::details_from;
use crate::catalog::{CatalogSource, CatalogTarget};
use crate::db::EntityKind;
use crate::library::{LibraryError, LibraryManager};
use std::sync::Arc;
use tracing::info;

/// Refreshes descriptive fields of stored entities by catalog id
///
/// Every method returns `Ok(false)` when the entity is not in the library or
/// the catalog has nothing for it, and `Ok(true)` once the row is updated.
pub struct EntityRefresher {
    library: LibraryManager,
    catalog: Arc<dyn CatalogSource>,
}

impl EntityRefresher {
    pub fn new(library: LibraryManager, catalog: Arc<dyn CatalogSource>) -> Self {
        EntityRefresher { library, catalog }
    }

    pub async fn refresh_issue(&self, cvid: i64) -> Result<bool, LibraryError> {
        let Some(issue) = self.library.database().get_issue_by_cvid(cvid).await? else {
            return Ok(false);
        };
        let Some(detail) = self.catalog.fetch_issue(&CatalogTarget::Id(cvid)).await else {
            info!("Refresh: no catalog detail for issue {}", cvid);
            return Ok(false);
        };

        let name = Some(detail.record.name.clone()).filter(|n| !n.is_empty());
        self.library
            .update_issue_details(&issue.id, name.as_deref(), &details_from(detail.record))
            .await?;
        info!("Refreshed issue: {}", issue.file);
        Ok(true)
    }

    pub async fn refresh_series(&self, cvid: i64) -> Result<bool, LibraryError> {
        let Some(series) = self.library.database().get_series_by_cvid(cvid).await? else {
            return Ok(false);
        };
        let Some(detail) = self.catalog.fetch_series(&CatalogTarget::Id(cvid)).await else {
            info!("Refresh: no catalog detail for series {}", cvid);
            return Ok(false);
        };

        let year = detail.record.year;
        self.library
            .update_series_details(&series.id, year, &details_from(detail.record))
            .await?;
        info!("Refreshed series: {}", series.name);
        Ok(true)
    }

    pub async fn refresh_publisher(&self, cvid: i64) -> Result<bool, LibraryError> {
        let Some(publisher) = self.library.database().get_publisher_by_cvid(cvid).await? else {
            return Ok(false);
        };
        let Some(record) = self.catalog.fetch_publisher(&CatalogTarget::Id(cvid)).await else {
            info!("Refresh: no catalog detail for publisher {}", cvid);
            return Ok(false);
        };

        self.library
            .update_publisher_details(&publisher.id, None, &details_from(record))
            .await?;
        info!("Refreshed publisher: {}", publisher.name);
        Ok(true)
    }

    pub async fn refresh_character(&self, cvid: i64) -> Result<bool, LibraryError> {
        self.refresh_entity(EntityKind::Character, cvid).await
    }

    pub async fn refresh_arc(&self, cvid: i64) -> Result<bool, LibraryError> {
        self.refresh_entity(EntityKind::Arc, cvid).await
    }

    pub async fn refresh_creator(&self, cvid: i64) -> Result<bool, LibraryError> {
        self.refresh_entity(EntityKind::Creator, cvid).await
    }

    /// Also links the team to any member characters now in the library
    pub async fn refresh_team(&self, cvid: i64) -> Result<bool, LibraryError> {
        let database = self.library.database();
        let Some(team) = database.get_entity_by_cvid(EntityKind::Team, cvid).await? else {
            return Ok(false);
        };
        let Some(detail) = self.catalog.fetch_team(&CatalogTarget::Id(cvid)).await else {
            info!("Refresh: no catalog detail for team {}", cvid);
            return Ok(false);
        };

        for member in &detail.members {
            if let Some(character) = database
                .get_entity_by_cvid(EntityKind::Character, member.cvid)
                .await?
            {
                self.library
                    .attach_character_to_team(&character.id, &team.id)
                    .await?;
            }
        }

        self.library
            .update_entity_details(EntityKind::Team, &team.id, &details_from(detail.record))
            .await?;
        info!("Refreshed team: {}", team.name);
        Ok(true)
    }

    async fn refresh_entity(&self, kind: EntityKind, cvid: i64) -> Result<bool, LibraryError> {
        let Some(entity) = self.library.database().get_entity_by_cvid(kind, cvid).await? else {
            return Ok(false);
        };

        let target = CatalogTarget::Id(cvid);
        let record = match kind {
            EntityKind::Character => self.catalog.fetch_character(&target).await,
            EntityKind::Arc => self.catalog.fetch_arc(&target).await,
            EntityKind::Creator => self.catalog.fetch_creator(&target).await,
            EntityKind::Team => self.catalog.fetch_team(&target).await.map(|d| d.record),
        };
        let Some(record) = record else {
            info!("Refresh: no catalog detail for {} {}", kind.label(), cvid);
            return Ok(false);
        };

        self.library
            .update_entity_details(kind, &entity.id, &details_from(record))
            .await?;
        info!("Refreshed {}: {}", kind.label(), entity.name);
        Ok(true)
    }
}
