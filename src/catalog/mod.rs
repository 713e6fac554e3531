// # Catalog Module
//
// Typed access to the external comic catalog:
//
// - **CatalogSource**: the fetch interface the importer depends on
// - **CatalogClient**: HTTP implementation with response cache and request spacing
// - **description**: HTML-to-text reduction of catalog descriptions
// - **images**: image download into the media root

mod client;
mod description;
mod images;
mod models;

pub use client::{CatalogClient, CatalogError};
pub use description::{html_to_text, normalize_description, MAX_DESCRIPTION_CHARS};
pub use images::{looks_like_image, ImageStore, IMAGES_DIR};
pub use models::{
    CatalogKind, CatalogRecord, CatalogRef, CatalogTarget, IssueDetail, PersonCredit,
    SeriesDetail, TeamDetail,
};

/// Source of catalog records
///
/// Every fetch returns `None` when the catalog has nothing usable, whatever
/// the reason; implementations log the cause.
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_issue(&self, target: &CatalogTarget) -> Option<IssueDetail>;

    async fn fetch_series(&self, target: &CatalogTarget) -> Option<SeriesDetail>;

    async fn fetch_publisher(&self, target: &CatalogTarget) -> Option<CatalogRecord>;

    async fn fetch_character(&self, target: &CatalogTarget) -> Option<CatalogRecord>;

    async fn fetch_arc(&self, target: &CatalogTarget) -> Option<CatalogRecord>;

    async fn fetch_creator(&self, target: &CatalogTarget) -> Option<CatalogRecord>;

    async fn fetch_team(&self, target: &CatalogTarget) -> Option<TeamDetail>;
}
