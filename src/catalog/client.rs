use crate::cache::{CacheConfig, CacheError, ResponseCache};
use crate::catalog::description::normalize_description;
use crate::catalog::images::ImageStore;
use crate::catalog::models::*;
use crate::catalog::CatalogSource;
use crate::config::Config;
use chrono::NaiveDate;
use reqwest::{Client, Error as ReqwestError, StatusCode};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const USER_AGENT: &str = "longbox/0.1";

/// Catalog status code for a successful response
const STATUS_OK: i64 = 1;
/// Catalog status code for "Object Not Found"
const STATUS_NOT_FOUND: i64 = 101;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] ReqwestError),
    #[error("API rate limit exceeded")]
    RateLimit,
    #[error("Invalid API key")]
    InvalidApiKey,
    #[error("Resource not found")]
    NotFound,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Catalog error: {0}")]
    Api(String),
}

/// HTTP client for the comic catalog
///
/// Responses are cached on disk for the configured TTL, and outgoing requests
/// are spaced at least `request_interval` apart. Every fetch degrades to
/// `None` on failure; the reason is logged.
pub struct CatalogClient {
    client: Client,
    api_key: String,
    base_url: String,
    cache: ResponseCache,
    images: ImageStore,
    request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl CatalogClient {
    pub async fn new(config: &Config) -> Result<Self, CacheError> {
        let cache = ResponseCache::new(CacheConfig {
            cache_dir: config.cache_dir(),
            ttl: config.cache_ttl,
        })
        .await?;

        let client = Client::new();
        Ok(Self {
            images: ImageStore::new(client.clone(), &config.media_root),
            client,
            api_key: config.api_key.clone(),
            base_url: config.catalog_base_url.trim_end_matches('/').to_string(),
            cache,
            request_interval: config.request_interval,
            last_request: Mutex::new(None),
        })
    }

    /// Detail URL for a resource
    pub fn request_url(&self, kind: CatalogKind, target: &CatalogTarget) -> String {
        match target {
            CatalogTarget::Id(cvid) => format!(
                "{}/{}/{}-{}/",
                self.base_url,
                kind.path(),
                kind.prefix(),
                cvid
            ),
            CatalogTarget::Url(url) => url.clone(),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// GET one resource and return the `results` object
    async fn get_results(
        &self,
        kind: CatalogKind,
        target: &CatalogTarget,
    ) -> Result<RawRecord, CatalogError> {
        let url = self.request_url(kind, target);
        let params = [("format", "json"), ("field_list", kind.field_list())];
        let key = ResponseCache::cache_key(&url, &params);

        match self.cache.get(&key).await {
            Ok(Some(body)) => return parse_response(&body),
            Ok(None) => {}
            Err(e) => warn!("Response cache read failed: {}", e),
        }

        self.throttle().await;
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(&params)
            .query(&[("api_key", self.api_key.as_str())])
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 420 || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CatalogError::RateLimit);
        } else if status == StatusCode::UNAUTHORIZED {
            return Err(CatalogError::InvalidApiKey);
        } else if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound);
        } else if !status.is_success() {
            return Err(CatalogError::Api(format!("HTTP {}", status)));
        }

        let body = response.text().await?;
        let record = parse_response(&body)?;

        if let Err(e) = self.cache.put(&key, &body).await {
            warn!("Response cache write failed: {}", e);
        }

        Ok(record)
    }

    /// Wait until `request_interval` has passed since the previous request
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.request_interval {
                tokio::time::sleep(self.request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn fetch_raw(&self, kind: CatalogKind, target: &CatalogTarget) -> Option<RawRecord> {
        match self.get_results(kind, target).await {
            Ok(record) => Some(record),
            Err(CatalogError::RateLimit) => {
                warn!("Catalog rate limit hit fetching {} {:?}", kind.path(), target);
                None
            }
            Err(CatalogError::InvalidApiKey) => {
                warn!("Catalog rejected the API key fetching {} {:?}", kind.path(), target);
                None
            }
            Err(e) => {
                warn!("No catalog data for {} {:?}: {}", kind.path(), target, e);
                None
            }
        }
    }

    /// Normalized record, downloading the image if there is one
    async fn to_record(&self, raw: &RawRecord) -> CatalogRecord {
        let image = match raw.image.as_ref().and_then(|i| i.best_url()) {
            Some(url) => self.images.download(url).await,
            None => None,
        };

        CatalogRecord {
            cvid: raw.id,
            url: raw.site_detail_url.clone(),
            api_url: raw.api_detail_url.clone(),
            name: raw.name.clone().unwrap_or_default(),
            year: raw.start_year,
            number: raw.issue_number.clone(),
            description: normalize_description(raw.deck.as_deref(), raw.description.as_deref()),
            image,
        }
    }

    async fn fetch_record(&self, kind: CatalogKind, target: &CatalogTarget) -> Option<CatalogRecord> {
        let raw = self.fetch_raw(kind, target).await?;
        Some(self.to_record(&raw).await)
    }
}

#[async_trait::async_trait]
impl CatalogSource for CatalogClient {
    async fn fetch_issue(&self, target: &CatalogTarget) -> Option<IssueDetail> {
        let raw = self.fetch_raw(CatalogKind::Issue, target).await?;
        let Some(volume) = raw.volume.as_ref().map(CatalogRef::from) else {
            warn!("Catalog issue {} has no volume", raw.id);
            return None;
        };

        Some(IssueDetail {
            record: self.to_record(&raw).await,
            cover_date: raw.cover_date.as_deref().and_then(parse_cover_date),
            volume,
            characters: raw.character_credits.iter().map(CatalogRef::from).collect(),
            arcs: raw.story_arc_credits.iter().map(CatalogRef::from).collect(),
            teams: raw.team_credits.iter().map(CatalogRef::from).collect(),
            persons: raw
                .person_credits
                .iter()
                .map(|p| PersonCredit {
                    reference: CatalogRef {
                        cvid: p.id,
                        name: p.name.clone().unwrap_or_default(),
                        api_url: p.api_detail_url.clone(),
                    },
                    role: p.role.clone().unwrap_or_default(),
                })
                .collect(),
        })
    }

    async fn fetch_series(&self, target: &CatalogTarget) -> Option<SeriesDetail> {
        let raw = self.fetch_raw(CatalogKind::Volume, target).await?;
        Some(SeriesDetail {
            record: self.to_record(&raw).await,
            publisher: raw.publisher.as_ref().map(CatalogRef::from),
        })
    }

    async fn fetch_publisher(&self, target: &CatalogTarget) -> Option<CatalogRecord> {
        self.fetch_record(CatalogKind::Publisher, target).await
    }

    async fn fetch_character(&self, target: &CatalogTarget) -> Option<CatalogRecord> {
        self.fetch_record(CatalogKind::Character, target).await
    }

    async fn fetch_arc(&self, target: &CatalogTarget) -> Option<CatalogRecord> {
        self.fetch_record(CatalogKind::StoryArc, target).await
    }

    async fn fetch_creator(&self, target: &CatalogTarget) -> Option<CatalogRecord> {
        self.fetch_record(CatalogKind::Person, target).await
    }

    async fn fetch_team(&self, target: &CatalogTarget) -> Option<TeamDetail> {
        let raw = self.fetch_raw(CatalogKind::Team, target).await?;
        Some(TeamDetail {
            record: self.to_record(&raw).await,
            members: raw.characters.iter().map(CatalogRef::from).collect(),
        })
    }
}

/// Unwrap the catalog envelope, treating error statuses and empty results as failures
fn parse_response(body: &str) -> Result<RawRecord, CatalogError> {
    let envelope: Envelope = serde_json::from_str(body)?;

    if envelope.status_code == STATUS_NOT_FOUND {
        return Err(CatalogError::NotFound);
    }
    if envelope.status_code != STATUS_OK {
        return Err(CatalogError::Api(format!(
            "status {}: {}",
            envelope.status_code, envelope.error
        )));
    }
    if !envelope.results.is_object() {
        return Err(CatalogError::NotFound);
    }

    Ok(serde_json::from_value(envelope.results)?)
}

fn parse_cover_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ISSUE_8192: &str = r#"{
        "error": "OK",
        "status_code": 1,
        "results": {
            "api_detail_url": "https://comicvine.gamespot.com/api/issue/4000-8192/",
            "character_credits": [
                {"id": 2357, "name": "Captain Atom", "api_detail_url": "https://comicvine.gamespot.com/api/character/4005-2357/"}
            ],
            "cover_date": "1965-12-01",
            "deck": null,
            "description": "<p>Captain Atom battles <b>sharks</b>.</p>",
            "id": 8192,
            "image": null,
            "issue_number": "78",
            "name": "Sharks",
            "person_credits": [
                {"id": 40439, "name": "Steve Ditko", "role": "penciler, inker"}
            ],
            "site_detail_url": "https://comicvine.gamespot.com/captain-atom-78-sharks/4000-8192/",
            "story_arc_credits": [],
            "team_credits": null,
            "volume": {"id": 3816, "name": "Captain Atom", "api_detail_url": "https://comicvine.gamespot.com/api/volume/4050-3816/"}
        }
    }"#;

    async fn offline_client(dir: &TempDir) -> CatalogClient {
        let mut config = Config::new(dir.path().join("comics"), "k".repeat(40));
        config.media_root = dir.path().join("media");
        config.catalog_base_url = "http://127.0.0.1:9/api".to_string();
        config.request_interval = Duration::ZERO;
        CatalogClient::new(&config).await.unwrap()
    }

    #[test]
    fn test_parse_response_rejects_catalog_errors() {
        let not_found = r#"{"error": "Object Not Found", "status_code": 101, "results": []}"#;
        assert!(matches!(parse_response(not_found), Err(CatalogError::NotFound)));

        let bad_key = r#"{"error": "Invalid API Key", "status_code": 100, "results": []}"#;
        assert!(matches!(parse_response(bad_key), Err(CatalogError::Api(_))));

        assert!(matches!(
            parse_response("<html>"),
            Err(CatalogError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_request_url() {
        let dir = TempDir::new().unwrap();
        let client = offline_client(&dir).await;
        assert_eq!(
            client.request_url(CatalogKind::Issue, &CatalogTarget::Id(8192)),
            "http://127.0.0.1:9/api/issue/4000-8192/"
        );
        assert_eq!(
            client.request_url(
                CatalogKind::Team,
                &CatalogTarget::Url("https://example.com/team/4060-1/".into())
            ),
            "https://example.com/team/4060-1/"
        );
    }

    #[tokio::test]
    async fn test_fetch_issue_from_cache() {
        let dir = TempDir::new().unwrap();
        let client = offline_client(&dir).await;

        let url = client.request_url(CatalogKind::Issue, &CatalogTarget::Id(8192));
        let key = ResponseCache::cache_key(
            &url,
            &[("format", "json"), ("field_list", CatalogKind::Issue.field_list())],
        );
        client.cache().put(&key, ISSUE_8192).await.unwrap();

        let issue = client.fetch_issue(&CatalogTarget::Id(8192)).await.unwrap();
        assert_eq!(issue.record.cvid, 8192);
        assert_eq!(issue.record.number.as_deref(), Some("78"));
        assert_eq!(issue.record.description, "Captain Atom battles sharks.");
        assert_eq!(issue.cover_date, NaiveDate::from_ymd_opt(1965, 12, 1));
        assert_eq!(issue.volume.cvid, 3816);
        assert_eq!(issue.characters.len(), 1);
        assert!(issue.teams.is_empty());
        assert_eq!(issue.persons[0].role, "penciler, inker");
    }

    #[tokio::test]
    async fn test_unreachable_catalog_yields_none() {
        let dir = TempDir::new().unwrap();
        let client = offline_client(&dir).await;
        assert!(client.fetch_character(&CatalogTarget::Id(1)).await.is_none());
    }
}
