use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Catalog resource kinds, with their URL path, id prefix and requested fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Issue,
    Volume,
    Publisher,
    Character,
    Team,
    Person,
    StoryArc,
}

impl CatalogKind {
    pub fn path(&self) -> &'static str {
        match self {
            CatalogKind::Issue => "issue",
            CatalogKind::Volume => "volume",
            CatalogKind::Publisher => "publisher",
            CatalogKind::Character => "character",
            CatalogKind::Team => "team",
            CatalogKind::Person => "person",
            CatalogKind::StoryArc => "story_arc",
        }
    }

    /// Resource-type prefix in detail URLs, e.g. `issue/4000-8192/`
    pub fn prefix(&self) -> u32 {
        match self {
            CatalogKind::Issue => 4000,
            CatalogKind::Volume => 4050,
            CatalogKind::Publisher => 4010,
            CatalogKind::Character => 4005,
            CatalogKind::Team => 4060,
            CatalogKind::Person => 4040,
            CatalogKind::StoryArc => 4045,
        }
    }

    pub fn field_list(&self) -> &'static str {
        match self {
            CatalogKind::Issue => "api_detail_url,character_credits,cover_date,deck,description,id,image,issue_number,name,person_credits,site_detail_url,story_arc_credits,team_credits,volume",
            CatalogKind::Volume => "api_detail_url,deck,description,id,name,publisher,site_detail_url,start_year",
            CatalogKind::Team => "characters,deck,description,id,image,name,site_detail_url",
            CatalogKind::Publisher
            | CatalogKind::Character
            | CatalogKind::Person
            | CatalogKind::StoryArc => "deck,description,id,image,name,site_detail_url",
        }
    }
}

/// How to address a catalog resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogTarget {
    Id(i64),
    /// Direct API detail URL, as found in references inside other responses
    Url(String),
}

/// Normalized catalog record shared by every entity kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRecord {
    pub cvid: i64,
    /// Public web page
    pub url: Option<String>,
    /// API detail URL
    pub api_url: Option<String>,
    pub name: String,
    /// Start year (series only)
    pub year: Option<i32>,
    /// Issue number as printed (issues only)
    pub number: Option<String>,
    /// Plain-text description, at most 500 characters
    pub description: String,
    /// Downloaded image, relative to the media root
    pub image: Option<String>,
}

/// Reference to another catalog resource embedded in a response
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRef {
    pub cvid: i64,
    pub name: String,
    pub api_url: Option<String>,
}

impl CatalogRef {
    pub fn new(cvid: i64, name: &str) -> Self {
        CatalogRef {
            cvid,
            name: name.to_string(),
            api_url: None,
        }
    }

    /// Prefer the API URL the catalog handed out; fall back to the id
    pub fn target(&self) -> CatalogTarget {
        match &self.api_url {
            Some(url) => CatalogTarget::Url(url.clone()),
            None => CatalogTarget::Id(self.cvid),
        }
    }
}

/// A creator credited on an issue, with a comma-separated role string
#[derive(Debug, Clone, PartialEq)]
pub struct PersonCredit {
    pub reference: CatalogRef,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssueDetail {
    pub record: CatalogRecord,
    pub cover_date: Option<NaiveDate>,
    pub volume: CatalogRef,
    pub characters: Vec<CatalogRef>,
    pub arcs: Vec<CatalogRef>,
    pub teams: Vec<CatalogRef>,
    pub persons: Vec<PersonCredit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDetail {
    pub record: CatalogRecord,
    pub publisher: Option<CatalogRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamDetail {
    pub record: CatalogRecord,
    pub members: Vec<CatalogRef>,
}

/// Response envelope common to every catalog endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub status_code: i64,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub results: Value,
}

/// Catalog response body, any kind; fields absent from a kind's field list stay empty
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawRecord {
    pub id: i64,
    pub name: Option<String>,
    pub site_detail_url: Option<String>,
    pub api_detail_url: Option<String>,
    pub deck: Option<String>,
    pub description: Option<String>,
    pub image: Option<RawImage>,
    #[serde(deserialize_with = "lenient_i32")]
    pub start_year: Option<i32>,
    #[serde(deserialize_with = "lenient_string")]
    pub issue_number: Option<String>,
    pub cover_date: Option<String>,
    pub volume: Option<RawRef>,
    pub publisher: Option<RawRef>,
    #[serde(deserialize_with = "null_as_default")]
    pub character_credits: Vec<RawRef>,
    #[serde(deserialize_with = "null_as_default")]
    pub story_arc_credits: Vec<RawRef>,
    #[serde(deserialize_with = "null_as_default")]
    pub team_credits: Vec<RawRef>,
    #[serde(deserialize_with = "null_as_default")]
    pub person_credits: Vec<RawPersonCredit>,
    #[serde(deserialize_with = "null_as_default")]
    pub characters: Vec<RawRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawImage {
    pub super_url: Option<String>,
    pub original_url: Option<String>,
    pub medium_url: Option<String>,
}

impl RawImage {
    pub fn best_url(&self) -> Option<&str> {
        self.super_url
            .as_deref()
            .or(self.original_url.as_deref())
            .or(self.medium_url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_detail_url: Option<String>,
}

impl From<&RawRef> for CatalogRef {
    fn from(raw: &RawRef) -> Self {
        CatalogRef {
            cvid: raw.id,
            name: raw.name.clone().unwrap_or_default(),
            api_url: raw.api_detail_url.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawPersonCredit {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_detail_url: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Years come back as strings ("1965"), numbers, or null
fn lenient_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_prefixes() {
        assert_eq!(CatalogKind::Issue.prefix(), 4000);
        assert_eq!(CatalogKind::Volume.path(), "volume");
        assert_eq!(CatalogKind::StoryArc.path(), "story_arc");
        assert!(CatalogKind::Team.field_list().starts_with("characters,"));
    }

    #[test]
    fn test_raw_record_tolerates_nulls_and_string_years() {
        let raw: RawRecord = serde_json::from_str(
            r#"{
                "id": 3816,
                "name": "Captain Atom",
                "start_year": "1965",
                "story_arc_credits": null,
                "image": null,
                "publisher": {"id": 125, "name": "Charlton", "api_detail_url": "https://comicvine.gamespot.com/api/publisher/4010-125/"}
            }"#,
        )
        .unwrap();

        assert_eq!(raw.start_year, Some(1965));
        assert!(raw.story_arc_credits.is_empty());
        assert!(raw.image.is_none());
        let publisher = CatalogRef::from(raw.publisher.as_ref().unwrap());
        assert_eq!(
            publisher.target(),
            CatalogTarget::Url("https://comicvine.gamespot.com/api/publisher/4010-125/".into())
        );
    }

    #[test]
    fn test_issue_number_as_number() {
        let raw: RawRecord = serde_json::from_str(r#"{"id": 1, "issue_number": 78}"#).unwrap();
        assert_eq!(raw.issue_number.as_deref(), Some("78"));
    }

    #[test]
    fn test_best_image_url() {
        let image = RawImage {
            super_url: None,
            original_url: Some("https://example.com/original.jpg".into()),
            medium_url: Some("https://example.com/medium.jpg".into()),
        };
        assert_eq!(image.best_url(), Some("https://example.com/original.jpg"));
    }
}
