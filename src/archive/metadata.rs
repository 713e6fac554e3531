use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::path::PathBuf;

/// Metadata read from one comic archive
///
/// Every descriptive field is optional: archives may carry a full metadata
/// block, or nothing but a filename to guess from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComicMetadata {
    pub series: Option<String>,
    pub issue: Option<String>,
    pub title: Option<String>,
    pub publisher: Option<String>,
    pub volume: Option<i32>,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub day: Option<i32>,
    /// Free text; taggers record the catalog issue id here, e.g. "[Issue ID 8192]"
    pub notes: Option<String>,
    /// Catalog page for the issue, e.g. ".../4000-8192/"
    pub web_link: Option<String>,
    pub comments: Option<String>,
    pub path: PathBuf,
    pub page_count: i32,
    pub mod_ts: DateTime<Utc>,
}

impl ComicMetadata {
    /// True when nothing identifies the comic
    pub fn is_empty(&self) -> bool {
        self.series.is_none()
            && self.issue.is_none()
            && self.title.is_none()
            && self.notes.is_none()
            && self.web_link.is_none()
    }

    /// Cover date from year/month/day, defaulting missing month and day to 1
    pub fn cover_date(&self) -> Option<NaiveDate> {
        let year = self.year?;
        let month = self.month.unwrap_or(1).clamp(1, 12) as u32;
        let day = self.day.unwrap_or(1).max(1) as u32;
        NaiveDate::from_ymd_opt(year, month, day)
            .or_else(|| NaiveDate::from_ymd_opt(year, month, 1))
    }

    /// Parse a ComicInfo.xml document
    ///
    /// Unknown elements are ignored; blank or unparseable numeric fields are
    /// treated as absent.
    pub fn from_comic_info_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        let info: ComicInfo = quick_xml::de::from_str(xml)?;

        Ok(ComicMetadata {
            series: text(info.series),
            issue: text(info.number),
            title: text(info.title),
            publisher: text(info.publisher),
            volume: number(info.volume),
            year: number(info.year),
            month: number(info.month),
            day: number(info.day),
            notes: text(info.notes),
            web_link: text(info.web),
            comments: text(info.summary),
            page_count: number(info.page_count).unwrap_or(0),
            ..Default::default()
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ComicInfo {
    #[serde(rename = "Series")]
    series: Option<String>,
    #[serde(rename = "Number")]
    number: Option<String>,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Publisher")]
    publisher: Option<String>,
    #[serde(rename = "Volume")]
    volume: Option<String>,
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "Month")]
    month: Option<String>,
    #[serde(rename = "Day")]
    day: Option<String>,
    #[serde(rename = "Notes")]
    notes: Option<String>,
    #[serde(rename = "Web")]
    web: Option<String>,
    #[serde(rename = "Summary")]
    summary: Option<String>,
    #[serde(rename = "PageCount")]
    page_count: Option<String>,
}

fn text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn number(value: Option<String>) -> Option<i32> {
    text(value).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPTAIN_ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<ComicInfo xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <Title>Sharks</Title>
  <Series>Captain Atom</Series>
  <Number>78</Number>
  <Volume>1987</Volume>
  <Summary>Captain Atom faces the sharks.</Summary>
  <Notes>Tagged with ComicTagger 1.1.32 using info from Comic Vine on 2016-10-08.  [Issue ID 8192]</Notes>
  <Year>1965</Year>
  <Month>12</Month>
  <Publisher>Charlton</Publisher>
  <Web>https://comicvine.gamespot.com/captain-atom-78-sharks/4000-8192/</Web>
  <PageCount>36</PageCount>
  <Pages>
    <Page Image="0" Type="FrontCover" />
  </Pages>
</ComicInfo>"#;

    #[test]
    fn test_parse_comic_info() {
        let md = ComicMetadata::from_comic_info_xml(CAPTAIN_ATOM).unwrap();
        assert_eq!(md.series.as_deref(), Some("Captain Atom"));
        assert_eq!(md.issue.as_deref(), Some("78"));
        assert_eq!(md.publisher.as_deref(), Some("Charlton"));
        assert_eq!(md.volume, Some(1987));
        assert_eq!(md.page_count, 36);
        assert!(md.notes.as_ref().unwrap().ends_with("[Issue ID 8192]"));
        assert_eq!(md.cover_date(), NaiveDate::from_ymd_opt(1965, 12, 1));
    }

    #[test]
    fn test_blank_elements_are_absent() {
        let md = ComicMetadata::from_comic_info_xml(
            "<ComicInfo><Series>  </Series><Year></Year><Number>1</Number></ComicInfo>",
        )
        .unwrap();
        assert_eq!(md.series, None);
        assert_eq!(md.year, None);
        assert_eq!(md.issue.as_deref(), Some("1"));
        assert!(!md.is_empty());
    }

    #[test]
    fn test_default_is_empty() {
        assert!(ComicMetadata::default().is_empty());
    }
}
