use regex::Regex;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Directory under the media root that images are written to
pub const IMAGES_DIR: &str = "images";

const GENERIC_PLACEHOLDER: &str = "1-male-good-large.jpg";

fn question_mark_placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^.*question_mark_large.*\.jpg$").unwrap())
}

/// Downloads catalog images into `<media_root>/images/`
#[derive(Debug, Clone)]
pub struct ImageStore {
    client: Client,
    media_root: PathBuf,
}

impl ImageStore {
    pub fn new(client: Client, media_root: impl Into<PathBuf>) -> Self {
        ImageStore {
            client,
            media_root: media_root.into(),
        }
    }

    /// The catalog's stand-in images for entities that have no picture
    pub fn is_placeholder(file_name: &str) -> bool {
        file_name == GENERIC_PLACEHOLDER || question_mark_placeholder().is_match(file_name)
    }

    /// Local file name for an image URL: its decoded last path segment
    pub fn file_name_for(url: &str) -> Option<String> {
        let last = url.split(['?', '#']).next()?.rsplit('/').next()?;
        let decoded = urlencoding::decode(&last.replace('+', " ")).ok()?.into_owned();
        let name = decoded.trim();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return None;
        }
        Some(name.to_string())
    }

    /// Download an image, returning its path relative to the media root
    ///
    /// Placeholders, failed downloads and responses that are not images yield
    /// `None`. An image already on disk is reused without downloading.
    pub async fn download(&self, url: &str) -> Option<String> {
        let file_name = Self::file_name_for(url)?;
        if Self::is_placeholder(&file_name) {
            debug!("Skipping placeholder image {}", file_name);
            return None;
        }

        let relative = format!("{}/{}", IMAGES_DIR, file_name);
        let target = self.media_root.join(&relative);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Some(relative);
        }

        let response = match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!("Image download {} failed: HTTP {}", url, response.status());
                return None;
            }
            Err(e) => {
                warn!("Image download {} failed: {}", url, e);
                return None;
            }
        };

        let declared_image = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("image/"))
            .unwrap_or(false);

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Image download {} failed: {}", url, e);
                return None;
            }
        };

        if !declared_image && !looks_like_image(&bytes) {
            warn!("Discarding {}: response is not an image", url);
            return None;
        }

        self.store(&file_name, &bytes).await
    }

    /// Write image bytes under the images directory
    pub async fn store(&self, file_name: &str, bytes: &[u8]) -> Option<String> {
        let dir = self.media_root.join(IMAGES_DIR);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("Cannot create {}: {}", dir.display(), e);
            return None;
        }

        let target = dir.join(file_name);
        match tokio::fs::write(&target, bytes).await {
            Ok(()) => {
                debug!("Saved image {}", target.display());
                Some(format!("{}/{}", IMAGES_DIR, file_name))
            }
            Err(e) => {
                warn!("Failed to write {}: {}", target.display(), e);
                None
            }
        }
    }
}

/// Magic-number check for the image formats the catalog serves
pub fn looks_like_image(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(b"\x89PNG\r\n\x1a\n")
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
        || bytes.starts_with(b"BM")
        || (bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_placeholders() {
        assert!(ImageStore::is_placeholder("1-male-good-large.jpg"));
        assert!(ImageStore::is_placeholder("6373148-blank_question_mark_large.jpg"));
        assert!(!ImageStore::is_placeholder("1253-captain_atom_78.jpg"));
    }

    #[test]
    fn test_file_name_is_decoded() {
        assert_eq!(
            ImageStore::file_name_for(
                "https://comicvine.gamespot.com/a/uploads/scale_large/0/4/1253-Captain%20Atom+78.jpg?x=1"
            )
            .as_deref(),
            Some("1253-Captain Atom 78.jpg")
        );
        assert_eq!(ImageStore::file_name_for("https://example.com/"), None);
        assert_eq!(ImageStore::file_name_for("https://example.com/a%2F..%2Fb.jpg"), None);
    }

    #[test]
    fn test_magic_numbers() {
        assert!(looks_like_image(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(looks_like_image(b"\x89PNG\r\n\x1a\nrest"));
        assert!(!looks_like_image(b"<html>Not Found</html>"));
    }

    #[tokio::test]
    async fn test_existing_image_is_reused() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(Client::new(), dir.path());
        assert_eq!(
            store.store("cover.jpg", &[0xFF, 0xD8, 0xFF]).await.as_deref(),
            Some("images/cover.jpg")
        );

        // No network involved: the file is already there
        let path = store
            .download("http://127.0.0.1:9/uploads/cover.jpg")
            .await;
        assert_eq!(path.as_deref(), Some("images/cover.jpg"));
    }
}
