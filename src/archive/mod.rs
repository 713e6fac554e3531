// # Archive Module
//
// Turns a file on disk into a `ComicMetadata` record:
//
// - **ArchiveInspector**: format-specific reader (is it an archive, page count,
//   embedded metadata block)
// - **ExtensionInspector**: default reader; opens .cbz (zip) and .cbt (tar)
//   archives and checks the signature of .cbr and .cb7 files
// - **filename**: fallback guesses from the file name

mod filename;
mod metadata;

pub use filename::metadata_from_filename;
pub use metadata::ComicMetadata;

use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Reader for one or more comic archive formats
///
/// Methods are synchronous and may do blocking I/O; callers run them on a
/// blocking thread.
pub trait ArchiveInspector: Send + Sync {
    /// Whether the file is a comic archive this inspector can read
    fn is_comic_archive(&self, path: &Path) -> bool;

    /// Number of page images, if the archive can be opened
    fn page_count(&self, path: &Path) -> Option<i32>;

    /// Embedded metadata block (e.g. ComicInfo.xml), if present and readable
    fn read_embedded(&self, path: &Path) -> Option<ComicMetadata>;
}

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];
const COMIC_INFO_NAME: &str = "comicinfo.xml";

const RAR_MAGIC: &[u8] = b"Rar!\x1A\x07";
const SEVEN_ZIP_MAGIC: &[u8] = b"7z\xBC\xAF\x27\x1C";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    Tar,
    Rar,
    SevenZip,
}

impl ArchiveFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match extension(path)?.as_str() {
            "cbz" => Some(ArchiveFormat::Zip),
            "cbt" => Some(ArchiveFormat::Tar),
            "cbr" => Some(ArchiveFormat::Rar),
            "cb7" => Some(ArchiveFormat::SevenZip),
            _ => None,
        }
    }
}

/// Default inspector
///
/// Zip and tar archives are opened for their page count and ComicInfo.xml.
/// Rar and 7z archives are only checked for their signature, so their
/// metadata comes from the filename.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionInspector;

impl ExtensionInspector {
    fn open_zip(path: &Path) -> Option<zip::ZipArchive<File>> {
        let file = File::open(path).ok()?;
        match zip::ZipArchive::new(file) {
            Ok(archive) => Some(archive),
            Err(e) => {
                debug!("Cannot open {} as zip: {}", path.display(), e);
                None
            }
        }
    }

    fn tar_opens(path: &Path) -> bool {
        let Ok(file) = File::open(path) else {
            return false;
        };
        let mut archive = tar::Archive::new(file);
        let first = archive.entries().ok().and_then(|mut entries| entries.next());
        matches!(first, Some(Ok(_)))
    }

    fn has_magic(path: &Path, magic: &[u8]) -> bool {
        let mut head = vec![0u8; magic.len()];
        File::open(path)
            .and_then(|mut file| file.read_exact(&mut head))
            .map(|_| head == magic)
            .unwrap_or(false)
    }

    fn zip_page_count(path: &Path) -> Option<i32> {
        let archive = Self::open_zip(path)?;
        let pages = archive.file_names().filter(|name| is_page(Path::new(name))).count();
        i32::try_from(pages).ok()
    }

    fn tar_page_count(path: &Path) -> Option<i32> {
        let mut archive = tar::Archive::new(File::open(path).ok()?);
        let mut pages = 0;
        for entry in archive.entries().ok()? {
            let entry = entry.ok()?;
            if is_page(&entry.path().ok()?) {
                pages += 1;
            }
        }
        Some(pages)
    }

    fn zip_comic_info(path: &Path) -> Option<String> {
        let mut archive = Self::open_zip(path)?;
        let name = archive
            .file_names()
            .find(|name| is_comic_info(Path::new(name)))?
            .to_string();
        let mut entry = archive.by_name(&name).ok()?;
        let mut xml = String::new();
        entry.read_to_string(&mut xml).ok()?;
        Some(xml)
    }

    fn tar_comic_info(path: &Path) -> Option<String> {
        let mut archive = tar::Archive::new(File::open(path).ok()?);
        for entry in archive.entries().ok()? {
            let mut entry = entry.ok()?;
            let found = entry.path().map(|p| is_comic_info(&p)).unwrap_or(false);
            if found {
                let mut xml = String::new();
                entry.read_to_string(&mut xml).ok()?;
                return Some(xml);
            }
        }
        None
    }
}

impl ArchiveInspector for ExtensionInspector {
    fn is_comic_archive(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        match ArchiveFormat::from_path(path) {
            Some(ArchiveFormat::Zip) => Self::open_zip(path).is_some(),
            Some(ArchiveFormat::Tar) => Self::tar_opens(path),
            Some(ArchiveFormat::Rar) => Self::has_magic(path, RAR_MAGIC),
            Some(ArchiveFormat::SevenZip) => Self::has_magic(path, SEVEN_ZIP_MAGIC),
            None => false,
        }
    }

    fn page_count(&self, path: &Path) -> Option<i32> {
        match ArchiveFormat::from_path(path)? {
            ArchiveFormat::Zip => Self::zip_page_count(path),
            ArchiveFormat::Tar => Self::tar_page_count(path),
            ArchiveFormat::Rar | ArchiveFormat::SevenZip => None,
        }
    }

    fn read_embedded(&self, path: &Path) -> Option<ComicMetadata> {
        let xml = match ArchiveFormat::from_path(path)? {
            ArchiveFormat::Zip => Self::zip_comic_info(path)?,
            ArchiveFormat::Tar => Self::tar_comic_info(path)?,
            ArchiveFormat::Rar | ArchiveFormat::SevenZip => return None,
        };

        match ComicMetadata::from_comic_info_xml(&xml) {
            Ok(md) => Some(md),
            Err(e) => {
                warn!("Unreadable ComicInfo.xml in {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_page(entry: &Path) -> bool {
    extension(entry)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn is_comic_info(entry: &Path) -> bool {
    entry
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase() == COMIC_INFO_NAME)
        .unwrap_or(false)
}

/// Read metadata for one file: the embedded block if there is one, otherwise
/// a guess from the filename
///
/// Returns `None` for files that are not comic archives. Path, page count and
/// modification time are always filled in from the file itself.
pub fn read_comic_metadata(
    inspector: &dyn ArchiveInspector,
    path: &Path,
) -> Option<ComicMetadata> {
    if !inspector.is_comic_archive(path) {
        debug!("Not a comic archive: {}", path.display());
        return None;
    }

    let mut md = match inspector.read_embedded(path) {
        Some(md) if !md.is_empty() => md,
        _ => {
            debug!("No embedded metadata in {}, using filename", path.display());
            metadata_from_filename(path)
        }
    };

    md.path = path.to_path_buf();
    if let Some(pages) = inspector.page_count(path) {
        md.page_count = pages;
    }
    md.mod_ts = modification_time(path)?;

    Some(md)
}

/// File modification time, `None` if the file can't be stat'ed
pub fn modification_time(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}
