use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use super::ComicMetadata;

struct Patterns {
    bracketed: Regex,
    year: Regex,
    hash_issue: Regex,
    numeric_token: Regex,
    trailing_volume: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        bracketed: Regex::new(r"\([^)]*\)|\[[^\]]*\]|\{[^}]*\}").unwrap(),
        year: Regex::new(r"\((\d{4})\)").unwrap(),
        hash_issue: Regex::new(r"#\s*(-?[0-9.½]+[A-Za-z]*)").unwrap(),
        numeric_token: Regex::new(r"^-?\d+(?:\.\d+)?[A-Za-z]*$").unwrap(),
        trailing_volume: Regex::new(r"(?i)\s+v(?:ol(?:ume)?)?\.?\s*(\d+)\s*$").unwrap(),
    })
}

/// Best-guess metadata from an archive's filename
///
/// Understands names like `Afterlife_With_Archie_V1_#002_(of_08)_(2013).cbz`
/// and `Captain Atom 078 (1989).cbr`: series, volume, issue number and year.
/// Anything it can't find is left unset.
pub fn metadata_from_filename(path: &Path) -> ComicMetadata {
    let mut md = ComicMetadata {
        path: path.to_path_buf(),
        ..Default::default()
    };

    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return md;
    };

    let name = fix_spaces(stem);
    let p = patterns();

    md.year = p
        .year
        .captures_iter(&name)
        .last()
        .and_then(|caps| caps[1].parse().ok());

    let cleaned = p.bracketed.replace_all(&name, " ").into_owned();

    let (issue, series_end) = match p.hash_issue.captures(&cleaned) {
        Some(caps) => {
            let start = caps.get(0).map_or(0, |m| m.start());
            (Some(caps[1].to_string()), start)
        }
        None => match last_numeric_token(&cleaned) {
            Some((token, start)) => (Some(token), start),
            None => (None, cleaned.len()),
        },
    };

    md.issue = issue.map(|i| strip_leading_zeros(&i));

    let mut series = cleaned[..series_end].to_string();
    if let Some(caps) = p.trailing_volume.captures(&series) {
        md.volume = caps[1].parse().ok();
        let volume_start = caps.get(0).map_or(series.len(), |m| m.start());
        series.truncate(volume_start);
    }

    let series = series
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|c: char| c == '-' || c == ',' || c.is_whitespace())
        .to_string();
    if !series.is_empty() {
        md.series = Some(series);
    }

    md
}

/// Underscore-separated names become space-separated
fn fix_spaces(name: &str) -> String {
    let underscores = name.matches('_').count();
    let spaces = name.matches(' ').count();
    if underscores > spaces {
        name.replace('_', " ")
    } else {
        name.to_string()
    }
}

/// Last standalone number that isn't the first word, with its byte offset
fn last_numeric_token(cleaned: &str) -> Option<(String, usize)> {
    let mut found = None;
    let mut offset = 0;
    for (index, word) in cleaned.split(' ').enumerate() {
        if index > 0 && !word.is_empty() && patterns().numeric_token.is_match(word) {
            found = Some((word.to_string(), offset));
        }
        offset += word.len() + 1;
    }
    found
}

fn strip_leading_zeros(issue: &str) -> String {
    let (sign, digits) = match issue.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", issue),
    };
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() || !trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("{}0{}", sign, trimmed)
    } else {
        format!("{}{}", sign, trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_underscored_name_with_hash() {
        let md = metadata_from_filename(Path::new(
            "/home/comics/Afterlife_With_Archie_V1_#002_(of_08)_(2013).cbz",
        ));
        assert_eq!(md.series.as_deref(), Some("Afterlife With Archie"));
        assert_eq!(md.volume, Some(1));
        assert_eq!(md.issue.as_deref(), Some("2"));
        assert_eq!(md.year, Some(2013));
    }

    #[test]
    fn test_plain_number() {
        let md = metadata_from_filename(Path::new("Captain Atom 078 (1989).cbr"));
        assert_eq!(md.series.as_deref(), Some("Captain Atom"));
        assert_eq!(md.issue.as_deref(), Some("78"));
        assert_eq!(md.year, Some(1989));
        assert_eq!(md.volume, None);
    }

    #[test]
    fn test_no_number() {
        let md = metadata_from_filename(Path::new("Batman - Year One.cbz"));
        assert_eq!(md.series.as_deref(), Some("Batman - Year One"));
        assert_eq!(md.issue, None);
    }

    #[test]
    fn test_strip_leading_zeros() {
        assert_eq!(strip_leading_zeros("002"), "2");
        assert_eq!(strip_leading_zeros("000"), "0");
        assert_eq!(strip_leading_zeros("0.5"), "0.5");
        assert_eq!(strip_leading_zeros("-01"), "-1");
    }
}
