use regex::Regex;
use std::sync::OnceLock;

/// Longest description kept, in characters
pub const MAX_DESCRIPTION_CHARS: usize = 500;

struct Cleanup {
    dropped_blocks: Regex,
    block_breaks: Regex,
    list_items: Regex,
    tags: Regex,
    numeric_entity: Regex,
    spaces: Regex,
}

fn cleanup() -> &'static Cleanup {
    static CLEANUP: OnceLock<Cleanup> = OnceLock::new();
    CLEANUP.get_or_init(|| Cleanup {
        dropped_blocks: Regex::new(r"(?is)<table\b.*?</table>|<figure\b.*?</figure>").unwrap(),
        block_breaks: Regex::new(r"(?i)</?h[1-6][^>]*>|<br\s*/?>|</p>|</div>").unwrap(),
        list_items: Regex::new(r"(?i)<li[^>]*>").unwrap(),
        tags: Regex::new(r"<[^>]*>").unwrap(),
        numeric_entity: Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").unwrap(),
        spaces: Regex::new(r"[ \t\u{a0}]+").unwrap(),
    })
}

/// Plain-text description for a catalog record
///
/// The short summary (deck) wins when present. Otherwise the HTML description
/// is reduced to text: tables and figures are dropped, headings and
/// paragraphs become line breaks, list items become "- " lines.
pub fn normalize_description(deck: Option<&str>, description: Option<&str>) -> String {
    let text = match deck.map(str::trim).filter(|d| !d.is_empty()) {
        Some(deck) => collapse_whitespace(&decode_entities(deck)),
        None => description.map(html_to_text).unwrap_or_default(),
    };
    truncate_chars(&text, MAX_DESCRIPTION_CHARS)
}

pub fn html_to_text(html: &str) -> String {
    let c = cleanup();
    let text = c.dropped_blocks.replace_all(html, "");
    let text = c.block_breaks.replace_all(&text, "\n");
    let text = c.list_items.replace_all(&text, "\n- ");
    let text = c.tags.replace_all(&text, "");
    collapse_whitespace(&decode_entities(&text))
}

fn decode_entities(text: &str) -> String {
    let decoded = cleanup()
        .numeric_entity
        .replace_all(text, |caps: &regex::Captures| {
            let code = &caps[1];
            let value = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => code.parse().ok(),
            };
            value
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        });

    decoded
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| cleanup().spaces.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].trim_end().to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deck_wins() {
        let text = normalize_description(
            Some("  Captain Atom   faces the sharks. "),
            Some("<p>Long description</p>"),
        );
        assert_eq!(text, "Captain Atom faces the sharks.");
    }

    #[test]
    fn test_html_is_reduced_to_text() {
        let html = "<h2>Plot</h2><p>Atom &amp; Nightshade <i>fight</i>.</p>\
                    <table><tr><td>Credits</td></tr></table>\
                    <ul><li>One</li><li>Two</li></ul>\
                    <figure><img src=\"x.jpg\"><figcaption>cap</figcaption></figure>";
        let text = normalize_description(None, Some(html));
        assert_eq!(text, "Plot\nAtom & Nightshade fight.\n- One\n- Two");
    }

    #[test]
    fn test_numeric_entities() {
        assert_eq!(html_to_text("caf&#233; &#x2014; bar"), "café — bar");
    }

    #[test]
    fn test_truncates_to_limit() {
        let long = "a".repeat(MAX_DESCRIPTION_CHARS + 50);
        assert_eq!(
            normalize_description(Some(&long), None).chars().count(),
            MAX_DESCRIPTION_CHARS
        );
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(normalize_description(None, None), "");
        assert_eq!(normalize_description(Some("  "), None), "");
    }
}
