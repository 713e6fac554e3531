/// URL slug for a display name
///
/// Punctuation is dropped rather than turned into a separator, so
/// "Spider-Man's Tangled Web" becomes "spider-mans-tangled-web". Runs of
/// whitespace and hyphens collapse to a single hyphen. Non-ASCII text is
/// transliterated first ("Pokémon" becomes "pokemon").
pub fn slugify(s: &str) -> String {
    let ascii = deunicode::deunicode(s);
    let mut result = String::with_capacity(ascii.len());
    let mut pending_separator = false;

    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_separator && !result.is_empty() {
                result.push('-');
            }
            pending_separator = false;
            result.push(c.to_ascii_lowercase());
        } else if c == '-' || c.is_whitespace() {
            pending_separator = true;
        }
    }

    let trimmed = result.trim_matches(|c| c == '-' || c == '_');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Alphabetical sort key: a leading "The " moves to the end
pub fn sort_name(name: &str) -> String {
    match name.strip_prefix("The ") {
        Some(rest) if !rest.trim().is_empty() => format!("{}, The", rest.trim()),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Captain Atom 078 1987"), "captain-atom-078-1987");
        assert_eq!(slugify("Spider-Man's Tangled Web"), "spider-mans-tangled-web");
        assert_eq!(slugify("  Green   Lantern -- Corps  "), "green-lantern-corps");
        assert_eq!(slugify("X-Men: Legacy"), "x-men-legacy");
    }

    #[test]
    fn test_slugify_transliterates_accents() {
        assert_eq!(slugify("Pokémon"), "pokemon");
        assert_eq!(slugify("Astérix et Obélix"), "asterix-et-obelix");
        assert_eq!(slugify("Die Säulen"), "die-saulen");
    }

    #[test]
    fn test_slugify_never_empty() {
        assert_eq!(slugify("!!!"), "untitled");
        assert_eq!(slugify(""), "untitled");
    }

    #[test]
    fn test_sort_name() {
        assert_eq!(sort_name("The Avengers"), "Avengers, The");
        assert_eq!(sort_name("Avengers"), "Avengers");
        assert_eq!(sort_name("Theatre of the Absurd"), "Theatre of the Absurd");
        assert_eq!(sort_name("The "), "The ");
    }
}
