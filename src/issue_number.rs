use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// A comic issue number as printed on the cover
///
/// Most are plain integers, but catalogs also carry fractions ("1½", "1.5"),
/// negatives ("-1") and suffixed variants ("1.MU", "5AU"). The numeric prefix
/// is split off so it can be zero-padded; any remainder is kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueString {
    negative: bool,
    /// Numeric prefix such as "1" or "1.5", absent when the number has no digits
    number: Option<String>,
    suffix: String,
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(-)?(\d+(?:\.\d+)?)(.*)$").unwrap())
}

impl IssueString {
    pub fn parse(raw: &str) -> Self {
        let mut text = raw.trim().replace('½', ".5");
        if text.starts_with(".5") || text.starts_with("-.5") {
            text = text.replacen(".5", "0.5", 1);
        }
        match number_pattern().captures(&text) {
            Some(caps) => IssueString {
                negative: caps.get(1).is_some(),
                number: caps.get(2).map(|m| m.as_str().to_string()),
                suffix: caps.get(3).map_or(String::new(), |m| m.as_str().to_string()),
            },
            None => IssueString {
                negative: false,
                number: None,
                suffix: raw.trim().to_string(),
            },
        }
    }

    /// Number with its integer part zero-padded to `pad` digits
    pub fn as_string(&self, pad: usize) -> String {
        let Some(number) = &self.number else {
            return self.suffix.clone();
        };

        let (int_part, frac_part) = match number.split_once('.') {
            Some((int_part, frac)) => (int_part, Some(frac)),
            None => (number.as_str(), None),
        };

        let mut out = String::new();
        if self.negative {
            out.push('-');
        }
        out.push_str(&format!("{:0>width$}", int_part, width = pad));
        if let Some(frac) = frac_part {
            out.push('.');
            out.push_str(frac);
        }
        out.push_str(&self.suffix);
        out
    }

    pub fn as_float(&self) -> Option<f64> {
        let value: f64 = self.number.as_ref()?.parse().ok()?;
        Some(if self.negative { -value } else { value })
    }

    /// Integer part of the number, truncated toward zero
    pub fn as_int(&self) -> Option<i64> {
        self.as_float().map(|value| value.trunc() as i64)
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl From<i64> for IssueString {
    fn from(value: i64) -> Self {
        IssueString::parse(&value.to_string())
    }
}

impl fmt::Display for IssueString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string(0))
    }
}

/// Issue number as stored on an issue row: three-digit padding
pub fn format_issue_number(raw: &str) -> String {
    IssueString::parse(raw).as_string(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pads_integers() {
        assert_eq!(IssueString::from(1).as_string(3), "001");
        assert_eq!(format_issue_number("78"), "078");
        assert_eq!(format_issue_number("1234"), "1234");
    }

    #[test]
    fn test_fraction_as_float() {
        assert_eq!(IssueString::parse("1½").as_float(), Some(1.5));
        assert_eq!(IssueString::parse("½").as_float(), Some(0.5));
    }

    #[test]
    fn test_as_int() {
        assert_eq!(IssueString::parse("1").as_int(), Some(1));
        assert_eq!(IssueString::parse("1.5").as_int(), Some(1));
        assert_eq!(IssueString::parse("-1").as_int(), Some(-1));
    }

    #[test]
    fn test_suffix_is_kept() {
        assert_eq!(IssueString::parse("1.MU").as_string(3), "001.MU");
        assert_eq!(IssueString::parse("5AU").as_string(3), "005AU");
        assert_eq!(IssueString::parse("1.MU").suffix(), ".MU");
    }

    #[test]
    fn test_decimal_and_negative_padding() {
        assert_eq!(format_issue_number("1.5"), "001.5");
        assert_eq!(format_issue_number("-1"), "-001");
    }

    #[test]
    fn test_non_numeric_passes_through() {
        let issue = IssueString::parse("Annual");
        assert_eq!(issue.as_string(3), "Annual");
        assert_eq!(issue.as_float(), None);
        assert_eq!(issue.as_int(), None);
    }
}
