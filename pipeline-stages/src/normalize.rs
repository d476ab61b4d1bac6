//! Dedup-key normalization (spec §4.8, §8) and release-date coercion.

use chrono::NaiveDate;

/// Lowercase, strip parenthesised/bracketed substrings, drop `feat.`/`ft.`
/// credits, remove non-word non-space characters, collapse whitespace.
/// Accent-preserving: `normalize("Déjà vu") == "déjà vu"`.
pub fn normalize(input: &str) -> String {
    let lower = input.to_lowercase();
    let stripped = strip_bracketed(&lower);
    let no_feat = strip_feat_credits(&stripped);
    let cleaned: String = no_feat
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    collapse_whitespace(&cleaned)
}

fn strip_bracketed(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut depth = 0u32;
    for c in input.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn strip_feat_credits(input: &str) -> String {
    const MARKERS: [&str; 4] = ["feat.", "feat ", "ft.", "ft "];
    let mut result = input.to_string();
    for marker in MARKERS {
        if let Some(idx) = result.find(marker) {
            result.truncate(idx);
        }
    }
    result
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Coerce a release date string into `YYYY-MM-DD`, defaulting missing month
/// and day components to `01`. Returns `None` for anything else (spec §8).
pub fn format_release_date(input: &str) -> Option<String> {
    parse_release_date(input).map(|d| d.format("%Y-%m-%d").to_string())
}

pub fn parse_release_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if trimmed.len() == 7 {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d") {
            return Some(date);
        }
    }
    if trimmed.len() == 4 {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{trimmed}-01-01"), "%Y-%m-%d") {
            return Some(date);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_bracketed_and_feat_credits() {
        assert_eq!(normalize("Song (feat. X) [Remix]"), "song");
    }

    #[test]
    fn normalize_preserves_accents() {
        assert_eq!(normalize("Déjà vu"), "déjà vu");
    }

    #[test]
    fn normalize_collapses_whitespace_and_punctuation() {
        assert_eq!(normalize("Hello,   World!!"), "hello world");
    }

    #[test]
    fn normalize_drops_ft_without_period() {
        assert_eq!(normalize("Track ft Somebody"), "track");
    }

    #[test]
    fn format_release_date_year_only() {
        assert_eq!(format_release_date("2020").as_deref(), Some("2020-01-01"));
    }

    #[test]
    fn format_release_date_year_month() {
        assert_eq!(format_release_date("2020-05").as_deref(), Some("2020-05-01"));
    }

    #[test]
    fn format_release_date_full_date_passes_through() {
        assert_eq!(format_release_date("2020-05-03").as_deref(), Some("2020-05-03"));
    }

    #[test]
    fn format_release_date_rejects_garbage() {
        assert_eq!(format_release_date("garbage"), None);
    }
}
