//! Keyword and pattern heuristics applied to search results.
//!
//! Every classifier here is an ordered rule table evaluated top to bottom;
//! the first matching rule wins.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Difficulty;

static RE_ISO_DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?").unwrap());

/// Converts an ISO-8601 style `PT#H#M#S` token into seconds. Missing
/// components count as zero; anything that does not match yields 0.
/// Absurdly long components saturate at `i64::MAX`.
pub fn parse_duration(token: &str) -> i64 {
    let Some(caps) = RE_ISO_DURATION.captures(token) else {
        return 0;
    };
    let part = |idx: usize| -> i64 {
        caps.get(idx)
            .map(|m| m.as_str().parse::<i64>().unwrap_or(i64::MAX))
            .unwrap_or(0)
    };
    part(1)
        .saturating_mul(3600)
        .saturating_add(part(2).saturating_mul(60))
        .saturating_add(part(3))
}

const DIFFICULTY_RULES: &[(Difficulty, &[&str])] = &[
    (
        Difficulty::Beginner,
        &["beginner", "getting started", "basics", "first"],
    ),
    (
        Difficulty::Advanced,
        &["advanced", "expert", "pro", "enterprise"],
    ),
    (
        Difficulty::Intermediate,
        &["intermediate", "tips", "tricks"],
    ),
];

/// Picks a tier for a video. A recognised `requested` tier is returned as-is;
/// otherwise title and description are scanned against `DIFFICULTY_RULES`.
pub fn detect_difficulty(title: &str, description: &str, requested: Option<&str>) -> Difficulty {
    if let Some(tier) = requested.and_then(Difficulty::from_tier) {
        return tier;
    }
    let text = format!("{title} {description}").to_lowercase();
    DIFFICULTY_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| text.contains(kw)))
        .map(|(tier, _)| *tier)
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesInfo {
    pub is_series: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_title: Option<String>,
}

impl SeriesInfo {
    pub fn none() -> Self {
        Self::default()
    }
}

static SERIES_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("part", r"(?i)part\s+(\d+)"),
        ("day", r"(?i)day\s+(\d+)"),
        ("episode", r"(?i)episode\s+(\d+)"),
        ("tutorial", r"(?i)tutorial\s+(\d+)"),
        ("lesson", r"(?i)lesson\s+(\d+)"),
        ("step", r"(?i)step\s+(\d+)"),
        ("chapter", r"(?i)chapter\s+(\d+)"),
        ("of", r"(?i)(\d+)\s+of\s+\d+"),
        ("hash", r"#(\d+)"),
        ("slash", r"(\d+)\s*/\s*\d+"),
        ("range", r"(\d+)\s*-\s*\d+"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).unwrap()))
    .collect()
});

/// Detects numbered-series titles such as "Part 3" or "2/5".
pub fn detect_series(title: &str) -> SeriesInfo {
    for (kind, re) in SERIES_PATTERNS.iter() {
        let Some(caps) = re.captures(title) else {
            continue;
        };
        let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        return SeriesInfo {
            is_series: true,
            series_number: Some(number),
            series_type: Some((*kind).to_string()),
            series_title: Some(re.replace(title, "").trim().to_string()),
        };
    }
    SeriesInfo::none()
}

const VIEW_TIERS: &[(i64, u32)] = &[
    (100_000, 40),
    (50_000, 35),
    (25_000, 30),
    (10_000, 25),
    (5_000, 20),
    (1_000, 15),
];

const DURATION_BANDS: &[((i64, i64), u32)] = &[
    ((600, 1800), 20),
    ((300, 3600), 15),
    ((120, 7200), 10),
];

const TITLE_BONUSES: &[(&[&str], u32)] = &[
    (&["tutorial", "guide"], 10),
    (&["complete", "full"], 5),
    (&["step by step"], 5),
];

const DESCRIPTION_BONUSES: &[(&[&str], u32)] = &[
    (&["timestamp", "chapter"], 5),
    (&["download", "resource"], 5),
];

/// Additive 0..=100 usefulness estimate from popularity, length and wording.
pub fn quality_score(view_count: i64, duration: i64, title: &str, description: &str) -> f64 {
    let mut score = VIEW_TIERS
        .iter()
        .find(|(min, _)| view_count >= *min)
        .map(|(_, points)| *points)
        .unwrap_or(5);

    score += DURATION_BANDS
        .iter()
        .find(|((lo, hi), _)| duration >= *lo && duration <= *hi)
        .map(|(_, points)| *points)
        .unwrap_or(5);

    let title = title.to_lowercase();
    for (needles, points) in TITLE_BONUSES {
        if needles.iter().any(|n| title.contains(n)) {
            score += points;
        }
    }

    let description_lower = description.to_lowercase();
    if description.chars().count() > 500 {
        score += 10;
    }
    for (needles, points) in DESCRIPTION_BONUSES {
        if needles.iter().any(|n| description_lower.contains(n)) {
            score += points;
        }
    }

    f64::from(score.min(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_tokens_convert_to_seconds() {
        assert_eq!(parse_duration("PT1H2M3S"), 3723);
        assert_eq!(parse_duration("PT4M13S"), 253);
        assert_eq!(parse_duration("PT45S"), 45);
        assert_eq!(parse_duration("PT2H"), 7200);
    }

    #[test]
    fn oversized_duration_saturates() {
        assert_eq!(parse_duration("PT9999999999999999H"), i64::MAX);
        assert_eq!(parse_duration("PT99999999999999999999999S"), i64::MAX);
    }

    #[test]
    fn duration_garbage_is_zero() {
        assert_eq!(parse_duration(""), 0);
        assert_eq!(parse_duration("10 minutes"), 0);
        assert_eq!(parse_duration("PT"), 0);
    }

    #[test]
    fn difficulty_from_content() {
        assert_eq!(
            detect_difficulty("Zapier for Beginners", "", None),
            Difficulty::Beginner
        );
        assert_eq!(
            detect_difficulty("Advanced Enterprise Automation", "", None),
            Difficulty::Advanced
        );
        assert_eq!(
            detect_difficulty("Ten tricks for n8n", "", None),
            Difficulty::Intermediate
        );
        assert_eq!(detect_difficulty("Webhooks", "", None), Difficulty::Beginner);
    }

    #[test]
    fn beginner_keywords_outrank_advanced_ones() {
        assert_eq!(
            detect_difficulty("Advanced", "but start with the basics", None),
            Difficulty::Beginner
        );
    }

    #[test]
    fn explicit_tier_overrides_content() {
        assert_eq!(
            detect_difficulty("Zapier for Beginners", "", Some("advanced")),
            Difficulty::Advanced
        );
        assert_eq!(
            detect_difficulty("Advanced Enterprise Automation", "", Some("all")),
            Difficulty::Advanced
        );
    }

    #[test]
    fn series_part_number_is_extracted() {
        let info = detect_series("Tutorial Part 3: Filters");
        assert!(info.is_series);
        assert_eq!(info.series_number, Some(3));
        assert_eq!(info.series_type.as_deref(), Some("part"));
        assert_eq!(info.series_title.as_deref(), Some("Tutorial : Filters"));
    }

    #[test]
    fn series_first_pattern_wins() {
        let info = detect_series("Day 4 - lesson 2");
        assert_eq!(info.series_type.as_deref(), Some("day"));
        assert_eq!(info.series_number, Some(4));

        let fraction = detect_series("Make.com crash course 2/5");
        assert_eq!(fraction.series_type.as_deref(), Some("slash"));
        assert_eq!(fraction.series_number, Some(2));

        let hashed = detect_series("n8n tips #12");
        assert_eq!(hashed.series_type.as_deref(), Some("hash"));
        assert_eq!(hashed.series_number, Some(12));
    }

    #[test]
    fn plain_title_is_not_a_series() {
        let info = detect_series("My First Automation");
        assert!(!info.is_series);
        assert_eq!(info, SeriesInfo::none());
    }

    #[test]
    fn quality_score_rewards_popular_tutorials() {
        let long_desc = format!("{} with timestamps and a download link", "x".repeat(520));
        let score = quality_score(150_000, 900, "Complete Zapier Tutorial step by step", &long_desc);
        assert_eq!(score, 100.0);

        let low = quality_score(10, 30, "clip", "");
        assert_eq!(low, 10.0);

        let mid = quality_score(6_000, 400, "n8n guide", "");
        assert_eq!(mid, 45.0);
    }
}
