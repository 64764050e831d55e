use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::WatchEvent;

const NORMAL_EPISODE_MS: f64 = 25.0 * 60.0 * 1000.0;
const MOVIE_MARKERS: [&str; 6] = [
    "movie",
    "film",
    "gekijouban",
    "theatrical",
    "cinema",
    "feature",
];
const RECAP_MARKERS: [&str; 4] = ["compilation", "recap", "summary", "special collection"];

/// One history item as served by the source platform's history API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawHistoryEntry {
    pub(crate) series_title: String,
    pub(crate) episode_title: String,
    pub(crate) episode_number: Option<f64>,
    pub(crate) season_title: String,
    pub(crate) season_display_number: Option<String>,
    pub(crate) season_sequence_number: Option<u32>,
    pub(crate) season_number: Option<u32>,
    pub(crate) identifier: Option<String>,
    pub(crate) duration_ms: Option<u64>,
    pub(crate) date_played: Option<String>,
    pub(crate) fully_watched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SkipReason {
    MissingSeriesTitle,
    MissingEpisodeNumber,
    Recap,
    SpecialEpisode,
}

impl SkipReason {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::MissingSeriesTitle => "no series title",
            Self::MissingEpisodeNumber => "no usable episode number",
            Self::Recap => "compilation or recap content",
            Self::SpecialEpisode => "fractional special below episode 1",
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct NormalizedPage {
    pub(crate) events: Vec<WatchEvent>,
    pub(crate) skipped: Vec<(String, SkipReason)>,
}

pub(crate) fn normalize_page(items: &[RawHistoryEntry], fetched_at: DateTime<Utc>) -> NormalizedPage {
    let mut page = NormalizedPage::default();
    for item in items {
        match normalize_entry(item, fetched_at) {
            Ok(event) => page.events.push(event),
            Err(reason) => {
                debug!(
                    series = %item.series_title,
                    episode = %item.episode_title,
                    reason = reason.describe(),
                    "skipping history entry"
                );
                page.skipped.push((item.series_title.trim().to_string(), reason));
            }
        }
    }
    page
}

pub(crate) fn normalize_entry(
    raw: &RawHistoryEntry,
    fetched_at: DateTime<Utc>,
) -> Result<WatchEvent, SkipReason> {
    let series_title = raw.series_title.trim();
    if series_title.is_empty() {
        return Err(SkipReason::MissingSeriesTitle);
    }

    let is_movie = is_movie_content(raw);
    let episode_number = match raw.episode_number.filter(|ep| ep.is_finite() && *ep > 0.0) {
        Some(ep) => ep,
        None if is_movie => 1.0,
        None => return Err(SkipReason::MissingEpisodeNumber),
    };
    if !is_movie && is_recap_content(raw) {
        return Err(SkipReason::Recap);
    }
    if !is_movie && episode_number < 1.0 {
        return Err(SkipReason::SpecialEpisode);
    }

    let watched_at = parse_watched_at(raw.date_played.as_deref()).unwrap_or_else(|| {
        debug!(series = series_title, "unparseable watch date, using page fetch time");
        fetched_at
    });

    let movie_title = if is_movie {
        [raw.episode_title.trim(), raw.season_title.trim()]
            .into_iter()
            .find(|title| !title.is_empty())
            .map(str::to_string)
    } else {
        None
    };

    Ok(WatchEvent {
        series_title: series_title.to_string(),
        season_hint: (!is_movie).then(|| resolve_season(raw)),
        episode_number: if is_movie { 1.0 } else { episode_number },
        is_movie,
        movie_title,
        watched_at,
    })
}

fn parse_watched_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn is_movie_content(raw: &RawHistoryEntry) -> bool {
    if raw
        .identifier
        .as_deref()
        .is_some_and(|id| id.contains("|M|"))
    {
        return true;
    }
    if raw.episode_number.is_none() {
        return true;
    }
    if raw
        .duration_ms
        .is_some_and(|ms| ms as f64 > NORMAL_EPISODE_MS * 2.5)
    {
        return true;
    }
    if raw.season_number.is_some_and(|n| n > 20) {
        return true;
    }

    let season_title = raw.season_title.to_lowercase();
    if MOVIE_MARKERS.iter().any(|marker| season_title.contains(marker)) {
        return true;
    }
    season_title
        .split(|ch: char| !ch.is_alphanumeric())
        .any(|token| token == "0" || token == "zero")
}

fn is_recap_content(raw: &RawHistoryEntry) -> bool {
    let season_title = raw.season_title.to_lowercase();
    let episode_title = raw.episode_title.to_lowercase();
    RECAP_MARKERS
        .iter()
        .any(|marker| season_title.contains(marker) || episode_title.contains(marker))
}

pub(crate) fn resolve_season(raw: &RawHistoryEntry) -> u32 {
    if let Some(display) = raw.season_display_number.as_deref()
        && let Ok(season) = display.trim().parse::<u32>()
        && (1..=20).contains(&season)
    {
        return season;
    }
    if let Some(season) = season_from_title(&raw.season_title)
        && season > 1
    {
        return season;
    }
    if let Some(season) = raw.season_sequence_number
        && (1..=10).contains(&season)
    {
        return season;
    }
    if let Some(season) = raw.season_number
        && (1..=10).contains(&season)
    {
        return season;
    }
    1
}

/// Reads "Season 2", "2nd Season" or "Part 2" out of a season title.
pub(crate) fn season_from_title(title: &str) -> Option<u32> {
    let words: Vec<String> = title
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect();

    for (idx, word) in words.iter().enumerate() {
        let next = words.get(idx + 1).map(String::as_str);
        let found = match word.as_str() {
            "season" | "part" => next.and_then(|n| n.parse::<u32>().ok()),
            _ if next == Some("season") => parse_ordinal(word),
            _ => None,
        };
        if let Some(season) = found
            && (1..=20).contains(&season)
        {
            return Some(season);
        }
    }
    None
}

pub(crate) fn parse_ordinal(word: &str) -> Option<u32> {
    let digits = word.trim_end_matches(|ch: char| ch.is_ascii_alphabetic());
    let suffix = &word[digits.len()..];
    if !matches!(suffix, "" | "st" | "nd" | "rd" | "th") {
        return None;
    }
    digits.parse::<u32>().ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Season(String, u32),
    Movie(String, String),
}

/// Collapses one page's events to the furthest episode per series and season.
///
/// Output keeps first-appearance order. On equal episodes the earlier (more
/// recent) entry wins.
pub(crate) fn group_events(events: Vec<WatchEvent>) -> Vec<WatchEvent> {
    let mut order: Vec<GroupKey> = Vec::new();
    let mut best: HashMap<GroupKey, WatchEvent> = HashMap::new();

    for event in events {
        let key = if event.is_movie {
            GroupKey::Movie(
                event.series_title.to_lowercase(),
                event.movie_title.clone().unwrap_or_default().to_lowercase(),
            )
        } else {
            GroupKey::Season(
                event.series_title.to_lowercase(),
                event.season_hint.unwrap_or(1),
            )
        };

        match best.get(&key) {
            Some(current) if current.episode_number >= event.episode_number => {}
            Some(_) => {
                best.insert(key, event);
            }
            None => {
                order.push(key.clone());
                best.insert(key, event);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| best.remove(&key))
        .collect()
}
