use std::cmp::Ordering;
use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use super::catalog::MediaFormat;
use super::normalize::{parse_ordinal, season_from_title};
use super::{CatalogCandidate, WatchEvent};

pub(crate) const CONFIDENCE_FLOOR: f64 = 0.7;
const NEAR_TIE: f64 = 0.02;
const SEASON_HINT_BONUS: f64 = 0.1;
const SUPPLEMENTAL_MARKERS: [&str; 7] = [
    "commentary",
    "recap",
    "pv",
    "cm",
    "promotional",
    "trailer",
    "commercial",
];
const ROMAN_SEASONS: [(&str, u32); 5] = [("ii", 2), ("iii", 3), ("iv", 4), ("v", 5), ("vi", 6)];

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TitleMatch {
    pub(crate) candidate: Option<CatalogCandidate>,
    /// Best unadjusted similarity seen, even when nothing cleared the floor.
    pub(crate) score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchMode {
    Series,
    Movie,
}

#[derive(Debug, Clone)]
struct Scored<'a> {
    candidate: &'a CatalogCandidate,
    score: f64,
    rank_score: f64,
}

pub(crate) fn match_series(
    series_title: &str,
    season_hint: Option<u32>,
    candidates: &[CatalogCandidate],
) -> TitleMatch {
    let scored = candidates
        .iter()
        .filter(|c| c.format.is_series() && !is_supplemental(c))
        .map(|candidate| {
            let score = title_similarity(series_title, candidate);
            let bonus = match season_hint {
                Some(hint) if detect_season(candidate) == hint => SEASON_HINT_BONUS,
                _ => 0.0,
            };
            Scored {
                candidate,
                score,
                rank_score: score + bonus,
            }
        })
        .collect();
    select(scored, MatchMode::Series)
}

/// Movies skip season logic and match on the movie's own title when present.
pub(crate) fn match_movie(event: &WatchEvent, candidates: &[CatalogCandidate]) -> TitleMatch {
    let query = event
        .movie_title
        .as_deref()
        .filter(|title| !title.trim().is_empty())
        .unwrap_or(&event.series_title);
    let scored = candidates
        .iter()
        .filter(|c| c.format.is_feature() && !is_supplemental(c))
        .map(|candidate| {
            let score = title_similarity(query, candidate);
            Scored {
                candidate,
                score,
                rank_score: score,
            }
        })
        .collect();
    select(scored, MatchMode::Movie)
}

/// Series-format candidates close enough to the source title to belong to the
/// same franchise. The matched candidate is always included.
pub(crate) fn franchise_members(
    series_title: &str,
    matched: &CatalogCandidate,
    candidates: &[CatalogCandidate],
) -> Vec<CatalogCandidate> {
    let mut members: Vec<CatalogCandidate> = candidates
        .iter()
        .filter(|c| c.format.is_series() && !is_supplemental(c))
        .filter(|c| {
            c.target_id == matched.target_id
                || title_similarity(series_title, c) >= CONFIDENCE_FLOOR
        })
        .cloned()
        .collect();
    if !members.iter().any(|c| c.target_id == matched.target_id) {
        members.push(matched.clone());
    }
    members
}

fn select(scored: Vec<Scored<'_>>, mode: MatchMode) -> TitleMatch {
    let best_raw = scored.iter().map(|s| s.score).fold(0.0_f64, f64::max);
    let eligible: Vec<&Scored<'_>> = scored
        .iter()
        .filter(|s| s.score >= CONFIDENCE_FLOOR)
        .collect();
    let Some(top) = eligible
        .iter()
        .map(|s| s.rank_score)
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
    else {
        return TitleMatch {
            candidate: None,
            score: best_raw,
        };
    };

    let pick = eligible
        .into_iter()
        .filter(|s| s.rank_score >= top - NEAR_TIE)
        .min_by(|left, right| {
            let format_rank = |s: &Scored<'_>| match mode {
                MatchMode::Series => s.candidate.format.series_rank(),
                MatchMode::Movie => s.candidate.format.movie_rank(),
            };
            format_rank(*left)
                .cmp(&format_rank(*right))
                .then_with(|| {
                    match (left.candidate.start_date, right.candidate.start_date) {
                        (Some(a), Some(b)) => a.cmp(&b),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    }
                })
                .then_with(|| {
                    right
                        .rank_score
                        .partial_cmp(&left.rank_score)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| left.candidate.target_id.cmp(&right.candidate.target_id))
        });

    match pick {
        Some(scored) => TitleMatch {
            candidate: Some(scored.candidate.clone()),
            score: scored.score,
        },
        None => TitleMatch {
            candidate: None,
            score: best_raw,
        },
    }
}

/// Best similarity between a source title and any of the candidate's titles.
pub(crate) fn title_similarity(source_title: &str, candidate: &CatalogCandidate) -> f64 {
    let source = TitleForms::new(source_title);
    candidate
        .titles
        .variants()
        .map(|variant| source.compare(&TitleForms::new(variant)))
        .fold(0.0_f64, f64::max)
}

struct TitleForms {
    full: String,
    base: String,
    squashed: String,
}

impl TitleForms {
    fn new(raw: &str) -> Self {
        let full = normalize_title(raw);
        let base = base_title(&full);
        let squashed = full.replace(' ', "");
        Self {
            full,
            base,
            squashed,
        }
    }

    fn has_spaces(&self) -> bool {
        self.squashed.len() != self.full.len()
    }

    fn compare(&self, other: &TitleForms) -> f64 {
        let full = string_similarity(&self.full, &other.full);
        let base = string_similarity(&self.base, &other.base);
        let squashed = if self.has_spaces() || other.has_spaces() {
            let score = string_similarity(&self.squashed, &other.squashed);
            if score >= 0.95 { 1.0 } else { score }
        } else {
            0.0
        };
        (base * 0.7 + full * 0.3).max(squashed)
    }
}

/// Case-folds, strips diacritics, dub/sub and year tags, and punctuation.
pub(crate) fn normalize_title(raw: &str) -> String {
    let without_tags = strip_parenthetical_tags(raw);
    without_tags
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_parenthetical_tags(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find('(') {
        let Some(close) = rest[open..].find(')') else {
            break;
        };
        let inner = rest[open + 1..open + close].trim().to_lowercase();
        let is_tag = inner
            .split_whitespace()
            .any(|word| word == "dub" || word == "sub" || word == "dubbed" || word == "subtitled")
            || (inner.len() == 4 && inner.chars().all(|ch| ch.is_ascii_digit()));
        out.push_str(&rest[..open]);
        if !is_tag {
            out.push_str(&rest[open..=open + close]);
        }
        out.push(' ');
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out
}

/// Drops season markers from an already normalized title.
fn base_title(normalized: &str) -> String {
    let words: Vec<&str> = normalized.split_whitespace().collect();
    let mut kept: Vec<&str> = Vec::with_capacity(words.len());
    let mut idx = 0;
    while idx < words.len() {
        let word = words[idx];
        let next = words.get(idx + 1).copied();
        if matches!(word, "season" | "part") && next.is_some_and(is_number) {
            idx += 2;
            continue;
        }
        if next == Some("season") && parse_ordinal(word).is_some() {
            idx += 2;
            continue;
        }
        if is_season_code(word) || ROMAN_SEASONS.iter().any(|(roman, _)| *roman == word) {
            idx += 1;
            continue;
        }
        kept.push(word);
        idx += 1;
    }
    if kept.len() > 1 && kept.last().is_some_and(|w| is_number(w)) {
        kept.pop();
    }
    kept.join(" ")
}

fn is_number(word: &str) -> bool {
    !word.is_empty() && word.chars().all(|ch| ch.is_ascii_digit())
}

fn is_season_code(word: &str) -> bool {
    word.len() > 1
        && (word.starts_with('s') || word.starts_with('S'))
        && is_number(&word[1..])
}

fn string_similarity(left: &str, right: &str) -> f64 {
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    if left == right {
        return 1.0;
    }

    let (shorter, longer) = if left.chars().count() <= right.chars().count() {
        (left, right)
    } else {
        (right, left)
    };
    if contains_word_run(longer, shorter) {
        let ratio = shorter.chars().count() as f64 / longer.chars().count() as f64;
        return ratio.max(0.9);
    }

    let edit = strsim::normalized_levenshtein(left, right);
    let left_words: HashSet<&str> = left.split_whitespace().collect();
    let right_words: HashSet<&str> = right.split_whitespace().collect();
    let common = left_words.intersection(&right_words).count() as f64;
    let union = left_words.union(&right_words).count() as f64;
    if union == 0.0 {
        return edit;
    }
    let overlap = common / union;
    let coverage = (common / left_words.len() as f64 + common / right_words.len() as f64) / 2.0;
    let words = overlap * 0.4 + coverage * 0.6;
    edit * 0.6 + words * 0.4
}

fn contains_word_run(haystack: &str, needle: &str) -> bool {
    let hay: Vec<&str> = haystack.split_whitespace().collect();
    let pins: Vec<&str> = needle.split_whitespace().collect();
    !pins.is_empty() && hay.windows(pins.len()).any(|window| window == pins.as_slice())
}

fn is_supplemental(candidate: &CatalogCandidate) -> bool {
    if candidate.format == MediaFormat::Music {
        return true;
    }
    candidate.titles.variants().any(|variant| {
        normalize_title(variant)
            .split_whitespace()
            .any(|word| SUPPLEMENTAL_MARKERS.contains(&word))
    })
}

/// Season number a catalog entry's titles advertise; 1 when none do.
pub(crate) fn detect_season(candidate: &CatalogCandidate) -> u32 {
    for variant in candidate.titles.variants() {
        if let Some(season) = season_from_title(variant) {
            return season;
        }
        let normalized = normalize_title(variant);
        if let Some(season) = normalized.split_whitespace().find_map(|word| {
            ROMAN_SEASONS
                .iter()
                .find(|(roman, _)| *roman == word)
                .map(|(_, season)| *season)
        }) {
            return season;
        }
    }
    1
}

/// Search text with season markers removed, so one query finds every season.
pub(crate) fn clean_title_for_search(title: &str) -> String {
    let words: Vec<&str> = title.split_whitespace().collect();
    let mut kept: Vec<&str> = Vec::with_capacity(words.len());
    let mut idx = 0;
    while idx < words.len() {
        let word = words[idx];
        let lower = word.to_lowercase();
        let next = words.get(idx + 1).map(|w| w.to_lowercase());
        if matches!(lower.as_str(), "season" | "part")
            && next.as_deref().is_some_and(is_number)
        {
            idx += 2;
            continue;
        }
        if next.as_deref() == Some("season") && parse_ordinal(&lower).is_some() {
            idx += 2;
            continue;
        }
        if is_season_code(word) {
            idx += 1;
            continue;
        }
        kept.push(word);
        idx += 1;
    }
    while kept.last().is_some_and(|w| *w == "-" || *w == ":") {
        kept.pop();
    }
    let cleaned = kept.join(" ");
    if cleaned.trim().is_empty() {
        title.trim().to_string()
    } else {
        cleaned
    }
}

pub(crate) fn series_queries(series_title: &str, season_hint: Option<u32>) -> Vec<String> {
    let clean = clean_title_for_search(series_title);
    let mut queries = Vec::new();
    if let Some(season) = season_hint.filter(|s| *s > 1) {
        queries.push(format!("{clean} season {season}"));
    }
    queries.push(clean);
    let raw = series_title.trim().to_string();
    if !queries.contains(&raw) {
        queries.push(raw);
    }
    queries
}

pub(crate) fn movie_queries(event: &WatchEvent) -> Vec<String> {
    let series = event.series_title.replace(" - ", " ").trim().to_string();
    let mut queries = Vec::new();
    if let Some(title) = event.movie_title.as_deref() {
        let cleaned = title.replace(" - ", " ").trim().to_string();
        if !cleaned.is_empty() {
            queries.push(cleaned);
        }
    }
    for query in [format!("{series} Movie"), series] {
        if !queries.contains(&query) {
            queries.push(query);
        }
    }
    queries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::sync::{MediaFormat, TitleSet};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn candidate(
        id: u64,
        primary: &str,
        alternates: &[&str],
        format: MediaFormat,
        start: Option<(i32, u32, u32)>,
    ) -> CatalogCandidate {
        CatalogCandidate {
            target_id: id,
            titles: TitleSet {
                primary: primary.to_string(),
                alternates: alternates.iter().map(|t| t.to_string()).collect(),
            },
            episode_count: Some(12),
            format,
            start_date: start.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
        }
    }

    #[test]
    fn normalize_title_folds_case_diacritics_and_tags() {
        assert_eq!(normalize_title("Pokémon: The Series (Dub)"), "pokemon the series");
        assert_eq!(normalize_title("  Re:ZERO -Starting Life-  "), "re zero starting life");
        assert_eq!(normalize_title("Hunter x Hunter (2011)"), "hunter x hunter");
        assert_eq!(normalize_title("Spy x Family (Part 2)"), "spy x family part 2");
    }

    #[test]
    fn base_title_removes_season_markers() {
        assert_eq!(base_title("attack on titan season 3 part 2"), "attack on titan");
        assert_eq!(base_title("mob psycho 100 ii"), "mob psycho");
        assert_eq!(base_title("overlord 4th season"), "overlord");
        assert_eq!(base_title("kaguya sama s2"), "kaguya sama");
    }

    #[test]
    fn alternate_titles_count_toward_similarity() {
        let aot = candidate(
            16498,
            "Shingeki no Kyojin",
            &["Attack on Titan"],
            MediaFormat::Tv,
            Some((2013, 4, 7)),
        );
        assert!((title_similarity("Attack on Titan", &aot) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn series_match_prefers_tv_and_earliest_start_on_near_tie() {
        let candidates = vec![
            candidate(3, "Frieren", &[], MediaFormat::Ona, Some((2023, 9, 1))),
            candidate(2, "Frieren", &[], MediaFormat::Tv, Some((2024, 1, 1))),
            candidate(1, "Frieren", &[], MediaFormat::Tv, Some((2023, 9, 29))),
        ];
        let result = match_series("Frieren", None, &candidates);
        assert_eq!(result.candidate.map(|c| c.target_id), Some(1));
        assert!((result.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn below_floor_returns_no_match_regardless_of_candidate_count() {
        let candidates: Vec<CatalogCandidate> = (0..8)
            .map(|id| {
                candidate(
                    id,
                    &format!("Completely Unrelated Show {id}"),
                    &[],
                    MediaFormat::Tv,
                    None,
                )
            })
            .collect();
        let result = match_series("Frieren Beyond Journey's End", None, &candidates);
        assert!(result.candidate.is_none());
        assert!(result.score < CONFIDENCE_FLOOR);
    }

    #[test]
    fn floor_applies_to_unadjusted_score() {
        let only = candidate(1, "X", &[], MediaFormat::Tv, None);
        let scored = vec![Scored {
            candidate: &only,
            score: 0.65,
            rank_score: 0.75,
        }];
        let result = select(scored, MatchMode::Series);
        assert!(result.candidate.is_none());
        assert!((result.score - 0.65).abs() < 1e-9);
    }

    #[test]
    fn season_hint_bonus_picks_the_hinted_season() {
        let candidates = vec![
            candidate(
                16498,
                "Shingeki no Kyojin",
                &["Attack on Titan"],
                MediaFormat::Tv,
                Some((2013, 4, 7)),
            ),
            candidate(
                20958,
                "Shingeki no Kyojin Season 2",
                &["Attack on Titan Season 2"],
                MediaFormat::Tv,
                Some((2017, 4, 1)),
            ),
        ];
        let result = match_series("Attack on Titan", Some(2), &candidates);
        assert_eq!(result.candidate.map(|c| c.target_id), Some(20958));
    }

    #[test]
    fn supplemental_and_movie_formats_are_excluded_from_series_search() {
        let candidates = vec![
            candidate(1, "Frieren PV", &[], MediaFormat::Tv, None),
            candidate(2, "Frieren", &[], MediaFormat::Movie, None),
            candidate(3, "Frieren", &[], MediaFormat::Music, None),
        ];
        assert!(match_series("Frieren", None, &candidates).candidate.is_none());
    }

    #[test]
    fn movie_match_uses_movie_title_and_prefers_movie_format() {
        let event = WatchEvent {
            series_title: "Jujutsu Kaisen".to_string(),
            season_hint: None,
            episode_number: 1.0,
            is_movie: true,
            movie_title: Some("Jujutsu Kaisen 0".to_string()),
            watched_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        };
        let candidates = vec![
            candidate(113415, "Jujutsu Kaisen", &[], MediaFormat::Tv, None),
            candidate(131573, "Jujutsu Kaisen 0", &[], MediaFormat::Movie, None),
            candidate(5, "Jujutsu Kaisen 0", &[], MediaFormat::Special, None),
        ];
        let result = match_movie(&event, &candidates);
        assert_eq!(result.candidate.map(|c| c.target_id), Some(131573));
    }

    #[test]
    fn franchise_members_keep_related_seasons_only() {
        let candidates = vec![
            candidate(1, "Vinland Saga", &[], MediaFormat::Tv, Some((2019, 7, 8))),
            candidate(2, "Vinland Saga Season 2", &[], MediaFormat::Tv, Some((2023, 1, 10))),
            candidate(3, "Blue Lock", &[], MediaFormat::Tv, Some((2022, 10, 9))),
        ];
        let members = franchise_members("Vinland Saga", &candidates[0], &candidates);
        let ids: Vec<u64> = members.iter().map(|c| c.target_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn clean_title_for_search_drops_season_markers() {
        assert_eq!(clean_title_for_search("Attack on Titan Season 3"), "Attack on Titan");
        assert_eq!(clean_title_for_search("Overlord 4th Season"), "Overlord");
        assert_eq!(clean_title_for_search("Vinland Saga S2"), "Vinland Saga");
        assert_eq!(clean_title_for_search("Season 2"), "Season 2");
    }

    #[test]
    fn series_queries_put_season_specific_search_first() {
        assert_eq!(
            series_queries("Attack on Titan", Some(2)),
            vec!["Attack on Titan season 2".to_string(), "Attack on Titan".to_string()]
        );
        assert_eq!(
            series_queries("Vinland Saga S2", Some(1)),
            vec!["Vinland Saga".to_string(), "Vinland Saga S2".to_string()]
        );
    }

    #[test]
    fn detect_season_reads_ordinals_and_roman_numerals() {
        let ordinal = candidate(1, "Overlord 4th Season", &[], MediaFormat::Tv, None);
        let roman = candidate(2, "Mob Psycho 100 III", &[], MediaFormat::Tv, None);
        let plain = candidate(3, "Overlord", &[], MediaFormat::Tv, None);
        assert_eq!(detect_season(&ordinal), 4);
        assert_eq!(detect_season(&roman), 3);
        assert_eq!(detect_season(&plain), 1);
    }
}
