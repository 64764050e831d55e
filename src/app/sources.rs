use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::sync::{
    CatalogCandidate, CatalogSource, CollaboratorError, HistoryPage, HistorySource, MediaRecord,
    RawHistoryEntry, title_similarity,
};

/// Page size used when a history export is a single flat list.
const FLAT_PAGE_SIZE: usize = 50;
const OFFLINE_MATCH_FLOOR: f64 = 0.5;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryExport {
    Pages { pages: Vec<Vec<RawHistoryEntry>> },
    Wrapped { data: Vec<RawHistoryEntry> },
    Paged(Vec<Vec<RawHistoryEntry>>),
    Flat(Vec<RawHistoryEntry>),
}

impl HistoryExport {
    fn into_pages(self) -> Vec<Vec<RawHistoryEntry>> {
        match self {
            Self::Pages { pages } | Self::Paged(pages) => pages,
            Self::Wrapped { data: items } | Self::Flat(items) => items
                .chunks(FLAT_PAGE_SIZE)
                .map(<[RawHistoryEntry]>::to_vec)
                .collect(),
        }
    }
}

/// Watch history exported to a JSON file, served newest page first.
pub(crate) struct FileHistorySource {
    pages: Vec<Vec<RawHistoryEntry>>,
    fetched_at: DateTime<Utc>,
}

impl FileHistorySource {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read history export {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("failed to parse history export {}", path.display()))
    }

    pub(crate) fn from_json(raw: &str) -> Result<Self> {
        let export: HistoryExport = serde_json::from_str(raw)
            .context("expected a list of history entries or a list of pages")?;
        let pages = export.into_pages();
        debug!(pages = pages.len(), "loaded history export");
        Ok(Self {
            pages,
            fetched_at: Utc::now(),
        })
    }

    pub(crate) fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl HistorySource for FileHistorySource {
    fn fetch_page(&mut self, page_number: usize) -> Result<Option<HistoryPage>, CollaboratorError> {
        let Some(items) = page_number
            .checked_sub(1)
            .and_then(|index| self.pages.get(index))
        else {
            return Ok(None);
        };
        Ok(Some(HistoryPage {
            items: items.clone(),
            fetched_at: self.fetched_at,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogDump {
    Records(Vec<MediaRecord>),
    Response { data: CatalogDumpData },
}

#[derive(Debug, Deserialize)]
struct CatalogDumpData {
    #[serde(rename = "Page")]
    page: CatalogDumpPage,
}

#[derive(Debug, Deserialize)]
struct CatalogDumpPage {
    media: Vec<MediaRecord>,
}

/// Catalog search over a local dump of media records.
pub(crate) struct OfflineCatalog {
    entries: Vec<CatalogCandidate>,
}

impl OfflineCatalog {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog dump {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("failed to parse catalog dump {}", path.display()))
    }

    pub(crate) fn from_json(raw: &str) -> Result<Self> {
        let dump: CatalogDump =
            serde_json::from_str(raw).context("expected a list of media records")?;
        let records = match dump {
            CatalogDump::Records(records) => records,
            CatalogDump::Response { data } => data.page.media,
        };
        Ok(Self {
            entries: records.into_iter().map(CatalogCandidate::from).collect(),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl CatalogSource for OfflineCatalog {
    fn search(&mut self, query: &str) -> Result<Vec<CatalogCandidate>, CollaboratorError> {
        let mut scored = self
            .entries
            .iter()
            .map(|entry| (title_similarity(query, entry), entry))
            .filter(|(score, _)| *score >= OFFLINE_MATCH_FLOOR)
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));
        Ok(scored.into_iter().map(|(_, entry)| entry.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn entry_json(series: &str, episode: u32) -> String {
        format!(
            r#"{{"series_title": "{series}", "episode_number": {episode}, "season_number": 1,
                "duration_ms": 1440000, "fully_watched": true}}"#
        )
    }

    #[test]
    fn flat_exports_are_split_into_pages() {
        let items = (1..=120)
            .map(|episode| entry_json("One Piece", episode))
            .collect::<Vec<_>>()
            .join(",");
        let mut source = FileHistorySource::from_json(&format!("[{items}]")).expect("parse");
        assert_eq!(source.page_count(), 3);

        let first = source.fetch_page(1).expect("fetch").expect("page");
        assert_eq!(first.items.len(), FLAT_PAGE_SIZE);
        assert_eq!(first.items[0].episode_number, Some(1.0));
        let last = source.fetch_page(3).expect("fetch").expect("page");
        assert_eq!(last.items.len(), 20);
        assert!(source.fetch_page(4).expect("fetch").is_none());
        assert!(source.fetch_page(0).expect("fetch").is_none());
    }

    #[test]
    fn paged_and_wrapped_exports_are_accepted() {
        let paged = format!(
            "[[{}, {}], [{}]]",
            entry_json("Frieren", 2),
            entry_json("Frieren", 1),
            entry_json("Dandadan", 4)
        );
        let source = FileHistorySource::from_json(&paged).expect("paged");
        assert_eq!(source.page_count(), 2);

        let keyed = format!(r#"{{"pages": [[{}]]}}"#, entry_json("Frieren", 3));
        assert_eq!(FileHistorySource::from_json(&keyed).expect("keyed").page_count(), 1);

        let wrapped = format!(r#"{{"data": [{}]}}"#, entry_json("Frieren", 3));
        let mut source = FileHistorySource::from_json(&wrapped).expect("wrapped");
        let page = source.fetch_page(1).expect("fetch").expect("page");
        assert_eq!(page.items[0].series_title, "Frieren");
        assert!(page.items[0].fully_watched);
    }

    #[test]
    fn history_file_errors_name_the_path() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("history.json");
        fs::write(&path, "not json").expect("write");
        let err = FileHistorySource::load(&path).err().expect("should fail");
        assert!(format!("{err:#}").contains("history.json"));
    }

    #[test]
    fn offline_catalog_ranks_matches_and_drops_unrelated_titles() {
        let dump = r#"[
            {"id": 1, "title": {"romaji": "Sousou no Frieren", "english": "Frieren: Beyond Journey's End"},
             "episodes": 28, "format": "TV", "startDate": {"year": 2023, "month": 9, "day": 29}},
            {"id": 2, "title": {"romaji": "Sousou no Frieren 2nd Season"},
             "episodes": 10, "format": "TV", "startDate": {"year": 2026, "month": 1, "day": 16}},
            {"id": 3, "title": {"romaji": "Dandadan"}, "episodes": 12, "format": "TV"}
        ]"#;
        let mut catalog = OfflineCatalog::from_json(dump).expect("parse");
        assert_eq!(catalog.len(), 3);

        let results = catalog.search("Frieren: Beyond Journey's End").expect("search");
        assert!(!results.is_empty());
        assert_eq!(results[0].target_id, 1);
        assert!(results.iter().all(|candidate| candidate.target_id != 3));
    }

    #[test]
    fn offline_catalog_accepts_saved_search_responses() {
        let dump = r#"{"data": {"Page": {"media": [
            {"id": 21, "title": {"romaji": "One Piece"}, "episodes": null, "format": "TV"}
        ]}}}"#;
        let mut catalog = OfflineCatalog::from_json(dump).expect("parse");
        let results = catalog.search("One Piece").expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].episode_count, None);
    }
}
