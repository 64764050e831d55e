//! In-memory collaborators shared by engine and command tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use super::{
    CatalogCandidate, CatalogSource, CollaboratorError, HistoryPage, HistorySource, MediaFormat,
    MutationRequest, MutationSink, RawHistoryEntry, RemoteEntry, RemoteLookup, TitleSet,
};

pub(crate) fn fetched_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub(crate) fn raw_episode(series: &str, season: u32, episode: f64) -> RawHistoryEntry {
    RawHistoryEntry {
        series_title: series.to_string(),
        episode_title: format!("Episode {episode}"),
        episode_number: Some(episode),
        season_title: format!("{series} Season {season}"),
        season_display_number: Some(season.to_string()),
        duration_ms: Some(1_420_000),
        date_played: Some("2026-02-27T21:15:00Z".to_string()),
        fully_watched: true,
        ..RawHistoryEntry::default()
    }
}

pub(crate) fn raw_movie(series: &str, title: &str) -> RawHistoryEntry {
    RawHistoryEntry {
        series_title: series.to_string(),
        episode_title: title.to_string(),
        episode_number: None,
        season_title: title.to_string(),
        identifier: Some("G4VUQ588P|M|1".to_string()),
        duration_ms: Some(6_300_000),
        date_played: Some("2026-02-20T18:00:00Z".to_string()),
        ..RawHistoryEntry::default()
    }
}

pub(crate) fn catalog_entry(
    id: u64,
    primary: &str,
    alternates: &[&str],
    episodes: Option<u32>,
    format: MediaFormat,
    start: (i32, u32, u32),
) -> CatalogCandidate {
    CatalogCandidate {
        target_id: id,
        titles: TitleSet {
            primary: primary.to_string(),
            alternates: alternates.iter().map(|t| t.to_string()).collect(),
        },
        episode_count: episodes,
        format,
        start_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2),
    }
}

pub(crate) fn remote_entry(
    target_id: u64,
    progress: u32,
    status: super::ListStatus,
    repeat: u32,
    total: Option<u32>,
) -> RemoteEntry {
    RemoteEntry {
        target_id,
        progress,
        status,
        repeat,
        total_episodes: total,
    }
}

/// Returns every entry for every query and counts searches. Queries containing
/// any of `failing_queries` fail permanently.
#[derive(Debug, Default)]
pub(crate) struct StaticCatalog {
    pub(crate) entries: Vec<CatalogCandidate>,
    pub(crate) searches: Vec<String>,
    pub(crate) failing_queries: Vec<String>,
}

impl StaticCatalog {
    pub(crate) fn new(entries: Vec<CatalogCandidate>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }
}

impl CatalogSource for StaticCatalog {
    fn search(&mut self, query: &str) -> Result<Vec<CatalogCandidate>, CollaboratorError> {
        self.searches.push(query.to_string());
        let lowered = query.to_lowercase();
        if self
            .failing_queries
            .iter()
            .any(|marker| lowered.contains(&marker.to_lowercase()))
        {
            return Err(CollaboratorError::Permanent("catalog offline".to_string()));
        }
        Ok(self.entries.clone())
    }
}

#[derive(Debug, Default)]
pub(crate) struct PagedHistory {
    pub(crate) pages: Vec<Vec<RawHistoryEntry>>,
    pub(crate) requested: usize,
}

impl PagedHistory {
    pub(crate) fn new(pages: Vec<Vec<RawHistoryEntry>>) -> Self {
        Self { pages, requested: 0 }
    }
}

impl HistorySource for PagedHistory {
    fn fetch_page(&mut self, page_number: usize) -> Result<Option<HistoryPage>, CollaboratorError> {
        self.requested += 1;
        Ok(page_number
            .checked_sub(1)
            .and_then(|idx| self.pages.get(idx))
            .map(|items| HistoryPage {
                items: items.clone(),
                fetched_at: fetched_at(),
            }))
    }
}

#[derive(Debug, Default)]
struct ListState {
    entries: BTreeMap<u64, RemoteEntry>,
    transient_lookups: HashMap<u64, usize>,
    failing_mutations: HashSet<u64>,
    mutations: Vec<MutationRequest>,
}

/// Shared handle over an in-memory list, usable as both lookup and sink.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryList {
    state: Rc<RefCell<ListState>>,
}

impl MemoryList {
    pub(crate) fn with_entries(entries: impl IntoIterator<Item = RemoteEntry>) -> Self {
        let list = Self::default();
        list.state
            .borrow_mut()
            .entries
            .extend(entries.into_iter().map(|entry| (entry.target_id, entry)));
        list
    }

    pub(crate) fn entry(&self, target_id: u64) -> Option<RemoteEntry> {
        self.state.borrow().entries.get(&target_id).cloned()
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<u64, RemoteEntry> {
        self.state.borrow().entries.clone()
    }

    pub(crate) fn mutations(&self) -> Vec<MutationRequest> {
        self.state.borrow().mutations.clone()
    }

    pub(crate) fn fail_lookups(&self, target_id: u64, times: usize) {
        self.state
            .borrow_mut()
            .transient_lookups
            .insert(target_id, times);
    }

    pub(crate) fn fail_mutations(&self, target_id: u64) {
        self.state.borrow_mut().failing_mutations.insert(target_id);
    }
}

impl RemoteLookup for MemoryList {
    fn lookup(&mut self, target_id: u64) -> Result<Option<RemoteEntry>, CollaboratorError> {
        let mut state = self.state.borrow_mut();
        if let Some(remaining) = state.transient_lookups.get_mut(&target_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(CollaboratorError::Transient("rate limited".to_string()));
        }
        Ok(state.entries.get(&target_id).cloned())
    }
}

impl MutationSink for MemoryList {
    fn apply(&mut self, request: &MutationRequest) -> Result<(), CollaboratorError> {
        let mut state = self.state.borrow_mut();
        if state.failing_mutations.contains(&request.target_id) {
            return Err(CollaboratorError::Permanent("mutation rejected".to_string()));
        }
        state.mutations.push(request.clone());
        state.entries.insert(
            request.target_id,
            RemoteEntry {
                target_id: request.target_id,
                progress: request.progress,
                status: request.status,
                repeat: request.repeat,
                total_episodes: request.total_episodes,
            },
        );
        Ok(())
    }
}
