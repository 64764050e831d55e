mod catalog;
mod changeset;
mod engine;
mod ledger;
mod mapper;
mod matcher;
mod normalize;
mod pagination;
mod reconcile;
mod season;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) use catalog::{CatalogCandidate, MediaRecord};
pub(crate) use changeset::{Changeset, ChangesetRecorder, apply_changeset};
pub(crate) use engine::{Diagnostic, RunReport, RunStats, SyncEngine};
pub(crate) use matcher::{detect_season, match_series, series_queries, title_similarity};
pub(crate) use normalize::RawHistoryEntry;
pub(crate) use pagination::StopReason;

#[cfg(test)]
pub(crate) use catalog::{MediaFormat, TitleSet};

/// One canonical viewing record produced from a raw history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WatchEvent {
    pub(crate) series_title: String,
    pub(crate) season_hint: Option<u32>,
    pub(crate) episode_number: f64,
    pub(crate) is_movie: bool,
    pub(crate) movie_title: Option<String>,
    pub(crate) watched_at: DateTime<Utc>,
}

impl WatchEvent {
    /// Integer episode used for progress. Fractional specials round down; anything
    /// below 1 yields 0.
    pub(crate) fn whole_episode(&self) -> u32 {
        if !self.episode_number.is_finite() || self.episode_number < 1.0 {
            return 0;
        }
        self.episode_number.floor() as u32
    }

    pub(crate) fn season_label(&self) -> String {
        if self.is_movie {
            return "movie".to_string();
        }
        format!("S{}", self.season_hint.unwrap_or(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum ListStatus {
    Planning,
    Current,
    Completed,
    Dropped,
    Paused,
    Repeating,
}

impl ListStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "PLANNING",
            Self::Current => "CURRENT",
            Self::Completed => "COMPLETED",
            Self::Dropped => "DROPPED",
            Self::Paused => "PAUSED",
            Self::Repeating => "REPEATING",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PLANNING" => Some(Self::Planning),
            "CURRENT" => Some(Self::Current),
            "COMPLETED" => Some(Self::Completed),
            "DROPPED" => Some(Self::Dropped),
            "PAUSED" => Some(Self::Paused),
            "REPEATING" => Some(Self::Repeating),
            _ => None,
        }
    }
}

impl fmt::Display for ListStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current list state for one title on the target platform. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RemoteEntry {
    pub(crate) target_id: u64,
    pub(crate) progress: u32,
    pub(crate) status: ListStatus,
    pub(crate) repeat: u32,
    pub(crate) total_episodes: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum UpdateKind {
    NewSeries,
    Normal,
    Rewatch,
    NoOp,
}

impl UpdateKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::NewSeries => "new_series",
            Self::Normal => "normal",
            Self::Rewatch => "rewatch",
            Self::NoOp => "no_op",
        }
    }
}

/// A watch event after title matching and season mapping, ready for the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedEvent {
    pub(crate) target_id: u64,
    pub(crate) target_title: String,
    /// Per-season episode on the target entry.
    pub(crate) progress: u32,
    pub(crate) absolute_episode: u32,
    pub(crate) total_episodes: Option<u32>,
    pub(crate) provisional: bool,
    pub(crate) source: WatchEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum HoldReason {
    NotAhead,
    AlreadyReconciled,
    RewatchSuperseded,
    CompletedBeyondTotal,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReconciliationDecision {
    pub(crate) target_id: u64,
    pub(crate) target_title: String,
    pub(crate) new_progress: u32,
    pub(crate) new_status: ListStatus,
    pub(crate) new_repeat: u32,
    pub(crate) total_episodes: Option<u32>,
    pub(crate) update_kind: UpdateKind,
    pub(crate) absolute_episode: u32,
    pub(crate) provisional: bool,
    pub(crate) hold: Option<HoldReason>,
    pub(crate) anomaly: Option<String>,
    pub(crate) source: WatchEvent,
}

impl ReconciliationDecision {
    pub(crate) fn is_no_op(&self) -> bool {
        self.update_kind == UpdateKind::NoOp
    }

    pub(crate) fn mutation(&self) -> MutationRequest {
        MutationRequest {
            target_id: self.target_id,
            progress: self.new_progress,
            status: self.new_status,
            repeat: self.new_repeat,
            title: self.target_title.clone(),
            total_episodes: self.total_episodes,
        }
    }
}

/// Remote mutation emitted for the external apply collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MutationRequest {
    pub(crate) target_id: u64,
    pub(crate) progress: u32,
    pub(crate) status: ListStatus,
    pub(crate) repeat: u32,
    pub(crate) title: String,
    pub(crate) total_episodes: Option<u32>,
}

#[derive(Debug, Clone)]
pub(crate) struct HistoryPage {
    pub(crate) items: Vec<RawHistoryEntry>,
    pub(crate) fetched_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum CollaboratorError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl CollaboratorError {
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Source-platform history, one page at a time. Pages are numbered from 1 and
/// `Ok(None)` means no more pages.
pub(crate) trait HistorySource {
    fn fetch_page(&mut self, page_number: usize) -> Result<Option<HistoryPage>, CollaboratorError>;
}

pub(crate) trait CatalogSource {
    fn search(&mut self, query: &str) -> Result<Vec<CatalogCandidate>, CollaboratorError>;
}

pub(crate) trait RemoteLookup {
    fn lookup(&mut self, target_id: u64) -> Result<Option<RemoteEntry>, CollaboratorError>;
}

pub(crate) trait MutationSink {
    fn apply(&mut self, request: &MutationRequest) -> Result<(), CollaboratorError>;
}

/// Run-level knobs. Thresholds that define correctness stay fixed constants.
#[derive(Debug, Clone)]
pub(crate) struct SyncConfig {
    pub(crate) max_pages: usize,
    pub(crate) early_stop: bool,
    pub(crate) remote_retry_passes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_pages: 10,
            early_stop: true,
            remote_retry_passes: 1,
        }
    }
}
