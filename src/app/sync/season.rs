use chrono::NaiveDate;
use tracing::{debug, warn};

use super::CatalogCandidate;
use super::catalog::MediaFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SeasonEntry {
    pub(crate) target_id: u64,
    pub(crate) title: String,
    pub(crate) format: MediaFormat,
    /// `None` marks an open-ended (still airing or unannounced) entry.
    pub(crate) episode_count: Option<u32>,
    pub(crate) cumulative_offset: u32,
    pub(crate) start_date: Option<NaiveDate>,
}

impl SeasonEntry {
    pub(crate) fn is_open_ended(&self) -> bool {
        self.episode_count.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum StructureError {
    #[error("season structure is indeterminate: {reason}")]
    Indeterminate { reason: String },
    #[error("entry {target_id} starts at offset {found}, expected {expected}")]
    OffsetMismatch {
        target_id: u64,
        expected: u32,
        found: u32,
    },
    #[error("entry {target_id} has an unknown episode count but is followed by another season")]
    OpenEndedPredecessor { target_id: u64 },
}

/// Ordered seasons of one series with cumulative absolute-episode offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SeasonStructure {
    entries: Vec<SeasonEntry>,
    truncated: usize,
}

impl SeasonStructure {
    /// Validates that every offset is the sum of its predecessors' counts and
    /// that only the final entry may be open-ended.
    pub(crate) fn new(entries: Vec<SeasonEntry>) -> Result<Self, StructureError> {
        if entries.is_empty() {
            return Err(StructureError::Indeterminate {
                reason: "no season entries".to_string(),
            });
        }

        let mut expected = 0_u32;
        let last = entries.len() - 1;
        for (idx, entry) in entries.iter().enumerate() {
            if entry.cumulative_offset != expected {
                return Err(StructureError::OffsetMismatch {
                    target_id: entry.target_id,
                    expected,
                    found: entry.cumulative_offset,
                });
            }
            match entry.episode_count {
                Some(count) => expected = expected.saturating_add(count),
                None if idx < last => {
                    return Err(StructureError::OpenEndedPredecessor {
                        target_id: entry.target_id,
                    });
                }
                None => {}
            }
        }

        Ok(Self {
            entries,
            truncated: 0,
        })
    }

    pub(crate) fn entries(&self) -> &[SeasonEntry] {
        &self.entries
    }

    /// Entry for a 1-based season number.
    pub(crate) fn season(&self, number: u32) -> Option<&SeasonEntry> {
        let idx = usize::try_from(number).ok()?.checked_sub(1)?;
        self.entries.get(idx)
    }

    pub(crate) fn last(&self) -> &SeasonEntry {
        // `new` rejects empty structures.
        &self.entries[self.entries.len() - 1]
    }

    /// Candidates dropped because they followed an open-ended entry.
    pub(crate) fn truncated(&self) -> usize {
        self.truncated
    }
}

/// Orders a series' catalog candidates into seasons.
///
/// TV and TV_SHORT entries form the structure; ONA entries are used only when
/// no TV entry exists. Entries sort by start date with missing dates last.
pub(crate) fn build_structure(
    candidates: &[CatalogCandidate],
) -> Result<SeasonStructure, StructureError> {
    let tv: Vec<&CatalogCandidate> = candidates
        .iter()
        .filter(|c| matches!(c.format, MediaFormat::Tv | MediaFormat::TvShort))
        .collect();
    let mut pool = if tv.is_empty() {
        candidates
            .iter()
            .filter(|c| c.format == MediaFormat::Ona)
            .collect()
    } else {
        tv
    };

    let mut seen = std::collections::HashSet::new();
    pool.retain(|c| seen.insert(c.target_id));

    if pool.is_empty() {
        return Err(StructureError::Indeterminate {
            reason: "no TV or ONA entries among candidates".to_string(),
        });
    }
    if pool.len() > 1 && pool.iter().all(|c| c.start_date.is_none()) {
        return Err(StructureError::Indeterminate {
            reason: format!("{} candidate seasons without start dates", pool.len()),
        });
    }

    pool.sort_by(|a, b| {
        let date_key = |c: &CatalogCandidate| (c.start_date.is_none(), c.start_date);
        date_key(a)
            .cmp(&date_key(b))
            .then_with(|| a.format.series_rank().cmp(&b.format.series_rank()))
            .then_with(|| a.target_id.cmp(&b.target_id))
    });

    let mut entries = Vec::with_capacity(pool.len());
    let mut offset = 0_u32;
    let mut truncated = 0;
    for (idx, candidate) in pool.iter().enumerate() {
        entries.push(SeasonEntry {
            target_id: candidate.target_id,
            title: candidate.primary_title().to_string(),
            format: candidate.format,
            episode_count: candidate.episode_count,
            cumulative_offset: offset,
            start_date: candidate.start_date,
        });
        match candidate.episode_count {
            Some(count) => offset = offset.saturating_add(count),
            None => {
                truncated = pool.len() - idx - 1;
                if truncated > 0 {
                    warn!(
                        target_id = candidate.target_id,
                        dropped = truncated,
                        "open-ended season has successors; later seasons cannot be offset"
                    );
                }
                break;
            }
        }
    }

    let mut structure = SeasonStructure::new(entries)?;
    structure.truncated = truncated;
    for (idx, entry) in structure.entries.iter().enumerate() {
        debug!(
            season = idx + 1,
            target_id = entry.target_id,
            format = entry.format.as_str(),
            start = ?entry.start_date,
            offset = entry.cumulative_offset,
            episodes = ?entry.episode_count,
            "season entry"
        );
    }
    Ok(structure)
}

#[cfg(test)]
impl SeasonStructure {
    /// Builds a structure from `(target_id, episode_count)` pairs in order.
    pub(crate) fn from_counts(counts: &[(u64, Option<u32>)]) -> Self {
        let mut offset = 0;
        let entries = counts
            .iter()
            .map(|(target_id, count)| {
                let entry = SeasonEntry {
                    target_id: *target_id,
                    title: format!("Entry {target_id}"),
                    format: MediaFormat::Tv,
                    episode_count: *count,
                    cumulative_offset: offset,
                    start_date: None,
                };
                offset += count.unwrap_or(0);
                entry
            })
            .collect();
        Self::new(entries).expect("valid test structure")
    }
}
