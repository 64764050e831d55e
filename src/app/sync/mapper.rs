use super::season::SeasonStructure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MappedEpisode {
    pub(crate) target_id: u64,
    /// Per-season episode on `target_id`.
    pub(crate) episode: u32,
    pub(crate) absolute: u32,
    /// Set when the entry's length is unknown, so a later catalog update could
    /// move this episode to another season.
    pub(crate) provisional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum MappingError {
    #[error("episode {0} cannot be mapped")]
    InvalidEpisode(u32),
    #[error("absolute episode {absolute} is past episode {last_episode} of entry {last_target_id}")]
    OutOfRange {
        absolute: u32,
        last_target_id: u64,
        last_episode: u32,
    },
}

/// Converts an absolute episode into a per-season one.
///
/// Entry `i` covers absolute episodes `offset + 1 ..= offset + count`.
pub(crate) fn map_episode(
    absolute: u32,
    structure: &SeasonStructure,
) -> Result<MappedEpisode, MappingError> {
    if absolute == 0 {
        return Err(MappingError::InvalidEpisode(absolute));
    }

    for entry in structure.entries() {
        if absolute <= entry.cumulative_offset {
            continue;
        }
        match entry.episode_count {
            Some(count) if absolute - entry.cumulative_offset <= count => {
                return Ok(MappedEpisode {
                    target_id: entry.target_id,
                    episode: absolute - entry.cumulative_offset,
                    absolute,
                    provisional: false,
                });
            }
            Some(_) => {}
            None => {
                return Ok(MappedEpisode {
                    target_id: entry.target_id,
                    episode: absolute - entry.cumulative_offset,
                    absolute,
                    provisional: true,
                });
            }
        }
    }

    let last = structure.last();
    Err(MappingError::OutOfRange {
        absolute,
        last_target_id: last.target_id,
        last_episode: last.episode_count.unwrap_or(0),
    })
}

/// Uses the event's own season number when it selects an entry the episode
/// fits in. Returns `None` when the episode looks absolute instead.
pub(crate) fn map_by_season(
    season: u32,
    episode: u32,
    structure: &SeasonStructure,
) -> Option<MappedEpisode> {
    if episode == 0 {
        return None;
    }
    let entry = structure.season(season)?;
    let fits = entry.episode_count.is_none_or(|count| episode <= count);
    fits.then(|| MappedEpisode {
        target_id: entry.target_id,
        episode,
        absolute: entry.cumulative_offset.saturating_add(episode),
        provisional: entry.is_open_ended(),
    })
}

/// Fallback for [`MappingError::OutOfRange`]: the last known episode of the
/// event's own season, or of the final season when the hint selects no closed
/// entry. Always flagged provisional.
pub(crate) fn clamp_to_season(season: u32, structure: &SeasonStructure) -> MappedEpisode {
    let entry = structure
        .season(season)
        .filter(|entry| !entry.is_open_ended())
        .unwrap_or_else(|| structure.last());
    let episode = entry.episode_count.unwrap_or(0).max(1);
    MappedEpisode {
        target_id: entry.target_id,
        episode,
        absolute: entry.cumulative_offset.saturating_add(episode),
        provisional: true,
    }
}
