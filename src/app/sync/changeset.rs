use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    CollaboratorError, ListStatus, MutationRequest, MutationSink, ReconciliationDecision,
    RemoteEntry, RemoteLookup, UpdateKind,
};

pub(crate) const CHANGESET_SCHEMA_VERSION: u64 = 1;
const APPLY_ATTEMPTS: usize = 2;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ChangesetError {
    #[error("failed to access changeset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("changeset is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("changeset schema version {found} is newer than supported version {supported}")]
    SchemaMismatch { found: u64, supported: u64 },
    #[error("invalid changeset: {0}")]
    Invalid(String),
}

/// Where a change came from on the source platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Provenance {
    pub(crate) series: String,
    pub(crate) season: Option<u32>,
    pub(crate) episode: f64,
    pub(crate) is_movie: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ChangeRecord {
    #[serde(alias = "anime_id")]
    pub(crate) target_id: u64,
    #[serde(alias = "anime_title")]
    pub(crate) target_title: String,
    pub(crate) progress: u32,
    #[serde(default)]
    pub(crate) total_episodes: Option<u32>,
    /// Absent in legacy documents; derived from live state at apply time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) status: Option<ListStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) repeat: Option<u32>,
    #[serde(alias = "update_type", default = "default_update_kind")]
    pub(crate) update_kind: UpdateKind,
    #[serde(alias = "cr_source", default)]
    pub(crate) provenance: Provenance,
    #[serde(default)]
    pub(crate) provisional: bool,
    #[serde(default)]
    pub(crate) timestamp: String,
}

fn default_update_kind() -> UpdateKind {
    UpdateKind::Normal
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Changeset {
    /// 0 for documents written before versioning.
    #[serde(default)]
    pub(crate) schema_version: u64,
    #[serde(default)]
    pub(crate) created_at: String,
    #[serde(alias = "session_timestamp", default)]
    pub(crate) session_id: String,
    #[serde(default)]
    pub(crate) total_changes: usize,
    pub(crate) changes: Vec<ChangeRecord>,
}

impl Changeset {
    pub(crate) fn is_legacy(&self) -> bool {
        self.schema_version == 0
    }

    pub(crate) fn from_json(text: &str) -> Result<Self, ChangesetError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(object) = value.as_object() else {
            return Err(ChangesetError::Invalid(
                "top level must be an object".to_string(),
            ));
        };

        if let Some(version) = object.get("schema_version") {
            let found = version.as_u64().ok_or_else(|| {
                ChangesetError::Invalid(format!("schema_version must be an integer, got {version}"))
            })?;
            if found > CHANGESET_SCHEMA_VERSION {
                return Err(ChangesetError::SchemaMismatch {
                    found,
                    supported: CHANGESET_SCHEMA_VERSION,
                });
            }
        }
        match object.get("changes") {
            Some(Value::Array(_)) => {}
            Some(_) => {
                return Err(ChangesetError::Invalid(
                    "'changes' must be a list".to_string(),
                ));
            }
            None => {
                return Err(ChangesetError::Invalid(
                    "missing 'changes' field".to_string(),
                ));
            }
        }

        let changeset: Changeset = serde_json::from_value(value)?;
        if changeset.total_changes != 0 && changeset.total_changes != changeset.changes.len() {
            warn!(
                declared = changeset.total_changes,
                found = changeset.changes.len(),
                "changeset total_changes does not match its change list"
            );
        }
        Ok(changeset)
    }

    pub(crate) fn load(path: &Path) -> Result<Self, ChangesetError> {
        let text = fs::read_to_string(path).map_err(|source| ChangesetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let changeset = Self::from_json(&text)?;
        info!(
            path = %path.display(),
            changes = changeset.changes.len(),
            legacy = changeset.is_legacy(),
            "loaded changeset"
        );
        Ok(changeset)
    }

    pub(crate) fn save(&self, path: &Path) -> Result<(), ChangesetError> {
        let io_error = |source| ChangesetError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(io_error)?;
        info!(path = %path.display(), changes = self.changes.len(), "changeset saved");
        Ok(())
    }
}

/// Collects accepted decisions for one run. Never touches the remote list.
#[derive(Debug)]
pub(crate) struct ChangesetRecorder {
    session_id: String,
    changes: Vec<ChangeRecord>,
}

impl ChangesetRecorder {
    pub(crate) fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            changes: Vec::new(),
        }
    }

    /// Returns false for no-op decisions, which are not recorded.
    pub(crate) fn record(&mut self, decision: &ReconciliationDecision) -> bool {
        if decision.is_no_op() {
            return false;
        }
        self.changes.push(ChangeRecord {
            target_id: decision.target_id,
            target_title: decision.target_title.clone(),
            progress: decision.new_progress,
            total_episodes: decision.total_episodes,
            status: Some(decision.new_status),
            repeat: Some(decision.new_repeat),
            update_kind: decision.update_kind,
            provenance: Provenance {
                series: decision.source.series_title.clone(),
                season: decision.source.season_hint,
                episode: decision.source.episode_number,
                is_movie: decision.source.is_movie,
            },
            provisional: decision.provisional,
            timestamp: Utc::now().to_rfc3339(),
        });
        true
    }

    pub(crate) fn finish(self) -> Changeset {
        Changeset {
            schema_version: CHANGESET_SCHEMA_VERSION,
            created_at: Utc::now().to_rfc3339(),
            session_id: self.session_id,
            total_changes: self.changes.len(),
            changes: self.changes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ApplyReport {
    pub(crate) applied: usize,
    pub(crate) skipped: usize,
    pub(crate) failed: usize,
    pub(crate) failures: Vec<(u64, String)>,
}

impl ApplyReport {
    fn fail(&mut self, change: &ChangeRecord, err: &CollaboratorError) {
        warn!(
            target_id = change.target_id,
            title = %change.target_title,
            error = %err,
            "change could not be applied"
        );
        self.failed += 1;
        self.failures.push((change.target_id, err.to_string()));
    }
}

/// Replays a changeset against the live list in its original order.
///
/// Each change is checked against a fresh lookup first, so a change that is
/// already reflected remotely is skipped. Failures are tallied per entry.
pub(crate) fn apply_changeset(
    changeset: &Changeset,
    remote: &mut dyn RemoteLookup,
    sink: &mut dyn MutationSink,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    for change in &changeset.changes {
        let live = match with_attempts(|| remote.lookup(change.target_id)) {
            Ok(live) => live,
            Err(err) => {
                report.fail(change, &err);
                continue;
            }
        };

        let Some(request) = plan_mutation(change, live.as_ref()) else {
            debug!(
                target_id = change.target_id,
                kind = change.update_kind.as_str(),
                "already applied, skipping"
            );
            report.skipped += 1;
            continue;
        };

        match with_attempts(|| sink.apply(&request)) {
            Ok(()) => {
                info!(
                    target_id = request.target_id,
                    title = %request.title,
                    progress = request.progress,
                    status = request.status.as_str(),
                    repeat = request.repeat,
                    "applied change"
                );
                report.applied += 1;
            }
            Err(err) => report.fail(change, &err),
        }
    }

    report
}

fn with_attempts<T>(
    mut call: impl FnMut() -> Result<T, CollaboratorError>,
) -> Result<T, CollaboratorError> {
    let mut attempt = 1;
    loop {
        match call() {
            Err(err) if err.is_retryable() && attempt < APPLY_ATTEMPTS => {
                debug!(attempt, error = %err, "retrying");
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// The mutation that brings `live` up to `change`, or `None` when the live
/// entry already reflects it.
fn plan_mutation(change: &ChangeRecord, live: Option<&RemoteEntry>) -> Option<MutationRequest> {
    let total = change
        .total_episodes
        .or_else(|| live.and_then(|entry| entry.total_episodes));
    let request = |progress: u32, status: ListStatus, repeat: u32| MutationRequest {
        target_id: change.target_id,
        progress,
        status,
        repeat,
        title: change.target_title.clone(),
        total_episodes: total,
    };
    let reaches_total = total.is_some_and(|total| total > 0 && change.progress >= total);

    if change.update_kind == UpdateKind::NoOp {
        return None;
    }

    let Some(live) = live else {
        let status = change.status.unwrap_or(if reaches_total {
            ListStatus::Completed
        } else {
            ListStatus::Current
        });
        let repeat = change.repeat.unwrap_or(0);
        return Some(request(change.progress, status, repeat));
    };

    if change.update_kind == UpdateKind::Rewatch {
        let pending = match change.repeat {
            Some(target) => live.repeat < target,
            None => live.status == ListStatus::Completed,
        };
        if !pending {
            return None;
        }
        let repeat = change.repeat.unwrap_or(live.repeat + 1);
        let status = change.status.unwrap_or(ListStatus::Current);
        return Some(request(change.progress, status, repeat));
    }

    if change.progress <= live.progress {
        return None;
    }
    let status = match change.status {
        _ if live.status == ListStatus::Completed => ListStatus::Completed,
        Some(status) => status,
        None if reaches_total => ListStatus::Completed,
        None if live.status == ListStatus::Repeating => ListStatus::Repeating,
        None => ListStatus::Current,
    };
    Some(request(change.progress, status, live.repeat))
}
