use std::ops::RangeInclusive;

use tracing::{debug, info, warn};

use super::ledger::DedupLedger;
use super::{
    HoldReason, ListStatus, ReconciliationDecision, RemoteEntry, ResolvedEvent, UpdateKind,
};

/// Per-season episodes that read as "started over" on a completed entry.
pub(crate) const REWATCH_WINDOW: RangeInclusive<u32> = 1..=3;

/// Remote state as the reconciler sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Absent,
    InProgress(ListStatus),
    Completed,
}

impl EntryState {
    fn of(remote: Option<&RemoteEntry>) -> Self {
        match remote.map(|entry| entry.status) {
            None => Self::Absent,
            Some(ListStatus::Completed) => Self::Completed,
            Some(status) => Self::InProgress(status),
        }
    }
}

/// Every legal move from an [`EntryState`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum Transition {
    Create { progress: u32, completes: bool },
    Advance { progress: u32, status: ListStatus },
    Restart { progress: u32 },
    Hold(HoldReason),
}

#[derive(Debug, Clone, Copy)]
struct Signal {
    candidate: u32,
    absolute: u32,
    total: Option<u32>,
    remote_progress: u32,
    superseded: bool,
    rewatch_allowed: bool,
}

impl Signal {
    fn clamped(&self) -> u32 {
        match self.total {
            Some(total) if total > 0 => self.candidate.min(total),
            _ => self.candidate,
        }
    }

    fn beyond_total(&self) -> bool {
        self.total
            .is_some_and(|total| total > 0 && self.candidate > total)
    }

    fn completes(&self, progress: u32) -> bool {
        self.total.is_some_and(|total| total > 0 && progress >= total)
    }
}

fn transition(state: EntryState, signal: &Signal) -> Transition {
    if signal.superseded {
        return Transition::Hold(HoldReason::AlreadyReconciled);
    }

    match state {
        EntryState::Absent => {
            let progress = signal.clamped();
            Transition::Create {
                progress,
                completes: signal.completes(progress),
            }
        }
        EntryState::Completed => {
            let restart = REWATCH_WINDOW.contains(&signal.candidate)
                && signal.candidate < signal.remote_progress;
            if restart {
                if signal.rewatch_allowed {
                    Transition::Restart {
                        progress: signal.candidate,
                    }
                } else {
                    Transition::Hold(HoldReason::RewatchSuperseded)
                }
            } else if signal.clamped() > signal.remote_progress {
                Transition::Advance {
                    progress: signal.clamped(),
                    status: ListStatus::Completed,
                }
            } else if signal.beyond_total() {
                Transition::Hold(HoldReason::CompletedBeyondTotal)
            } else {
                Transition::Hold(HoldReason::NotAhead)
            }
        }
        EntryState::InProgress(current) => {
            let progress = signal.clamped();
            if progress <= signal.remote_progress {
                return Transition::Hold(HoldReason::NotAhead);
            }
            let status = if signal.completes(progress) {
                ListStatus::Completed
            } else if current == ListStatus::Repeating {
                ListStatus::Repeating
            } else {
                ListStatus::Current
            };
            Transition::Advance { progress, status }
        }
    }
}

/// Decides what a resolved watch event means for the remote list entry.
///
/// The ledger guard runs first: an absolute episode at or below what this run
/// already reconciled for the target is always a no-op, as is any event for a
/// target this run already restarted.
pub(crate) fn decide(
    remote: Option<&RemoteEntry>,
    candidate: &ResolvedEvent,
    ledger: &DedupLedger,
) -> ReconciliationDecision {
    let state = EntryState::of(remote);
    let signal = Signal {
        candidate: candidate.progress,
        absolute: candidate.absolute_episode,
        total: candidate
            .total_episodes
            .or_else(|| remote.and_then(|entry| entry.total_episodes)),
        remote_progress: remote.map_or(0, |entry| entry.progress),
        superseded: ledger.is_superseded(candidate.target_id, candidate.absolute_episode),
        rewatch_allowed: ledger.allows_rewatch(candidate.target_id, candidate.absolute_episode),
    };
    let transition = transition(state, &signal);

    let current_repeat = remote.map_or(0, |entry| entry.repeat);
    let mut decision = ReconciliationDecision {
        target_id: candidate.target_id,
        target_title: candidate.target_title.clone(),
        new_progress: signal.remote_progress,
        new_status: remote.map_or(ListStatus::Current, |entry| entry.status),
        new_repeat: current_repeat,
        total_episodes: signal.total,
        update_kind: UpdateKind::NoOp,
        absolute_episode: signal.absolute,
        provisional: candidate.provisional,
        hold: None,
        anomaly: None,
        source: candidate.source.clone(),
    };

    if signal.beyond_total() {
        decision.anomaly = Some(format!(
            "episode {} exceeds the {} episodes known for this entry",
            signal.candidate,
            signal.total.unwrap_or_default()
        ));
    }

    match transition {
        Transition::Create { progress, completes } => {
            decision.update_kind = UpdateKind::NewSeries;
            decision.new_progress = progress;
            decision.new_status = if completes {
                ListStatus::Completed
            } else {
                ListStatus::Current
            };
            decision.new_repeat = 0;
        }
        Transition::Advance { progress, status } => {
            decision.update_kind = UpdateKind::Normal;
            decision.new_progress = progress;
            decision.new_status = status;
            if state == EntryState::Completed && decision.anomaly.is_none() {
                decision.anomaly = Some(format!(
                    "completed entry recorded at {} behind watched episode {}",
                    signal.remote_progress, progress
                ));
            }
        }
        Transition::Restart { progress } => {
            decision.update_kind = UpdateKind::Rewatch;
            decision.new_progress = progress;
            decision.new_status = ListStatus::Current;
            decision.new_repeat = current_repeat.saturating_add(1);
        }
        Transition::Hold(reason) => {
            decision.hold = Some(reason);
        }
    }

    if let Some(anomaly) = decision.anomaly.as_deref() {
        warn!(
            target_id = decision.target_id,
            title = %decision.target_title,
            anomaly,
            "inconsistent list data"
        );
    }
    match decision.hold {
        Some(reason) => debug!(
            target_id = decision.target_id,
            episode = signal.candidate,
            remote_progress = signal.remote_progress,
            ?reason,
            "no update needed"
        ),
        None => info!(
            target_id = decision.target_id,
            title = %decision.target_title,
            kind = decision.update_kind.as_str(),
            progress = decision.new_progress,
            status = decision.new_status.as_str(),
            repeat = decision.new_repeat,
            "reconciled"
        ),
    }

    decision
}
