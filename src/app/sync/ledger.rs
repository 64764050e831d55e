use std::collections::{HashMap, HashSet};

use super::{ReconciliationDecision, UpdateKind};

/// Run-scoped memory of what has already been reconciled per target entry.
///
/// `reconciled` only moves on accepted decisions and never decreases.
/// `observed` tracks the highest absolute episode seen for a target on any
/// page so far, no-ops included, and guards against stale rewatch signals.
/// `restarted` marks targets whose rewatch was accepted; older pages cannot
/// move those again in the same run.
#[derive(Debug, Default, Clone)]
pub(crate) struct DedupLedger {
    reconciled: HashMap<u64, u32>,
    observed: HashMap<u64, u32>,
    restarted: HashSet<u64>,
}

impl DedupLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reconciled(&self, target_id: u64) -> Option<u32> {
        self.reconciled.get(&target_id).copied()
    }

    pub(crate) fn is_superseded(&self, target_id: u64, absolute: u32) -> bool {
        self.restarted.contains(&target_id)
            || self
                .reconciled(target_id)
                .is_some_and(|recorded| absolute <= recorded)
    }

    pub(crate) fn allows_rewatch(&self, target_id: u64, absolute: u32) -> bool {
        self.observed
            .get(&target_id)
            .is_none_or(|seen| *seen <= absolute)
    }

    pub(crate) fn observe(&mut self, target_id: u64, absolute: u32) {
        let seen = self.observed.entry(target_id).or_insert(absolute);
        *seen = (*seen).max(absolute);
    }

    /// Records an accepted decision. No-ops leave the ledger untouched.
    pub(crate) fn accept(&mut self, decision: &ReconciliationDecision) {
        if decision.is_no_op() {
            return;
        }
        let recorded = self
            .reconciled
            .entry(decision.target_id)
            .or_insert(decision.absolute_episode);
        *recorded = (*recorded).max(decision.absolute_episode);
        self.observe(decision.target_id, decision.absolute_episode);
        if decision.update_kind == UpdateKind::Rewatch {
            self.restarted.insert(decision.target_id);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.reconciled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::sync::{ListStatus, WatchEvent};
    use chrono::Utc;

    fn decision(target_id: u64, absolute: u32, kind: UpdateKind) -> ReconciliationDecision {
        ReconciliationDecision {
            target_id,
            target_title: "Show".to_string(),
            new_progress: absolute,
            new_status: ListStatus::Current,
            new_repeat: 0,
            total_episodes: None,
            update_kind: kind,
            absolute_episode: absolute,
            provisional: false,
            hold: None,
            anomaly: None,
            source: WatchEvent {
                series_title: "Show".to_string(),
                season_hint: Some(1),
                episode_number: f64::from(absolute),
                is_movie: false,
                movie_title: None,
                watched_at: Utc::now(),
            },
        }
    }

    #[test]
    fn recorded_value_never_decreases() {
        let mut ledger = DedupLedger::new();
        ledger.accept(&decision(7, 10, UpdateKind::Normal));
        ledger.accept(&decision(7, 4, UpdateKind::Normal));
        assert_eq!(ledger.reconciled(7), Some(10));
        assert!(ledger.is_superseded(7, 8));
        assert!(ledger.is_superseded(7, 10));
        assert!(!ledger.is_superseded(7, 11));
    }

    #[test]
    fn no_op_decisions_are_not_recorded() {
        let mut ledger = DedupLedger::new();
        ledger.accept(&decision(3, 5, UpdateKind::NoOp));
        assert_eq!(ledger.reconciled(3), None);
        assert_eq!(ledger.len(), 0);
    }

    #[test]
    fn higher_observed_episode_blocks_rewatch() {
        let mut ledger = DedupLedger::new();
        assert!(ledger.allows_rewatch(9, 2));
        ledger.observe(9, 20);
        ledger.observe(9, 5);
        assert!(!ledger.allows_rewatch(9, 2));
        assert!(ledger.allows_rewatch(9, 20));
    }

    #[test]
    fn accepted_rewatch_freezes_the_target_for_the_run() {
        let mut ledger = DedupLedger::new();
        ledger.accept(&decision(4, 2, UpdateKind::Rewatch));
        assert_eq!(ledger.reconciled(4), Some(2));
        assert!(ledger.is_superseded(4, 28));
        assert!(ledger.is_superseded(4, 1));
        assert!(!ledger.is_superseded(5, 28));
    }
}
