use serde::Serialize;
use tracing::{debug, info};

use super::SyncConfig;

pub(crate) const EARLY_STOP_THRESHOLD: f64 = 0.7;
pub(crate) const EARLY_STOP_STREAK: usize = 2;

/// What one fully reconciled page looked like.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PageOutcome {
    pub(crate) events: usize,
    /// Groups that reached matching, unmatched and skipped ones included.
    pub(crate) grouped: usize,
    pub(crate) no_ops: usize,
}

impl PageOutcome {
    pub(crate) fn no_op_fraction(&self) -> f64 {
        if self.grouped == 0 {
            return 0.0;
        }
        self.no_ops as f64 / self.grouped as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum StopReason {
    MaxPages,
    EmptyPage,
    EarlyStop,
    Exhausted,
    SourceFailed,
}

impl StopReason {
    pub(crate) fn describe(self) -> &'static str {
        match self {
            Self::MaxPages => "page limit reached",
            Self::EmptyPage => "page had no watch events",
            Self::EarlyStop => "history already in sync",
            Self::Exhausted => "no more history",
            Self::SourceFailed => "history source failed",
        }
    }
}

#[derive(Debug)]
pub(crate) struct PaginationController {
    max_pages: usize,
    early_stop: bool,
    streak: usize,
    stopped: Option<StopReason>,
}

impl PaginationController {
    pub(crate) fn new(config: &SyncConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            early_stop: config.early_stop,
            streak: 0,
            stopped: None,
        }
    }

    /// Whether to request another page after `pages_fetched` pages.
    pub(crate) fn should_continue(&mut self, outcome: &PageOutcome, pages_fetched: usize) -> bool {
        if self.stopped.is_some() {
            return false;
        }

        if outcome.events == 0 {
            return self.stop(StopReason::EmptyPage);
        }

        let fraction = outcome.no_op_fraction();
        if outcome.grouped > 0 && fraction >= EARLY_STOP_THRESHOLD {
            self.streak += 1;
        } else {
            self.streak = 0;
        }
        debug!(
            page = pages_fetched,
            no_op_fraction = fraction,
            streak = self.streak,
            "page reconciled"
        );

        if self.early_stop && self.streak >= EARLY_STOP_STREAK {
            info!(
                pages = pages_fetched,
                "stopping early: {} consecutive pages already in sync", self.streak
            );
            return self.stop(StopReason::EarlyStop);
        }
        if pages_fetched >= self.max_pages {
            return self.stop(StopReason::MaxPages);
        }
        true
    }

    /// Ends the scan for a reason outside the page heuristics.
    pub(crate) fn finish(&mut self, reason: StopReason) {
        self.stopped.get_or_insert(reason);
    }

    pub(crate) fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    pub(crate) fn max_pages(&self) -> usize {
        self.max_pages
    }

    fn stop(&mut self, reason: StopReason) -> bool {
        self.stopped = Some(reason);
        false
    }
}
