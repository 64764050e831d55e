use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::ledger::DedupLedger;
use super::mapper::{MappedEpisode, MappingError, clamp_to_season, map_by_season, map_episode};
use super::matcher::{franchise_members, match_movie, match_series, movie_queries, series_queries};
use super::normalize::{group_events, normalize_page};
use super::pagination::{PageOutcome, PaginationController, StopReason};
use super::reconcile::decide;
use super::season::build_structure;
use super::{
    CatalogCandidate, CatalogSource, CollaboratorError, HistoryPage, HistorySource,
    ReconciliationDecision, RemoteLookup, ResolvedEvent, SyncConfig, UpdateKind, WatchEvent,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct RunStats {
    pub(crate) pages: usize,
    pub(crate) events: usize,
    pub(crate) skipped_entries: usize,
    pub(crate) groups: usize,
    pub(crate) movies: usize,
    pub(crate) direct_matches: usize,
    pub(crate) conversions: usize,
    pub(crate) provisional: usize,
    /// Groups whose season structure was cut short after an open-ended season.
    pub(crate) truncated_structures: usize,
    pub(crate) unmatched: usize,
    pub(crate) skipped_series: usize,
    pub(crate) new_series: usize,
    pub(crate) normal: usize,
    pub(crate) rewatches: usize,
    pub(crate) no_ops: usize,
    pub(crate) failures: usize,
}

impl RunStats {
    fn count(&mut self, kind: UpdateKind) {
        match kind {
            UpdateKind::NewSeries => self.new_series += 1,
            UpdateKind::Normal => self.normal += 1,
            UpdateKind::Rewatch => self.rewatches += 1,
            UpdateKind::NoOp => self.no_ops += 1,
        }
    }

    pub(crate) fn updates(&self) -> usize {
        self.new_series + self.normal + self.rewatches
    }
}

/// Why one grouped series/season did not produce a decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Diagnostic {
    pub(crate) series: String,
    pub(crate) season: String,
    pub(crate) episode: f64,
    pub(crate) reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) best_score: Option<f64>,
}

impl Diagnostic {
    fn new(event: &WatchEvent, reason: impl Into<String>, best_score: Option<f64>) -> Self {
        Self {
            series: event.series_title.clone(),
            season: event.season_label(),
            episode: event.episode_number,
            reason: reason.into(),
            best_score,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RunReport {
    pub(crate) stats: RunStats,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) stop_reason: StopReason,
    pub(crate) reconciled_targets: usize,
}

/// Drives normalize, match, map and reconcile over one history scan.
///
/// Pages are pulled one at a time and fully reconciled before the next is
/// requested; the ledger only reflects decisions already handed to the
/// caller, so stopping between pages is always safe.
pub(crate) struct SyncEngine<'a> {
    config: SyncConfig,
    catalog: &'a mut dyn CatalogSource,
    remote: &'a mut dyn RemoteLookup,
    ledger: DedupLedger,
    search_cache: HashMap<String, Vec<CatalogCandidate>>,
    stats: RunStats,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> SyncEngine<'a> {
    pub(crate) fn new(
        config: SyncConfig,
        catalog: &'a mut dyn CatalogSource,
        remote: &'a mut dyn RemoteLookup,
    ) -> Self {
        Self {
            config,
            catalog,
            remote,
            ledger: DedupLedger::new(),
            search_cache: HashMap::new(),
            stats: RunStats::default(),
            diagnostics: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    pub(crate) fn run(
        &mut self,
        history: &mut dyn HistorySource,
        on_accepted: &mut dyn FnMut(&ReconciliationDecision),
    ) -> RunReport {
        let mut controller = PaginationController::new(&self.config);
        if controller.max_pages() == 0 {
            controller.finish(StopReason::MaxPages);
        }

        let mut page_number = 0;
        while controller.stop_reason().is_none() {
            page_number += 1;
            let page = match history.fetch_page(page_number) {
                Ok(Some(page)) => page,
                Ok(None) => {
                    controller.finish(StopReason::Exhausted);
                    break;
                }
                Err(err) => {
                    warn!(page = page_number, error = %err, "history page fetch failed");
                    self.stats.failures += 1;
                    controller.finish(StopReason::SourceFailed);
                    break;
                }
            };

            self.stats.pages += 1;
            let outcome = self.process_page(&page, on_accepted);
            info!(
                page = page_number,
                events = outcome.events,
                grouped = outcome.grouped,
                no_ops = outcome.no_ops,
                "page processed"
            );
            if !controller.should_continue(&outcome, page_number) {
                break;
            }
        }

        let stop_reason = controller.stop_reason().unwrap_or(StopReason::Exhausted);
        info!(
            pages = self.stats.pages,
            updates = self.stats.updates(),
            reason = stop_reason.describe(),
            "history scan finished"
        );
        RunReport {
            stats: self.stats.clone(),
            diagnostics: std::mem::take(&mut self.diagnostics),
            stop_reason,
            reconciled_targets: self.ledger.len(),
        }
    }

    /// Reconciles one page and hands every accepted decision to `on_accepted`.
    pub(crate) fn process_page(
        &mut self,
        page: &HistoryPage,
        on_accepted: &mut dyn FnMut(&ReconciliationDecision),
    ) -> PageOutcome {
        let normalized = normalize_page(&page.items, page.fetched_at);
        self.stats.events += normalized.events.len();
        self.stats.skipped_entries += normalized.skipped.len();

        let events = normalized.events.len();
        let groups = group_events(normalized.events);
        self.stats.groups += groups.len();
        let mut outcome = PageOutcome {
            events,
            grouped: groups.len(),
            no_ops: 0,
        };

        let resolved: Vec<ResolvedEvent> = groups
            .iter()
            .filter_map(|event| self.resolve(event))
            .collect();
        let before = resolved.len();
        let resolved = collapse_by_target(resolved);
        outcome.no_ops += before - resolved.len();

        let mut pending = resolved;
        let mut passes_left = self.config.remote_retry_passes;
        loop {
            let mut deferred = Vec::new();
            for candidate in pending {
                match self.reconcile(&candidate, on_accepted) {
                    Ok(true) => outcome.no_ops += 1,
                    Ok(false) => {}
                    Err(err) if err.is_retryable() => deferred.push((candidate, err)),
                    Err(err) => self.lookup_failed(&candidate, &err),
                }
            }
            if deferred.is_empty() {
                break;
            }
            if passes_left == 0 {
                for (candidate, err) in &deferred {
                    self.lookup_failed(candidate, err);
                }
                break;
            }
            passes_left -= 1;
            debug!(deferred = deferred.len(), "retrying deferred remote lookups");
            pending = deferred.into_iter().map(|(candidate, _)| candidate).collect();
        }

        outcome
    }

    /// Returns `Ok(true)` for a no-op.
    fn reconcile(
        &mut self,
        candidate: &ResolvedEvent,
        on_accepted: &mut dyn FnMut(&ReconciliationDecision),
    ) -> Result<bool, CollaboratorError> {
        let remote = self.remote.lookup(candidate.target_id)?;
        let decision = decide(remote.as_ref(), candidate, &self.ledger);
        self.ledger
            .observe(candidate.target_id, candidate.absolute_episode);
        self.stats.count(decision.update_kind);
        if decision.is_no_op() {
            return Ok(true);
        }
        self.ledger.accept(&decision);
        on_accepted(&decision);
        Ok(false)
    }

    fn lookup_failed(&mut self, candidate: &ResolvedEvent, err: &CollaboratorError) {
        warn!(
            target_id = candidate.target_id,
            series = %candidate.source.series_title,
            error = %err,
            "skipping series after remote lookup failure"
        );
        self.stats.failures += 1;
        self.diagnostics.push(Diagnostic::new(
            &candidate.source,
            format!("remote lookup failed: {err}"),
            None,
        ));
    }

    fn resolve(&mut self, event: &WatchEvent) -> Option<ResolvedEvent> {
        if event.is_movie {
            return self.resolve_movie(event);
        }

        let (candidates, search_failed) =
            self.search(series_queries(&event.series_title, event.season_hint));
        let matched = match_series(&event.series_title, event.season_hint, &candidates);
        let Some(best) = matched.candidate else {
            let reason = if search_failed {
                "catalog search failed"
            } else {
                "no confident title match"
            };
            return self.unmatched(event, reason, matched.score);
        };
        debug!(
            series = %event.series_title,
            target_id = best.target_id,
            score = matched.score,
            "matched series"
        );

        let members = franchise_members(&event.series_title, &best, &candidates);
        let structure = match build_structure(&members) {
            Ok(structure) => structure,
            Err(err) => {
                warn!(series = %event.series_title, error = %err, "skipping series");
                self.stats.skipped_series += 1;
                self.diagnostics
                    .push(Diagnostic::new(event, err.to_string(), Some(matched.score)));
                return None;
            }
        };
        if structure.truncated() > 0 {
            self.stats.truncated_structures += 1;
        }

        let season = event.season_hint.unwrap_or(1);
        let episode = event.whole_episode();
        let mapped = if let Some(direct) = map_by_season(season, episode, &structure) {
            self.stats.direct_matches += 1;
            direct
        } else {
            match map_episode(episode, &structure) {
                Ok(mapped) => {
                    self.stats.conversions += 1;
                    debug!(
                        series = %event.series_title,
                        absolute = episode,
                        target_id = mapped.target_id,
                        episode = mapped.episode,
                        "converted absolute episode"
                    );
                    mapped
                }
                Err(err @ MappingError::OutOfRange { .. }) => {
                    let clamped = clamp_to_season(season, &structure);
                    warn!(
                        series = %event.series_title,
                        error = %err,
                        target_id = clamped.target_id,
                        clamped = clamped.episode,
                        "episode past known seasons, clamping"
                    );
                    clamped
                }
                Err(err) => {
                    self.stats.skipped_series += 1;
                    self.diagnostics
                        .push(Diagnostic::new(event, err.to_string(), Some(matched.score)));
                    return None;
                }
            }
        };

        let entry = structure
            .entries()
            .iter()
            .find(|entry| entry.target_id == mapped.target_id)?;
        Some(self.resolved(
            event,
            mapped,
            entry.title.clone(),
            entry.episode_count,
        ))
    }

    fn resolve_movie(&mut self, event: &WatchEvent) -> Option<ResolvedEvent> {
        self.stats.movies += 1;
        let (candidates, search_failed) = self.search(movie_queries(event));
        let matched = match_movie(event, &candidates);
        let Some(best) = matched.candidate else {
            let reason = if search_failed {
                "catalog search failed"
            } else {
                "no confident movie match"
            };
            return self.unmatched(event, reason, matched.score);
        };
        let mapped = MappedEpisode {
            target_id: best.target_id,
            episode: 1,
            absolute: 1,
            provisional: false,
        };
        Some(self.resolved(
            event,
            mapped,
            best.primary_title().to_string(),
            best.episode_count.or(Some(1)),
        ))
    }

    fn resolved(
        &mut self,
        event: &WatchEvent,
        mapped: MappedEpisode,
        target_title: String,
        total_episodes: Option<u32>,
    ) -> ResolvedEvent {
        if mapped.provisional {
            self.stats.provisional += 1;
        }
        ResolvedEvent {
            target_id: mapped.target_id,
            target_title,
            progress: mapped.episode,
            absolute_episode: mapped.absolute,
            total_episodes,
            provisional: mapped.provisional,
            source: event.clone(),
        }
    }

    fn unmatched(&mut self, event: &WatchEvent, reason: &str, score: f64) -> Option<ResolvedEvent> {
        info!(
            series = %event.series_title,
            season = %event.season_label(),
            best_score = score,
            "{reason}"
        );
        self.stats.unmatched += 1;
        self.diagnostics
            .push(Diagnostic::new(event, reason, Some(score)));
        None
    }

    /// Runs each query once per run and merges results, first query first.
    fn search(&mut self, queries: Vec<String>) -> (Vec<CatalogCandidate>, bool) {
        let mut merged = Vec::new();
        let mut seen = HashSet::new();
        let mut failures = 0;

        for query in &queries {
            let key = query.to_lowercase();
            if !self.search_cache.contains_key(&key) {
                match self.catalog.search(query) {
                    Ok(results) => {
                        debug!(query = %query, results = results.len(), "catalog search");
                        self.search_cache.insert(key.clone(), results);
                    }
                    Err(err) => {
                        warn!(query = %query, error = %err, "catalog search failed");
                        failures += 1;
                        continue;
                    }
                }
            }
            if let Some(results) = self.search_cache.get(&key) {
                merged.extend(
                    results
                        .iter()
                        .filter(|candidate| seen.insert(candidate.target_id))
                        .cloned(),
                );
            }
        }

        (merged, !queries.is_empty() && failures == queries.len())
    }
}

/// Keeps the highest absolute episode per target, in first-seen order.
pub(crate) fn collapse_by_target(resolved: Vec<ResolvedEvent>) -> Vec<ResolvedEvent> {
    let mut order: Vec<u64> = Vec::new();
    let mut best: HashMap<u64, ResolvedEvent> = HashMap::new();
    for event in resolved {
        match best.get(&event.target_id) {
            Some(current) if current.absolute_episode >= event.absolute_episode => {}
            Some(_) => {
                best.insert(event.target_id, event);
            }
            None => {
                order.push(event.target_id);
                best.insert(event.target_id, event);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|target_id| best.remove(&target_id))
        .collect()
}
