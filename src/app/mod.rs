mod anilist;
mod display;
mod sources;
pub(crate) mod sync;


use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{Cli, Command, RunArgs};
use crate::db::{Database, ImportedEntry};
use crate::paths::{changeset_file_path, database_file_path, diagnostics_file_path};

use self::anilist::AniListCatalog;
use self::display::{
    format_decision_line, format_progress_text, format_stats_summary, format_status_text,
    format_timestamp_display, truncate,
};
use self::sources::{FileHistorySource, OfflineCatalog};
use self::sync::{
    CatalogCandidate, CatalogSource, Changeset, ChangesetRecorder, Diagnostic, MutationSink,
    ReconciliationDecision, RunReport, RunStats, StopReason, SyncConfig, SyncEngine,
    apply_changeset, detect_season, match_series, series_queries, title_similarity,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Plan,
    Sync,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Plan(args) => run_reconcile(&open_db()?, &args, RunMode::Plan),
        Command::Sync(args) => run_reconcile(&open_db()?, &args, RunMode::Sync),
        Command::Apply { changeset } => run_apply(&open_db()?, &changeset),
        Command::List => run_list(&open_db()?),
        Command::Import { file } => run_import(&open_db()?, &file),
        Command::Search {
            title,
            season,
            catalog,
        } => run_search(&title, season, catalog.as_deref()),
    }
}

fn run_reconcile(db: &Database, args: &RunArgs, mode: RunMode) -> Result<()> {
    let mut history = FileHistorySource::load(&args.history)?;
    println!(
        "Loaded {} history page(s) from {}",
        history.page_count(),
        args.history.display()
    );
    let mut catalog = open_catalog(args.catalog.as_deref())?;
    let config = SyncConfig {
        max_pages: args.max_pages,
        early_stop: !args.no_early_stop,
        ..SyncConfig::default()
    };
    let session_id = session_id();
    let mut recorder = ChangesetRecorder::new(session_id.clone());
    let mut lookup = db;
    let mut sink = db;
    let mut apply_failures = 0;

    let report = {
        let mut engine = SyncEngine::new(config, &mut *catalog, &mut lookup);
        let mut on_accepted = |decision: &ReconciliationDecision| {
            recorder.record(decision);
            if mode == RunMode::Sync
                && let Err(err) = sink.apply(&decision.mutation())
            {
                warn!(target_id = decision.target_id, error = %err, "list update failed");
                apply_failures += 1;
            }
            println!("  {}", format_decision_line(decision));
        };
        engine.run(&mut history, &mut on_accepted)
    };

    let changeset = recorder.finish();
    if changeset.changes.is_empty() {
        println!("No changes to record.");
    } else {
        let out = match &args.out {
            Some(path) => path.clone(),
            None => changeset_file_path(&session_id)?,
        };
        changeset
            .save(&out)
            .with_context(|| format!("failed to write changeset {}", out.display()))?;
        match mode {
            RunMode::Plan => println!(
                "Changeset with {} change(s) written to {}. Run `anisync apply {}` to update the list.",
                changeset.total_changes,
                out.display(),
                out.display()
            ),
            RunMode::Sync => println!(
                "Applied {} change(s); changeset kept at {}",
                changeset.total_changes.saturating_sub(apply_failures),
                out.display()
            ),
        }
    }

    let diagnostics_path = match &args.diagnostics {
        Some(path) => Some(path.clone()),
        None if !report.diagnostics.is_empty() => Some(diagnostics_file_path(&session_id)?),
        None => None,
    };
    if let Some(path) = diagnostics_path {
        write_diagnostics(&path, &session_id, &report)?;
        println!("Diagnostics written to {}", path.display());
    }

    print_report(&report);
    if apply_failures > 0 {
        println!("{apply_failures} list update(s) failed; see the log for details.");
    }
    Ok(())
}

fn open_catalog(path: Option<&Path>) -> Result<Box<dyn CatalogSource>> {
    let catalog: Box<dyn CatalogSource> = match path {
        Some(path) => {
            let catalog = OfflineCatalog::load(path)?;
            info!(entries = catalog.len(), path = %path.display(), "using offline catalog");
            Box::new(catalog)
        }
        None => Box::new(AniListCatalog::from_env()),
    };
    Ok(catalog)
}

fn print_report(report: &RunReport) {
    println!();
    println!("Stopped: {}", report.stop_reason.describe());
    for line in format_stats_summary(&report.stats) {
        println!("{line}");
    }
    if report.diagnostics.is_empty() {
        return;
    }
    println!();
    println!("{:<40} {:<8} {:<8} REASON", "SERIES", "SEASON", "EPISODE");
    for diagnostic in &report.diagnostics {
        println!(
            "{:<40} {:<8} {:<8} {}",
            truncate(&diagnostic.series, 40),
            diagnostic.season,
            diagnostic.episode,
            diagnostic.reason
        );
    }
}

#[derive(Serialize)]
struct DiagnosticsFile<'a> {
    session_id: &'a str,
    stop_reason: StopReason,
    stats: &'a RunStats,
    diagnostics: &'a [Diagnostic],
}

fn write_diagnostics(path: &Path, session_id: &str, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let file = DiagnosticsFile {
        session_id,
        stop_reason: report.stop_reason,
        stats: &report.stats,
        diagnostics: &report.diagnostics,
    };
    let text = serde_json::to_string_pretty(&file)?;
    fs::write(path, text)
        .with_context(|| format!("failed to write diagnostics {}", path.display()))
}

fn run_apply(db: &Database, path: &Path) -> Result<()> {
    let changeset = Changeset::load(path)
        .with_context(|| format!("failed to load changeset {}", path.display()))?;
    if changeset.is_legacy() {
        println!("Applying legacy changeset {}", changeset.session_id);
    }
    let mut lookup = db;
    let mut sink = db;
    let report = apply_changeset(&changeset, &mut lookup, &mut sink);
    println!(
        "Applied: {}  Already up to date: {}  Failed: {}",
        report.applied, report.skipped, report.failed
    );
    for (target_id, reason) in &report.failures {
        println!("  {target_id}: {reason}");
    }
    Ok(())
}

fn run_list(db: &Database) -> Result<()> {
    let entries = db.list_entries()?;
    if entries.is_empty() {
        println!("The list mirror is empty. Run `anisync import` or `anisync sync` first.");
        return Ok(());
    }

    println!(
        "{:<10} {:<40} {:<12} {:<16} {:<28}",
        "ID", "TITLE", "PROGRESS", "STATUS", "UPDATED"
    );
    for entry in entries {
        println!(
            "{:<10} {:<40} {:<12} {:<16} {:<28}",
            entry.target_id,
            truncate(&entry.title, 40),
            format_progress_text(entry.progress, entry.total_episodes),
            format_status_text(entry.status, entry.repeat),
            format_timestamp_display(&entry.updated_at)
        );
    }
    Ok(())
}

fn run_import(db: &Database, path: &Path) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read list export {}", path.display()))?;
    let entries: Vec<ImportedEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse list export {}", path.display()))?;
    let count = db.import_entries(&entries)?;
    println!("Imported {count} list entries.");
    Ok(())
}

fn run_search(title: &str, season: Option<u32>, catalog_path: Option<&Path>) -> Result<()> {
    let mut catalog = open_catalog(catalog_path)?;
    let mut candidates: Vec<CatalogCandidate> = Vec::new();
    for query in series_queries(title, season) {
        let results = catalog
            .search(&query)
            .with_context(|| format!("catalog search for {query:?} failed"))?;
        for candidate in results {
            if !candidates
                .iter()
                .any(|seen| seen.target_id == candidate.target_id)
            {
                candidates.push(candidate);
            }
        }
    }
    if candidates.is_empty() {
        println!("No catalog entries found for {title:?}.");
        return Ok(());
    }

    let best = match_series(title, season, &candidates);
    let best_id = best.candidate.as_ref().map(|candidate| candidate.target_id);
    println!(
        "  {:<10} {:<40} {:<9} {:<5} {:<12} {:<6} SEASON",
        "ID", "TITLE", "FORMAT", "EPS", "START", "SCORE"
    );
    for candidate in &candidates {
        let marker = if Some(candidate.target_id) == best_id {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {:<10} {:<40} {:<9} {:<5} {:<12} {:<6.2} {}",
            candidate.target_id,
            truncate(candidate.primary_title(), 40),
            candidate.format.as_str(),
            candidate
                .episode_count
                .map_or_else(|| "?".to_string(), |count| count.to_string()),
            candidate
                .start_date
                .map_or_else(|| "-".to_string(), |date| date.to_string()),
            title_similarity(title, candidate),
            detect_season(candidate)
        );
    }
    if best_id.is_none() {
        println!(
            "No candidate cleared the match threshold (best score {:.2}).",
            best.score
        );
    }
    Ok(())
}

fn open_db() -> Result<Database> {
    let db_path = database_file_path()?;
    let db = Database::open(&db_path)?;
    db.migrate()?;
    Ok(db)
}

fn session_id() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
