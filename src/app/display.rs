use chrono::{DateTime, Local};

use super::sync::{ListStatus, ReconciliationDecision, RunStats};

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub(crate) fn format_timestamp_display(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M %:z")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

pub(crate) fn format_progress_text(progress: u32, total_episodes: Option<u32>) -> String {
    match total_episodes {
        Some(total) => format!("{progress} of {total}"),
        None => format!("{progress} of ?"),
    }
}

pub(crate) fn format_status_text(status: ListStatus, repeat: u32) -> String {
    if repeat == 0 {
        status.to_string()
    } else {
        format!("{status} (x{repeat})")
    }
}

/// One line per accepted decision, as printed while a run progresses.
pub(crate) fn format_decision_line(decision: &ReconciliationDecision) -> String {
    let mut line = format!(
        "{:<10} {:<40} {:<12} {}",
        decision.update_kind.as_str(),
        truncate(&decision.target_title, 40),
        format_progress_text(decision.new_progress, decision.total_episodes),
        format_status_text(decision.new_status, decision.new_repeat),
    );
    if decision.provisional {
        line.push_str(" [provisional]");
    }
    if let Some(note) = &decision.anomaly {
        line.push_str(&format!(" ! {note}"));
    }
    line
}

pub(crate) fn format_stats_summary(stats: &RunStats) -> Vec<String> {
    vec![
        format!(
            "Pages: {}  Events: {}  Groups: {}  Skipped entries: {}",
            stats.pages, stats.events, stats.groups, stats.skipped_entries
        ),
        format!(
            "Matched: {} direct, {} converted, {} movies  Provisional: {}  Truncated: {}",
            stats.direct_matches,
            stats.conversions,
            stats.movies,
            stats.provisional,
            stats.truncated_structures
        ),
        format!(
            "Updates: {} new, {} progress, {} rewatch  No-ops: {}",
            stats.new_series, stats.normal, stats.rewatches, stats.no_ops
        ),
        format!(
            "Unmatched: {}  Skipped series: {}  Failures: {}",
            stats.unmatched, stats.skipped_series, stats.failures
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text_and_marks_long_text() {
        assert_eq!(truncate("Frieren", 10), "Frieren");
        assert_eq!(truncate("Sousou no Frieren", 10), "Sousou ...");
        assert_eq!(truncate("進撃の巨人 The Final Season", 8), "進撃の巨人...");
    }

    #[test]
    fn invalid_timestamps_are_shown_verbatim() {
        assert_eq!(format_timestamp_display("yesterday"), "yesterday");
        let shown = format_timestamp_display("2024-03-01T12:00:00+00:00");
        assert!(shown.starts_with("2024-03-0"));
    }

    #[test]
    fn progress_and_status_text() {
        assert_eq!(format_progress_text(5, Some(12)), "5 of 12");
        assert_eq!(format_progress_text(1100, None), "1100 of ?");
        assert_eq!(format_status_text(ListStatus::Current, 0), "CURRENT");
        assert_eq!(format_status_text(ListStatus::Repeating, 2), "REPEATING (x2)");
    }

    #[test]
    fn stats_summary_mentions_every_counter_group() {
        let stats = RunStats {
            pages: 3,
            truncated_structures: 2,
            rewatches: 1,
            unmatched: 2,
            ..RunStats::default()
        };
        let lines = format_stats_summary(&stats);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Pages: 3"));
        assert!(lines[1].ends_with("Truncated: 2"));
        assert!(lines[2].contains("1 rewatch"));
        assert!(lines[3].contains("Unmatched: 2"));
    }
}
