//! Human-readable knowledge base statistics.
//!
//! Renders [`Stats`] for `kb stats` and the `stats` command of `kb chat`:
//! index size and location, entry and document counts, last update and
//! the active providers.

use chrono::{DateTime, Utc};

use crate::models::Stats;

/// Render a stats summary. `location` is the configured index path, shown
/// for persistent backends.
pub fn render_stats(stats: &Stats, location: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("Knowledge Base Stats\n");
    out.push_str("====================\n\n");

    out.push_str(&format!("  State:       {}\n", stats.state));
    out.push_str(&format!("  Backend:     {}\n", stats.index_backend));
    if let Some(location) = location {
        out.push_str(&format!("  Index:       {}\n", location));
    }
    out.push_str(&format!("  Size:        {}\n", format_bytes(stats.index_size_bytes)));
    out.push('\n');

    out.push_str(&format!("  Documents:   {}\n", stats.document_count));
    out.push_str(&format!("  Embeddings:  {}\n", stats.embedding_count));
    let updated = match stats.last_updated {
        Some(ts) => format_ts_relative(ts, Utc::now()),
        None => "never".to_string(),
    };
    out.push_str(&format!("  Updated:     {}\n", updated));
    out.push('\n');

    let e = &stats.embedding;
    out.push_str(&format!(
        "  Embedding:   {} ({}, {} dims",
        e.provider, e.model, e.dims
    ));
    if let Some(batch) = e.batch_size {
        out.push_str(&format!(", batch {}", batch));
    }
    out.push_str(")\n");
    out.push_str(&format!("  Answers:     {}\n", stats.answer_synthesizer));
    out
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time ("3 hours ago") for recent timestamps, a date otherwise.
fn format_ts_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}
