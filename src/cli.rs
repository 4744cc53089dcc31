//! Command-line subcommands: queue statistics and bulk clears.
//!
//! Each command returns its report as text so `main` decides where it goes.

use crate::db::{QueueRepository, StorageResult};
use crate::model::QueueSummary;
use std::collections::HashSet;
use std::fmt::Write;

const COUNT_WIDTHS: [usize; 3] = [10, 11, 10];

/// Flatten comma-separated arguments into queue names.
pub fn split_names<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .flat_map(|arg| {
            arg.as_ref()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Boxed table of queue statistics.
pub fn render_stats(summaries: &[QueueSummary]) -> String {
    let name_width = summaries
        .iter()
        .map(|q| q.name.chars().count())
        .chain(std::iter::once("Name".len()))
        .max()
        .unwrap_or_default()
        + 2;
    let widths = [name_width, COUNT_WIDTHS[0], COUNT_WIDTHS[1], COUNT_WIDTHS[2]];

    let rule = |left: char, mid: char, right: char| {
        let cells: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
        format!("  {left}{}{right}\n", cells.join(mid.to_string().as_str()))
    };
    let row = |cells: [&str; 4]| {
        let mut line = String::from("  │");
        for (cell, width) in cells.iter().zip(widths) {
            let _ = write!(line, "{cell:^width$}│");
        }
        line.push('\n');
        line
    };

    let mut out = String::new();
    out.push_str(&rule('┌', '┬', '┐'));
    out.push_str(&row(["Name", "Queued", "Processed", "Total"]));
    out.push_str(&rule('├', '┼', '┤'));
    for q in summaries {
        let (queued, processed, total) =
            (q.queued.to_string(), q.processed.to_string(), q.total.to_string());
        out.push_str(&row([q.name.as_str(), queued.as_str(), processed.as_str(), total.as_str()]));
    }
    out.push_str(&rule('└', '┴', '┘'));
    out
}

/// Statistics for all queues, or only `names` when non-empty.
pub async fn show_stats(queues: &QueueRepository, names: &[String]) -> StorageResult<String> {
    let mut summaries = queues.queue_summaries().await?;
    if !names.is_empty() {
        summaries.retain(|q| names.contains(&q.name));
    }
    if summaries.is_empty() {
        return Ok(format!("  no queues matched: {}\n", names.join(",")));
    }
    Ok(render_stats(&summaries))
}

/// Delete processed items from each named queue.
pub async fn cleanup(queues: &QueueRepository, names: &[String]) -> StorageResult<String> {
    let known = known_queues(queues).await?;
    let mut out = String::new();
    for name in names {
        if known.contains(name) {
            let removed = queues.delete_processed(name).await?;
            let _ = writeln!(out, "  Cleaned up {removed} processed items from queue {name}");
        } else {
            let _ = writeln!(out, "  Unknown queue: {name}");
        }
    }
    Ok(out)
}

/// Delete queued items from each named queue.
pub async fn cancel_all(queues: &QueueRepository, names: &[String]) -> StorageResult<String> {
    let known = known_queues(queues).await?;
    let mut out = String::new();
    for name in names {
        if known.contains(name) {
            let removed = queues.delete_queued(name).await?;
            let _ = writeln!(out, "  Cancelled all {removed} queued items from queue {name}");
        } else {
            let _ = writeln!(out, "  Unknown queue: {name}");
        }
    }
    Ok(out)
}

async fn known_queues(queues: &QueueRepository) -> StorageResult<HashSet<String>> {
    Ok(queues
        .queue_summaries()
        .await?
        .into_iter()
        .map(|q| q.name)
        .collect())
}
