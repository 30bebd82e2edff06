//! Plain-text rendering of sessions, datasets, and report history.

use std::fmt::Write;

use edastream_shared::{BlockStatus, CommentAsset, CommentRecord, CsvRecord, DatasetSummary};
use edastream_stream::{BlockState, StatusCounts};

const DESCRIPTION_WIDTH: usize = 48;

/// Cut `text` to at most `max` characters, marking the cut with `…`.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

fn status_marker(status: BlockStatus) -> &'static str {
    match status {
        BlockStatus::Queued => "·",
        BlockStatus::Executing => "▸",
        BlockStatus::Success => "✓",
        BlockStatus::Error => "✗",
        BlockStatus::Unknown => "?",
    }
}

fn block_label(state: &BlockState) -> String {
    if state.block.description.trim().is_empty() {
        format!("block {}", state.block_id())
    } else {
        truncate(&state.block.description, DESCRIPTION_WIDTH)
    }
}

/// Spinner text for the current view.
pub(crate) fn progress_message(blocks: &[BlockState]) -> String {
    let counts = StatusCounts::tally(blocks);
    let running = blocks
        .iter()
        .find(|b| b.status() == BlockStatus::Executing)
        .map(block_label);

    let mut msg = format!("{}/{} blocks finished", counts.finished(), counts.total());
    if let Some(label) = running {
        let _ = write!(msg, " · running: {label}");
    } else if counts.queued > 0 {
        let _ = write!(msg, " · {} queued", counts.queued);
    }
    msg
}

/// One line announcing a block that reached a terminal status.
pub(crate) fn block_line(state: &BlockState) -> String {
    let mut line = format!(
        "{} [{}] {}",
        status_marker(state.status()),
        state.block_id(),
        block_label(state)
    );
    if let Some(error) = state.block.error.as_deref().filter(|e| !e.is_empty()) {
        let _ = write!(line, ": {}", truncate(error, 80));
    }
    if !state.block.plots_generated.is_empty() {
        let _ = write!(line, " ({} plots)", state.block.plots_generated.len());
    }
    line
}

/// Final per-block table, in first-seen order.
pub(crate) fn block_table(blocks: &[BlockState]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "  {:>4}  {:<10}  {:<width$}  {:>5}",
        "ID",
        "STATUS",
        "DESCRIPTION",
        "PLOTS",
        width = DESCRIPTION_WIDTH
    );
    for state in blocks {
        let _ = writeln!(
            out,
            "  {:>4}  {:<10}  {:<width$}  {:>5}",
            state.block_id(),
            state.status().as_str(),
            block_label(state),
            state.block.plots_generated.len(),
            width = DESCRIPTION_WIDTH
        );
        if let Some(error) = state.block.error.as_deref().filter(|e| !e.is_empty()) {
            let _ = writeln!(out, "        error: {}", truncate(error, 100));
        }
    }
    out
}

/// Closing line for a stream that ended normally.
pub(crate) fn completion_message(counts: &StatusCounts) -> String {
    if counts.error == 0 && counts.finished() == counts.total() {
        "All code blocks have been executed successfully.".to_string()
    } else {
        format!(
            "Pipeline finished: {} succeeded, {} failed, {} unfinished.",
            counts.success,
            counts.error,
            counts.total() - counts.finished()
        )
    }
}

/// Upload result, led by the row/column count line.
pub(crate) fn dataset_summary(summary: &DatasetSummary) -> String {
    let mut out = format!(
        "Analyzed {} rows and {} columns\n",
        summary.total_rows, summary.total_columns
    );
    if let Some(csv_id) = &summary.csv_id {
        let _ = writeln!(out, "  CSV ID: {csv_id}");
    }
    if !summary.file_type.is_empty() {
        let _ = writeln!(out, "  Type:   {}", summary.file_type);
    }
    if !summary.columns_info.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "  {:<24}  {:<10}  {:>8}  {:>6}  {:>7}",
            "COLUMN", "DTYPE", "NON-NULL", "NULL", "UNIQUE"
        );
        for col in &summary.columns_info {
            let _ = writeln!(
                out,
                "  {:<24}  {:<10}  {:>8}  {:>6}  {:>7}",
                truncate(&col.name, 24),
                truncate(&col.dtype, 10),
                col.non_null_count,
                col.null_count,
                col.unique_count
            );
        }
    }
    if !summary.ai_summary.trim().is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", summary.ai_summary.trim());
    }
    out
}

pub(crate) fn csv_list(csvs: &[CsvRecord]) -> String {
    if csvs.is_empty() {
        return "No datasets uploaded yet.\n".to_string();
    }
    let mut out = String::new();
    for csv in csvs {
        let _ = writeln!(out, "  {}  {:<32}  {}", csv.id, truncate(&csv.csv_name, 32), csv.created_at);
    }
    out
}

pub(crate) fn comment_list(comments: &[CommentRecord]) -> String {
    if comments.is_empty() {
        return "No comments for this dataset.\n".to_string();
    }
    let mut out = String::new();
    for comment in comments {
        let _ = writeln!(out, "  {}  {}  {}", comment.id, comment.created_at, truncate(&comment.comment, 60));
    }
    out
}

pub(crate) fn asset_list(assets: &[CommentAsset]) -> String {
    if assets.is_empty() {
        return "No assets for this comment.\n".to_string();
    }
    let mut out = String::new();
    for asset in assets {
        let _ = writeln!(out, "── asset {} ({})", asset.id, asset.created_at);
        if !asset.code.trim().is_empty() {
            let _ = writeln!(out, "{}", asset.code.trim_end());
        }
        for url in &asset.image_urls {
            let _ = writeln!(out, "  image: {url}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use edastream_shared::BlockUpdate;

    use super::*;

    fn state(id: u64, status: BlockStatus, description: &str) -> BlockState {
        let mut block = BlockUpdate::new(id, status);
        block.description = description.into();
        BlockState {
            first_seen: id,
            block,
        }
    }

    #[test]
    fn truncate_is_char_aware() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééé", 4), "ééé…");
    }

    #[test]
    fn progress_names_running_block() {
        let blocks = vec![
            state(0, BlockStatus::Success, "Load data"),
            state(1, BlockStatus::Executing, "Revenue histogram"),
            state(2, BlockStatus::Queued, ""),
        ];
        assert_eq!(
            progress_message(&blocks),
            "1/3 blocks finished · running: Revenue histogram"
        );
    }

    #[test]
    fn block_line_includes_error_and_plots() {
        let mut failed = state(4, BlockStatus::Error, "");
        failed.block.error = Some("KeyError: 'price'".into());
        assert_eq!(block_line(&failed), "✗ [4] block 4: KeyError: 'price'");

        let mut plotted = state(1, BlockStatus::Success, "Histogram");
        plotted.block.plots_generated = vec!["a.png".into(), "b.png".into()];
        assert_eq!(block_line(&plotted), "✓ [1] Histogram (2 plots)");
    }

    #[test]
    fn table_lists_blocks_in_given_order() {
        let blocks = vec![
            state(2, BlockStatus::Success, "Second"),
            state(1, BlockStatus::Queued, "First"),
        ];
        let table = block_table(&blocks);
        let second = table.find("Second").expect("row for block 2");
        let first = table.find("First").expect("row for block 1");
        assert!(second < first);
        assert!(table.lines().next().is_some_and(|h| h.contains("STATUS")));
    }

    #[test]
    fn completion_message_reflects_failures() {
        let ok = StatusCounts {
            success: 3,
            ..Default::default()
        };
        assert_eq!(
            completion_message(&ok),
            "All code blocks have been executed successfully."
        );

        let mixed = StatusCounts {
            success: 2,
            error: 1,
            queued: 1,
            ..Default::default()
        };
        assert_eq!(
            completion_message(&mixed),
            "Pipeline finished: 2 succeeded, 1 failed, 1 unfinished."
        );
    }

    #[test]
    fn dataset_summary_leads_with_counts() {
        let json = std::fs::read_to_string("../../fixtures/json/dataset-summary.fixture.json")
            .expect("read fixture");
        let summary: DatasetSummary = serde_json::from_str(&json).expect("parse fixture");
        let text = dataset_summary(&summary);
        assert!(text.starts_with("Analyzed 500 rows and 8 columns\n"));
        assert!(text.contains("CSV ID: abc123"));
        assert!(text.contains("revenue"));
    }
}
