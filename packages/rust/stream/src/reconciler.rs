//! Merge-by-identity view of block updates.
//!
//! The server re-sends a block's whole record whenever any of its fields
//! change. The reconciler keeps one entry per `block_id`, positioned where the
//! id was first seen, holding the latest record received for it.

use std::collections::HashMap;

use edastream_shared::{BlockStatus, BlockUpdate};
use serde::Serialize;

/// Current state of one block: its latest update plus display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockState {
    /// Order in which the id was first seen this session, starting at 0.
    pub first_seen: u64,
    /// Latest update received for the block.
    #[serde(flatten)]
    pub block: BlockUpdate,
}

impl BlockState {
    pub fn block_id(&self) -> u64 {
        self.block.block_id
    }

    pub fn status(&self) -> BlockStatus {
        self.block.status
    }
}

/// Per-status tally of the reconciled view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub queued: usize,
    pub executing: usize,
    pub success: usize,
    pub error: usize,
    pub unknown: usize,
}

impl StatusCounts {
    /// Tally a reconciled view.
    pub fn tally(blocks: &[BlockState]) -> Self {
        let mut counts = Self::default();
        for state in blocks {
            match state.status() {
                BlockStatus::Queued => counts.queued += 1,
                BlockStatus::Executing => counts.executing += 1,
                BlockStatus::Success => counts.success += 1,
                BlockStatus::Error => counts.error += 1,
                BlockStatus::Unknown => counts.unknown += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.queued + self.executing + self.success + self.error + self.unknown
    }

    /// Blocks that reached `success` or `error`.
    pub fn finished(&self) -> usize {
        self.success + self.error
    }
}

/// Session-scoped store of [`BlockState`]s keyed by block id.
///
/// Last write wins: a later update replaces every field of the stored record,
/// even when it moves the status backwards.
#[derive(Debug, Default)]
pub struct BlockReconciler {
    blocks: Vec<BlockState>,
    index: HashMap<u64, usize>,
}

impl BlockReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one update and return the full view in first-seen order.
    pub fn apply(&mut self, update: BlockUpdate) -> &[BlockState] {
        match self.index.get(&update.block_id) {
            Some(&position) => {
                self.blocks[position].block = update;
            }
            None => {
                let position = self.blocks.len();
                self.index.insert(update.block_id, position);
                self.blocks.push(BlockState {
                    first_seen: position as u64,
                    block: update,
                });
            }
        }
        &self.blocks
    }

    /// All blocks seen so far, in first-seen order.
    pub fn blocks(&self) -> &[BlockState] {
        &self.blocks
    }

    pub fn get(&self, block_id: u64) -> Option<&BlockState> {
        self.index.get(&block_id).map(|&position| &self.blocks[position])
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn status_counts(&self) -> StatusCounts {
        StatusCounts::tally(&self.blocks)
    }

    /// Consume the reconciler, keeping only the final view.
    pub fn into_blocks(self) -> Vec<BlockState> {
        self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(id: u64, status: BlockStatus) -> BlockUpdate {
        BlockUpdate::new(id, status)
    }

    fn ids(blocks: &[BlockState]) -> Vec<u64> {
        blocks.iter().map(BlockState::block_id).collect()
    }

    #[test]
    fn first_sighting_appends() {
        let mut reconciler = BlockReconciler::new();
        reconciler.apply(update(4, BlockStatus::Queued));
        let view = reconciler.apply(update(9, BlockStatus::Queued));
        assert_eq!(ids(view), vec![4, 9]);
        assert_eq!(view[1].first_seen, 1);
    }

    #[test]
    fn applying_twice_equals_applying_once() {
        let mut once = BlockReconciler::new();
        let mut twice = BlockReconciler::new();
        let mut u = update(1, BlockStatus::Success);
        u.output = Some("ok".into());

        once.apply(u.clone());
        twice.apply(u.clone());
        twice.apply(u);

        assert_eq!(once.blocks(), twice.blocks());
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn first_seen_order_survives_out_of_order_updates() {
        let mut reconciler = BlockReconciler::new();
        reconciler.apply(update(2, BlockStatus::Executing));
        reconciler.apply(update(1, BlockStatus::Queued));

        let mut latest = update(2, BlockStatus::Success);
        latest.output = Some("done".into());
        let view = reconciler.apply(latest);

        assert_eq!(ids(view), vec![2, 1]);
        assert_eq!(view[0].status(), BlockStatus::Success);
        assert_eq!(view[0].block.output.as_deref(), Some("done"));
        assert_eq!(view[0].first_seen, 0);
    }

    #[test]
    fn later_update_replaces_every_field() {
        let mut reconciler = BlockReconciler::new();
        let mut first = update(0, BlockStatus::Success);
        first.output = Some("rows: 500".into());
        first.plots_generated = vec!["hist.png".into()];
        reconciler.apply(first);

        // A regression to executing with no output is stored as sent.
        reconciler.apply(update(0, BlockStatus::Executing));

        let state = reconciler.get(0).expect("block 0");
        assert_eq!(state.status(), BlockStatus::Executing);
        assert!(state.block.output.is_none());
        assert!(state.block.plots_generated.is_empty());
    }

    #[test]
    fn terminal_block_accepts_late_plots() {
        let mut reconciler = BlockReconciler::new();
        reconciler.apply(update(3, BlockStatus::Success));
        let mut late = update(3, BlockStatus::Success);
        late.plots_generated = vec!["corr.png".into()];
        reconciler.apply(late);
        assert_eq!(reconciler.get(3).map(|s| s.block.plots_generated.len()), Some(1));
    }

    #[test]
    fn status_counts_tally_latest_state() {
        let mut reconciler = BlockReconciler::new();
        reconciler.apply(update(0, BlockStatus::Executing));
        reconciler.apply(update(1, BlockStatus::Queued));
        reconciler.apply(update(0, BlockStatus::Success));
        reconciler.apply(update(2, BlockStatus::Error));

        let counts = reconciler.status_counts();
        assert_eq!(counts.success, 1);
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.error, 1);
        assert_eq!(counts.executing, 0);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.finished(), 2);
    }

    #[test]
    fn fresh_reconciler_is_empty() {
        let reconciler = BlockReconciler::new();
        assert!(reconciler.is_empty());
        assert!(reconciler.get(0).is_none());
    }
}
