//! Rotation of filled command queues between producer and consumer.
//!
//! Each closed frame becomes one batch. The set rotates to a fresh batch when
//! the consumer has not finished replaying the current one, growing up to a
//! configured ceiling before recycling stale batches.

use command_protocol::{ExecuteContext, ReplayFault};
use log::warn;

use crate::CommandQueue;

/// A bounded ring of per-frame command queues.
///
/// `current_index` points at the batch the consumer replays next. Batches at
/// other indices are either drained storage waiting for reuse or backlog the
/// producer filled while the consumer was busy.
pub struct CommandBatchSet {
    batches: Vec<CommandQueue>,
    current_index: usize,
    max_batches: usize,
}

impl CommandBatchSet {
    pub fn new(max_batches: usize) -> Self {
        assert!(max_batches > 0, "batch set needs at least one batch");
        Self {
            batches: vec![CommandQueue::new()],
            current_index: 0,
            max_batches,
        }
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(CommandQueue::is_empty)
    }

    pub fn is_fully_processed(&self) -> bool {
        self.batches.iter().all(CommandQueue::is_processed)
    }

    /// Move a closed frame's queue into the set as the new current batch.
    ///
    /// An empty queue closes no batch and leaves the set untouched. When the
    /// current batch still has unreplayed passes the set rotates forward
    /// instead of overwriting it.
    pub fn copy_queue_in(&mut self, live: &mut CommandQueue) {
        if live.is_empty() {
            return;
        }
        if !self.batches[self.current_index].is_processed() {
            self.advance();
        }
        self.batches[self.current_index].copy_from(live, false);
    }

    /// Splice a queue onto the end of the current batch without rotating.
    ///
    /// Used after a mid-frame rendezvous already replayed the batch content:
    /// the appended entries keep their slots for later frames while
    /// `mark_processed` records that their effects are already applied.
    pub fn append_queue_in(&mut self, live: &mut CommandQueue, mark_processed: bool) {
        if live.is_empty() {
            return;
        }
        self.batches[self.current_index].append_from(live, mark_processed);
    }

    fn advance(&mut self) {
        // Prefer a drained batch ahead of the cursor so replay order holds.
        for index in self.current_index + 1..self.batches.len() {
            if self.batches[index].is_processed() {
                self.current_index = index;
                return;
            }
        }
        if self.batches.len() < self.max_batches {
            self.batches.push(CommandQueue::new());
            self.current_index = self.batches.len() - 1;
            return;
        }
        for index in 0..self.current_index {
            if self.batches[index].is_processed() {
                warn!(
                    "batch set at capacity {}; recycling drained batch {index}",
                    self.max_batches
                );
                self.current_index = index;
                return;
            }
        }
        warn!(
            "batch set exceeded capacity {}; growing past the configured ceiling",
            self.max_batches
        );
        self.batches.push(CommandQueue::new());
        self.current_index = self.batches.len() - 1;
    }

    /// Absorb another set's pending batches, draining it.
    ///
    /// Incoming batches are strictly newer than anything already here, so
    /// each one is filed behind the last batch that still has replay passes
    /// left. Batches already fully replayed hold only dead entries and may
    /// be overwritten.
    pub fn merge_from(&mut self, source: &mut CommandBatchSet) {
        let mut insert_index = self.first_free_index();
        let mut inserted_any = false;
        for batch in source.batches.iter_mut() {
            if batch.is_empty() {
                continue;
            }
            while self.batches.len() <= insert_index {
                self.batches.push(CommandQueue::new());
            }
            self.batches[insert_index].copy_from(batch, true);
            insert_index += 1;
            inserted_any = true;
        }
        if inserted_any {
            self.current_index = insert_index - 1;
        }
        source.current_index = 0;
    }

    /// One past the last batch still awaiting replay passes.
    fn first_free_index(&self) -> usize {
        self.batches
            .iter()
            .rposition(|batch| !batch.is_processed())
            .map_or(0, |index| index + 1)
    }

    /// Replay pending work against the backend.
    ///
    /// With `only_non_processed` every batch that still has passes left is
    /// forced straight to fully processed and drained; this is the catch-up
    /// path before a rendezvous command runs. Otherwise the call performs one
    /// eye pass: the first batch with passes remaining is replayed once, or
    /// the current batch when everything is already drained.
    pub fn process_all(
        &mut self,
        cx: &mut ExecuteContext<'_>,
        only_non_processed: bool,
    ) -> Result<(), ReplayFault> {
        if only_non_processed {
            for batch in &mut self.batches {
                if !batch.is_processed() {
                    batch.process(cx, true, true)?;
                }
            }
        } else {
            let pending = self
                .batches
                .iter()
                .position(|batch| !batch.is_processed());
            let index = pending.unwrap_or(self.current_index);
            self.batches[index].process(cx, true, false)?;
        }
        self.compact();
        Ok(())
    }

    /// Fold the cursor back toward batch 0 once nothing is pending, so the
    /// set does not creep toward its ceiling during normal operation.
    fn compact(&mut self) {
        if self.current_index == 0 || !self.is_fully_processed() {
            return;
        }
        if self.batches[self.current_index].is_empty() {
            self.current_index = 0;
            return;
        }
        let (head, tail) = self.batches.split_at_mut(self.current_index);
        head[0].copy_from(&mut tail[0], true);
        self.current_index = 0;
    }

    /// Drop every pending command and rewind to a single-batch state's worth
    /// of bookkeeping. Storage is retained.
    pub fn clear(&mut self) {
        for batch in &mut self.batches {
            batch.clear();
        }
        self.current_index = 0;
    }
}
