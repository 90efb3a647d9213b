//! Ordered storage for deferred commands between the producer and consumer
//! threads.
//!
//! `CommandQueue` is one frame's worth of commands plus a processed-pass
//! counter that tracks how many of the two stereo replay passes have applied
//! the queue's side effects. `CommandBatchSet` (in `batch_set`) rotates
//! filled queues while the consumer drains them.

use command_protocol::{
    CommandResult, ExecuteContext, RenderCommand, ReplayFault, fault_is_tolerated,
};
use log::{error, trace};

pub use batch_set::CommandBatchSet;

mod batch_set;

/// Fixed storage growth step when a queue runs out of slots.
pub const QUEUE_GROWTH_SLOTS: usize = 100;

/// Pass count at which a queue's effects have been applied for both eyes.
pub const FULLY_PROCESSED_PASSES: u8 = 2;

/// A command tagged with the frame-open flag captured when it was enqueued.
///
/// Commands issued inside an open frame are replayed once per eye pass;
/// commands issued outside one are released after their first execution.
pub struct IssuedCommand {
    command: Box<dyn RenderCommand>,
    inside_frame: bool,
}

impl IssuedCommand {
    pub fn new(command: Box<dyn RenderCommand>, inside_frame: bool) -> Self {
        Self {
            command,
            inside_frame,
        }
    }

    pub fn name(&self) -> &'static str {
        self.command.name()
    }

    pub fn inside_frame(&self) -> bool {
        self.inside_frame
    }

    pub fn execute(&self, cx: &mut ExecuteContext<'_>) -> CommandResult {
        self.command.execute(cx)
    }
}

/// Growable slot array with a write cursor and a processed-pass counter.
///
/// The counter deliberately distinguishes "processed once" from "processed
/// twice": the stereo replay depends on a queue passing through both states
/// before it may be emptied. Storage never shrinks except through `clear`.
pub struct CommandQueue {
    slots: Vec<Option<IssuedCommand>>,
    count: usize,
    processed_passes: u8,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            count: 0,
            // An empty queue counts as drained so batch rotation reuses it.
            processed_passes: FULLY_PROCESSED_PASSES,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_processed(&self) -> bool {
        self.processed_passes == FULLY_PROCESSED_PASSES
    }

    pub fn processed_passes(&self) -> u8 {
        self.processed_passes
    }

    /// Append at the write cursor, growing storage by `QUEUE_GROWTH_SLOTS`
    /// when full. A queue holding fresh entries is unprocessed.
    pub fn enqueue(&mut self, issued: IssuedCommand) {
        self.ensure_slots(self.count + 1);
        self.slots[self.count] = Some(issued);
        self.count += 1;
        self.processed_passes = 0;
    }

    /// Bulk-move all of `other` into self starting at position 0, replacing
    /// any prior content. `other` ends up empty and fully processed. Self
    /// inherits `other`'s processed state when `preserve_processed` is set,
    /// otherwise it resets to unprocessed.
    pub fn copy_from(&mut self, other: &mut CommandQueue, preserve_processed: bool) {
        self.ensure_slots(other.count);
        for index in 0..other.count {
            self.slots[index] = other.slots[index].take();
        }
        for index in other.count..self.count {
            self.slots[index] = None;
        }
        self.count = other.count;
        self.processed_passes = if preserve_processed {
            other.processed_passes
        } else {
            0
        };
        other.count = 0;
        other.processed_passes = FULLY_PROCESSED_PASSES;
    }

    /// Bulk-move all of `other` onto the end of self's existing content.
    /// Self becomes fully processed when `mark_processed` is set, otherwise
    /// unprocessed. `other` ends up empty and fully processed.
    pub fn append_from(&mut self, other: &mut CommandQueue, mark_processed: bool) {
        self.ensure_slots(self.count + other.count);
        for index in 0..other.count {
            self.slots[self.count + index] = other.slots[index].take();
        }
        self.count += other.count;
        self.processed_passes = if mark_processed {
            FULLY_PROCESSED_PASSES
        } else {
            0
        };
        other.count = 0;
        other.processed_passes = FULLY_PROCESSED_PASSES;
    }

    /// Execute every present entry in order.
    ///
    /// A fully processed queue executes nothing: its effects are already
    /// applied for both eyes, and a call then only honors `empty_after`.
    /// A fault reported by the backend right after a command ran aborts the
    /// pass unless the command is fault-tolerated. Entries issued outside an
    /// open frame are released after execution; inside-frame entries persist
    /// for the second eye pass. Without `force_mark_processed` the pass
    /// counter advances 0 -> 1 -> 2 and stays at 2; with it the counter jumps
    /// straight to 2. Once fully processed, `empty_after` resets the write
    /// cursor and releases every remaining entry, retaining storage.
    pub fn process(
        &mut self,
        cx: &mut ExecuteContext<'_>,
        empty_after: bool,
        force_mark_processed: bool,
    ) -> Result<(), ReplayFault> {
        let execute_entries = if self.is_processed() { 0 } else { self.count };
        for index in 0..execute_entries {
            let release = match &self.slots[index] {
                Some(entry) => {
                    trace!("{}: processing command {}", cx.thread_label, entry.name());
                    entry.execute(cx);
                    if let Some(fault) = cx.backend.poll_fault() {
                        if fault_is_tolerated(entry.name()) {
                            error!(
                                "{}: tolerated fault {:?} after command {}",
                                cx.thread_label,
                                fault,
                                entry.name()
                            );
                        } else {
                            return Err(ReplayFault {
                                command_name: String::from(entry.name()),
                                fault,
                            });
                        }
                    }
                    !entry.inside_frame()
                }
                None => false,
            };
            if release {
                self.slots[index] = None;
            }
        }

        if force_mark_processed {
            self.processed_passes = FULLY_PROCESSED_PASSES;
        } else if self.processed_passes < FULLY_PROCESSED_PASSES {
            self.processed_passes += 1;
        }

        if empty_after && self.is_processed() {
            for index in 0..self.count {
                self.slots[index] = None;
            }
            self.count = 0;
        }

        Ok(())
    }

    /// Release every slot and force the fully-processed state.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.count = 0;
        self.processed_passes = FULLY_PROCESSED_PASSES;
    }

    fn ensure_slots(&mut self, needed: usize) {
        while self.slots.len() < needed {
            let grown = self.slots.len() + QUEUE_GROWTH_SLOTS;
            self.slots.resize_with(grown, || None);
        }
    }

    #[cfg(test)]
    pub(crate) fn slot_capacity(&self) -> usize {
        self.slots.len()
    }
}
