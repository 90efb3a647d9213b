//! Cross-thread bridge between a content thread issuing graphics commands and
//! the render thread that replays them.
//!
//! Thread model:
//! 1. The content thread holds a `ProducerClient`. It brackets its work in
//!    `start_frame`/`end_frame`, enqueues deferred commands in between, and
//!    may block on a synchronous command when it needs a result back.
//! 2. The render thread holds the `ConsumerDriver` together with the graphics
//!    backend. Once per display refresh it calls `render_frame` with both
//!    eyes' camera parameters and replays the newest closed frame twice, once
//!    per eye.
//!
//! Shared state lives behind one mutex inside `BridgeCore`. The driver moves
//! pending batches into a consumer-private shadow set while holding the lock,
//! then replays them unlocked so the content thread never stalls behind
//! backend work. A single-slot rendezvous register carries synchronous
//! commands; the producer parks on a condvar until the driver resolves it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use command_batching::{CommandBatchSet, CommandQueue, IssuedCommand};
use command_protocol::{
    CommandResult, ExecuteContext, EyeRenderParams, GraphicsBackend, MatrixUniformKind,
    MatrixUniformRegistry, RenderCommand, RenderState, ReplayFault, fault_is_tolerated,
};
use log::{error, trace, warn};

use crate::thread_registry::ThreadNameRegistry;

mod thread_registry;

#[cfg(test)]
mod tests;

/// Tunables fixed at bridge creation.
#[derive(Debug, Clone, Copy)]
pub struct BridgeConfig {
    /// Batch-set growth ceiling; past it drained batches are recycled.
    pub max_batches: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { max_batches: 8 }
    }
}

/// What `render_frame` did with the display refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Both eye passes replayed; the frame is ready to present.
    Rendered,
    /// The refresh was spent resolving a blocking command; present nothing.
    SkippedForSyncResolve,
}

/// Producer-side submission failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// A second blocking command was issued while one is still in flight.
    /// The rendezvous register holds exactly one command.
    SynchronousCommandOutstanding,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::SynchronousCommandOutstanding => {
                write!(formatter, "a synchronous command is already outstanding")
            }
        }
    }
}

impl std::error::Error for SubmitError {}

/// Single-slot rendezvous for blocking commands.
enum SyncRegister {
    Idle,
    Pending(Box<dyn RenderCommand>),
    Resolved(CommandResult),
}

/// Everything guarded by the bridge mutex.
struct BridgeShared {
    /// Commands of the frame currently being recorded.
    live: CommandQueue,
    /// Side lane drained once per refresh, outside the per-eye replay.
    update_queue: CommandQueue,
    /// Closed frames waiting for the consumer.
    batches: CommandBatchSet,
    inside_frame: bool,
    sync: SyncRegister,
    /// Set when a rendezvous resolved mid-frame; the next `end_frame` then
    /// files its queue as already applied instead of scheduling a replay.
    sync_resolved_since_end_frame: bool,
    reset_requested: bool,
}

struct BridgeCore {
    state: Mutex<BridgeShared>,
    sync_resolved: Condvar,
    thread_names: ThreadNameRegistry,
}

impl BridgeCore {
    fn lock_state(&self) -> MutexGuard<'_, BridgeShared> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("command bridge state mutex poisoned"),
        }
    }

    fn wait_sync<'a>(&self, guard: MutexGuard<'a, BridgeShared>) -> MutexGuard<'a, BridgeShared> {
        match self.sync_resolved.wait(guard) {
            Ok(guard) => guard,
            Err(_) => panic!("command bridge state mutex poisoned"),
        }
    }
}

/// Content-thread handle. One per bridge; deliberately not `Clone`, the
/// queueing protocol assumes a single producer.
pub struct ProducerClient {
    core: Arc<BridgeCore>,
}

impl ProducerClient {
    /// Submit a command.
    ///
    /// Immediate commands run on the calling thread and return their result
    /// without touching the queues. Synchronous commands park the caller
    /// until the render thread executes them and hands the result back.
    /// Everything else is deferred and reports `CommandResult::None`.
    pub fn enqueue(&self, command: Box<dyn RenderCommand>) -> Result<CommandResult, SubmitError> {
        if command.can_process_immediately() {
            trace!("processing command {} immediately", command.name());
            return Ok(command.process_immediately());
        }

        if command.is_synchronous() {
            return self.enqueue_synchronous(command);
        }

        let for_update = command.is_for_update();
        let mut shared = self.core.lock_state();
        let issued = IssuedCommand::new(command, shared.inside_frame);
        if for_update {
            shared.update_queue.enqueue(issued);
        } else {
            shared.live.enqueue(issued);
        }
        Ok(CommandResult::None)
    }

    fn enqueue_synchronous(
        &self,
        command: Box<dyn RenderCommand>,
    ) -> Result<CommandResult, SubmitError> {
        let mut shared = self.core.lock_state();
        if !matches!(shared.sync, SyncRegister::Idle) {
            error!(
                "rejecting synchronous command {}: another one is outstanding",
                command.name()
            );
            return Err(SubmitError::SynchronousCommandOutstanding);
        }
        if shared.inside_frame {
            warn!(
                "synchronous command {} issued inside an open frame; the render thread will flush early",
                command.name()
            );
        }
        trace!("parking on synchronous command {}", command.name());
        shared.sync = SyncRegister::Pending(command);

        loop {
            match std::mem::replace(&mut shared.sync, SyncRegister::Idle) {
                SyncRegister::Resolved(result) => return Ok(result),
                not_yet_resolved => {
                    shared.sync = not_yet_resolved;
                    shared = self.core.wait_sync(shared);
                }
            }
        }
    }

    /// Open a frame bracket. Commands enqueued until `end_frame` replay once
    /// per eye. Unbalanced calls are tolerated with a warning.
    pub fn start_frame(&self) {
        let mut shared = self.core.lock_state();
        if shared.inside_frame {
            warn!("start_frame while a frame is already open");
        }
        shared.inside_frame = true;
    }

    /// Close the frame bracket and hand the recorded queue to the consumer.
    pub fn end_frame(&self) {
        let mut shared = self.core.lock_state();
        if !shared.inside_frame {
            warn!("end_frame without a matching start_frame");
        }
        shared.inside_frame = false;

        let state = &mut *shared;
        if state.sync_resolved_since_end_frame {
            // The rendezvous already flushed this frame's commands; file the
            // remainder without scheduling another replay.
            state.batches.append_queue_in(&mut state.live, true);
            state.sync_resolved_since_end_frame = false;
        } else {
            state.batches.copy_queue_in(&mut state.live);
        }
    }

    /// Request that all pending state be discarded. Applied by the render
    /// thread at the start of its next `render_frame`, never mid-replay.
    pub fn reset(&self) {
        trace!("bridge reset requested");
        self.core.lock_state().reset_requested = true;
    }

    /// True while a blocking command awaits the render thread.
    pub fn has_pending_synchronous_command(&self) -> bool {
        matches!(self.core.lock_state().sync, SyncRegister::Pending(_))
    }

    pub fn register_current_thread_name(&self, name: &str) {
        self.core.thread_names.register_current(name);
    }

    pub fn current_thread_name(&self) -> String {
        self.core.thread_names.label_for_current()
    }
}

/// Render-thread handle owning the graphics backend and the replayed state.
pub struct ConsumerDriver<B: GraphicsBackend> {
    core: Arc<BridgeCore>,
    backend: B,
    /// Consumer-private copy of the pending batches, replayed unlocked.
    shadow: CommandBatchSet,
    render_state: RenderState,
}

impl<B: GraphicsBackend> ConsumerDriver<B> {
    /// Drive one display refresh.
    ///
    /// When a blocking command is parked, everything issued before it is
    /// force-applied once, the command resolves, and the refresh is skipped.
    /// Otherwise pending batches move to the shadow set and are replayed
    /// twice, with each eye's matrices and viewport installed first. A
    /// requested reset is honored between those two phases.
    pub fn render_frame(
        &mut self,
        left_eye: EyeRenderParams,
        right_eye: EyeRenderParams,
    ) -> Result<FrameOutcome, ReplayFault> {
        let label = self.core.thread_names.label_for_current();
        let mut shared = self.core.lock_state();
        let mut cx = ExecuteContext {
            backend: &mut self.backend,
            render: &mut self.render_state,
            thread_label: &label,
        };

        let mut skip_present = false;
        let pending = match std::mem::replace(&mut shared.sync, SyncRegister::Idle) {
            SyncRegister::Pending(command) => Some(command),
            not_pending => {
                shared.sync = not_pending;
                None
            }
        };
        if let Some(command) = pending {
            let state = &mut *shared;
            if let Err(fault) = flush_for_rendezvous(&mut self.shadow, state, &mut cx) {
                // Re-park the command so a caller that survives the fault
                // can still resolve it on a later refresh.
                state.sync = SyncRegister::Pending(command);
                return Err(fault);
            }

            trace!("{label}: resolving blocking command {}", command.name());
            let result = command.execute(&mut cx);
            let fault = cx.backend.poll_fault();
            state.sync = SyncRegister::Resolved(result);
            state.sync_resolved_since_end_frame = true;
            self.core.sync_resolved.notify_all();

            if let Some(fault) = fault {
                if fault_is_tolerated(command.name()) {
                    error!(
                        "{label}: tolerated fault {fault:?} after blocking command {}",
                        command.name()
                    );
                } else {
                    return Err(ReplayFault {
                        command_name: String::from(command.name()),
                        fault,
                    });
                }
            }
            skip_present = true;
        }

        if shared.reset_requested {
            trace!("{label}: applying deferred bridge reset");
            let state = &mut *shared;
            state.live.clear();
            state.update_queue.clear();
            state.batches.clear();
            state.inside_frame = false;
            state.reset_requested = false;
            // A resolved rendezvous the producer has not collected yet stays
            // in place; clearing it would strand the parked thread.
            self.shadow.clear();
            cx.render.reset();
            self.core.thread_names.clear();
        }

        shared.update_queue.process(&mut cx, true, true)?;

        if skip_present {
            return Ok(FrameOutcome::SkippedForSyncResolve);
        }

        self.shadow.merge_from(&mut shared.batches);
        drop(shared);

        for eye in [left_eye, right_eye] {
            cx.render
                .set_view_and_projection_matrices(&eye.projection, &eye.view);
            cx.render.set_viewport(eye.viewport);
            cx.backend.apply_viewport(eye.viewport);
            self.shadow.process_all(&mut cx, false)?;
        }

        Ok(FrameOutcome::Rendered)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn render_state(&self) -> &RenderState {
        &self.render_state
    }

    pub fn uniforms_mut(&mut self) -> &mut MatrixUniformRegistry {
        self.render_state.uniforms_mut()
    }

    /// Classify a linked uniform by name against the alias tables.
    pub fn classify_matrix_uniform(
        &mut self,
        program: u32,
        location: i32,
        name: &str,
    ) -> Option<MatrixUniformKind> {
        self.render_state.uniforms_mut().register(program, location, name)
    }

    pub fn is_projection_matrix_uniform_location(&self, program: u32, location: i32) -> bool {
        self.render_state
            .uniforms()
            .is_projection_location(program, location)
    }

    pub fn is_model_view_matrix_uniform_location(&self, program: u32, location: i32) -> bool {
        self.render_state
            .uniforms()
            .is_model_view_location(program, location)
    }

    pub fn is_model_view_projection_matrix_uniform_location(
        &self,
        program: u32,
        location: i32,
    ) -> bool {
        self.render_state
            .uniforms()
            .is_model_view_projection_location(program, location)
    }

    pub fn register_current_thread_name(&self, name: &str) {
        self.core.thread_names.register_current(name);
    }

    pub fn current_thread_name(&self) -> String {
        self.core.thread_names.label_for_current()
    }
}

/// Apply everything issued before a parked blocking command: the consumer's
/// shadow set, the shared batches, and the still-open live queue, which is
/// then filed into the current batch as already applied.
fn flush_for_rendezvous(
    shadow: &mut CommandBatchSet,
    state: &mut BridgeShared,
    cx: &mut ExecuteContext<'_>,
) -> Result<(), ReplayFault> {
    shadow.process_all(cx, true)?;
    state.batches.process_all(cx, true)?;
    state.live.process(cx, false, true)?;
    state.batches.append_queue_in(&mut state.live, true);
    Ok(())
}

/// Build a connected producer/consumer pair around `backend`.
pub fn create_command_bridge<B: GraphicsBackend>(
    config: BridgeConfig,
    backend: B,
) -> (ProducerClient, ConsumerDriver<B>) {
    assert!(
        config.max_batches > 0,
        "max batches must be greater than zero"
    );

    let core = Arc::new(BridgeCore {
        state: Mutex::new(BridgeShared {
            live: CommandQueue::new(),
            update_queue: CommandQueue::new(),
            batches: CommandBatchSet::new(config.max_batches),
            inside_frame: false,
            sync: SyncRegister::Idle,
            sync_resolved_since_end_frame: false,
            reset_requested: false,
        }),
        sync_resolved: Condvar::new(),
        thread_names: ThreadNameRegistry::new(),
    });

    let producer = ProducerClient { core: core.clone() };
    let consumer = ConsumerDriver {
        core,
        backend,
        shadow: CommandBatchSet::new(config.max_batches),
        render_state: RenderState::default(),
    };
    (producer, consumer)
}
