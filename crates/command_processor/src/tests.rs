//! Bridge behavior tests.
//!
//! This module validates frame bracketing, twice-per-eye replay, exactly-once
//! side effects, the synchronous rendezvous, the update lane, deferred reset,
//! and fault propagation through `render_frame`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use command_protocol::{
    CommandResult, ExecuteContext, GraphicsBackend, GraphicsFault, IDENTITY_MATRIX4X4,
    RenderCommand, Viewport,
};

use super::*;

struct RecordingBackend {
    applied_viewports: Vec<Viewport>,
    pending_faults: Vec<GraphicsFault>,
}

impl RecordingBackend {
    fn clean() -> Self {
        Self {
            applied_viewports: Vec::new(),
            pending_faults: Vec::new(),
        }
    }
}

impl GraphicsBackend for RecordingBackend {
    fn apply_viewport(&mut self, viewport: Viewport) {
        self.applied_viewports.push(viewport);
    }

    fn poll_fault(&mut self) -> Option<GraphicsFault> {
        if self.pending_faults.is_empty() {
            None
        } else {
            Some(self.pending_faults.remove(0))
        }
    }
}

struct CountingCommand {
    name: &'static str,
    executions: Arc<AtomicU32>,
}

impl CountingCommand {
    fn boxed(name: &'static str, executions: &Arc<AtomicU32>) -> Box<Self> {
        Box::new(Self {
            name,
            executions: executions.clone(),
        })
    }
}

impl RenderCommand for CountingCommand {
    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(&self, _cx: &mut ExecuteContext<'_>) -> CommandResult {
        self.executions.fetch_add(1, Ordering::SeqCst);
        CommandResult::None
    }
}

/// Appends its name to a shared log, so tests can check replay order.
struct OrderedCommand {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl RenderCommand for OrderedCommand {
    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(&self, _cx: &mut ExecuteContext<'_>) -> CommandResult {
        self.log.lock().expect("order log").push(self.name);
        CommandResult::None
    }
}

/// Records the viewport installed in the render state at execution time, so
/// tests can check which eye pass a replay belonged to.
struct ViewportProbe {
    seen: Arc<Mutex<Vec<Viewport>>>,
}

impl RenderCommand for ViewportProbe {
    fn name(&self) -> &'static str {
        "viewport_probe"
    }

    fn execute(&self, cx: &mut ExecuteContext<'_>) -> CommandResult {
        self.seen.lock().expect("probe lock").push(cx.render.viewport());
        CommandResult::None
    }
}

struct BlockingHandleQuery {
    handle: u32,
    executions: Arc<AtomicU32>,
}

impl RenderCommand for BlockingHandleQuery {
    fn name(&self) -> &'static str {
        "blocking_handle_query"
    }

    fn is_synchronous(&self) -> bool {
        true
    }

    fn execute(&self, _cx: &mut ExecuteContext<'_>) -> CommandResult {
        self.executions.fetch_add(1, Ordering::SeqCst);
        CommandResult::Handle(self.handle)
    }
}

struct ImmediateAnswer;

impl RenderCommand for ImmediateAnswer {
    fn name(&self) -> &'static str {
        "immediate_answer"
    }

    fn can_process_immediately(&self) -> bool {
        true
    }

    fn process_immediately(&self) -> CommandResult {
        CommandResult::Int(42)
    }

    fn execute(&self, _cx: &mut ExecuteContext<'_>) -> CommandResult {
        panic!("immediate command must not reach the render thread")
    }
}

struct PoseUpdate {
    executions: Arc<AtomicU32>,
}

impl RenderCommand for PoseUpdate {
    fn name(&self) -> &'static str {
        "pose_update"
    }

    fn is_for_update(&self) -> bool {
        true
    }

    fn execute(&self, _cx: &mut ExecuteContext<'_>) -> CommandResult {
        self.executions.fetch_add(1, Ordering::SeqCst);
        CommandResult::None
    }
}

fn eye(viewport: Viewport) -> EyeRenderParams {
    EyeRenderParams {
        projection: IDENTITY_MATRIX4X4,
        view: IDENTITY_MATRIX4X4,
        viewport,
    }
}

fn left_eye() -> EyeRenderParams {
    eye(Viewport::new(0, 0, 960, 1080))
}

fn right_eye() -> EyeRenderParams {
    eye(Viewport::new(960, 0, 960, 1080))
}

#[test]
fn frame_commands_replay_once_per_eye_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    producer.start_frame();
    producer
        .enqueue(Box::new(ViewportProbe { seen: seen.clone() }))
        .expect("enqueue");
    producer.end_frame();

    let outcome = consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");

    assert_eq!(outcome, FrameOutcome::Rendered);
    assert_eq!(
        *seen.lock().expect("probe lock"),
        vec![left_eye().viewport, right_eye().viewport]
    );
    assert_eq!(
        consumer.backend().applied_viewports,
        vec![left_eye().viewport, right_eye().viewport]
    );
    // The render state is left at the last installed eye.
    assert_eq!(consumer.render_state().viewport(), right_eye().viewport);
}

#[test]
fn setup_commands_apply_exactly_once() {
    let setup = Arc::new(AtomicU32::new(0));
    let draw = Arc::new(AtomicU32::new(0));
    let (producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    // Issued outside the bracket: a state mutation that must not repeat.
    producer
        .enqueue(CountingCommand::boxed("create_buffer", &setup))
        .expect("enqueue");
    producer.start_frame();
    producer
        .enqueue(CountingCommand::boxed("draw_scene", &draw))
        .expect("enqueue");
    producer.end_frame();

    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");

    assert_eq!(setup.load(Ordering::SeqCst), 1);
    assert_eq!(draw.load(Ordering::SeqCst), 2);
}

#[test]
fn empty_refresh_renders_nothing_but_still_installs_eyes() {
    let (_producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    let outcome = consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");

    assert_eq!(outcome, FrameOutcome::Rendered);
    assert_eq!(consumer.backend().applied_viewports.len(), 2);
}

#[test]
fn consumer_lag_drains_frames_in_submission_order() {
    let first = Arc::new(AtomicU32::new(0));
    let second = Arc::new(AtomicU32::new(0));
    let (producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    producer.start_frame();
    producer
        .enqueue(CountingCommand::boxed("frame_one", &first))
        .expect("enqueue");
    producer.end_frame();
    producer.start_frame();
    producer
        .enqueue(CountingCommand::boxed("frame_two", &second))
        .expect("enqueue");
    producer.end_frame();

    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");
    assert_eq!(first.load(Ordering::SeqCst), 2);
    assert_eq!(second.load(Ordering::SeqCst), 0);

    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");
    assert_eq!(second.load(Ordering::SeqCst), 2);
}

#[test]
fn backlog_replays_frames_in_submission_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    // Two frames pile up before the first refresh.
    for name in ["frame_a", "frame_b"] {
        producer.start_frame();
        producer
            .enqueue(Box::new(OrderedCommand {
                name,
                log: log.clone(),
            }))
            .expect("enqueue");
        producer.end_frame();
    }
    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");

    // A third frame closes while the second is still pending.
    producer.start_frame();
    producer
        .enqueue(Box::new(OrderedCommand {
            name: "frame_c",
            log: log.clone(),
        }))
        .expect("enqueue");
    producer.end_frame();

    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");
    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");

    assert_eq!(
        *log.lock().expect("order log"),
        vec!["frame_a", "frame_a", "frame_b", "frame_b", "frame_c", "frame_c"]
    );
}

#[test]
fn blocking_command_resolves_through_the_render_thread() {
    let flush = Arc::new(AtomicU32::new(0));
    let resolved = Arc::new(AtomicU32::new(0));
    let after = Arc::new(AtomicU32::new(0));
    let (producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    let producer_flush = flush.clone();
    let producer_resolved = resolved.clone();
    let producer_after = after.clone();
    let content_thread = thread::spawn(move || {
        producer.register_current_thread_name("content");
        producer.start_frame();
        producer
            .enqueue(CountingCommand::boxed("before_query", &producer_flush))
            .expect("enqueue");
        let result = producer
            .enqueue(Box::new(BlockingHandleQuery {
                handle: 7,
                executions: producer_resolved,
            }))
            .expect("blocking command resolves");
        producer
            .enqueue(CountingCommand::boxed("after_query", &producer_after))
            .expect("enqueue");
        producer.end_frame();
        result
    });

    let mut saw_skipped_refresh = false;
    while !content_thread.is_finished() {
        let outcome = consumer
            .render_frame(left_eye(), right_eye())
            .expect("render");
        if outcome == FrameOutcome::SkippedForSyncResolve {
            saw_skipped_refresh = true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    let result = content_thread.join().expect("content thread");

    assert_eq!(result, CommandResult::Handle(7));
    assert!(saw_skipped_refresh);
    assert_eq!(resolved.load(Ordering::SeqCst), 1);
    // The early flush applied the queued command exactly once and the
    // interrupted frame is not replayed afterwards.
    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");
    assert_eq!(flush.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[test]
fn second_blocking_command_is_rejected_while_one_is_parked() {
    let resolved = Arc::new(AtomicU32::new(0));
    let (producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());
    let producer = Arc::new(producer);

    let parked_resolved = resolved.clone();
    let parked_producer = producer.clone();
    let parked = thread::spawn(move || {
        parked_producer
            .enqueue(Box::new(BlockingHandleQuery {
                handle: 1,
                executions: parked_resolved,
            }))
            .expect("first blocking command resolves")
    });

    while !producer.has_pending_synchronous_command() {
        thread::yield_now();
    }

    let refused = producer.enqueue(Box::new(BlockingHandleQuery {
        handle: 2,
        executions: resolved.clone(),
    }));
    assert_eq!(refused, Err(SubmitError::SynchronousCommandOutstanding));

    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");
    let result = parked.join().expect("parked thread");
    assert_eq!(result, CommandResult::Handle(1));
    assert_eq!(resolved.load(Ordering::SeqCst), 1);
}

#[test]
fn immediate_commands_run_on_the_calling_thread() {
    let (producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    let result = producer.enqueue(Box::new(ImmediateAnswer)).expect("enqueue");
    assert_eq!(result, CommandResult::Int(42));

    // Nothing was queued for the render thread.
    let outcome = consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");
    assert_eq!(outcome, FrameOutcome::Rendered);
}

#[test]
fn update_lane_runs_once_per_refresh_outside_the_eye_passes() {
    let updates = Arc::new(AtomicU32::new(0));
    let (producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    producer
        .enqueue(Box::new(PoseUpdate {
            executions: updates.clone(),
        }))
        .expect("enqueue");

    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    // Drained: the next refresh does not repeat it.
    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

#[test]
fn reset_discards_pending_work_before_the_next_replay() {
    let draw = Arc::new(AtomicU32::new(0));
    let (producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    producer.start_frame();
    producer
        .enqueue(CountingCommand::boxed("doomed_draw", &draw))
        .expect("enqueue");
    producer.end_frame();
    producer.reset();

    let outcome = consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");

    assert_eq!(outcome, FrameOutcome::Rendered);
    assert_eq!(draw.load(Ordering::SeqCst), 0);
}

#[test]
fn unbalanced_frame_brackets_are_tolerated() {
    let draw = Arc::new(AtomicU32::new(0));
    let (producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    // end without start, then a double start: warned, never fatal.
    producer.end_frame();
    producer.start_frame();
    producer.start_frame();
    producer
        .enqueue(CountingCommand::boxed("draw", &draw))
        .expect("enqueue");
    producer.end_frame();

    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");
    assert_eq!(draw.load(Ordering::SeqCst), 2);
}

#[test]
fn fatal_fault_aborts_the_refresh_with_the_command_name() {
    let draw = Arc::new(AtomicU32::new(0));
    let mut backend = RecordingBackend::clean();
    backend.pending_faults.push(GraphicsFault::OutOfMemory);
    let (producer, mut consumer) = create_command_bridge(BridgeConfig::default(), backend);

    producer.start_frame();
    producer
        .enqueue(CountingCommand::boxed("bad_draw", &draw))
        .expect("enqueue");
    producer.end_frame();

    let fault = consumer
        .render_frame(left_eye(), right_eye())
        .expect_err("fault should surface");
    assert_eq!(fault.command_name, "bad_draw");
    assert_eq!(fault.fault, GraphicsFault::OutOfMemory);
}

#[test]
fn driver_classifies_matrix_uniforms_directly() {
    let (_producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    assert_eq!(
        consumer.classify_matrix_uniform(3, 0, "uPMatrix"),
        Some(MatrixUniformKind::Projection)
    );
    consumer.uniforms_mut().add_model_view_alias("u_customView");
    assert_eq!(
        consumer.classify_matrix_uniform(3, 1, "u_customView"),
        Some(MatrixUniformKind::ModelView)
    );

    assert!(consumer.is_projection_matrix_uniform_location(3, 0));
    assert!(consumer.is_model_view_matrix_uniform_location(3, 1));
    assert!(!consumer.is_model_view_projection_matrix_uniform_location(3, 0));
}

#[test]
fn producer_handle_moves_across_threads() {
    let draw = Arc::new(AtomicU32::new(0));
    let (producer, mut consumer) =
        create_command_bridge(BridgeConfig::default(), RecordingBackend::clean());

    let producer_draw = draw.clone();
    thread::spawn(move || {
        producer.register_current_thread_name("content");
        assert_eq!(producer.current_thread_name(), "content");
        producer.start_frame();
        producer
            .enqueue(CountingCommand::boxed("draw", &producer_draw))
            .expect("enqueue");
        producer.end_frame();
    })
    .join()
    .expect("content thread");

    consumer.register_current_thread_name("render");
    consumer
        .render_frame(left_eye(), right_eye())
        .expect("render");
    assert_eq!(draw.load(Ordering::SeqCst), 2);
}
