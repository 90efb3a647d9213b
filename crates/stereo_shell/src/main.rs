//! Demo shell for the command bridge.
//!
//! A content thread records stereo frames at a fixed cadence while the main
//! thread acts as the render thread, replaying every frame twice against a
//! logging backend. Midway through the run the content thread parks on a
//! blocking query to show the rendezvous path; it finishes with a bridge
//! reset. Run with `RUST_LOG=stereo_shell=info,command_processor=trace` to
//! watch the replay.

use std::thread;
use std::time::Duration;

use command_processor::{BridgeConfig, FrameOutcome, ProducerClient, create_command_bridge};
use command_protocol::{
    CommandResult, ExecuteContext, EyeRenderParams, GraphicsBackend, GraphicsFault,
    IDENTITY_MATRIX4X4, RenderCommand, TransformMatrix4x4, Viewport,
};
use crossbeam_channel::tick;
use log::{error, info};

const FRAME_COUNT: u32 = 8;
const EYE_WIDTH: i32 = 960;
const EYE_HEIGHT: i32 = 1080;
const HALF_EYE_SEPARATION_METERS: f32 = 0.032;
const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const DEMO_PROGRAM_HANDLE: u32 = 1;
const PROJECTION_UNIFORM_LOCATION: i32 = 0;
const MODEL_VIEW_UNIFORM_LOCATION: i32 = 1;

/// Backend that narrates what a real graphics context would be asked to do.
struct LoggingBackend {
    viewport_calls: u32,
}

impl GraphicsBackend for LoggingBackend {
    fn apply_viewport(&mut self, viewport: Viewport) {
        self.viewport_calls += 1;
        info!(
            "backend viewport {}x{} at ({}, {})",
            viewport.width, viewport.height, viewport.x, viewport.y
        );
    }

    fn poll_fault(&mut self) -> Option<GraphicsFault> {
        None
    }
}

/// Setup command: activates a program and classifies its camera uniforms.
struct LinkProgram {
    program: u32,
}

impl RenderCommand for LinkProgram {
    fn name(&self) -> &'static str {
        "link_program"
    }

    fn execute(&self, cx: &mut ExecuteContext<'_>) -> CommandResult {
        cx.render.set_active_program(self.program);
        cx.render
            .uniforms_mut()
            .register(self.program, PROJECTION_UNIFORM_LOCATION, "projectionMatrix");
        cx.render
            .uniforms_mut()
            .register(self.program, MODEL_VIEW_UNIFORM_LOCATION, "modelViewMatrix");
        CommandResult::None
    }
}

/// Uniform upload that gets redirected to the active eye's matrix.
struct UploadCameraUniform {
    program: u32,
    location: i32,
}

impl RenderCommand for UploadCameraUniform {
    fn name(&self) -> &'static str {
        "upload_camera_uniform"
    }

    fn execute(&self, cx: &mut ExecuteContext<'_>) -> CommandResult {
        let uniforms = cx.render.uniforms();
        let matrix: TransformMatrix4x4 =
            if uniforms.is_projection_location(self.program, self.location) {
                *cx.render.projection_matrix()
            } else if uniforms.is_model_view_location(self.program, self.location) {
                *cx.render.view_matrix()
            } else {
                IDENTITY_MATRIX4X4
            };
        info!(
            "{}: uniform at location {} receives eye matrix with x translation {:+.3}",
            cx.thread_label, self.location, matrix[12]
        );
        CommandResult::None
    }
}

struct DrawScene {
    frame: u32,
}

impl RenderCommand for DrawScene {
    fn name(&self) -> &'static str {
        "draw_scene"
    }

    fn execute(&self, cx: &mut ExecuteContext<'_>) -> CommandResult {
        let viewport = cx.render.viewport();
        info!(
            "{}: drawing frame {} into viewport at ({}, {})",
            cx.thread_label, self.frame, viewport.x, viewport.y
        );
        CommandResult::None
    }
}

/// Blocking query: the content thread parks until the render thread answers.
struct BlockingTextureQuery;

impl RenderCommand for BlockingTextureQuery {
    fn name(&self) -> &'static str {
        "blocking_texture_query"
    }

    fn is_synchronous(&self) -> bool {
        true
    }

    fn execute(&self, cx: &mut ExecuteContext<'_>) -> CommandResult {
        info!("{}: answering blocking texture query", cx.thread_label);
        CommandResult::Handle(17)
    }
}

/// Pose-style update that must run once per refresh, outside the eye passes.
struct PosePredictionUpdate {
    frame: u32,
}

impl RenderCommand for PosePredictionUpdate {
    fn name(&self) -> &'static str {
        "pose_prediction_update"
    }

    fn is_for_update(&self) -> bool {
        true
    }

    fn execute(&self, cx: &mut ExecuteContext<'_>) -> CommandResult {
        info!(
            "{}: pose prediction refreshed for frame {}",
            cx.thread_label, self.frame
        );
        CommandResult::None
    }
}

fn eye_params(view_offset_x: f32, viewport: Viewport) -> EyeRenderParams {
    let mut view = IDENTITY_MATRIX4X4;
    view[12] = view_offset_x;
    EyeRenderParams {
        projection: IDENTITY_MATRIX4X4,
        view,
        viewport,
    }
}

fn content_loop(producer: ProducerClient) {
    producer.register_current_thread_name("content");
    producer
        .enqueue(Box::new(LinkProgram {
            program: DEMO_PROGRAM_HANDLE,
        }))
        .expect("enqueue link_program");

    let ticker = tick(FRAME_INTERVAL);
    for frame in 0..FRAME_COUNT {
        ticker.recv().expect("frame ticker");

        producer.start_frame();
        producer
            .enqueue(Box::new(UploadCameraUniform {
                program: DEMO_PROGRAM_HANDLE,
                location: PROJECTION_UNIFORM_LOCATION,
            }))
            .expect("enqueue upload_camera_uniform");
        producer
            .enqueue(Box::new(DrawScene { frame }))
            .expect("enqueue draw_scene");
        if frame == FRAME_COUNT / 2 {
            // Mid-frame rendezvous: the render thread flushes the recorded
            // commands early and answers before this frame is even closed.
            let handle = producer
                .enqueue(Box::new(BlockingTextureQuery))
                .expect("blocking query resolves");
            info!("content thread received {handle:?}");
        }
        producer.end_frame();

        producer
            .enqueue(Box::new(PosePredictionUpdate { frame }))
            .expect("enqueue pose_prediction_update");
    }

    producer.reset();
}

fn main() {
    env_logger::init();

    let (producer, mut consumer) = create_command_bridge(
        BridgeConfig::default(),
        LoggingBackend { viewport_calls: 0 },
    );
    consumer.register_current_thread_name("render");

    let left = eye_params(
        HALF_EYE_SEPARATION_METERS,
        Viewport::new(0, 0, EYE_WIDTH, EYE_HEIGHT),
    );
    let right = eye_params(
        -HALF_EYE_SEPARATION_METERS,
        Viewport::new(EYE_WIDTH, 0, EYE_WIDTH, EYE_HEIGHT),
    );

    let content_thread = thread::spawn(move || content_loop(producer));

    while !content_thread.is_finished() {
        match consumer.render_frame(left, right) {
            Ok(FrameOutcome::Rendered) => {}
            Ok(FrameOutcome::SkippedForSyncResolve) => {
                info!("refresh spent resolving a blocking command");
            }
            Err(fault) => {
                error!(
                    "replay aborted by {:?} after command {}",
                    fault.fault, fault.command_name
                );
                return;
            }
        }
        thread::sleep(FRAME_INTERVAL / 2);
    }
    content_thread.join().expect("content thread");

    // One more refresh applies the deferred reset the content thread left.
    consumer
        .render_frame(left, right)
        .expect("final refresh after reset");
    info!(
        "done: backend saw {} viewport installs",
        consumer.backend().viewport_calls
    );
}
