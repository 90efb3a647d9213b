//! Shared vocabulary between the command-issuing (producer) thread and the
//! command-executing (consumer) thread.
//!
//! This crate defines the `RenderCommand` contract, the opaque result type a
//! command may return, the `GraphicsBackend` seam the consumer owns, and the
//! consumer-side `RenderState` (active matrices, viewport, framebuffer,
//! heuristic matrix-uniform registry) that commands read and write while they
//! execute.

pub use matrix_uniforms::{MatrixUniformKind, MatrixUniformRegistry, ProgramUniformLocation};

mod matrix_uniforms;

pub type TransformMatrix4x4 = [f32; 16];

pub const IDENTITY_MATRIX4X4: TransformMatrix4x4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Column-major 4x4 matrix product `left * right`.
pub fn multiply_matrix4x4(
    left: &TransformMatrix4x4,
    right: &TransformMatrix4x4,
) -> TransformMatrix4x4 {
    let mut out = [0.0; 16];
    for column in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for inner in 0..4 {
                sum += left[inner * 4 + row] * right[column * 4 + inner];
            }
            out[column * 4 + row] = sum;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

/// Per-eye camera parameters installed before each stereo replay pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeRenderParams {
    pub projection: TransformMatrix4x4,
    pub view: TransformMatrix4x4,
    pub viewport: Viewport,
}

/// Value a command may hand back to its issuer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandResult {
    None,
    Handle(u32),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Error condition reported by the graphics context after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsFault {
    InvalidEnum,
    InvalidValue,
    InvalidOperation,
    InvalidFramebufferOperation,
    OutOfMemory,
    ContextLost,
    Unknown(u32),
}

/// A fault observed right after a named command executed. Fatal for every
/// command outside the tolerated whitelist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFault {
    pub command_name: String,
    pub fault: GraphicsFault,
}

pub const PIXEL_STORE_COMMAND_NAME: &str = "pixel_store";

/// Commands whose faults are logged and skipped instead of aborting replay.
/// Pixel-store state is the only known case: content routinely pushes pack
/// parameters the context rejects without corrupting any object state.
pub const FAULT_TOLERANT_COMMAND_NAMES: &[&str] = &[PIXEL_STORE_COMMAND_NAME];

pub fn fault_is_tolerated(command_name: &str) -> bool {
    FAULT_TOLERANT_COMMAND_NAMES.contains(&command_name)
}

/// The graphics context seam owned by the consumer thread.
pub trait GraphicsBackend {
    /// Issue the platform viewport call for an eye pass.
    fn apply_viewport(&mut self, viewport: Viewport);

    /// Return and clear the oldest pending context error, if any.
    fn poll_fault(&mut self) -> Option<GraphicsFault>;
}

/// Backend that accepts everything and reports nothing. Used for commands
/// executed on the producer thread, which by contract never touch the
/// graphics context.
#[derive(Debug, Default)]
pub struct DetachedBackend;

impl GraphicsBackend for DetachedBackend {
    fn apply_viewport(&mut self, _viewport: Viewport) {}

    fn poll_fault(&mut self) -> Option<GraphicsFault> {
        None
    }
}

/// Everything a command may touch while executing on the consumer thread.
pub struct ExecuteContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub render: &'a mut RenderState,
    /// Registered name of the executing thread, for diagnostics only.
    pub thread_label: &'a str,
}

/// A unit of deferred work issued by the producer thread.
///
/// Implementations capture their arguments at issue time and replay them in
/// `execute`. A command reporting `can_process_immediately` runs on the
/// producer thread through `process_immediately` and must not touch the
/// graphics backend or the render state; everything else executes on the
/// consumer thread with full context access.
pub trait RenderCommand: Send {
    fn name(&self) -> &'static str;

    /// Whether the issuer blocks until the result is available.
    fn is_synchronous(&self) -> bool {
        false
    }

    /// Whether the command bypasses queueing entirely.
    fn can_process_immediately(&self) -> bool {
        false
    }

    /// Whether the command belongs to the update-only lane, which runs
    /// exactly once per rendered frame regardless of eye count.
    fn is_for_update(&self) -> bool {
        false
    }

    /// Producer-thread fast path for `can_process_immediately` commands.
    fn process_immediately(&self) -> CommandResult {
        CommandResult::None
    }

    fn execute(&self, cx: &mut ExecuteContext<'_>) -> CommandResult;
}

/// Mutable state shared by all commands replayed on the consumer thread:
/// the active camera matrices, viewport, framebuffer and program, plus the
/// heuristic registry that classifies matrix uniforms in uploaded shaders.
///
/// Owned exclusively by the consumer driver, so none of it is locked.
#[derive(Debug)]
pub struct RenderState {
    projection_matrix: TransformMatrix4x4,
    view_matrix: TransformMatrix4x4,
    view_projection_matrix: TransformMatrix4x4,
    camera_world_matrix: TransformMatrix4x4,
    camera_world_matrix_translation_only: TransformMatrix4x4,
    viewport: Viewport,
    framebuffer: u32,
    active_program: u32,
    uniforms: MatrixUniformRegistry,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            projection_matrix: IDENTITY_MATRIX4X4,
            view_matrix: IDENTITY_MATRIX4X4,
            view_projection_matrix: IDENTITY_MATRIX4X4,
            camera_world_matrix: IDENTITY_MATRIX4X4,
            camera_world_matrix_translation_only: IDENTITY_MATRIX4X4,
            viewport: Viewport::default(),
            framebuffer: 0,
            active_program: 0,
            uniforms: MatrixUniformRegistry::default(),
        }
    }
}

impl RenderState {
    /// Install one eye's camera matrices and derive the combined
    /// view-projection matrix.
    pub fn set_view_and_projection_matrices(
        &mut self,
        projection: &TransformMatrix4x4,
        view: &TransformMatrix4x4,
    ) {
        self.projection_matrix = *projection;
        self.view_matrix = *view;
        self.view_projection_matrix = multiply_matrix4x4(view, projection);
    }

    pub fn projection_matrix(&self) -> &TransformMatrix4x4 {
        &self.projection_matrix
    }

    pub fn view_matrix(&self) -> &TransformMatrix4x4 {
        &self.view_matrix
    }

    pub fn view_projection_matrix(&self) -> &TransformMatrix4x4 {
        &self.view_projection_matrix
    }

    /// Store the head pose in world space. The translation-only variant
    /// keeps an identity rotation with the translation components negated,
    /// which is what sky-box style content expects to consume.
    pub fn set_camera_world_matrix(&mut self, camera_world_matrix: &TransformMatrix4x4) {
        self.camera_world_matrix = *camera_world_matrix;
        self.camera_world_matrix_translation_only = IDENTITY_MATRIX4X4;
        self.camera_world_matrix_translation_only[12] = -camera_world_matrix[12];
        self.camera_world_matrix_translation_only[13] = -camera_world_matrix[13];
        self.camera_world_matrix_translation_only[14] = -camera_world_matrix[14];
    }

    pub fn camera_world_matrix(&self) -> &TransformMatrix4x4 {
        &self.camera_world_matrix
    }

    pub fn camera_world_matrix_translation_only(&self) -> &TransformMatrix4x4 {
        &self.camera_world_matrix_translation_only
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_framebuffer(&mut self, framebuffer: u32) {
        self.framebuffer = framebuffer;
    }

    pub fn framebuffer(&self) -> u32 {
        self.framebuffer
    }

    pub fn set_active_program(&mut self, program: u32) {
        self.active_program = program;
    }

    pub fn active_program(&self) -> u32 {
        self.active_program
    }

    pub fn uniforms(&self) -> &MatrixUniformRegistry {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut MatrixUniformRegistry {
        &mut self.uniforms
    }

    /// Return every field to its initial value and re-seed the uniform alias
    /// tables.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
