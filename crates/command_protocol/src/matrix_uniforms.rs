//! Heuristic classification of camera-matrix uniforms in uploaded shaders.
//!
//! Content authored against unrelated engines names its camera uniforms by
//! convention. Matching those names at link time lets the consumer inject the
//! active per-eye matrices into arbitrary programs without content changes.

use log::trace;

/// Uniform location within one linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramUniformLocation {
    pub program: u32,
    pub location: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixUniformKind {
    Projection,
    ModelView,
    ModelViewProjection,
}

// Conventions observed in the wild: WebGL tutorial code, ThreeJS, PlayCanvas,
// Sketchfab exports, the Goo engine, and soft-shadow sample content.
const SEED_PROJECTION_ALIASES: &[&str] = &[
    "uProjectionMatrix",
    "uPMatrix",
    "projectionMatrix",
    "matrix_projection",
    "matrix_viewProjection",
    "ProjectionMatrix",
    "viewProjectionMatrix",
    "camProj",
];

const SEED_MODEL_VIEW_ALIASES: &[&str] = &[
    "uMVMatrix",
    "modelViewMatrix",
    "matrix_view",
    "matrix_model",
    "ModelViewMatrix",
    "viewMatrix",
    "worldMatrix",
    "camView",
];

const SEED_MODEL_VIEW_PROJECTION_ALIASES: &[&str] = &["uMatMVP"];

/// Alias tables plus the `(program, location)` pairs classified so far.
///
/// Consumer-thread only; never locked.
#[derive(Debug)]
pub struct MatrixUniformRegistry {
    projection_aliases: Vec<String>,
    model_view_aliases: Vec<String>,
    model_view_projection_aliases: Vec<String>,
    projection_locations: Vec<ProgramUniformLocation>,
    model_view_locations: Vec<ProgramUniformLocation>,
    model_view_projection_locations: Vec<ProgramUniformLocation>,
}

impl Default for MatrixUniformRegistry {
    fn default() -> Self {
        Self {
            projection_aliases: seeded(SEED_PROJECTION_ALIASES),
            model_view_aliases: seeded(SEED_MODEL_VIEW_ALIASES),
            model_view_projection_aliases: seeded(SEED_MODEL_VIEW_PROJECTION_ALIASES),
            projection_locations: Vec::new(),
            model_view_locations: Vec::new(),
            model_view_projection_locations: Vec::new(),
        }
    }
}

fn seeded(aliases: &[&str]) -> Vec<String> {
    aliases.iter().map(|alias| String::from(*alias)).collect()
}

impl MatrixUniformRegistry {
    /// Classify `(program, location)` by testing `name` against the alias
    /// tables. Returns the matched kind, or `None` for an ordinary uniform.
    pub fn register(
        &mut self,
        program: u32,
        location: i32,
        name: &str,
    ) -> Option<MatrixUniformKind> {
        let pair = ProgramUniformLocation { program, location };
        let kind = if self.projection_aliases.iter().any(|alias| alias == name) {
            record(&mut self.projection_locations, pair);
            MatrixUniformKind::Projection
        } else if self.model_view_aliases.iter().any(|alias| alias == name) {
            record(&mut self.model_view_locations, pair);
            MatrixUniformKind::ModelView
        } else if self
            .model_view_projection_aliases
            .iter()
            .any(|alias| alias == name)
        {
            record(&mut self.model_view_projection_locations, pair);
            MatrixUniformKind::ModelViewProjection
        } else {
            return None;
        };
        trace!(
            "matrix uniform '{name}' classified as {kind:?} at location {location} of program {program}"
        );
        Some(kind)
    }

    pub fn is_projection_location(&self, program: u32, location: i32) -> bool {
        self.projection_locations
            .contains(&ProgramUniformLocation { program, location })
    }

    pub fn is_model_view_location(&self, program: u32, location: i32) -> bool {
        self.model_view_locations
            .contains(&ProgramUniformLocation { program, location })
    }

    pub fn is_model_view_projection_location(&self, program: u32, location: i32) -> bool {
        self.model_view_projection_locations
            .contains(&ProgramUniformLocation { program, location })
    }

    pub fn add_projection_alias(&mut self, name: &str) {
        add_alias(&mut self.projection_aliases, name);
    }

    pub fn add_model_view_alias(&mut self, name: &str) {
        add_alias(&mut self.model_view_aliases, name);
    }

    pub fn add_model_view_projection_alias(&mut self, name: &str) {
        add_alias(&mut self.model_view_projection_aliases, name);
    }
}

fn record(locations: &mut Vec<ProgramUniformLocation>, pair: ProgramUniformLocation) {
    if !locations.contains(&pair) {
        locations.push(pair);
    }
}

fn add_alias(aliases: &mut Vec<String>, name: &str) {
    if !aliases.iter().any(|alias| alias == name) {
        aliases.push(String::from(name));
    }
}
