//! Annotated fragment-shader front end.
//!
//! A filter file is plain GLSL plus a small contract: parameters are
//! declared as `uniform float|vec2|vec3|vec4` (optionally followed by a
//! comment with `@key=value` annotations), and one or more entry points
//! `vec3|vec4 run[_passN](vec2|vec3|vec4 arg)` define the passes. The
//! [`parser`] recognises those constructs and [`codegen`] wraps the user code
//! into complete per-pass fragment programs.

pub mod annotations;
pub mod codegen;
pub mod lexer;
pub mod parser;

pub use codegen::{generate, strip_uniforms, GeneratedPass};
pub use parser::{parse, ParsedShader, PassDecl};

/// Highest shader version code accepted in `@version` annotations.
pub const MAX_SUPPORTED_VERSION: f32 = 1.0;

/// What a pass's entry point receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassInput {
    /// Mapped coordinate; the shader samples through `pixel()` itself.
    Coord,
    /// Source RGB; alpha is carried through unless the pass returns RGBA.
    Rgb,
    /// Source RGBA.
    Rgba,
}

/// What a pass's entry point returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutput {
    Rgb,
    Rgba,
}

/// Texture filtering used when sampling the pass input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Linear,
    Nearest,
}

/// Coordinate system handed to coordinate-input passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordMode {
    /// Pixel coordinates, `[0,width] x [0,height]`.
    #[default]
    Pixel,
    /// Texture coordinates, `[0,1] x [0,1]`.
    None,
    /// Centered, `[-1,1]` along the shorter axis, aspect preserved.
    Relative,
}

impl CoordMode {
    /// Returns `(rel2map, map2tex)`: the mapping from normalized screen
    /// position into shader coordinates and its inverse, each as
    /// `[offset_x, offset_y, scale_x, scale_y]`.
    pub fn mapping(self, width: u32, height: u32) -> ([f32; 4], [f32; 4]) {
        let (w, h) = (f64::from(width.max(1)), f64::from(height.max(1)));
        let (ox, oy, sx, sy) = match self {
            CoordMode::Pixel => (0.0, 0.0, w, h),
            CoordMode::Relative => {
                let ox = -(w / h).max(1.0);
                let oy = -(h / w).max(1.0);
                (ox, oy, -2.0 * ox, -2.0 * oy)
            }
            CoordMode::None => (0.0, 0.0, 1.0, 1.0),
        };
        let rel2map = [ox as f32, oy as f32, sx as f32, sy as f32];
        let map2tex = [(-ox / sx) as f32, (-oy / sy) as f32, (1.0 / sx) as f32, (1.0 / sy) as f32];
        (rel2map, map2tex)
    }
}
