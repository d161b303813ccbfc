//! GPU abstraction used by the pipeline scheduler.
//!
//! The core never talks to a graphics API directly. It compiles generated
//! fragment programs, looks up parameter locations, allocates intermediate
//! targets and issues full-screen draws through [`RenderBackend`].

mod wgpu_backend;

pub use wgpu_backend::{WgpuBackend, WgpuProgram, WgpuTexture, WgpuVertexStage};

use crate::error::BackendError;
use crate::shader::FilterMode;
use serde::{Deserialize, Serialize};

/// Pixel format of the intermediate buffers.
///
/// Variants are ordered by precision; the pipeline picks the maximum
/// requested by its nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Let the pipeline decide from the nodes' preferences.
    #[default]
    #[serde(rename = "dont_care")]
    DontCare,
    /// 8 bits per channel, unsigned normalized.
    #[serde(rename = "rgba8")]
    Rgba8,
    /// 16 bits per channel, unsigned normalized.
    #[serde(rename = "rgba16")]
    Rgba16,
    /// 16-bit float per channel.
    #[serde(rename = "rgba16f")]
    Rgba16F,
    /// 32-bit float per channel.
    #[serde(rename = "rgba32f")]
    Rgba32F,
}

impl PixelFormat {
    /// Parses the value of a `@format` annotation (already lowercased).
    pub fn from_annotation(value: &str) -> Option<Self> {
        match value {
            "int8" | "rgba8" | "8" => Some(PixelFormat::Rgba8),
            "int16" | "rgba16" | "16" => Some(PixelFormat::Rgba16),
            "float16" | "half" | "rgba16f" => Some(PixelFormat::Rgba16F),
            "float32" | "float" | "rgba32f" => Some(PixelFormat::Rgba32F),
            _ => None,
        }
    }
}

/// Byte offset of a parameter inside a program's parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// One member of the generated parameter block.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformSlot {
    pub name: String,
    pub offset: u32,
    pub components: u32,
}

/// Maps lines of a generated program back to the shader file it wraps.
///
/// Lines before the user code report as `8000+`, lines of the wrapper after
/// it as `9000+`, matching the `#line` directives written into the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMap {
    /// Line of the program holding the first line of user code (1-based).
    pub user_start: u32,
    /// Line of the program holding the `#line` directive after the user code.
    pub footer: u32,
}

impl LineMap {
    pub const PRELUDE_LINE: u32 = 8000;
    pub const FOOTER_LINE: u32 = 9000;

    /// File line for a 1-based program line.
    pub fn source_line(&self, line: u32) -> u32 {
        if line > self.footer {
            Self::FOOTER_LINE + (line - self.footer - 1)
        } else if line >= self.user_start {
            line - self.user_start + 1
        } else {
            Self::PRELUDE_LINE + line.saturating_sub(1)
        }
    }
}

/// A generated fragment program ready for compilation.
#[derive(Debug, Clone, Copy)]
pub struct ProgramSource<'a> {
    /// Human-readable label, e.g. `blur pass 2`.
    pub label: &'a str,
    /// Complete fragment-stage source.
    pub code: &'a str,
    /// Layout of the parameter block declared in `code`.
    pub uniforms: &'a [UniformSlot],
    /// Size of the parameter block in bytes (0 if there is none).
    pub uniform_block_size: u32,
    /// Where the user code sits inside `code`.
    pub lines: LineMap,
}

/// A successfully compiled program plus any compiler output.
pub struct Compiled<P> {
    pub program: P,
    pub log: String,
}

/// A parameter value destined for one location.
#[derive(Debug, Clone, Copy)]
pub struct UniformUpload<'a> {
    pub location: UniformLocation,
    pub values: &'a [f32],
}

/// Everything a backend needs for one full-screen pass.
pub struct PassDraw<'a, B: RenderBackend + ?Sized> {
    pub program: &'a B::Program,
    pub input: &'a B::Texture,
    pub output: &'a B::Texture,
    pub filter: FilterMode,
    pub image_size: [f32; 2],
    /// Screen [0,1] to shader coordinate space: offset xy, scale zw.
    pub rel2map: [f32; 4],
    /// Shader coordinate space back to texture [0,1]: offset xy, scale zw.
    pub map2tex: [f32; 4],
    pub uniforms: &'a [UniformUpload<'a>],
}

/// Compile/link/draw primitives the pipeline consumes.
pub trait RenderBackend {
    /// Shared pass-through vertex stage.
    type VertexStage;
    /// A linked program for one pass. Dropping it releases the GPU objects.
    type Program;
    /// A texture that can be sampled and, for targets, rendered into.
    type Texture;

    /// Compiles the vertex stage shared by every pass.
    fn create_vertex_stage(&mut self) -> Result<Self::VertexStage, BackendError>;

    /// Compiles a fragment program and links it with the vertex stage.
    /// On failure the compiler log is returned.
    fn compile_program(
        &mut self,
        vertex: &Self::VertexStage,
        source: &ProgramSource<'_>,
    ) -> Result<Compiled<Self::Program>, String>;

    /// Looks up where a named parameter lives in a compiled program.
    fn uniform_location(&self, program: &Self::Program, name: &str) -> Option<UniformLocation>;

    /// Allocates a 4-channel render target.
    fn create_target(&mut self, width: u32, height: u32, format: PixelFormat) -> Self::Texture;

    /// Starts a frame; sets the viewport for all following draws.
    fn begin_frame(&mut self, width: u32, height: u32);

    /// Renders one pass from `draw.input` into `draw.output`.
    fn draw(&mut self, draw: PassDraw<'_, Self>);

    /// Flushes all pending work and waits for the GPU to finish.
    fn finish(&mut self);
}
