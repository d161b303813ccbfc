//! filterstack: GPU filter pipelines built from annotated GLSL shaders.
//!
//! Each shader file becomes a [`Node`] with parameters and up to four passes;
//! a [`Pipeline`] renders a chain of nodes and round-trips through a small
//! INI-like text format.

pub mod config;
pub mod error;
pub mod files;
pub mod gpu;
pub mod image_io;
pub mod node;
pub mod param;
pub mod pipeline;
pub mod serialize;
pub mod shader;
pub mod vfs;
pub mod watch;

#[cfg(test)]
mod testing;

pub use error::{BackendError, DocumentError, LoadError};
pub use gpu::{PixelFormat, RenderBackend};
pub use node::Node;
pub use param::{Parameter, ParameterType};
pub use pipeline::{Pipeline, TextureSlot};
