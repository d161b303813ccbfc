//! In-memory fakes for the file and GPU collaborators.

use crate::error::BackendError;
use crate::files::{FileFingerprint, ShaderFiles};
use crate::gpu::{Compiled, PassDraw, PixelFormat, ProgramSource, RenderBackend, UniformLocation, UniformSlot};
use crate::shader::FilterMode;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Shader files kept in memory. Clones share the same storage, so a test can
/// keep a handle after giving one to a pipeline.
#[derive(Debug, Clone, Default)]
pub struct MemoryFiles {
    files: Rc<RefCell<HashMap<PathBuf, (String, u128)>>>,
    clock: Rc<Cell<u128>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file and bumps its modification time.
    pub fn insert(&self, path: impl Into<PathBuf>, text: &str) {
        self.clock.set(self.clock.get() + 1);
        self.files
            .borrow_mut()
            .insert(path.into(), (text.to_string(), self.clock.get()));
    }

    pub fn remove(&self, path: &Path) {
        self.files.borrow_mut().remove(path);
    }
}

impl ShaderFiles for MemoryFiles {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .borrow()
            .get(path)
            .map(|(text, _)| text.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn fingerprint(&self, path: &Path) -> Option<FileFingerprint> {
        self.files.borrow().get(path).map(|(text, t)| FileFingerprint {
            size: text.len() as u64,
            modified_ns: *t,
        })
    }
}

#[derive(Debug)]
pub struct MockProgram {
    pub label: String,
    pub code: String,
    pub uniforms: Vec<UniformSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockTexture {
    pub id: usize,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// One recorded draw call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: String,
    pub input: usize,
    pub output: usize,
    pub filter: FilterMode,
    pub image_size: [f32; 2],
    pub rel2map: [f32; 4],
    pub uniforms: Vec<(u32, Vec<f32>)>,
}

/// A backend that compiles everything except the configured labels and
/// records every draw.
#[derive(Debug, Default)]
pub struct MockBackend {
    /// Program labels (`"<node> pass <n>"`) whose compilation fails.
    pub fail_labels: Vec<String>,
    pub compiled: Vec<String>,
    pub draws: Vec<DrawRecord>,
    pub targets_created: Vec<MockTexture>,
    pub frames: Vec<(u32, u32)>,
    pub finished: usize,
    next_id: usize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(labels: &[&str]) -> Self {
        Self {
            fail_labels: labels.iter().map(|l| l.to_string()).collect(),
            ..Self::default()
        }
    }

    /// A texture standing in for the caller's source image.
    pub fn source_texture(&mut self, width: u32, height: u32) -> MockTexture {
        self.texture(width, height, PixelFormat::Rgba8)
    }

    fn texture(&mut self, width: u32, height: u32, format: PixelFormat) -> MockTexture {
        self.next_id += 1;
        MockTexture {
            id: self.next_id,
            width,
            height,
            format,
        }
    }
}

impl RenderBackend for MockBackend {
    type VertexStage = ();
    type Program = MockProgram;
    type Texture = MockTexture;

    fn create_vertex_stage(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn compile_program(
        &mut self,
        _vertex: &(),
        source: &ProgramSource<'_>,
    ) -> Result<Compiled<MockProgram>, String> {
        if self.fail_labels.iter().any(|l| l == source.label) {
            return Err(format!("0:1(1): error: simulated failure in {}", source.label));
        }
        self.compiled.push(source.label.to_string());
        Ok(Compiled {
            program: MockProgram {
                label: source.label.to_string(),
                code: source.code.to_string(),
                uniforms: source.uniforms.to_vec(),
            },
            log: String::new(),
        })
    }

    fn uniform_location(&self, program: &MockProgram, name: &str) -> Option<UniformLocation> {
        program
            .uniforms
            .iter()
            .find(|u| u.name == name)
            .map(|u| UniformLocation(u.offset))
    }

    fn create_target(&mut self, width: u32, height: u32, format: PixelFormat) -> MockTexture {
        let tex = self.texture(width, height, format);
        self.targets_created.push(tex);
        tex
    }

    fn begin_frame(&mut self, width: u32, height: u32) {
        self.frames.push((width, height));
    }

    fn draw(&mut self, draw: PassDraw<'_, Self>) {
        self.draws.push(DrawRecord {
            program: draw.program.label.clone(),
            input: draw.input.id,
            output: draw.output.id,
            filter: draw.filter,
            image_size: draw.image_size,
            rel2map: draw.rel2map,
            uniforms: draw
                .uniforms
                .iter()
                .map(|u| (u.location.0, u.values.to_vec()))
                .collect(),
        });
    }

    fn finish(&mut self) {
        self.finished += 1;
    }
}
