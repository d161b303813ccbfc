//! Ordered filter chain rendered through two ping-pong buffers.

use crate::error::{BackendError, LoadError};
use crate::files::ShaderFiles;
use crate::gpu::{PassDraw, PixelFormat, RenderBackend, UniformUpload};
use crate::node::{LoadContext, Node};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Where the result of the last render lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureSlot {
    /// Nothing ran; the result is the caller's source texture.
    #[default]
    Source,
    /// One of the two intermediate buffers.
    PingPong(usize),
}

struct Targets<T> {
    textures: [T; 2],
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// A chain of filter nodes plus the GPU resources to run it.
pub struct Pipeline<B: RenderBackend> {
    backend: B,
    files: Box<dyn ShaderFiles>,
    vertex: B::VertexStage,
    nodes: Vec<Node<B>>,
    targets: Option<Targets<B::Texture>>,
    result: TextureSlot,
    format: PixelFormat,
    changed: bool,
    last_render_time: Duration,
}

impl<B: RenderBackend> Pipeline<B> {
    /// Compiles the shared vertex stage. Intermediate buffers are allocated
    /// on the first render, once the image size is known.
    pub fn new(mut backend: B, files: impl ShaderFiles + 'static) -> Result<Self, BackendError> {
        let vertex = backend.create_vertex_stage()?;
        Ok(Self {
            backend,
            files: Box::new(files),
            vertex,
            nodes: Vec::new(),
            targets: None,
            result: TextureSlot::Source,
            format: PixelFormat::Rgba8,
            changed: true,
            last_render_time: Duration::ZERO,
        })
    }

    /// Loads a shader into a new node at `index`, or at the end if `index`
    /// is `None` or out of range. Load failures stay on the node.
    pub fn add_node(&mut self, path: impl AsRef<Path>, index: Option<usize>) -> &mut Node<B> {
        let mut node = Node::new();
        let mut ctx = LoadContext {
            backend: &mut self.backend,
            vertex: &self.vertex,
            files: self.files.as_ref(),
        };
        // errors are kept in the node's error text
        let _ = node.load(path.as_ref(), &mut ctx);

        let index = match index {
            Some(i) if i < self.nodes.len() => i,
            _ => self.nodes.len(),
        };
        self.nodes.insert(index, node);
        self.changed = true;
        &mut self.nodes[index]
    }

    pub fn remove_node(&mut self, index: usize) -> Option<Node<B>> {
        if index >= self.nodes.len() {
            return None;
        }
        self.changed = true;
        Some(self.nodes.remove(index))
    }

    /// Moves a node; the nodes in between shift by one.
    pub fn move_node(&mut self, from: usize, to: usize) {
        let len = self.nodes.len();
        if from >= len || to >= len || from == to {
            return;
        }
        if from < to {
            self.nodes[from..=to].rotate_left(1);
        } else {
            self.nodes[to..=from].rotate_right(1);
        }
        self.changed = true;
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.changed = true;
    }

    /// Forces the next [`Pipeline::changed`] to report a change.
    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    /// Returns whether the pipeline needs to be rendered again.
    ///
    /// This consumes the change state of the pipeline and of every node, so
    /// call it once per frame and render if it returns `true`.
    pub fn changed(&mut self) -> bool {
        let mut res = std::mem::take(&mut self.changed);
        for node in &mut self.nodes {
            res |= node.changed();
        }
        res
    }

    /// Highest precision requested by any node.
    pub fn detect_format(&self) -> PixelFormat {
        self.nodes
            .iter()
            .map(Node::preferred_format)
            .max()
            .unwrap_or(PixelFormat::Rgba8)
            .max(PixelFormat::Rgba8)
    }

    /// Highest precision requested by an enabled node. Nodes beyond a render
    /// limit still count, so changing the limit keeps the buffers.
    fn active_format(&self) -> PixelFormat {
        self.nodes
            .iter()
            .filter(|n| n.is_enabled())
            .map(Node::preferred_format)
            .max()
            .unwrap_or(PixelFormat::Rgba8)
            .max(PixelFormat::Rgba8)
    }

    /// Runs the first `max_nodes` nodes (all if `None`) over `source`.
    ///
    /// `PixelFormat::DontCare` picks the highest precision requested by any
    /// enabled node.
    pub fn render(
        &mut self,
        source: &B::Texture,
        width: u32,
        height: u32,
        format: PixelFormat,
        max_nodes: Option<usize>,
    ) {
        let start = Instant::now();
        let limit = max_nodes.unwrap_or(self.nodes.len()).min(self.nodes.len());
        let format = match format {
            PixelFormat::DontCare => self.active_format(),
            f => f,
        };

        let stale = self
            .targets
            .as_ref()
            .map_or(true, |t| t.width != width || t.height != height || t.format != format);
        if stale {
            info!("allocating {}x{} {:?} intermediate buffers", width, height, format);
            let textures = [
                self.backend.create_target(width, height, format),
                self.backend.create_target(width, height, format),
            ];
            self.targets = Some(Targets {
                textures,
                width,
                height,
                format,
            });
        }
        self.format = format;
        self.backend.begin_frame(width, height);

        let mut current = TextureSlot::Source;
        let mut pass_count = 0;
        if let Some(targets) = self.targets.as_ref() {
            for node in self.nodes[..limit].iter().filter(|n| n.is_enabled()) {
                for (index, pass) in node.passes().iter().enumerate() {
                    let (input, output) = match current {
                        TextureSlot::Source => (source, 0),
                        TextureSlot::PingPong(i) => (&targets.textures[i], 1 - i),
                    };
                    let (rel2map, map2tex) = pass.coord.mapping(width, height);
                    let uniforms: Vec<UniformUpload<'_>> = node
                        .params()
                        .iter()
                        .filter_map(|p| {
                            p.location(index).map(|location| UniformUpload {
                                location,
                                values: &p.value()[..p.ty().components()],
                            })
                        })
                        .collect();
                    self.backend.draw(PassDraw {
                        program: &pass.program,
                        input,
                        output: &targets.textures[output],
                        filter: pass.filter,
                        image_size: [width as f32, height as f32],
                        rel2map,
                        map2tex,
                        uniforms: &uniforms,
                    });
                    current = TextureSlot::PingPong(output);
                    pass_count += 1;
                }
            }
        }
        self.result = current;

        self.backend.finish();
        self.last_render_time = start.elapsed();
        debug!(
            "rendered {} passes at {}x{} in {:?}",
            pass_count, width, height, self.last_render_time
        );
    }

    /// Slot holding the result of the last render.
    pub fn result_slot(&self) -> TextureSlot {
        self.result
    }

    /// Texture behind an intermediate slot; `None` for the source slot or
    /// before the first render.
    pub fn texture(&self, slot: TextureSlot) -> Option<&B::Texture> {
        match slot {
            TextureSlot::Source => None,
            TextureSlot::PingPong(i) => self.targets.as_ref().map(|t| &t.textures[i]),
        }
    }

    /// The result of the last render, given the source it was rendered from.
    pub fn result_texture<'a>(&'a self, source: &'a B::Texture) -> &'a B::Texture {
        self.texture(self.result).unwrap_or(source)
    }

    /// Reloads every node whose file changed (all of them with `force`).
    pub fn reload_all(&mut self, force: bool) {
        let mut ctx = LoadContext {
            backend: &mut self.backend,
            vertex: &self.vertex,
            files: self.files.as_ref(),
        };
        for node in &mut self.nodes {
            // errors are kept in the node's error text
            let _ = node.reload(force, &mut ctx);
        }
        self.changed = true;
    }

    /// Reloads a single node; `None` if the index is out of range.
    pub fn reload_node(&mut self, index: usize, force: bool) -> Option<Result<usize, LoadError>> {
        let node = self.nodes.get_mut(index)?;
        let mut ctx = LoadContext {
            backend: &mut self.backend,
            vertex: &self.vertex,
            files: self.files.as_ref(),
        };
        let res = node.reload(force, &mut ctx);
        self.changed = true;
        Some(res)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: usize) -> Option<&Node<B>> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut Node<B>> {
        self.nodes.get_mut(index)
    }

    pub fn nodes(&self) -> &[Node<B>] {
        &self.nodes
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Format used by the last render.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Wall-clock time of the last render, including the final GPU finish.
    pub fn last_render_time(&self) -> Duration {
        self.last_render_time
    }
}
