//! A single filter in a pipeline: one shader file, its passes and parameters.

use crate::error::{Diagnostics, LoadError};
use crate::files::{FileFingerprint, ShaderFiles};
use crate::gpu::{PixelFormat, RenderBackend};
use crate::param::Parameter;
use crate::shader::{self, CoordMode, FilterMode, PassInput, PassOutput};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Collaborators needed to (re)load a node.
pub struct LoadContext<'a, B: RenderBackend> {
    pub backend: &'a mut B,
    pub vertex: &'a B::VertexStage,
    pub files: &'a dyn ShaderFiles,
}

/// One compiled pass of a node.
pub struct Pass<P> {
    pub(crate) program: P,
    pub(crate) input: PassInput,
    pub(crate) output: PassOutput,
    pub(crate) filter: FilterMode,
    pub(crate) coord: CoordMode,
}

impl<P> Pass<P> {
    pub fn input(&self) -> PassInput {
        self.input
    }

    pub fn output(&self) -> PassOutput {
        self.output
    }

    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    pub fn coord(&self) -> CoordMode {
        self.coord
    }
}

/// A filter node.
///
/// A node whose file failed to load stays around with zero passes and a
/// non-empty error text; the renderer skips it.
pub struct Node<B: RenderBackend> {
    name: String,
    path: PathBuf,
    errors: String,
    enabled: bool,
    was_enabled: bool,
    program_changed: bool,
    fingerprint: Option<FileFingerprint>,
    preferred_format: PixelFormat,
    passes: Vec<Pass<B::Program>>,
    params: Vec<Parameter>,
}

impl<B: RenderBackend> Node<B> {
    /// Creates an enabled, not yet loaded node.
    pub fn new() -> Self {
        Self {
            name: String::new(),
            path: PathBuf::new(),
            errors: String::new(),
            enabled: true,
            was_enabled: true,
            program_changed: true,
            fingerprint: None,
            preferred_format: PixelFormat::Rgba8,
            passes: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Loads (or re-loads) the node from `path`.
    ///
    /// Returns the number of usable passes. A later pass failing to compile
    /// still returns `Ok` with the passes before it; the failure is in
    /// [`Node::errors`]. Current parameter values survive when the same file
    /// is loaded again.
    pub fn load(&mut self, path: &Path, ctx: &mut LoadContext<'_, B>) -> Result<usize, LoadError> {
        let previous = if path == self.path {
            std::mem::take(&mut self.params)
        } else {
            Vec::new()
        };
        self.passes.clear();
        self.params.clear();
        self.program_changed = true;
        self.preferred_format = PixelFormat::Rgba8;
        self.path = path.to_path_buf();
        self.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.fingerprint = ctx.files.fingerprint(path);

        let mut diag = Diagnostics::default();
        let outcome = self.load_stages(ctx, &previous, &mut diag);
        if let Err(err) = &outcome {
            diag.push(err);
        }
        self.errors = diag.into_string();

        match outcome {
            Err(err) if self.passes.is_empty() => {
                warn!("failed to load filter {}: {}", self.path.display(), err);
                Err(err)
            }
            _ => {
                if !self.errors.is_empty() {
                    warn!("filter {} loaded with problems:\n{}", self.name, self.errors.trim_end());
                }
                info!(
                    "loaded filter {} ({} passes, {} parameters)",
                    self.name,
                    self.passes.len(),
                    self.params.len()
                );
                Ok(self.passes.len())
            }
        }
    }

    fn load_stages(
        &mut self,
        ctx: &mut LoadContext<'_, B>,
        previous: &[Parameter],
        diag: &mut Diagnostics,
    ) -> Result<(), LoadError> {
        let source = ctx
            .files
            .read_to_string(&self.path)
            .map_err(|source| LoadError::Read {
                path: self.path.clone(),
                source,
            })?;
        let parsed = shader::parse(&source, diag)?;

        self.params = parsed.params.clone();
        for p in &mut self.params {
            if let Some(old) = previous.iter().find(|o| o.name == p.name) {
                p.value = old.value;
                p.previous = old.previous;
            }
        }
        self.preferred_format = parsed.preferred_format;

        if parsed.passes[0].is_none() {
            return Err(LoadError::NoEntryPoint);
        }

        let user_code = shader::strip_uniforms(&source, &parsed.uniform_spans);
        for index in 0..parsed.pass_count() {
            let (Some(decl), Some(generated)) = (
                parsed.passes[index],
                shader::generate(&parsed, &user_code, index),
            ) else {
                break;
            };
            let label = format!("{} pass {}", self.name, index + 1);
            let compiled = match ctx.backend.compile_program(ctx.vertex, &generated.source(&label)) {
                Ok(compiled) => compiled,
                Err(log) => {
                    debug!("failed shader source for {}:\n{}", label, generated.code);
                    return Err(LoadError::Compile {
                        pass: index + 1,
                        log,
                    });
                }
            };
            diag.push_log(&compiled.log);
            for p in &mut self.params {
                p.locations[index] = ctx.backend.uniform_location(&compiled.program, &p.name);
            }
            self.passes.push(Pass {
                program: compiled.program,
                input: decl.input,
                output: decl.output,
                filter: decl.filter,
                coord: decl.coord,
            });
        }

        if parsed.has_gaps() {
            diag.push("intermediate passes are missing, truncating pipeline");
        }
        Ok(())
    }

    /// Reloads the file if its fingerprint changed, or unconditionally with
    /// `force`. An unchanged file is a successful no-op.
    pub fn reload(&mut self, force: bool, ctx: &mut LoadContext<'_, B>) -> Result<usize, LoadError> {
        let current = ctx.files.fingerprint(&self.path);
        if !force && current.is_some() && current == self.fingerprint {
            return Ok(self.passes.len());
        }
        debug!("reloading filter {}", self.path.display());
        let path = self.path.clone();
        self.load(&path, ctx)
    }

    /// Returns whether anything affecting the output changed since the last
    /// call. Consumes the per-parameter change state, so call it once per
    /// frame.
    pub fn changed(&mut self) -> bool {
        let mut res = std::mem::take(&mut self.program_changed);
        if self.enabled != self.was_enabled {
            self.was_enabled = self.enabled;
            res = true;
        }
        for p in &mut self.params {
            res |= p.changed();
        }
        res
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accumulated diagnostics, one line per problem. Empty if all is well.
    pub fn errors(&self) -> &str {
        &self.errors
    }

    pub(crate) fn push_error(&mut self, msg: impl std::fmt::Display) {
        let mut diag = Diagnostics::default();
        diag.push(msg);
        self.errors.push_str(diag.as_str());
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn passes(&self) -> &[Pass<B::Program>] {
        &self.passes
    }

    /// `true` if at least one pass compiled.
    pub fn is_good(&self) -> bool {
        !self.passes.is_empty()
    }

    pub fn preferred_format(&self) -> PixelFormat {
        self.preferred_format
    }

    /// Fingerprint of the file as of the last load.
    pub fn fingerprint(&self) -> Option<FileFingerprint> {
        self.fingerprint
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn param(&self, index: usize) -> Option<&Parameter> {
        self.params.get(index)
    }

    pub fn param_mut(&mut self, index: usize) -> Option<&mut Parameter> {
        self.params.get_mut(index)
    }

    pub fn find_param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn find_param_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.name == name)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    /// Restores every parameter to the value from the shader source.
    pub fn reset(&mut self) {
        for p in &mut self.params {
            p.reset();
        }
    }
}

impl<B: RenderBackend> Default for Node<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ParameterType;
    use crate::testing::{MemoryFiles, MockBackend};

    const SATURATION: &str = "\
uniform float saturation = 1.0; // @min=0 @max=5
uniform vec3 key = vec3(0.299, 0.587, 0.114); // @color key color
vec3 run(vec3 c) { return mix(vec3(dot(c, key)), c, saturation); }
";

    const THREE_PASS: &str = "\
uniform float amount = 0.5;
vec3 run_pass1(vec3 c) { return c * amount; }
vec3 run_pass2(vec3 c) { return c; }
vec3 run_pass3(vec3 c) { return c; }
";

    fn load(
        node: &mut Node<MockBackend>,
        backend: &mut MockBackend,
        files: &MemoryFiles,
        path: &str,
    ) -> Result<usize, LoadError> {
        let mut ctx = LoadContext {
            backend,
            vertex: &(),
            files,
        };
        node.load(Path::new(path), &mut ctx)
    }

    fn reload(
        node: &mut Node<MockBackend>,
        backend: &mut MockBackend,
        files: &MemoryFiles,
        force: bool,
    ) -> Result<usize, LoadError> {
        let mut ctx = LoadContext {
            backend,
            vertex: &(),
            files,
        };
        node.reload(force, &mut ctx)
    }

    #[test]
    fn test_load_single_pass() {
        let files = MemoryFiles::new();
        files.insert("/fx/saturation.glsl", SATURATION);
        let mut backend = MockBackend::new();
        let mut node = Node::new();

        assert_eq!(load(&mut node, &mut backend, &files, "/fx/saturation.glsl").unwrap(), 1);
        assert_eq!(node.name(), "saturation");
        assert!(node.errors().is_empty(), "{}", node.errors());
        assert_eq!(node.param_count(), 2);
        for p in node.params() {
            assert_eq!(p.value(), p.default_value());
        }
        let key = node.find_param("key").unwrap();
        assert_eq!(key.ty(), ParameterType::Rgb);
        assert_eq!(key.location(0), Some(crate::gpu::UniformLocation(16)));
        assert!(node.find_param("missing").is_none());
        assert_eq!(backend.compiled, vec!["saturation pass 1"]);
        let program = &node.passes()[0].program;
        assert!(program.code.contains("fs_frag = vec4(run(color.rgb), color.a);"));
    }

    #[test]
    fn test_unreadable_file() {
        let files = MemoryFiles::new();
        let mut backend = MockBackend::new();
        let mut node = Node::new();
        let err = load(&mut node, &mut backend, &files, "/fx/gone.glsl").unwrap_err();
        assert!(matches!(err, LoadError::Read { .. }));
        assert!(!node.is_good());
        assert!(node.errors().starts_with("(filterstack) failed to read input file"));
        assert_eq!(node.param_count(), 0);
    }

    #[test]
    fn test_missing_entry_point_keeps_params() {
        let files = MemoryFiles::new();
        files.insert("/fx/broken.glsl", "uniform float a = 1.0;\nvec3 main2(vec3 c) { return c; }");
        let mut backend = MockBackend::new();
        let mut node = Node::new();
        let err = load(&mut node, &mut backend, &files, "/fx/broken.glsl").unwrap_err();
        assert!(matches!(err, LoadError::NoEntryPoint));
        assert!(node.errors().contains("no valid 'run' or 'run_pass1' function found"));
        assert_eq!(node.param_count(), 1);
        assert_eq!(node.pass_count(), 0);
    }

    #[test]
    fn test_partial_multi_pass() {
        let files = MemoryFiles::new();
        files.insert("/fx/multi.glsl", THREE_PASS);
        let mut backend = MockBackend::failing(&["multi pass 2"]);
        let mut node = Node::new();

        assert_eq!(load(&mut node, &mut backend, &files, "/fx/multi.glsl").unwrap(), 1);
        assert_eq!(node.pass_count(), 1);
        assert!(node.is_good());
        assert!(node.errors().contains("pass 2 failed to compile"));
        assert!(node.errors().contains("simulated failure"));
    }

    #[test]
    fn test_first_pass_failure_is_fatal() {
        let files = MemoryFiles::new();
        files.insert("/fx/multi.glsl", THREE_PASS);
        let mut backend = MockBackend::failing(&["multi pass 1"]);
        let mut node = Node::new();
        let err = load(&mut node, &mut backend, &files, "/fx/multi.glsl").unwrap_err();
        assert!(matches!(err, LoadError::Compile { pass: 1, .. }));
        assert!(!node.is_good());
    }

    #[test]
    fn test_version_abort_drops_everything() {
        let files = MemoryFiles::new();
        files.insert("/fx/future.glsl", "uniform float a;\nfloat b;\n// @version=3\nvec3 run(vec3 c) { return c; }");
        let mut backend = MockBackend::new();
        let mut node = Node::new();
        let err = load(&mut node, &mut backend, &files, "/fx/future.glsl").unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedVersion { .. }));
        assert_eq!(node.param_count(), 0);
        assert!(backend.compiled.is_empty());
    }

    #[test]
    fn test_reload_skips_unchanged_file() {
        let files = MemoryFiles::new();
        files.insert("/fx/saturation.glsl", SATURATION);
        let mut backend = MockBackend::new();
        let mut node = Node::new();
        load(&mut node, &mut backend, &files, "/fx/saturation.glsl").unwrap();
        node.find_param_mut("saturation").unwrap().value_mut()[0] = 3.0;

        assert_eq!(reload(&mut node, &mut backend, &files, false).unwrap(), 1);
        assert_eq!(backend.compiled.len(), 1);
        assert_eq!(node.find_param("saturation").unwrap().value()[0], 3.0);
    }

    #[test]
    fn test_reload_carries_values_forward() {
        let files = MemoryFiles::new();
        files.insert("/fx/saturation.glsl", SATURATION);
        let mut backend = MockBackend::new();
        let mut node = Node::new();
        load(&mut node, &mut backend, &files, "/fx/saturation.glsl").unwrap();
        node.find_param_mut("saturation").unwrap().value_mut()[0] = 3.0;
        node.find_param_mut("key").unwrap().value_mut()[0] = 1.0;

        files.insert(
            "/fx/saturation.glsl",
            "uniform float saturation = 2.0;\nuniform float gamma = 2.2;\nvec3 run(vec3 c) { return c; }",
        );
        assert_eq!(reload(&mut node, &mut backend, &files, false).unwrap(), 1);
        assert_eq!(backend.compiled.len(), 2);
        let sat = node.find_param("saturation").unwrap();
        assert_eq!(sat.value()[0], 3.0);
        assert_eq!(sat.default_value()[0], 2.0);
        assert_eq!(node.find_param("gamma").unwrap().value()[0], 2.2);
        assert!(node.find_param("key").is_none());

        // forced reload recompiles even if nothing changed
        reload(&mut node, &mut backend, &files, true).unwrap();
        assert_eq!(backend.compiled.len(), 3);
        assert_eq!(node.find_param("saturation").unwrap().value()[0], 3.0);
    }

    #[test]
    fn test_reload_of_deleted_file_fails() {
        let files = MemoryFiles::new();
        files.insert("/fx/saturation.glsl", SATURATION);
        let mut backend = MockBackend::new();
        let mut node = Node::new();
        load(&mut node, &mut backend, &files, "/fx/saturation.glsl").unwrap();

        files.remove(Path::new("/fx/saturation.glsl"));
        let err = reload(&mut node, &mut backend, &files, false).unwrap_err();
        assert!(matches!(err, LoadError::Read { .. }));
        assert!(!node.is_good());
        assert_eq!(node.pass_count(), 0);
        assert_eq!(node.param_count(), 0);
        assert_eq!(backend.compiled.len(), 1);
    }

    #[test]
    fn test_changed_tracks_program_enable_and_params() {
        let files = MemoryFiles::new();
        files.insert("/fx/saturation.glsl", SATURATION);
        let mut backend = MockBackend::new();
        let mut node = Node::new();
        load(&mut node, &mut backend, &files, "/fx/saturation.glsl").unwrap();

        assert!(node.changed());
        assert!(!node.changed());

        node.toggle();
        assert!(!node.is_enabled());
        assert!(node.changed());
        assert!(!node.changed());

        node.find_param_mut("saturation").unwrap().value_mut()[0] = 0.0;
        assert!(node.changed());
        assert!(!node.changed());

        node.reset();
        assert_eq!(node.find_param("saturation").unwrap().value()[0], 1.0);
        assert!(node.changed());
    }

    #[test]
    fn test_truncated_passes_are_reported() {
        let files = MemoryFiles::new();
        files.insert(
            "/fx/gap.glsl",
            "vec3 run_pass1(vec3 c) { return c; }\nvec3 run_pass3(vec3 c) { return c; }",
        );
        let mut backend = MockBackend::new();
        let mut node = Node::new();
        assert_eq!(load(&mut node, &mut backend, &files, "/fx/gap.glsl").unwrap(), 1);
        assert!(node.errors().contains("intermediate passes are missing, truncating pipeline"));
    }
}
