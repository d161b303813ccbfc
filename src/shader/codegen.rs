//! Per-pass fragment program synthesis.
//!
//! The user code is embedded verbatim except for the recognised `uniform`
//! statements, which are blanked out and re-declared as members of a single
//! uniform block. Frame values (image size and coordinate mapping) come from
//! a second block that the vertex stage shares.

use super::{ParsedShader, PassInput, PassOutput};
use crate::gpu::{LineMap, ProgramSource, UniformSlot};
use crate::param::Parameter;
use std::fmt::Write;
use std::ops::Range;

/// Name under which user code samples the pass input.
pub const SAMPLER: &str = "fs_tex";

/// Fixed preamble shared by every pass.
const PREAMBLE: &str = "\
#version 450
layout(location = 0) in vec2 fs_pos;
layout(location = 0) out vec4 fs_frag;
layout(set = 0, binding = 0) uniform texture2D fs_tex_image;
layout(set = 0, binding = 1) uniform sampler fs_tex_sampler;
#define fs_tex sampler2D(fs_tex_image, fs_tex_sampler)
layout(set = 0, binding = 2, std140) uniform FsFrame {
    vec4 fs_map2tex;
    vec4 fs_rel2map;
    vec2 fs_image_size;
};
";

/// Helper for coordinate-input passes; maps shader coordinates to texels.
const PIXEL_HELPER: &str = "\
vec4 pixel(in vec2 pos) {
    return texture(fs_tex, fs_map2tex.xy + pos * fs_map2tex.zw);
}
";

/// A complete fragment program for one pass.
#[derive(Debug, Clone)]
pub struct GeneratedPass {
    pub code: String,
    pub uniforms: Vec<UniformSlot>,
    pub block_size: u32,
    pub lines: LineMap,
}

impl GeneratedPass {
    pub fn source<'a>(&'a self, label: &'a str) -> ProgramSource<'a> {
        ProgramSource {
            label,
            code: &self.code,
            uniforms: &self.uniforms,
            uniform_block_size: self.block_size,
            lines: self.lines,
        }
    }
}

/// Replaces every character inside `spans` with a space, keeping newlines so
/// that the stripped code has the same line structure as the file.
pub fn strip_uniforms(source: &str, spans: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(source.len());
    for (i, c) in source.char_indices() {
        let hidden = spans.iter().any(|s| s.contains(&i));
        if hidden && c != '\n' {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn glsl_type(components: usize) -> &'static str {
    match components {
        1 => "float",
        2 => "vec2",
        3 => "vec3",
        _ => "vec4",
    }
}

/// std140 offsets of the parameters; returns the slots and the block size
/// rounded up to 16 bytes.
pub fn uniform_layout(params: &[Parameter]) -> (Vec<UniformSlot>, u32) {
    let mut offset = 0u32;
    let mut slots = Vec::with_capacity(params.len());
    for p in params {
        let components = p.ty().components() as u32;
        let align = match components {
            1 => 4,
            2 => 8,
            _ => 16,
        };
        offset = offset.next_multiple_of(align);
        slots.push(UniformSlot {
            name: p.name().to_string(),
            offset,
            components,
        });
        offset += 4 * components;
    }
    (slots, offset.next_multiple_of(16))
}

/// Builds the program for `pass`, or `None` if the shader does not declare
/// it. `user_code` is the source with its uniform statements stripped.
pub fn generate(shader: &ParsedShader, user_code: &str, pass: usize) -> Option<GeneratedPass> {
    let decl = shader.passes.get(pass).copied().flatten()?;
    let (uniforms, block_size) = uniform_layout(&shader.params);

    let mut code = String::with_capacity(PREAMBLE.len() + user_code.len() + 512);
    code.push_str(PREAMBLE);
    if !uniforms.is_empty() {
        code.push_str("layout(set = 0, binding = 3, std140) uniform FsParams {\n");
        for (slot, p) in uniforms.iter().zip(&shader.params) {
            let _ = writeln!(code, "    {} {};", glsl_type(slot.components as usize), p.name());
        }
        code.push_str("};\n");
    }
    if decl.input == PassInput::Coord {
        code.push_str(PIXEL_HELPER);
    }

    code.push_str("#line 1\n");
    let user_start = line_count(&code) + 1;
    code.push_str(user_code);
    code.push('\n');
    let lines = LineMap {
        user_start,
        footer: line_count(&code) + 1,
    };

    let _ = writeln!(code, "#line {}", LineMap::FOOTER_LINE);
    code.push_str("void main() {\n");
    let arg = match decl.input {
        PassInput::Coord => "fs_pos",
        PassInput::Rgb => "color.rgb",
        PassInput::Rgba => "color",
    };
    if decl.input != PassInput::Coord {
        let _ = writeln!(code, "    vec4 color = texture({SAMPLER}, fs_pos);");
    }
    let call = format!("{}({arg})", shader.entry_point(pass));
    let _ = match (decl.output, decl.input) {
        (PassOutput::Rgba, _) => writeln!(code, "    fs_frag = {call};"),
        (PassOutput::Rgb, PassInput::Coord) => writeln!(code, "    fs_frag = vec4({call}, 1.0);"),
        (PassOutput::Rgb, _) => writeln!(code, "    fs_frag = vec4({call}, color.a);"),
    };
    code.push_str("}\n");

    Some(GeneratedPass {
        code,
        uniforms,
        block_size,
        lines,
    })
}

fn line_count(code: &str) -> u32 {
    code.bytes().filter(|&b| b == b'\n').count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::shader::parse;

    fn build(src: &str, pass: usize) -> Option<GeneratedPass> {
        let mut diag = Diagnostics::default();
        let parsed = parse(src, &mut diag).unwrap();
        let stripped = strip_uniforms(src, &parsed.uniform_spans);
        generate(&parsed, &stripped, pass)
    }

    #[test]
    fn test_strip_keeps_line_structure() {
        let src = "uniform float a = 1.0;\nuniform vec3 b =\n  vec3(1.0);\nfloat x;";
        let mut diag = Diagnostics::default();
        let parsed = parse(src, &mut diag).unwrap();
        let stripped = strip_uniforms(src, &parsed.uniform_spans);
        assert_eq!(stripped.len(), src.len());
        assert_eq!(stripped.lines().count(), src.lines().count());
        assert!(!stripped.contains("uniform"));
        assert!(stripped.ends_with("float x;"));
    }

    #[test]
    fn test_std140_layout() {
        let src = "uniform float a; uniform vec3 b; uniform vec2 c; uniform float d; uniform vec4 e;";
        let mut diag = Diagnostics::default();
        let parsed = parse(src, &mut diag).unwrap();
        let (slots, size) = uniform_layout(&parsed.params);
        let offsets: Vec<u32> = slots.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 16, 32, 40, 48]);
        assert_eq!(size, 64);
    }

    #[test]
    fn test_rgb_pass_keeps_alpha() {
        let pass = build("uniform float gain = 2.0;\nvec3 run(vec3 c) { return c * gain; }", 0).unwrap();
        assert!(pass.code.starts_with("#version 450\n"));
        assert!(pass.code.contains("uniform FsParams {\n    float gain;\n};"));
        assert!(pass.code.contains("vec4 color = texture(fs_tex, fs_pos);"));
        assert!(pass.code.contains("fs_frag = vec4(run(color.rgb), color.a);"));
        assert!(!pass.code.contains("vec4 pixel("));
        assert_eq!(pass.uniforms.len(), 1);
        assert_eq!(pass.block_size, 16);
    }

    #[test]
    fn test_coord_pass_uses_pixel_helper() {
        let src = "vec3 run_pass1(vec2 p) { return pixel(p).rgb; }\nvec4 run_pass2(vec4 c) { return c; }";
        let first = build(src, 0).unwrap();
        assert!(first.code.contains("vec4 pixel(in vec2 pos)"));
        assert!(first.code.contains("fs_frag = vec4(run_pass1(fs_pos), 1.0);"));
        assert!(!first.code.contains("FsParams"));
        assert_eq!(first.block_size, 0);

        let second = build(src, 1).unwrap();
        assert!(second.code.contains("fs_frag = run_pass2(color);"));
        assert!(build(src, 2).is_none());
    }

    #[test]
    fn test_user_code_starts_at_line_one() {
        let pass = build("vec3 run(vec3 c) { return c; }", 0).unwrap();
        let user = pass.code.split("#line 1\n").nth(1).unwrap();
        assert!(user.starts_with("vec3 run(vec3 c)"));
    }

    #[test]
    fn test_line_map_points_into_user_code() {
        let src = "uniform float gain = 2.0;\n\nvec3 run(vec3 c) {\n    return c * gain;\n}";
        let pass = build(src, 0).unwrap();
        let program: Vec<&str> = pass.code.lines().collect();
        let at = |line: u32| program[line as usize - 1];

        assert_eq!(at(pass.lines.user_start + 2), "vec3 run(vec3 c) {");
        assert_eq!(pass.lines.source_line(pass.lines.user_start + 3), 4);
        assert_eq!(at(pass.lines.footer), "#line 9000");
        assert_eq!(at(pass.lines.footer + 1), "void main() {");
        assert_eq!(pass.lines.source_line(pass.lines.footer + 1), 9000);
    }
}
