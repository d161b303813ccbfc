//! Recognises parameters, pass signatures and annotations in a filter shader.

use super::annotations::{self, Annotation};
use super::lexer::{classify, Lexeme, Lexer, TokenKind};
use super::{CoordMode, FilterMode, PassInput, PassOutput, MAX_SUPPORTED_VERSION};
use crate::error::{Diagnostics, LoadError};
use crate::gpu::PixelFormat;
use crate::param::{Parameter, ParameterType, MAX_DIGITS, MAX_PASSES};
use std::ops::Range;

const HISTORY: usize = 4;

/// Signature and settings of one declared pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassDecl {
    pub input: PassInput,
    pub output: PassOutput,
    pub filter: FilterMode,
    pub coord: CoordMode,
}

/// Result of scanning a filter source.
#[derive(Debug, Clone)]
pub struct ParsedShader {
    /// Parameters in declaration order; `default` holds the initializer.
    pub params: Vec<Parameter>,
    /// Passes indexed by pass number minus one.
    pub passes: [Option<PassDecl>; MAX_PASSES],
    /// `true` if the entry point is plain `run`.
    pub single_pass: bool,
    pub preferred_format: PixelFormat,
    /// Byte ranges of the recognised `uniform ...;` statements.
    pub uniform_spans: Vec<Range<usize>>,
}

impl Default for ParsedShader {
    fn default() -> Self {
        Self {
            params: Vec::new(),
            passes: [None; MAX_PASSES],
            single_pass: false,
            preferred_format: PixelFormat::Rgba8,
            uniform_spans: Vec::new(),
        }
    }
}

impl ParsedShader {
    /// Number of consecutive passes starting at the first.
    pub fn pass_count(&self) -> usize {
        self.passes.iter().take_while(|p| p.is_some()).count()
    }

    /// `true` if a pass is declared after a missing one.
    pub fn has_gaps(&self) -> bool {
        self.passes[self.pass_count()..].iter().any(Option::is_some)
    }

    /// Name of the user function implementing `pass`.
    pub fn entry_point(&self, pass: usize) -> String {
        if pass == 0 && self.single_pass {
            "run".to_string()
        } else {
            format!("run_pass{}", pass + 1)
        }
    }
}

/// Parameter a comment would attach to.
#[derive(Debug, Clone, Copy)]
struct Target {
    index: usize,
    arity: usize,
}

/// An open `uniform ...;` statement.
#[derive(Debug, Clone, Copy)]
struct Statement {
    /// `None` for a declaration of an unsupported type.
    param: Option<usize>,
    start: usize,
    next_value: Option<usize>,
}

/// Settings taken from global comments; apply to passes declared after them.
#[derive(Debug, Clone, Copy, Default)]
struct Globals {
    filter: FilterMode,
    coord: CoordMode,
}

/// Scans `source` for parameters and passes.
///
/// Problems that only affect a single declaration or annotation are appended
/// to `diag` and scanning continues. A `@version` newer than
/// [`MAX_SUPPORTED_VERSION`] aborts with an error.
pub fn parse(source: &str, diag: &mut Diagnostics) -> Result<ParsedShader, LoadError> {
    let mut out = ParsedShader::default();
    let mut history = [TokenKind::Other; HISTORY];
    let mut statement: Option<Statement> = None;
    let mut target: Option<Target> = None;
    let mut globals = Globals::default();

    for lexeme in Lexer::new(source) {
        let (text, start, end) = match lexeme {
            Lexeme::Comment { body, .. } => {
                let (anns, desc) = annotations::extract(body);
                let target = target.take();
                for ann in &anns {
                    apply(ann, target, &mut out, &mut globals, diag)?;
                }
                if let Some(t) = target {
                    if !desc.is_empty() {
                        out.params[t.index].desc = desc;
                    }
                }
                continue;
            }
            Lexeme::Token { text, start, end } => (text, start, end),
        };

        let kind = classify(text);
        if kind == TokenKind::Ignored {
            continue;
        }
        // a comment only describes a uniform if nothing follows its statement
        if statement.is_none() {
            target = None;
        }
        history.rotate_right(1);
        history[0] = kind;

        // [2] = uniform, [1] = type, [0] = name
        if history[2] == TokenKind::Uniform {
            let ty = history[1]
                .arity()
                .and_then(|n| ParameterType::for_components(n).map(|ty| (n, ty)));
            match ty {
                Some((arity, ty)) => {
                    out.params.push(Parameter::new(text, ty));
                    let index = out.params.len() - 1;
                    target = Some(Target { index, arity });
                    statement = Some(Statement {
                        param: Some(index),
                        start: statement.map_or(start, |s| s.start),
                        next_value: None,
                    });
                }
                None => {
                    diag.push(format!("uniform variable '{text}' has unsupported data type"));
                    statement = None;
                }
            }
            continue;
        }
        if kind == TokenKind::Uniform {
            statement = Some(Statement {
                param: None,
                start,
                next_value: None,
            });
            continue;
        }

        if let Some(st) = statement.as_mut() {
            if text == ";" {
                if st.param.is_some() {
                    out.uniform_spans.push(st.start..end);
                }
                statement = None;
                continue;
            }
            if let Some(index) = st.param {
                match st.next_value {
                    None if text == "=" => st.next_value = Some(0),
                    Some(i) if i < 4 => {
                        if let Ok(v) = text.parse::<f32>() {
                            out.params[index].value[i] = v;
                            st.next_value = Some(i + 1);
                        }
                    }
                    _ => {}
                }
            }
            continue;
        }

        // [3] = vec3|vec4, [2] = run[_passN], [1] = "(", [0] = vec2|vec3|vec4
        if let Some((pass, decl)) = pass_signature(&history, globals) {
            if pass == 0 {
                out.single_pass = history[2] == TokenKind::Run;
            }
            out.passes[pass] = Some(decl);
        }
    }

    // an unterminated statement at the end of the file
    if let Some(Statement { param: Some(_), start, .. }) = statement {
        out.uniform_spans.push(start..source.len());
    }

    for p in &mut out.params {
        p.finalize_digits();
        p.default = p.value;
        p.previous = p.value;
    }
    Ok(out)
}

fn pass_signature(history: &[TokenKind; HISTORY], globals: Globals) -> Option<(usize, PassDecl)> {
    let output = match history[3] {
        TokenKind::Vec3 => PassOutput::Rgb,
        TokenKind::Vec4 => PassOutput::Rgba,
        _ => return None,
    };
    let pass = match history[2] {
        TokenKind::Run => 0,
        TokenKind::RunPass(n) if (1..=MAX_PASSES as u8).contains(&n) => usize::from(n - 1),
        _ => return None,
    };
    if history[1] != TokenKind::OpenParen {
        return None;
    }
    let input = match history[0] {
        TokenKind::Vec2 => PassInput::Coord,
        TokenKind::Vec3 => PassInput::Rgb,
        TokenKind::Vec4 => PassInput::Rgba,
        _ => return None,
    };
    let coord = if input == PassInput::Coord {
        globals.coord
    } else {
        CoordMode::None
    };
    Some((
        pass,
        PassDecl {
            input,
            output,
            filter: globals.filter,
            coord,
        },
    ))
}

/// Evaluates one annotation against the parameter it describes, or against
/// the global state if it is not attached to a parameter.
fn apply(
    ann: &Annotation,
    target: Option<Target>,
    out: &mut ParsedShader,
    globals: &mut Globals,
    diag: &mut Diagnostics,
) -> Result<(), LoadError> {
    let key = ann.key.as_str();
    match key {
        "min" | "off" | "max" | "on" | "digits" | "int" | "unit" | "toggle" | "switch" | "angle"
        | "color" => {
            let Some(t) = target else {
                diag.push(format!("'@{key}' token is only valid inside a parameter comment"));
                return Ok(());
            };
            let param = &mut out.params[t.index];
            match key {
                "min" | "off" => {
                    if let Some(v) = need_number(ann, diag) {
                        param.min = v;
                    }
                }
                "max" | "on" => {
                    if let Some(v) = need_number(ann, diag) {
                        param.max = v;
                    }
                }
                "digits" => {
                    if let Some(v) = need_number(ann, diag) {
                        param.digits = Some(((v + 0.5).max(0.0) as u32).min(MAX_DIGITS));
                    }
                }
                "int" => param.digits = Some(0),
                "unit" => {
                    if let Some(v) = need_value(ann, diag) {
                        param.unit = v.to_string();
                    }
                }
                "toggle" | "switch" => set_type(param, t.arity, 1, ParameterType::Toggle, key, diag),
                "angle" => set_type(param, t.arity, 1, ParameterType::Angle, key, diag),
                _ => match t.arity {
                    3 => param.ty = ParameterType::Rgb,
                    _ => set_type(param, t.arity, 4, ParameterType::Rgba, key, diag),
                },
            }
        }
        "coord" | "coords" | "map" | "filter" | "filt" | "version" | "gips_version" | "format" => {
            if target.is_some() {
                diag.push(format!("'@{key}' token is only valid inside a global comment"));
                return Ok(());
            }
            match key {
                "coord" | "coords" | "map" => {
                    let Some(v) = need_value(ann, diag) else {
                        return Ok(());
                    };
                    match v {
                        "pixel" => globals.coord = CoordMode::Pixel,
                        "none" => globals.coord = CoordMode::None,
                        "relative" | "rel" => globals.coord = CoordMode::Relative,
                        _ => diag.push(format!("unrecognized coordinate mapping mode '{v}'")),
                    }
                }
                "filter" | "filt" => {
                    let Some(v) = need_value(ann, diag) else {
                        return Ok(());
                    };
                    match v {
                        "1" | "on" | "linear" | "bilinear" => globals.filter = FilterMode::Linear,
                        "0" | "off" | "nearest" | "point" => globals.filter = FilterMode::Nearest,
                        _ => diag.push(format!("unrecognized texture filtering mode '{v}'")),
                    }
                }
                "format" => {
                    let Some(v) = need_value(ann, diag) else {
                        return Ok(());
                    };
                    match PixelFormat::from_annotation(v) {
                        Some(format) => out.preferred_format = format,
                        None => diag.push(format!("unrecognized pixel format '{v}'")),
                    }
                }
                _ => {
                    if let Some(required) = need_number(ann, diag) {
                        if required > MAX_SUPPORTED_VERSION {
                            return Err(LoadError::UnsupportedVersion {
                                required,
                                supported: MAX_SUPPORTED_VERSION,
                            });
                        }
                    }
                }
            }
        }
        _ => diag.push(format!("unrecognized token '@{key}'")),
    }
    Ok(())
}

fn need_value<'a>(ann: &'a Annotation, diag: &mut Diagnostics) -> Option<&'a str> {
    if ann.value.is_none() {
        diag.push(format!("'@{}' token requires a value", ann.key));
    }
    ann.value.as_deref()
}

fn need_number(ann: &Annotation, diag: &mut Diagnostics) -> Option<f32> {
    let num = ann.number();
    if num.is_none() {
        diag.push(format!("'@{}' token requires a numeric value", ann.key));
    }
    num
}

fn set_type(
    param: &mut Parameter,
    arity: usize,
    required: usize,
    ty: ParameterType,
    key: &str,
    diag: &mut Diagnostics,
) {
    if arity == required {
        param.ty = ty;
    } else {
        diag.push(format!(
            "'@{key}' format is incompatible with uniform data type of parameter '{}'",
            param.name
        ));
    }
}
