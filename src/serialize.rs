//! Pipeline text format.
//!
//! ```text
//! [filterstack]
//! version = 1
//!
//! [color/saturation.glsl]
//! .enabled = 0
//! saturation = 1.00
//! key = #4C961D
//! ```
//!
//! Lines end in `\r\n`. Blank lines and lines starting with `;` or `#` are
//! ignored when reading.

use crate::error::DocumentError;
use crate::gpu::RenderBackend;
use crate::param::{Parameter, ParameterType};
use crate::pipeline::Pipeline;
use crate::vfs::PathResolver;
use std::fmt::Write;
use tracing::{debug, info};

/// Name of the section every document starts with.
pub const HEADER: &str = "filterstack";

/// Document version written and accepted.
pub const VERSION: u32 = 1;

const EOL: &str = "\r\n";

fn color_byte(v: f32) -> u8 {
    (v * 255.0 + 0.5).clamp(0.0, 255.0) as u8
}

/// Text form of a parameter's current value.
pub fn encode_value(param: &Parameter) -> String {
    let n = param.ty().components();
    let values = &param.value()[..n];
    match param.ty() {
        ParameterType::Rgb | ParameterType::Rgba => values.iter().fold(String::from("#"), |mut s, &v| {
            let _ = write!(s, "{:02X}", color_byte(v));
            s
        }),
        ParameterType::Value
        | ParameterType::Value2
        | ParameterType::Value3
        | ParameterType::Value4
        | ParameterType::Toggle
        | ParameterType::Angle => {
            let digits = param.digits() as usize;
            values
                .iter()
                .map(|v| format!("{v:.digits$}"))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

/// Why a value could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueError {
    Color,
    Number,
}

/// Parses `#RRGGBB[AA]` or up to four comma/space separated numbers.
/// Returns the values and whether more than four numbers were given.
fn decode_value(text: &str) -> Result<(Vec<f32>, bool), ValueError> {
    if let Some(hex) = text.strip_prefix('#') {
        if !(hex.len() == 6 || hex.len() == 8) || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ValueError::Color);
        }
        let values = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map(|b| f32::from(b) / 255.0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ValueError::Color)?;
        return Ok((values, false));
    }
    let mut values = Vec::with_capacity(4);
    let mut too_many = false;
    for part in text.split(|c: char| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty()) {
        let v = part.parse::<f32>().map_err(|_| ValueError::Number)?;
        if values.len() < 4 {
            values.push(v);
        } else {
            too_many = true;
        }
    }
    if values.is_empty() {
        return Err(ValueError::Number);
    }
    Ok((values, too_many))
}

impl<B: RenderBackend> Pipeline<B> {
    /// Writes the pipeline as text.
    ///
    /// `show_index` is the display selection: 0 is the source image, `k`
    /// the output after the first `k` nodes. It is only stored when it is
    /// not the final output.
    pub fn serialize(&self, show_index: usize, resolver: &dyn PathResolver) -> String {
        let mut out = String::new();
        let _ = write!(out, "[{HEADER}]{EOL}version = {VERSION}{EOL}");
        if show_index == 0 {
            let _ = write!(out, ".show = 1{EOL}");
        }

        let count = self.node_count();
        for (i, node) in self.nodes().iter().enumerate() {
            let _ = write!(out, "{EOL}[{}]{EOL}", resolver.relative_path(node.path()));
            if show_index == i + 1 && i + 1 < count {
                let _ = write!(out, ".show = 1{EOL}");
            }
            if !node.is_enabled() {
                let _ = write!(out, ".enabled = 0{EOL}");
            }
            for p in node.params() {
                let _ = write!(out, "{} = {}{EOL}", p.name(), encode_value(p));
            }
        }
        out
    }

    /// Replaces the pipeline with the one described by `text` and returns the
    /// display selection stored in it (the last node if none is stored).
    ///
    /// Errors before the first node section reject the whole document and
    /// leave the pipeline untouched. Once a node is open, bad lines are
    /// recorded in that node's error text and skipped.
    pub fn unserialize(&mut self, text: &str, resolver: &dyn PathResolver) -> Result<usize, DocumentError> {
        if text.trim().is_empty() {
            return Err(DocumentError::Empty);
        }
        let mut in_header = false;
        let mut version_ok = false;
        let mut node: Option<usize> = None;
        let mut show: Option<usize> = None;

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if !in_header && node.is_none() {
                    if section.trim() != HEADER {
                        return Err(DocumentError::MissingHeader { expected: HEADER });
                    }
                    in_header = true;
                    continue;
                }
                if node.is_none() {
                    if !version_ok {
                        return Err(DocumentError::UnsupportedVersion);
                    }
                    self.clear();
                }
                in_header = false;
                let path = resolver.full_path(section.trim());
                info!("loading node {} from {}", section.trim(), path.display());
                self.add_node(&path, None);
                node = Some(self.node_count() - 1);
                continue;
            }
            if !in_header && node.is_none() {
                return Err(DocumentError::MissingHeader { expected: HEADER });
            }

            let syntax = || DocumentError::Syntax {
                line: line_no + 1,
                text: line.to_string(),
            };
            let pair = line
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .filter(|(k, v)| !k.is_empty() && !v.is_empty());
            let Some((key, value)) = pair else {
                match node {
                    Some(n) => {
                        self.node_error(n, format!("syntax error in pipeline file: '{line}'"));
                        continue;
                    }
                    None => return Err(syntax()),
                }
            };

            let (mut values, too_many) = match decode_value(value) {
                Ok(v) => v,
                Err(err) => {
                    let msg = match err {
                        ValueError::Color => format!("invalid color '{value}' for key '{key}'"),
                        ValueError::Number => format!("invalid value '{value}' for key '{key}'"),
                    };
                    match node {
                        Some(n) => {
                            self.node_error(n, format!("syntax error in pipeline file: {msg}"));
                            continue;
                        }
                        None => return Err(syntax()),
                    }
                }
            };
            if too_many {
                if let Some(n) = node {
                    self.node_error(n, format!("syntax error in pipeline file: too many values for key '{key}'"));
                }
            }

            let defaults = node
                .and_then(|n| self.node(n))
                .and_then(|nd| nd.find_param(key))
                .map_or([0.0; 4], |p| *p.default_value());
            values.extend_from_slice(&defaults[values.len()..]);

            if key == ".show" {
                if values[0] > 0.0 {
                    show = Some(node.map_or(0, |n| n + 1));
                }
                continue;
            }

            let Some(n) = node else {
                if key == "version" {
                    version_ok = (values[0] - VERSION as f32).abs() < 1e-6;
                    if !version_ok {
                        return Err(DocumentError::UnsupportedVersion);
                    }
                }
                continue;
            };

            if matches!(key, ".enabled" | ".enable" | ".active") {
                if let Some(nd) = self.node_mut(n) {
                    nd.set_enabled(values[0] > 0.5);
                }
                continue;
            }

            let Some(nd) = self.node_mut(n) else {
                continue;
            };
            match nd.find_param_mut(key) {
                Some(p) => {
                    let mut v = [0.0; 4];
                    v.copy_from_slice(&values[..4]);
                    p.set_value(v);
                }
                None => nd.push_error(format!("unknown parameter '{key}' in pipeline file")),
            }
        }

        if !in_header && node.is_none() {
            return Err(DocumentError::MissingHeader { expected: HEADER });
        }
        let show = show.unwrap_or(self.node_count());
        debug!("pipeline document loaded: {} nodes, showing {}", self.node_count(), show);
        Ok(show)
    }

    fn node_error(&mut self, index: usize, msg: String) {
        if let Some(node) = self.node_mut(index) {
            node.push_error(msg);
        }
    }
}
