//! Filter parameters: named, typed, bounded controls backed by shader uniforms.

use crate::gpu::UniformLocation;

/// Maximum number of passes a single node may declare.
pub const MAX_PASSES: usize = 4;

/// Upper bound for `@digits`; f32 values carry no more precision than this.
pub const MAX_DIGITS: u32 = 6;

/// Semantic type of a parameter. Decides arity, UI control and text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterType {
    #[default]
    Value,
    Value2,
    Value3,
    Value4,
    Toggle,
    Angle,
    Rgb,
    Rgba,
}

impl ParameterType {
    /// Number of meaningful value components.
    pub fn components(self) -> usize {
        match self {
            ParameterType::Value | ParameterType::Toggle | ParameterType::Angle => 1,
            ParameterType::Value2 => 2,
            ParameterType::Value3 | ParameterType::Rgb => 3,
            ParameterType::Value4 | ParameterType::Rgba => 4,
        }
    }

    /// Colors are stored as 0..1 floats and written as `#RRGGBB[AA]`.
    pub fn is_color(self) -> bool {
        match self {
            ParameterType::Rgb | ParameterType::Rgba => true,
            ParameterType::Value
            | ParameterType::Value2
            | ParameterType::Value3
            | ParameterType::Value4
            | ParameterType::Toggle
            | ParameterType::Angle => false,
        }
    }

    /// Default type for a uniform of the given arity.
    pub(crate) fn for_components(n: usize) -> Option<Self> {
        match n {
            1 => Some(ParameterType::Value),
            2 => Some(ParameterType::Value2),
            3 => Some(ParameterType::Value3),
            4 => Some(ParameterType::Value4),
            _ => None,
        }
    }
}

/// A single filter control.
///
/// `value` always has four slots; only the first [`ParameterType::components`]
/// are meaningful.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub(crate) name: String,
    pub(crate) desc: String,
    pub(crate) unit: String,
    pub(crate) digits: Option<u32>,
    pub(crate) ty: ParameterType,
    pub(crate) min: f32,
    pub(crate) max: f32,
    pub(crate) value: [f32; 4],
    pub(crate) default: [f32; 4],
    pub(crate) previous: [f32; 4],
    pub(crate) locations: [Option<UniformLocation>; MAX_PASSES],
}

impl Parameter {
    pub(crate) fn new(name: impl Into<String>, ty: ParameterType) -> Self {
        Self {
            name: name.into(),
            desc: String::new(),
            unit: String::new(),
            digits: None,
            ty,
            min: 0.0,
            max: 1.0,
            value: [0.0; 4],
            default: [0.0; 4],
            previous: [0.0; 4],
            locations: [None; MAX_PASSES],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description; falls back to the name.
    pub fn desc(&self) -> &str {
        if self.desc.is_empty() {
            &self.name
        } else {
            &self.desc
        }
    }

    pub fn ty(&self) -> ParameterType {
        self.ty
    }

    pub fn min_value(&self) -> f32 {
        self.min
    }

    pub fn max_value(&self) -> f32 {
        self.max
    }

    pub fn value(&self) -> &[f32; 4] {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut [f32; 4] {
        &mut self.value
    }

    pub fn set_value(&mut self, value: [f32; 4]) {
        self.value = value;
    }

    pub fn default_value(&self) -> &[f32; 4] {
        &self.default
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Number of decimal places used for display and serialization.
    pub fn digits(&self) -> u32 {
        self.digits.unwrap_or(2)
    }

    /// printf-style display format, e.g. `%.2f` or `%.1f px`.
    pub fn format(&self) -> String {
        if self.unit.is_empty() {
            format!("%.{}f", self.digits())
        } else {
            format!("%.{}f {}", self.digits(), self.unit)
        }
    }

    /// Formats a single component with the parameter's precision and unit.
    pub fn format_value(&self, v: f32) -> String {
        let digits = self.digits() as usize;
        if self.unit.is_empty() {
            format!("{v:.digits$}")
        } else {
            format!("{v:.digits$} {}", self.unit)
        }
    }

    /// Uniform location of this parameter in the given pass, if bound there.
    pub fn location(&self, pass: usize) -> Option<UniformLocation> {
        self.locations.get(pass).copied().flatten()
    }

    /// Consuming change check: compares against the previous frame's value
    /// and then records the current value as the new baseline.
    pub fn changed(&mut self) -> bool {
        let res = self.value != self.previous;
        self.previous = self.value;
        res
    }

    /// Restores the value captured when the shader was loaded.
    pub fn reset(&mut self) {
        self.value = self.default;
    }

    /// Derives `digits` from the magnitude of the bounds unless set explicitly.
    pub(crate) fn finalize_digits(&mut self) {
        if self.digits.is_none() {
            let abs_max = self.min.abs().max(self.max.abs()).max(1e-6);
            let digits = 2 - abs_max.log10().floor() as i32;
            self.digits = Some(digits.max(0) as u32);
        }
    }
}
