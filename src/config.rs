//! YAML configuration for the command-line host.

use crate::gpu::PixelFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shader directories, searched in order after the pipeline file's own
    /// directory.
    pub shader_roots: Vec<PathBuf>,
    /// Intermediate buffer format.
    pub format: PixelFormat,
    /// Only the first `max_nodes` nodes take part in rendering.
    pub max_nodes: Option<usize>,
    /// In watch mode, recompile only the shaders whose files changed.
    pub auto_reload: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shader_roots: Vec::new(),
            format: PixelFormat::DontCare,
            max_nodes: None,
            auto_reload: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_yaml::from_str("max_nodes: 3\n").unwrap();
        assert_eq!(config.max_nodes, Some(3));
        assert_eq!(config.format, PixelFormat::DontCare);
        assert!(config.auto_reload);
        assert!(config.shader_roots.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "shader_roots:\n  - /opt/shaders\n  - shaders\nformat: rgba16f\nauto_reload: false").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.shader_roots, vec![PathBuf::from("/opt/shaders"), PathBuf::from("shaders")]);
        assert_eq!(config.format, PixelFormat::Rgba16F);
        assert!(!config.auto_reload);
    }

    #[test]
    fn test_invalid_format_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "format: rgb565").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_no_path_gives_defaults() {
        assert_eq!(Config::load_or_default(None).unwrap(), Config::default());
    }
}
