//! Mapping between stored (relative) shader paths and loadable files.

use crate::files;
use std::ops::{Deref, DerefMut};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Translates between the paths written into pipeline documents and the
/// paths handed to the loader.
pub trait PathResolver {
    /// Resolves a stored path to a loadable one.
    fn full_path(&self, stored: &str) -> PathBuf;

    /// Shortens a loaded path for storage.
    fn relative_path(&self, full: &Path) -> String;
}

/// An ordered list of shader directories.
///
/// A relative path found below more than one root resolves to the most
/// recently modified file.
#[derive(Debug, Clone, Default)]
pub struct SearchRoots {
    roots: Vec<PathBuf>,
}

impl SearchRoots {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn add_root(&mut self, root: impl Into<PathBuf>) -> usize {
        self.roots.push(root.into());
        self.roots.len() - 1
    }

    pub fn remove_root(&mut self, index: usize) {
        if index < self.roots.len() {
            self.roots.remove(index);
        }
    }

    /// Puts the directory of `file` in front of all roots until the returned
    /// guard is dropped. Used while loading or saving a pipeline document so
    /// that shaders next to it are found and stored relative to it.
    pub fn temporary_root(&mut self, file: &Path) -> TemporaryRoot<'_> {
        let dir = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        debug!("adding temporary shader root {:?}", dir);
        self.roots.insert(0, dir);
        TemporaryRoot { roots: self }
    }
}

impl PathResolver for SearchRoots {
    fn full_path(&self, stored: &str) -> PathBuf {
        let path = Path::new(stored);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let mut best: Option<(PathBuf, files::FileFingerprint)> = None;
        for root in &self.roots {
            let candidate = root.join(path);
            if !candidate.is_file() {
                continue;
            }
            let Some(fp) = files::fingerprint(&candidate) else {
                continue;
            };
            match &best {
                Some((_, best_fp)) if !fp.newer_than(best_fp) => {}
                _ => best = Some((candidate, fp)),
            }
        }
        best.map(|(p, _)| p).unwrap_or_else(|| path.to_path_buf())
    }

    fn relative_path(&self, full: &Path) -> String {
        for root in &self.roots {
            if let Ok(rel) = full.strip_prefix(root) {
                if rel.as_os_str().is_empty() {
                    continue;
                }
                return join_slash(rel);
            }
        }
        if full.is_absolute() {
            full.to_string_lossy().into_owned()
        } else {
            join_slash(full)
        }
    }
}

/// Joins path components with forward slashes regardless of platform.
fn join_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Guard returned by [`SearchRoots::temporary_root`].
pub struct TemporaryRoot<'a> {
    roots: &'a mut SearchRoots,
}

impl Deref for TemporaryRoot<'_> {
    type Target = SearchRoots;

    fn deref(&self) -> &SearchRoots {
        self.roots
    }
}

impl DerefMut for TemporaryRoot<'_> {
    fn deref_mut(&mut self) -> &mut SearchRoots {
        self.roots
    }
}

impl Drop for TemporaryRoot<'_> {
    fn drop(&mut self) {
        self.roots.remove_root(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_full_path_searches_roots() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::create_dir_all(b.path().join("color")).unwrap();
        fs::write(b.path().join("color/sat.glsl"), "x").unwrap();

        let roots = SearchRoots::new([a.path().to_path_buf(), b.path().to_path_buf()]);
        assert_eq!(roots.full_path("color/sat.glsl"), b.path().join("color/sat.glsl"));
        assert_eq!(roots.full_path("missing.glsl"), PathBuf::from("missing.glsl"));
    }

    #[test]
    fn test_relative_path_strips_root() {
        let a = tempfile::tempdir().unwrap();
        let roots = SearchRoots::new([a.path().to_path_buf()]);
        let full = a.path().join("blur").join("box.glsl");
        assert_eq!(roots.relative_path(&full), "blur/box.glsl");

        let other = tempfile::tempdir().unwrap();
        let outside = other.path().join("x.glsl");
        assert_eq!(roots.relative_path(&outside), outside.to_string_lossy());
    }

    #[test]
    fn test_temporary_root_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("edge.glsl"), "x").unwrap();
        let mut roots = SearchRoots::default();
        {
            let tmp = roots.temporary_root(&dir.path().join("pipeline.txt"));
            assert_eq!(tmp.roots().len(), 1);
            assert_eq!(tmp.full_path("edge.glsl"), dir.path().join("edge.glsl"));
        }
        assert!(roots.roots().is_empty());
    }
}
