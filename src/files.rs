//! File access used when loading shaders.

use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Size and modification time of a file, used to skip redundant reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileFingerprint {
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified_ns: u128,
}

impl FileFingerprint {
    pub fn newer_than(&self, other: &FileFingerprint) -> bool {
        self.modified_ns > other.modified_ns
    }
}

/// Source of shader files.
pub trait ShaderFiles {
    /// Reads the whole file as text.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Returns the file's fingerprint, or `None` if it can't be stat'ed.
    fn fingerprint(&self, path: &Path) -> Option<FileFingerprint>;
}

/// Plain filesystem access.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFiles;

impl ShaderFiles for DiskFiles {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn fingerprint(&self, path: &Path) -> Option<FileFingerprint> {
        fingerprint(path)
    }
}

/// Stats a file on disk.
pub fn fingerprint(path: &Path) -> Option<FileFingerprint> {
    let meta = std::fs::metadata(path).ok()?;
    let modified_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Some(FileFingerprint {
        size: meta.len(),
        modified_ns,
    })
}
