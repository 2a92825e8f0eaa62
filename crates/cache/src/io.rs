//! Filesystem and remote-source collaborator seams
//!
//! The cache layers talk to the outside world through these traits so that
//! tests can substitute fakes and the engine can inject platform-specific
//! implementations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Filesystem access used by the cache layers
pub trait FileSystemReader: Send + Sync {
    /// Read a file's entire contents
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Read a file's contents into an existing buffer (e.g. one borrowed
    /// from the memory pool), returning the number of bytes read.
    fn read_into(&self, path: &Path, buf: &mut Vec<u8>) -> io::Result<usize> {
        let bytes = self.read_bytes(path)?;
        let n = bytes.len();
        buf.extend_from_slice(&bytes);
        Ok(n)
    }

    /// Copy a file to a destination path
    fn copy(&self, path: &Path, dest: &Path) -> io::Result<u64>;

    /// Size of a file in bytes
    fn size_of(&self, path: &Path) -> io::Result<u64>;
}

/// Default reader over `std::fs`
#[derive(Debug, Default, Clone)]
pub struct StdFileSystem;

impl FileSystemReader for StdFileSystem {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn read_into(&self, path: &Path, buf: &mut Vec<u8>) -> io::Result<usize> {
        use std::io::Read;
        let mut file = fs::File::open(path)?;
        file.read_to_end(buf)
    }

    fn copy(&self, path: &Path, dest: &Path) -> io::Result<u64> {
        fs::copy(path, dest)
    }

    fn size_of(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|m| m.len())
    }
}

/// Mount classification for a browsed path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountType {
    Local,
    Smb,
    Afp,
    Nfs,
    Sshfs,
    Unknown,
}

/// Detection of remotely-mounted paths and their network characteristics
pub trait RemoteFileDetector: Send + Sync {
    /// Whether the path lives on a remote mount
    fn is_remote_path(&self, path: &Path) -> bool;

    /// Measured round-trip latency to the share backing the path
    fn network_latency_ms(&self, path: &Path) -> u32;

    /// Classify the mount behind a path
    fn mount_type(&self, path: &Path) -> MountType;
}

/// Path-prefix based detector.
///
/// Classifies network mounts by their URL scheme or mount-point prefix.
/// Latency is not measured here; callers needing real measurements inject
/// their own detector.
#[derive(Debug, Clone)]
pub struct PathPrefixDetector {
    /// Mount-point prefixes treated as remote (e.g. "/Volumes/")
    remote_prefixes: Vec<String>,
}

impl Default for PathPrefixDetector {
    fn default() -> Self {
        Self {
            remote_prefixes: vec!["/Volumes/".to_string(), "//".to_string()],
        }
    }
}

impl PathPrefixDetector {
    /// Create a detector with custom remote mount prefixes
    pub fn with_prefixes(prefixes: Vec<String>) -> Self {
        Self {
            remote_prefixes: prefixes,
        }
    }
}

impl RemoteFileDetector for PathPrefixDetector {
    fn is_remote_path(&self, path: &Path) -> bool {
        let s = path.to_string_lossy();
        self.mount_type(path) != MountType::Local
            || self.remote_prefixes.iter().any(|p| s.starts_with(p.as_str()))
    }

    fn network_latency_ms(&self, _path: &Path) -> u32 {
        0
    }

    fn mount_type(&self, path: &Path) -> MountType {
        let s = path.to_string_lossy();
        if s.starts_with("smb://") {
            MountType::Smb
        } else if s.starts_with("afp://") {
            MountType::Afp
        } else if s.starts_with("nfs://") {
            MountType::Nfs
        } else if s.starts_with("sshfs://") || s.starts_with("sftp://") {
            MountType::Sshfs
        } else if self.remote_prefixes.iter().any(|p| s.starts_with(p.as_str())) {
            MountType::Unknown
        } else {
            MountType::Local
        }
    }
}

/// Network fetch strategy, chosen from measured latency.
///
/// Selection is advisory: it shapes how aggressively remote files are
/// pulled, but deliberately enforces no abort deadline on a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// One file at a time, in navigation order
    Sequential,
    /// Small batches of nearby files
    Batch,
    /// Pull the whole prefetch window eagerly
    Preload,
    /// Mix of the above, re-evaluated as latency changes
    Adaptive,
}

impl FetchStrategy {
    /// Pick a strategy from a measured latency sample.
    pub fn for_latency(latency_ms: u32) -> Self {
        match latency_ms {
            0..=5 => FetchStrategy::Preload,
            6..=25 => FetchStrategy::Batch,
            26..=100 => FetchStrategy::Adaptive,
            _ => FetchStrategy::Sequential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_filesystem_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        fs::write(&src, b"lightbox").unwrap();

        let reader = StdFileSystem;
        assert_eq!(reader.size_of(&src).unwrap(), 8);
        assert_eq!(reader.copy(&src, &dst).unwrap(), 8);
        assert_eq!(reader.read_bytes(&dst).unwrap(), b"lightbox");
    }

    #[test]
    fn test_mount_classification() {
        let det = PathPrefixDetector::default();
        assert_eq!(det.mount_type(Path::new("/home/u/a.jpg")), MountType::Local);
        assert_eq!(det.mount_type(Path::new("smb://nas/a.jpg")), MountType::Smb);
        assert_eq!(det.mount_type(Path::new("afp://nas/a.jpg")), MountType::Afp);
        assert_eq!(det.mount_type(Path::new("nfs://nas/a.jpg")), MountType::Nfs);
        assert_eq!(det.mount_type(Path::new("sshfs://h/a.jpg")), MountType::Sshfs);
        assert_eq!(
            det.mount_type(Path::new("/Volumes/share/a.jpg")),
            MountType::Unknown
        );
    }

    #[test]
    fn test_remote_detection() {
        let det = PathPrefixDetector::default();
        assert!(!det.is_remote_path(Path::new("/home/u/a.jpg")));
        assert!(det.is_remote_path(Path::new("/Volumes/share/a.jpg")));
        assert!(det.is_remote_path(Path::new("smb://nas/a.jpg")));
    }

    #[test]
    fn test_fetch_strategy_tiers() {
        assert_eq!(FetchStrategy::for_latency(1), FetchStrategy::Preload);
        assert_eq!(FetchStrategy::for_latency(10), FetchStrategy::Batch);
        assert_eq!(FetchStrategy::for_latency(50), FetchStrategy::Adaptive);
        assert_eq!(FetchStrategy::for_latency(500), FetchStrategy::Sequential);
    }
}
