//! BLAKE3 file hasher with streaming support.
//!
//! # Overview
//!
//! [`Hasher`] reads a file in fixed-size chunks so memory use stays bounded
//! regardless of file size. Only the byte content is hashed: file name,
//! timestamps, and permissions never influence the digest.
//!
//! # Example
//!
//! ```no_run
//! use trackdedup::fingerprint::compute;
//! use std::path::Path;
//!
//! let fp = compute(Path::new("/music/track.flac")).unwrap();
//! println!("{}", fp.to_hex());
//! ```

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use super::{Fingerprint, FingerprintError};

/// Read buffer size used for streaming (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Streaming BLAKE3 hasher.
#[derive(Debug, Clone)]
pub struct Hasher {
    chunk_size: usize,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher with the default chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
        }
    }

    /// Use a different chunk size (minimum 1 byte).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Compute the fingerprint of a file's full contents.
    ///
    /// # Errors
    ///
    /// - [`FingerprintError::NotFound`] / [`FingerprintError::PermissionDenied`]
    ///   when the file cannot be opened
    /// - [`FingerprintError::Truncated`] when fewer bytes are read than the
    ///   file's size at open time (file shrank or vanished mid-read)
    /// - [`FingerprintError::Io`] for any other read failure
    pub fn compute(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        let mut file = File::open(path).map_err(|e| FingerprintError::from_io(path, e))?;
        let expected = file
            .metadata()
            .map_err(|e| FingerprintError::from_io(path, e))?
            .len();

        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; self.chunk_size];
        let mut read_total: u64 = 0;

        loop {
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FingerprintError::from_io(path, e)),
            };
            hasher.update(&buffer[..n]);
            read_total += n as u64;
        }

        if read_total < expected {
            log::warn!(
                "Short read for {}: {} of {} bytes",
                path.display(),
                read_total,
                expected
            );
            return Err(FingerprintError::Truncated {
                path: path.to_path_buf(),
                expected,
                read: read_total,
            });
        }

        let digest = Fingerprint::from_bytes(*hasher.finalize().as_bytes());
        log::trace!("Hashed {} ({} bytes): {}", path.display(), read_total, digest.short());
        Ok(digest)
    }
}

/// Compute a file's fingerprint with the default [`Hasher`].
///
/// # Errors
///
/// See [`Hasher::compute`].
pub fn compute(path: &Path) -> Result<Fingerprint, FingerprintError> {
    Hasher::new().compute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_identical_content_identical_digest() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.flac");
        let b = dir.path().join("renamed copy.mp3");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();

        assert_eq!(compute(&a).unwrap(), compute(&b).unwrap());
    }

    #[test]
    fn test_one_byte_changes_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.wav");
        fs::write(&path, b"abcdef").unwrap();
        let before = compute(&path).unwrap();
        fs::write(&path, b"abcdeg").unwrap();
        assert_ne!(before, compute(&path).unwrap());
    }

    #[test]
    fn test_matches_blake3_reference() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        let content = vec![0x5au8; 3 * CHUNK_SIZE + 17];
        fs::write(&path, &content).unwrap();

        let expected = Fingerprint::from_bytes(*blake3::hash(&content).as_bytes());
        assert_eq!(compute(&path).unwrap(), expected);
    }

    #[test]
    fn test_chunk_size_does_not_change_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        fs::write(&path, (0..10_000u32).map(|i| i as u8).collect::<Vec<_>>()).unwrap();

        let small = Hasher::new().with_chunk_size(7).compute(&path).unwrap();
        let large = Hasher::new().compute(&path).unwrap();
        assert_eq!(small, large);
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.mp3");
        fs::write(&path, b"").unwrap();
        let expected = Fingerprint::from_bytes(*blake3::hash(b"").as_bytes());
        assert_eq!(compute(&path).unwrap(), expected);
    }

    #[test]
    fn test_missing_file() {
        let err = compute(Path::new("/definitely/not/here.flac")).unwrap_err();
        assert!(matches!(err, FingerprintError::NotFound(_)));
    }
}
