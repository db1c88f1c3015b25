//! Content fingerprints: computation, in-file embedding, and the worker pool.
//!
//! # Overview
//!
//! A [`Fingerprint`] is the 256-bit BLAKE3 digest of a file's raw bytes. It is
//! the durable identity of an audio file: stable across moves, renames, and
//! catalog re-tagging.
//!
//! - [`hasher`]: streaming computation over bounded chunks
//! - [`codec`]: embedding into and extracting from format-specific metadata
//! - [`pipeline`]: parallel probe/compute/embed cycles with cancellation
//!
//! # Identity after embedding
//!
//! Writing a digest into a file changes the file's bytes. The identity of a
//! file is therefore the digest computed *before* its first embed; once a
//! digest is embedded, extraction is authoritative and the pipeline never
//! recomputes over it.
//!
//! # Example
//!
//! ```
//! use trackdedup::fingerprint::Fingerprint;
//!
//! let fp = Fingerprint::from_bytes([0xab; 32]);
//! assert_eq!(fp.to_hex().len(), 64);
//! assert_eq!(Fingerprint::from_tag(&fp.to_tag()), Some(fp));
//! ```

pub mod codec;
pub mod hasher;
pub mod pipeline;

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use codec::{embed, extract, EmbedOutcome};
pub use hasher::{compute, Hasher, CHUNK_SIZE};
pub use pipeline::{
    EmbedStatus, FingerprintPipeline, Fingerprinted, PipelineConfig, PipelineStats, ProbeResult,
    WorkResult,
};

/// A 256-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Prefix of the catalog tag carrying a fingerprint.
    pub const TAG_PREFIX: &'static str = "fingerprint:";

    /// Wrap raw digest bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hexadecimal form (64 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse a 64-character hexadecimal digest (either case).
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// Catalog tag form: `fingerprint:<hex>`.
    #[must_use]
    pub fn to_tag(&self) -> String {
        format!("{}{}", Self::TAG_PREFIX, self.to_hex())
    }

    /// Parse the catalog tag form.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        tag.strip_prefix(Self::TAG_PREFIX)
            .and_then(|hex| Self::from_hex(hex.trim()))
    }

    /// First 12 hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid fingerprint: {}", hex)))
    }
}

/// Errors from computing, embedding, or extracting fingerprints.
#[derive(thiserror::Error, Debug)]
pub enum FingerprintError {
    /// The file does not exist (it may have moved outside the engine's control).
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading or writing the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The file ended before the size recorded when it was opened.
    #[error("Truncated read for {path}: expected {expected} bytes, read {read}")]
    Truncated {
        /// File being read
        path: PathBuf,
        /// Size at open time
        expected: u64,
        /// Bytes actually read
        read: u64,
    },

    /// The metadata container could not be written.
    #[error("Metadata write failed for {path}: {message}")]
    Metadata {
        /// File being written
        path: PathBuf,
        /// Underlying library message
        message: String,
    },

    /// An I/O error occurred while accessing the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl FingerprintError {
    /// Classify an I/O error for `path`.
    #[must_use]
    pub fn from_io(path: &std::path::Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip_and_case() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xAB;
        bytes[31] = 0x0F;
        let fp = Fingerprint::from_bytes(bytes);
        let hex = fp.to_hex();

        assert!(hex.starts_with("ab"));
        assert!(hex.ends_with("0f"));
        assert_eq!(Fingerprint::from_hex(&hex.to_uppercase()), Some(fp));
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(Fingerprint::from_hex("").is_none());
        assert!(Fingerprint::from_hex(&"a".repeat(63)).is_none());
        assert!(Fingerprint::from_hex(&"g".repeat(64)).is_none());
        // 64 bytes but multibyte characters
        assert!(Fingerprint::from_hex(&"é".repeat(32)).is_none());
    }

    #[test]
    fn test_tag_form() {
        let fp = Fingerprint::from_bytes([0x11; 32]);
        let tag = fp.to_tag();
        assert!(tag.starts_with("fingerprint:"));
        assert_eq!(Fingerprint::from_tag(&tag), Some(fp));
        assert!(Fingerprint::from_tag("genre:house").is_none());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let fp = Fingerprint::from_bytes([0x22; 32]);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
        assert!(serde_json::from_str::<Fingerprint>("\"zz\"").is_err());
    }

    #[test]
    fn test_error_classification() {
        let path = std::path::Path::new("/x");
        let err = FingerprintError::from_io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, FingerprintError::NotFound(_)));
        assert_eq!(err.to_string(), "File not found: /x");

        let err = FingerprintError::from_io(
            path,
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"),
        );
        assert_eq!(err.to_string(), "Permission denied: /x");
    }
}
