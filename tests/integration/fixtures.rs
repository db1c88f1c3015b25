//! Shared helpers: real audio containers on disk and catalog entries.

use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use trackdedup::catalog::{CatalogEntry, RawRecord};
use trackdedup::fingerprint::Fingerprint;

/// Four MPEG-1 Layer III frame headers; `seed` varies the payload.
pub fn mpeg_bytes(seed: u8) -> Vec<u8> {
    let mut bytes = Vec::new();
    for _ in 0..4 {
        bytes.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x64]);
        bytes.extend(std::iter::repeat(seed).take(413));
    }
    bytes
}

/// Minimal AIFF with a COMM and an SSND chunk.
pub fn aiff_bytes() -> Vec<u8> {
    let mut comm = Vec::new();
    comm.extend_from_slice(&2u16.to_be_bytes());
    comm.extend_from_slice(&4u32.to_be_bytes());
    comm.extend_from_slice(&16u16.to_be_bytes());
    comm.extend_from_slice(&[0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0]);

    let mut ssnd = Vec::new();
    ssnd.extend_from_slice(&0u32.to_be_bytes());
    ssnd.extend_from_slice(&0u32.to_be_bytes());
    ssnd.extend((0u8..16).map(|i| i.wrapping_mul(17)));

    let mut body = Vec::new();
    body.extend_from_slice(b"AIFF");
    for (id, chunk) in [(b"COMM", &comm), (b"SSND", &ssnd)] {
        body.extend_from_slice(id);
        body.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        body.extend_from_slice(chunk);
    }

    let mut file = Vec::new();
    file.extend_from_slice(b"FORM");
    file.extend_from_slice(&(body.len() as u32).to_be_bytes());
    file.extend_from_slice(&body);
    file
}

/// Write `bytes` to `dir/name` with the given modification time.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8], mtime_secs: i64) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime_secs, 0)).unwrap();
    path
}

/// Write a short mono WAV file.
pub fn write_wav(dir: &Path, name: &str, mtime_secs: i64) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..200i16 {
        writer.write_sample(i.wrapping_mul(97)).unwrap();
    }
    writer.finalize().unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime_secs, 0)).unwrap();
    path
}

/// A catalog entry, optionally already tagged with `fingerprint`.
pub fn entry(id: &str, name: &str, path: &Path, fingerprint: Option<Fingerprint>) -> CatalogEntry {
    CatalogEntry {
        id: id.to_string(),
        name: name.to_string(),
        path: path.to_path_buf(),
        tags: fingerprint.map(|fp| fp.to_tag()).into_iter().collect(),
        trashed: false,
    }
}

/// A catalog entry for a file that is not on disk.
pub fn remote_entry(id: &str, name: &str, ext: &str, fingerprint: Option<Fingerprint>) -> CatalogEntry {
    let path = PathBuf::from(format!("/nonexistent/library/{}.{}", id, ext));
    entry(id, name, &path, fingerprint)
}

/// A workspace record with one path field set.
pub fn record(id: &str, field: &str, path: &Path) -> RawRecord {
    let mut fields = serde_json::Map::new();
    fields.insert(
        field.to_string(),
        serde_json::Value::String(path.to_string_lossy().into_owned()),
    );
    RawRecord {
        id: id.to_string(),
        fields,
    }
}

/// Fingerprint derived from a single byte.
pub fn fp(byte: u8) -> Fingerprint {
    Fingerprint::from_bytes([byte; 32])
}
