//! Embedding fingerprints into audio metadata containers.
//!
//! | Format | Slot |
//! |--------|------|
//! | MP4 / ALAC | iTunes freeform atom `----:com.apple.iTunes:FINGERPRINT` |
//! | MP3 | ID3v2 user text frame `TXXX:FINGERPRINT` |
//! | FLAC | Vorbis comment `FINGERPRINT` |
//! | AIFF | ID3v2 user text frame inside the `ID3 ` chunk |
//! | WAV | unsupported, tracked out-of-band only |
//!
//! # Write discipline
//!
//! Every write is read-modify-write: the existing tag is loaded, the single
//! fingerprint slot is replaced, and everything else is written back. The
//! write happens on a copy next to the original, the copy is verified by
//! extracting the digest again, and only then is it renamed over the
//! original. A failed or interrupted embed leaves the original untouched.
//!
//! Extraction never fails: missing slots, unreadable files, and malformed
//! containers all read as "no fingerprint".

use std::borrow::Cow;
use std::fs::{self, File};
use std::path::Path;

use id3::frame::ExtendedText;
use id3::{TagLike, Version};
use lofty::config::{ParseOptions, WriteOptions};
use lofty::file::AudioFile;
use lofty::flac::FlacFile;
use lofty::mp4::{Atom, AtomData, AtomIdent, Mp4File};
use lofty::tag::TagExt;

use super::{compute, Fingerprint, FingerprintError};
use crate::catalog::ContainerFormat;

/// Description of the ID3v2 `TXXX` frame (MP3, AIFF).
pub const ID3_DESCRIPTION: &str = "FINGERPRINT";
/// Vorbis comment field name (FLAC).
pub const VORBIS_KEY: &str = "FINGERPRINT";
/// Freeform atom namespace (MP4).
pub const MP4_MEAN: &str = "com.apple.iTunes";
/// Freeform atom name (MP4).
pub const MP4_NAME: &str = "FINGERPRINT";

/// Result of a successful embed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedOutcome {
    /// The digest was written to the file.
    Written,
    /// The file already carried this digest; nothing was written.
    AlreadyPresent,
    /// The container cannot carry the digest; track it out-of-band.
    Unsupported,
}

/// Write `digest` into the file's fingerprint slot.
///
/// # Errors
///
/// Returns [`FingerprintError`] when the file cannot be copied, its existing
/// metadata cannot be parsed, or the write cannot be verified. The original
/// file is unchanged in every error case.
pub fn embed(path: &Path, digest: &Fingerprint) -> Result<EmbedOutcome, FingerprintError> {
    embed_with(path, digest, false)
}

/// Like [`embed`], for a digest just computed from the file's own bytes.
///
/// The staged copy is re-hashed before the slot is written, so a file that
/// changed after `digest` was computed is left alone instead of being
/// stamped with a digest of content it no longer has.
///
/// # Errors
///
/// As [`embed`], plus [`FingerprintError::Metadata`] when the content no
/// longer matches `digest`.
pub fn embed_computed(path: &Path, digest: &Fingerprint) -> Result<EmbedOutcome, FingerprintError> {
    embed_with(path, digest, true)
}

fn embed_with(
    path: &Path,
    digest: &Fingerprint,
    require_matching_content: bool,
) -> Result<EmbedOutcome, FingerprintError> {
    let Some(format) = ContainerFormat::from_path(path) else {
        return Ok(EmbedOutcome::Unsupported);
    };
    if !format.supports_embedding() {
        log::debug!("{} cannot carry an in-file fingerprint", path.display());
        return Ok(EmbedOutcome::Unsupported);
    }

    if extract(path).as_ref() == Some(digest) {
        log::trace!("Fingerprint already embedded: {}", path.display());
        return Ok(EmbedOutcome::AlreadyPresent);
    }

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let staged = tempfile::Builder::new()
        .prefix(".trackdedup-")
        .suffix(&suffix)
        .tempfile_in(parent)
        .map_err(|e| FingerprintError::from_io(parent, e))?
        .into_temp_path();

    // fs::copy carries the permission bits over
    fs::copy(path, &staged).map_err(|e| FingerprintError::from_io(path, e))?;

    if require_matching_content && compute(&staged)? != *digest {
        return Err(FingerprintError::Metadata {
            path: path.to_path_buf(),
            message: "file changed after its fingerprint was computed".to_string(),
        });
    }

    write_slot(&staged, format, digest).map_err(|message| FingerprintError::Metadata {
        path: path.to_path_buf(),
        message,
    })?;

    if extract_as(&staged, format).as_ref() != Some(digest) {
        return Err(FingerprintError::Metadata {
            path: path.to_path_buf(),
            message: "written fingerprint could not be read back".to_string(),
        });
    }

    staged
        .persist(path)
        .map_err(|e| FingerprintError::from_io(path, e.error))?;

    log::debug!("Embedded {} into {}", digest.short(), path.display());
    Ok(EmbedOutcome::Written)
}

/// Read the fingerprint embedded in a file, if any.
#[must_use]
pub fn extract(path: &Path) -> Option<Fingerprint> {
    ContainerFormat::from_path(path).and_then(|format| extract_as(path, format))
}

/// Read the fingerprint from a file known to be in `format`.
#[must_use]
pub fn extract_as(path: &Path, format: ContainerFormat) -> Option<Fingerprint> {
    let value = match format {
        ContainerFormat::Mp3 => read_id3_text(id3::Tag::read_from_path(path), path),
        ContainerFormat::Aiff => read_id3_text(id3::Tag::read_from_aiff_path(path), path),
        ContainerFormat::Flac => read_vorbis_comment(path),
        ContainerFormat::Mp4 => read_freeform_atom(path),
        ContainerFormat::Wav => None,
    }?;

    let parsed = Fingerprint::from_hex(value.trim_matches(|c: char| c == '\0' || c.is_whitespace()));
    if parsed.is_none() {
        log::debug!("Ignoring malformed embedded fingerprint in {}", path.display());
    }
    parsed
}

fn parse_options() -> ParseOptions {
    ParseOptions::new().read_properties(false)
}

fn freeform_ident() -> AtomIdent<'static> {
    AtomIdent::Freeform {
        mean: Cow::Borrowed(MP4_MEAN),
        name: Cow::Borrowed(MP4_NAME),
    }
}

fn read_id3_text(tag: id3::Result<id3::Tag>, path: &Path) -> Option<String> {
    match tag {
        Ok(tag) => tag
            .extended_texts()
            .find(|frame| frame.description == ID3_DESCRIPTION)
            .map(|frame| frame.value.clone()),
        Err(e) => {
            if !matches!(e.kind, id3::ErrorKind::NoTag) {
                log::debug!("Unreadable ID3 tag in {}: {}", path.display(), e);
            }
            None
        }
    }
}

fn read_vorbis_comment(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    match FlacFile::read_from(&mut file, parse_options()) {
        Ok(flac) => flac
            .vorbis_comments()
            .and_then(|comments| comments.get(VORBIS_KEY))
            .map(str::to_string),
        Err(e) => {
            log::debug!("Unreadable FLAC metadata in {}: {}", path.display(), e);
            None
        }
    }
}

fn read_freeform_atom(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    match Mp4File::read_from(&mut file, parse_options()) {
        Ok(mp4) => mp4.ilst().and_then(|ilst| {
            ilst.get(&freeform_ident()).and_then(|atom| {
                atom.data().find_map(|data| match data {
                    AtomData::UTF8(text) => Some(text.clone()),
                    _ => None,
                })
            })
        }),
        Err(e) => {
            log::debug!("Unreadable MP4 metadata in {}: {}", path.display(), e);
            None
        }
    }
}

/// Replace the fingerprint slot in `path`, keeping every other field.
fn write_slot(path: &Path, format: ContainerFormat, digest: &Fingerprint) -> Result<(), String> {
    match format {
        ContainerFormat::Mp3 => {
            let mut tag = load_id3(id3::Tag::read_from_path(path))?;
            set_id3_text(&mut tag, digest);
            let version = id3_write_version(&tag);
            tag.write_to_path(path, version).map_err(|e| e.to_string())
        }
        ContainerFormat::Aiff => {
            let mut tag = load_id3(id3::Tag::read_from_aiff_path(path))?;
            set_id3_text(&mut tag, digest);
            let version = id3_write_version(&tag);
            tag.write_to_aiff_path(path, version).map_err(|e| e.to_string())
        }
        ContainerFormat::Flac => {
            let mut file = File::open(path).map_err(|e| e.to_string())?;
            let flac = FlacFile::read_from(&mut file, parse_options()).map_err(|e| e.to_string())?;
            drop(file);

            let mut comments = flac.vorbis_comments().cloned().unwrap_or_default();
            comments.insert(VORBIS_KEY.to_string(), digest.to_hex());
            comments
                .save_to_path(path, WriteOptions::default())
                .map_err(|e| e.to_string())
        }
        ContainerFormat::Mp4 => {
            let mut file = File::open(path).map_err(|e| e.to_string())?;
            let mp4 = Mp4File::read_from(&mut file, parse_options()).map_err(|e| e.to_string())?;
            drop(file);

            let mut ilst = mp4.ilst().cloned().unwrap_or_default();
            ilst.replace_atom(Atom::new(freeform_ident(), AtomData::UTF8(digest.to_hex())));
            ilst.save_to_path(path, WriteOptions::default())
                .map_err(|e| e.to_string())
        }
        ContainerFormat::Wav => Err("WAV cannot carry an in-file fingerprint".to_string()),
    }
}

/// A missing tag starts fresh; an unparseable one aborts so it is never clobbered.
fn load_id3(tag: id3::Result<id3::Tag>) -> Result<id3::Tag, String> {
    match tag {
        Ok(tag) => Ok(tag),
        Err(e) if matches!(e.kind, id3::ErrorKind::NoTag) => Ok(id3::Tag::new()),
        Err(e) => Err(e.to_string()),
    }
}

fn set_id3_text(tag: &mut id3::Tag, digest: &Fingerprint) {
    tag.remove_extended_text(Some(ID3_DESCRIPTION), None);
    tag.add_frame(ExtendedText {
        description: ID3_DESCRIPTION.to_string(),
        value: digest.to_hex(),
    });
}

/// ID3v2.2 has no `TXXX`; such tags are upgraded on write.
fn id3_write_version(tag: &id3::Tag) -> Version {
    match tag.version() {
        Version::Id3v22 => Version::Id3v24,
        other => other,
    }
}
