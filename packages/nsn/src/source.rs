//! NSN source resolution and signature derivation.
//!
//! The NSN dump is too large to keep in Git as a loose `.geojson`, so
//! production deployments drop a `.zip` in the data directory instead.
//! Resolution order is fixed: loose file, then the default archive name,
//! then any other `.zip` in directory-listing order; inside an archive
//! the first `.geojson`/`.json` entry wins.

use std::fs::File;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use plantwijs_nsn_models::{NsnConfig, Source};

use crate::NsnError;

/// Resolves where the NSN data comes from.
///
/// Pure function of the filesystem state. I/O errors opening a candidate
/// archive skip that candidate rather than failing resolution; if every
/// candidate fails the result is [`Source::Missing`]. Callers memoize
/// the result for the process lifetime (see `NsnIndex::source`).
#[must_use]
pub fn resolve(config: &NsnConfig) -> Source {
    let loose = config.geojson_path();
    if loose.exists() {
        return Source::LooseFile { path: loose };
    }

    // Default archive first, then every other .zip in listing order.
    let mut candidates = Vec::new();
    let default_zip = config.default_zip_path();
    if default_zip.exists() {
        candidates.push(default_zip);
    }
    if let Ok(entries) = std::fs::read_dir(&config.data_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let is_zip = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
            if is_zip && !candidates.contains(&path) {
                candidates.push(path);
            }
        }
    }

    for archive in candidates {
        match first_geojson_member(&archive) {
            Ok(Some(member)) => return Source::ZipMember { archive, member },
            Ok(None) => {}
            Err(e) => {
                log::warn!("Skipping unreadable zip {}: {e}", archive.display());
            }
        }
    }

    Source::Missing
}

/// Finds the first `.geojson`/`.json` entry in an archive, in central
/// directory order. Corrupt entries are skipped.
fn first_geojson_member(archive_path: &Path) -> Result<Option<String>, NsnError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    for i in 0..archive.len() {
        let entry = match archive.by_index_raw(i) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!(
                    "Skipping corrupt entry {i} in {}: {e}",
                    archive_path.display()
                );
                continue;
            }
        };
        let lower = entry.name().to_ascii_lowercase();
        if lower.ends_with(".geojson") || lower.ends_with(".json") {
            return Ok(Some(entry.name().to_string()));
        }
    }
    Ok(None)
}

/// Derives the signature the on-disk index is tagged with.
///
/// SHA-256 over source kind, path, member name, modification time, size,
/// and the RD-coordinate flag; any of these changing invalidates the
/// index. Stat failures degrade mtime/size to zero rather than erroring,
/// so a vanished file still yields a deterministic (stale) signature.
#[must_use]
pub fn signature(config: &NsnConfig, source: &Source) -> String {
    if source.is_missing() {
        return "missing".to_string();
    }

    let (mtime, size) = source
        .path()
        .and_then(|path| std::fs::metadata(path).ok())
        .map_or((0, 0), |meta| {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs());
            (mtime, meta.len())
        });

    let raw = format!(
        "{kind}|{path}|{member}|{mtime}|{size}|RD={rd}",
        kind = source.kind(),
        path = source.path().map_or_else(String::new, |p| p.display().to_string()),
        member = source.member().unwrap_or(""),
        rd = u8::from(config.geojson_is_rd),
    );
    hex::encode(Sha256::digest(raw.as_bytes()))
}
