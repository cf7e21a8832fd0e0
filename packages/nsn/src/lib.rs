#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial point lookup for the Natuurlijk Systeem Nederland (NSN) layer.
//!
//! Given a clicked map coordinate (already projected to the dataset's
//! RD New planar system), answers "which NSN vlak is this?" without ever
//! holding the multi-hundred-MB source `GeoJSON` in memory.
//!
//! # Architecture
//!
//! - **Source resolution** ([`source`]): loose `.geojson` in `data/`, or
//!   the first `GeoJSON` member of a `.zip` there. Resolved once per
//!   process.
//! - **Streaming decode** ([`stream`]): chunked, single-pass iteration
//!   over the `features` array with bounded memory.
//! - **Index** ([`store`]): a `DuckDB` file under the system temp dir
//!   with per-feature bounding boxes and compressed geometry, tagged
//!   with a signature of the source (path, mtime, size, CRS flag) and
//!   rebuilt from scratch whenever that signature changes.
//! - **Lookup**: bounding-box candidates (smallest first) refined with
//!   ray-casting containment ([`geom`]); if the index cannot be built,
//!   a slow full stream scan gives the same answer.
//!
//! Every failure degrades locally: the public surface returns `None` or
//! takes the slow path, it never errors a request.
//!
//! # Usage
//!
//! ```rust,no_run
//! use plantwijs_nsn::NsnIndex;
//!
//! let index = NsnIndex::with_defaults();
//! index.warm();
//! if let Some(label) = index.lookup_label(121_000.0, 487_000.0) {
//!     println!("{label}");
//! }
//! ```

pub mod geom;
pub mod source;
pub mod store;
pub mod stream;

use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use thiserror::Error;

pub use plantwijs_nsn_models::{NsnConfig, Source, label::label_from_properties};
use store::IndexRecord;
use stream::FeatureStream;

/// Errors internal to the NSN subsystem.
///
/// These never cross the public lookup surface; [`NsnIndex::lookup_label`]
/// recovers every failure into "no label" or the slow scan path.
#[derive(Debug, Error)]
pub enum NsnError {
    /// Filesystem or stream I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive could not be opened or the member is absent.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Index storage operation failed.
    #[error("Database error: {0}")]
    Db(#[from] duckdb::Error),

    /// Zip member uses a compression method we cannot stream.
    #[error("Unsupported zip compression method: {0}")]
    UnsupportedCompression(String),

    /// No loose file and no archive with a `GeoJSON` member was found.
    #[error("NSN source not found; add a .zip with a .geojson to the data directory")]
    SourceMissing,
}

/// The NSN spatial index service.
///
/// Constructed once at startup and shared by reference across request
/// handlers. Holds the memoized source descriptor and the lock that
/// serializes the check-or-rebuild decision; read-side lookups run
/// concurrently without the lock.
///
/// All operations are synchronous blocking I/O. A cold-start rebuild
/// can take tens of seconds for a large source; callers on async
/// runtimes must offload to a blocking pool.
pub struct NsnIndex {
    config: NsnConfig,
    /// Resolved once per process lifetime; filesystem changes are not
    /// observed until restart.
    resolved: OnceLock<Source>,
    /// Serializes signature checks and rebuilds. Held for the entire
    /// rebuild so waiters re-check and find the index fresh.
    build_lock: Mutex<()>,
}

impl NsnIndex {
    /// Creates the service for the given configuration.
    #[must_use]
    pub const fn new(config: NsnConfig) -> Self {
        Self {
            config,
            resolved: OnceLock::new(),
            build_lock: Mutex::new(()),
        }
    }

    /// Creates the service with the conventional paths.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(NsnConfig::default())
    }

    /// The configuration this service was built with.
    #[must_use]
    pub const fn config(&self) -> &NsnConfig {
        &self.config
    }

    /// The resolved source, memoized on first access.
    pub fn source(&self) -> &Source {
        self.resolved.get_or_init(|| source::resolve(&self.config))
    }

    /// Whether the on-disk index exists and matches the current source
    /// signature. Does not build anything.
    #[must_use]
    pub fn index_fresh(&self) -> bool {
        let src = self.source();
        if src.is_missing() {
            return false;
        }
        let sig = source::signature(&self.config, src);
        let db_path = self.config.index_db_path();
        db_path.exists()
            && matches!(store::read_signature(&db_path), Ok(Some(stored)) if stored == sig)
    }

    /// Ensures the on-disk index exists and matches the current source,
    /// rebuilding it if stale or unreadable. Returns whether the index
    /// is usable; `false` means lookups fall back to stream scans.
    ///
    /// The check and any rebuild run under the service lock: concurrent
    /// callers during a cold-start rebuild block until it completes,
    /// then find the signature fresh.
    pub fn ensure_index(&self) -> bool {
        let src = self.source();
        if src.is_missing() {
            return false;
        }
        let sig = source::signature(&self.config, src);

        let _guard = match self.build_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let db_path = self.config.index_db_path();
        if db_path.exists() {
            match store::read_signature(&db_path) {
                Ok(Some(stored)) if stored == sig => return true,
                Ok(_) => log::info!("NSN index stale, rebuilding"),
                Err(e) => log::warn!("NSN index unreadable ({e}), rebuilding"),
            }
        }

        let started = Instant::now();
        let features = match FeatureStream::open(src) {
            Ok(features) => features,
            Err(e) => {
                log::warn!("NSN index build failed to open source: {e}");
                return false;
            }
        };
        match store::build(&db_path, features.filter_map(index_record), &sig) {
            Ok(count) => {
                log::info!(
                    "NSN index built: {count} features in {:.1}s -> {}",
                    started.elapsed().as_secs_f64(),
                    db_path.display()
                );
                true
            }
            Err(e) => {
                log::warn!("NSN index build failed: {e}");
                false
            }
        }
    }

    /// Looks up the NSN label for a point in the dataset's coordinate
    /// system (RD New planar meters under the default configuration;
    /// the caller performs any lat/lon projection).
    ///
    /// Fast path: bounding-box candidates from the on-disk index,
    /// smallest box first, refined with exact containment. Fallback
    /// (index unavailable, or no indexed candidate matched): a full
    /// stream scan. All failures degrade to `None`.
    #[must_use]
    pub fn lookup_label(&self, x: f64, y: f64) -> Option<String> {
        if self.source().is_missing() {
            return None;
        }

        if self.ensure_index() {
            match self.lookup_indexed(x, y) {
                Ok(Some(label)) => return Some(label),
                Ok(None) => {}
                Err(e) => log::warn!("NSN index lookup failed, falling back to scan: {e}"),
            }
        }

        self.scan_stream(x, y)
    }

    /// Logs the resolved source and primes the index. Called once at
    /// startup so the first map click does not pay the rebuild.
    pub fn warm(&self) {
        match self.source() {
            Source::Missing => {
                log::info!("NSN source: not found (NSN layer disabled)");
                return;
            }
            Source::LooseFile { path } => log::info!("NSN source: {}", path.display()),
            Source::ZipMember { archive, member } => {
                log::info!("NSN source: zip {} :: {member}", archive.display());
            }
        }
        if self.ensure_index() {
            log::info!("NSN index ready");
        } else {
            log::warn!("NSN index unavailable; lookups will stream-scan (slow)");
        }
    }

    fn lookup_indexed(&self, x: f64, y: f64) -> Result<Option<String>, NsnError> {
        let db_path = self.config.index_db_path();
        for candidate in store::candidates(&db_path, x, y)? {
            let geometry = match store::decode_geometry(&candidate.geom) {
                Ok(geometry) => geometry,
                Err(e) => {
                    log::warn!("Skipping corrupt geometry for '{}': {e}", candidate.label);
                    continue;
                }
            };
            if geom::value_contains(x, y, &geometry.value) {
                return Ok(Some(candidate.label));
            }
        }
        Ok(None)
    }

    /// Correctness-over-speed fallback: O(features) pass over the
    /// source, testing every geometry directly.
    fn scan_stream(&self, x: f64, y: f64) -> Option<String> {
        let features = match FeatureStream::open(self.source()) {
            Ok(features) => features,
            Err(e) => {
                log::warn!("NSN fallback scan could not open source: {e}");
                return None;
            }
        };
        for feature in features {
            let Some(geometry) = feature.geometry.as_ref() else {
                continue;
            };
            if !geom::value_contains(x, y, &geometry.value) {
                continue;
            }
            if let Some(label) = feature.properties.as_ref().and_then(label_from_properties) {
                return Some(label);
            }
        }
        None
    }
}

/// Turns a streamed feature into an index record: Polygon/`MultiPolygon`
/// only, non-degenerate bounding box, and a derivable label. Everything
/// else is excluded from the index.
fn index_record(feature: geojson::Feature) -> Option<IndexRecord> {
    let geometry = feature.geometry?;
    let non_empty = match &geometry.value {
        geojson::Value::Polygon(rings) => !rings.is_empty(),
        geojson::Value::MultiPolygon(polygons) => !polygons.is_empty(),
        _ => false,
    };
    if !non_empty {
        return None;
    }
    let bbox = geom::bbox_of(&geometry.value)?;
    let label = feature.properties.as_ref().and_then(label_from_properties)?;
    Some(IndexRecord {
        label,
        bbox,
        geometry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const DUINVALLEI: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"subtype_na": "Duinvallei"},
             "geometry": {"type": "Polygon",
                          "coordinates": [[[0,0],[100,0],[100,100],[0,100],[0,0]]]}}
        ]
    }"#;

    const NESTED: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"naam": "Zandlandschap"},
             "geometry": {"type": "Polygon",
                          "coordinates": [[[0,0],[100,0],[100,100],[0,100],[0,0]]]}},
            {"type": "Feature", "properties": {"subtype_na": "Vennen"},
             "geometry": {"type": "Polygon",
                          "coordinates": [[[40,40],[60,40],[60,60],[40,60],[40,40]]]}},
            {"type": "Feature", "properties": {"ongelabeld": true},
             "geometry": {"type": "Polygon",
                          "coordinates": [[[200,200],[210,200],[210,210],[200,210],[200,200]]]}}
        ]
    }"#;

    struct Fixture {
        root: PathBuf,
        config: NsnConfig,
    }

    impl Fixture {
        fn new(name: &str, document: &str) -> Self {
            let root = std::env::temp_dir()
                .join("plantwijs_nsn_lib_tests")
                .join(format!("{}-{name}", std::process::id()));
            let _ = std::fs::remove_dir_all(&root);
            let data_dir = root.join("data");
            std::fs::create_dir_all(&data_dir).unwrap();
            let config = NsnConfig {
                data_dir,
                index_dir: root.join("index"),
                ..NsnConfig::default()
            };
            std::fs::write(config.geojson_path(), document).unwrap();
            Self { root, config }
        }

        fn index(&self) -> NsnIndex {
            NsnIndex::new(self.config.clone())
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn end_to_end_duinvallei() {
        let fixture = Fixture::new("e2e", DUINVALLEI);
        let index = fixture.index();
        index.warm();
        assert_eq!(
            index.lookup_label(50.0, 50.0),
            Some("Duinvallei".to_string())
        );
        assert_eq!(index.lookup_label(200.0, 200.0), None);
    }

    #[test]
    fn nested_features_prefer_smallest_bbox() {
        let fixture = Fixture::new("nested", NESTED);
        let index = fixture.index();
        // Inside both polygons: the smaller Vennen vlak wins.
        assert_eq!(index.lookup_label(50.0, 50.0), Some("Vennen".to_string()));
        // Inside only the outer polygon.
        assert_eq!(
            index.lookup_label(10.0, 10.0),
            Some("Zandlandschap".to_string())
        );
        // Inside only the unlabeled feature: excluded from index and
        // skipped by the scan.
        assert_eq!(index.lookup_label(205.0, 205.0), None);
    }

    #[test]
    fn second_ensure_reuses_the_index() {
        let fixture = Fixture::new("idempotent", DUINVALLEI);
        let index = fixture.index();
        assert!(index.ensure_index());

        // Plant a sentinel; a rebuild would overwrite it.
        let db_path = fixture.config.index_db_path();
        let conn = duckdb::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE meta SET value = 'sentinel' WHERE key = 'built_at'",
            [],
        )
        .unwrap();
        drop(conn);

        assert!(index.ensure_index());
        assert_eq!(
            store::read_meta(&db_path, "built_at").unwrap(),
            Some("sentinel".to_string())
        );
        assert_eq!(
            index.lookup_label(50.0, 50.0),
            Some("Duinvallei".to_string())
        );
    }

    #[test]
    fn source_change_forces_rebuild() {
        let fixture = Fixture::new("stale-size", DUINVALLEI);
        assert!(fixture.index().ensure_index());

        let db_path = fixture.config.index_db_path();
        let conn = duckdb::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE meta SET value = 'sentinel' WHERE key = 'built_at'",
            [],
        )
        .unwrap();
        drop(conn);

        // Growing the source (a re-upload) changes the signature.
        let mut document = std::fs::read_to_string(fixture.config.geojson_path()).unwrap();
        document.push('\n');
        std::fs::write(fixture.config.geojson_path(), document).unwrap();

        // Fresh service instance re-resolves the source.
        assert!(fixture.index().ensure_index());
        assert_ne!(
            store::read_meta(&db_path, "built_at").unwrap(),
            Some("sentinel".to_string())
        );
    }

    #[test]
    fn rd_flag_change_forces_rebuild() {
        let fixture = Fixture::new("stale-rd", DUINVALLEI);
        assert!(fixture.index().ensure_index());

        let db_path = fixture.config.index_db_path();
        let conn = duckdb::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE meta SET value = 'sentinel' WHERE key = 'built_at'",
            [],
        )
        .unwrap();
        drop(conn);

        let flipped = NsnConfig {
            geojson_is_rd: false,
            ..fixture.config.clone()
        };
        assert!(NsnIndex::new(flipped).ensure_index());
        assert_ne!(
            store::read_meta(&db_path, "built_at").unwrap(),
            Some("sentinel".to_string())
        );
    }

    #[test]
    fn fallback_scan_matches_indexed_lookups() {
        let fixture = Fixture::new("fallback-parity", NESTED);
        let indexed = fixture.index();
        assert!(indexed.ensure_index());

        // Storage failure: the index dir path is occupied by a file.
        let blocked = fixture.root.join("blocked");
        std::fs::write(&blocked, b"in the way").unwrap();
        let broken = NsnIndex::new(NsnConfig {
            index_dir: blocked.join("sub"),
            ..fixture.config.clone()
        });
        assert!(!broken.ensure_index());

        for (x, y) in [(50.0, 50.0), (10.0, 10.0), (205.0, 205.0), (999.0, 999.0)] {
            assert_eq!(
                indexed.lookup_label(x, y),
                broken.lookup_label(x, y),
                "parity at ({x}, {y})"
            );
        }
    }

    #[test]
    fn missing_source_disables_lookups() {
        let root = std::env::temp_dir()
            .join("plantwijs_nsn_lib_tests")
            .join(format!("{}-missing", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("data")).unwrap();
        let index = NsnIndex::new(NsnConfig {
            data_dir: root.join("data"),
            index_dir: root.join("index"),
            ..NsnConfig::default()
        });

        assert!(index.source().is_missing());
        assert!(!index.ensure_index());
        assert!(!index.index_fresh());
        assert_eq!(index.lookup_label(50.0, 50.0), None);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn index_fresh_reflects_signature_state() {
        let fixture = Fixture::new("fresh", DUINVALLEI);
        let index = fixture.index();
        assert!(!index.index_fresh());
        assert!(index.ensure_index());
        assert!(index.index_fresh());
    }
}
