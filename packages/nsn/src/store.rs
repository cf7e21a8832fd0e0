//! On-disk spatial index storage in `DuckDB`.
//!
//! Three tables: `feats` (label + zlib-compressed geometry + bbox area),
//! `bbox` (one bounding-box row per feature, same id), and `meta`
//! (source signature + build timestamp). The database is an internal
//! cache: safe to delete at any time, dropped wholesale and rebuilt when
//! the source signature changes.

use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use duckdb::Connection;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::NsnError;
use crate::geom::BBox;

/// Rows inserted between transaction commits during a build. A
/// durability/throughput tradeoff, not a correctness invariant.
const COMMIT_BATCH: u64 = 500;

/// Upper bound on bounding-box candidates tried per lookup. A tuning
/// knob against stacks of overlapping features, not a load-bearing
/// constant.
pub const CANDIDATE_LIMIT: u32 = 80;

/// One labeled, indexable feature ready for insertion.
pub struct IndexRecord {
    /// Display label derived from the feature properties.
    pub label: String,
    /// Bounding box over all rings.
    pub bbox: BBox,
    /// The Polygon/`MultiPolygon` geometry.
    pub geometry: geojson::Geometry,
}

/// A bounding-box candidate returned by [`candidates`], smallest box
/// first.
pub struct Candidate {
    /// Display label of the feature.
    pub label: String,
    /// Zlib-compressed serialized geometry.
    pub geom: Vec<u8>,
}

fn connect_rw(db_path: &Path) -> Result<Connection, NsnError> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("SET threads = 4; SET memory_limit = '512MB';")?;
    Ok(conn)
}

fn connect_read(db_path: &Path) -> Result<Connection, NsnError> {
    let config = duckdb::Config::default().access_mode(duckdb::AccessMode::ReadOnly)?;
    Ok(Connection::open_with_flags(db_path, config)?)
}

/// Deletes the index database (and its WAL) if present.
pub fn remove(db_path: &Path) {
    let _ = std::fs::remove_file(db_path);
    let mut wal = db_path.as_os_str().to_owned();
    wal.push(".wal");
    let _ = std::fs::remove_file(wal);
}

/// Builds a fresh index from the given records, replacing any existing
/// database, and tags it with the source signature.
///
/// Returns the number of features indexed. Any error aborts the build;
/// partial state is left behind and the next signature check treats the
/// index as stale.
///
/// # Errors
///
/// Returns [`NsnError`] on storage or serialization failures.
pub fn build(
    db_path: &Path,
    records: impl Iterator<Item = IndexRecord>,
    signature: &str,
) -> Result<u64, NsnError> {
    remove(db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = connect_rw(db_path)?;
    conn.execute_batch(
        "CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT);

        CREATE TABLE feats (
            id BIGINT PRIMARY KEY,
            label TEXT NOT NULL,
            geom BLOB NOT NULL,
            bbox_area DOUBLE NOT NULL
        );

        CREATE TABLE bbox (
            id BIGINT PRIMARY KEY,
            minx DOUBLE NOT NULL,
            maxx DOUBLE NOT NULL,
            miny DOUBLE NOT NULL,
            maxy DOUBLE NOT NULL
        );",
    )?;

    conn.execute_batch("BEGIN TRANSACTION")?;
    let mut inserted = 0u64;
    let mut batch = 0u64;
    {
        let mut feat_stmt = conn
            .prepare("INSERT INTO feats (id, label, geom, bbox_area) VALUES (?, ?, ?, ?)")?;
        let mut bbox_stmt = conn
            .prepare("INSERT INTO bbox (id, minx, maxx, miny, maxy) VALUES (?, ?, ?, ?, ?)")?;

        let mut next_id = 1i64;
        for record in records {
            let blob = compress_geometry(&record.geometry)?;
            feat_stmt.execute(duckdb::params![
                next_id,
                record.label,
                blob,
                record.bbox.area(),
            ])?;
            bbox_stmt.execute(duckdb::params![
                next_id,
                record.bbox.minx,
                record.bbox.maxx,
                record.bbox.miny,
                record.bbox.maxy,
            ])?;
            next_id += 1;
            inserted += 1;
            batch += 1;
            if batch >= COMMIT_BATCH {
                conn.execute_batch("COMMIT; BEGIN TRANSACTION")?;
                batch = 0;
            }
        }
    }

    let built_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('sig', ?)",
        duckdb::params![signature],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('built_at', ?)",
        duckdb::params![built_at.to_string()],
    )?;
    conn.execute_batch("COMMIT")?;

    Ok(inserted)
}

/// Reads a metadata value from an existing index database.
///
/// # Errors
///
/// Returns [`NsnError`] if the database cannot be opened or queried;
/// callers treat any error as "stale, rebuild".
pub fn read_meta(db_path: &Path, key: &str) -> Result<Option<String>, NsnError> {
    let conn = connect_read(db_path)?;
    let mut stmt = conn.prepare("SELECT value FROM meta WHERE key = ?")?;
    match stmt.query_row([key], |row| row.get(0)) {
        Ok(value) => Ok(Some(value)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reads the stored source signature.
///
/// # Errors
///
/// Same contract as [`read_meta`].
pub fn read_signature(db_path: &Path) -> Result<Option<String>, NsnError> {
    read_meta(db_path, "sig")
}

/// Fetches the features whose bounding box contains the point, most
/// specific (smallest box area) first, capped at [`CANDIDATE_LIMIT`].
///
/// # Errors
///
/// Returns [`NsnError`] if the database cannot be opened or queried.
pub fn candidates(db_path: &Path, x: f64, y: f64) -> Result<Vec<Candidate>, NsnError> {
    let conn = connect_read(db_path)?;
    let sql = format!(
        "SELECT f.label, f.geom FROM bbox b JOIN feats f ON f.id = b.id \
         WHERE b.minx <= ? AND b.maxx >= ? AND b.miny <= ? AND b.maxy >= ? \
         ORDER BY f.bbox_area ASC LIMIT {CANDIDATE_LIMIT}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(duckdb::params![x, x, y, y])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(Candidate {
            label: row.get(0)?,
            geom: row.get(1)?,
        });
    }
    Ok(out)
}

/// Serializes a geometry as compact `{type, coordinates}` JSON and
/// zlib-compresses it.
fn compress_geometry(geometry: &geojson::Geometry) -> Result<Vec<u8>, NsnError> {
    let json = serde_json::to_vec(geometry)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Decompresses and deserializes a geometry blob.
///
/// # Errors
///
/// Returns [`NsnError`] for corrupt blobs; lookup skips such candidates.
pub fn decode_geometry(blob: &[u8]) -> Result<geojson::Geometry, NsnError> {
    let mut json = Vec::new();
    ZlibDecoder::new(blob).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}
