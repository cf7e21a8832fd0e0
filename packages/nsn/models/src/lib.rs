#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the Natuurlijk Systeem Nederland (NSN) spatial lookup.
//!
//! The NSN layer ships as a large `GeoJSON` `FeatureCollection`: either a
//! loose `.geojson` file during development or a `.zip` archive containing
//! one in production. These types describe where that data comes from
//! ([`Source`]), how the subsystem is configured ([`NsnConfig`]), and how a
//! display label is derived from a feature's property bag ([`label`]).

pub mod label;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default file name of the loose `GeoJSON` source in the data directory.
pub const DEFAULT_GEOJSON_NAME: &str = "nsn_natuurlijk_systeem.geojson";

/// Default archive name checked before any other `.zip` in the data
/// directory.
pub const DEFAULT_ZIP_NAME: &str = "LBK_BKNSN_2023.zip";

/// Subdirectory of the system temp dir that holds the on-disk index.
pub const INDEX_DIR_NAME: &str = "plantwijs_nsn";

/// File name of the on-disk spatial index database.
pub const INDEX_DB_NAME: &str = "nsn_index.duckdb";

/// Where the NSN `GeoJSON` data comes from.
///
/// Resolved once per process and memoized; later filesystem changes are
/// not observed until restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    /// No loose file and no archive with a `GeoJSON` member was found.
    /// The NSN layer is treated as disabled, not as an error.
    Missing,
    /// A loose `.geojson` file on disk (the development setup).
    LooseFile {
        /// Absolute or data-dir-relative path to the file.
        path: PathBuf,
    },
    /// A `.geojson`/`.json` member inside a `.zip` archive (production).
    ZipMember {
        /// Path to the archive.
        archive: PathBuf,
        /// Entry name of the `GeoJSON` member inside the archive.
        member: String,
    },
}

impl Source {
    /// Short kind tag used in the source signature.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::LooseFile { .. } => "geojson",
            Self::ZipMember { .. } => "zip",
        }
    }

    /// Whether no source was found.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Filesystem path of the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Missing => None,
            Self::LooseFile { path } => Some(path),
            Self::ZipMember { archive, .. } => Some(archive),
        }
    }

    /// Archive member name, for zip sources.
    #[must_use]
    pub fn member(&self) -> Option<&str> {
        match self {
            Self::ZipMember { member, .. } => Some(member),
            _ => None,
        }
    }
}

/// Configuration for the NSN lookup subsystem.
///
/// The defaults match the conventional layout: NSN data under `data/`,
/// the index database under the system temp directory. Constructed once
/// at startup and handed to the index service; there is no global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsnConfig {
    /// Directory holding the loose `GeoJSON` file and/or `.zip` archives.
    pub data_dir: PathBuf,
    /// File name of the loose `GeoJSON` source inside `data_dir`.
    pub geojson_name: String,
    /// Archive name tried before other `.zip` files in `data_dir`.
    pub default_zip_name: String,
    /// Whether the source geometry is already in RD New (EPSG:28992)
    /// planar meters. Query points must be in the same system either way;
    /// the flag only participates in the index signature.
    pub geojson_is_rd: bool,
    /// Directory holding the on-disk spatial index.
    pub index_dir: PathBuf,
}

impl Default for NsnConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            geojson_name: DEFAULT_GEOJSON_NAME.to_string(),
            default_zip_name: DEFAULT_ZIP_NAME.to_string(),
            geojson_is_rd: true,
            index_dir: std::env::temp_dir().join(INDEX_DIR_NAME),
        }
    }
}

impl NsnConfig {
    /// Path of the loose `GeoJSON` source.
    #[must_use]
    pub fn geojson_path(&self) -> PathBuf {
        self.data_dir.join(&self.geojson_name)
    }

    /// Path of the default archive.
    #[must_use]
    pub fn default_zip_path(&self) -> PathBuf {
        self.data_dir.join(&self.default_zip_name)
    }

    /// Path of the index database file.
    #[must_use]
    pub fn index_db_path(&self) -> PathBuf {
        self.index_dir.join(INDEX_DB_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_tags() {
        assert_eq!(Source::Missing.kind(), "missing");
        assert_eq!(
            Source::LooseFile {
                path: PathBuf::from("data/nsn.geojson")
            }
            .kind(),
            "geojson"
        );
        assert_eq!(
            Source::ZipMember {
                archive: PathBuf::from("data/nsn.zip"),
                member: "nsn.geojson".to_string()
            }
            .kind(),
            "zip"
        );
    }

    #[test]
    fn config_paths_join_data_dir() {
        let config = NsnConfig {
            data_dir: PathBuf::from("/srv/plantwijs/data"),
            ..NsnConfig::default()
        };
        assert_eq!(
            config.geojson_path(),
            PathBuf::from("/srv/plantwijs/data").join(DEFAULT_GEOJSON_NAME)
        );
        assert_eq!(
            config.default_zip_path(),
            PathBuf::from("/srv/plantwijs/data").join(DEFAULT_ZIP_NAME)
        );
        assert!(config.index_db_path().ends_with(INDEX_DB_NAME));
    }
}
