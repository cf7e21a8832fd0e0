#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Operator CLI for the PlantWijs NSN spatial index.
//!
//! Lets operators inspect the resolved NSN source, prime the on-disk
//! index ahead of traffic, and run ad-hoc point lookups: the same
//! `lookup_label` path the web layer calls, without standing up the
//! server.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use plantwijs_nsn::NsnIndex;
use plantwijs_nsn_models::NsnConfig;

/// PlantWijs NSN index toolchain.
#[derive(Parser)]
#[command(name = "plantwijs", version)]
struct Cli {
    /// Data directory holding the NSN GeoJSON file or zip archive.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the resolved NSN source and whether the index is fresh.
    Status,
    /// Build (or rebuild) the on-disk spatial index.
    BuildIndex,
    /// Look up the NSN label for a point in RD New coordinates.
    Lookup {
        /// Easting in meters (RD New / EPSG:28992).
        #[arg(long)]
        x: f64,
        /// Northing in meters (RD New / EPSG:28992).
        #[arg(long)]
        y: f64,
    },
}

fn main() {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let cli = Cli::parse();
    let mut config = NsnConfig::default();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    let index = NsnIndex::new(config);

    match cli.command {
        Command::Status => {
            describe_source(&index);
            if index.index_fresh() {
                println!("index:  fresh ({})", index.config().index_db_path().display());
            } else {
                println!("index:  stale or absent");
            }
        }
        Command::BuildIndex => {
            index.warm();
            if !index.index_fresh() {
                log::warn!("Index could not be built; lookups will stream-scan");
            }
        }
        Command::Lookup { x, y } => {
            // "No label" is a valid answer for a click outside every
            // NSN vlak, so it is not an error.
            match index.lookup_label(x, y) {
                Some(label) => println!("{label}"),
                None => println!("-"),
            }
        }
    }
}

fn describe_source(index: &NsnIndex) {
    use plantwijs_nsn_models::Source;

    match index.source() {
        Source::Missing => println!("source: not found (NSN layer disabled)"),
        Source::LooseFile { path } => println!("source: {}", path.display()),
        Source::ZipMember { archive, member } => {
            println!("source: {} :: {member}", archive.display());
        }
    }
}
