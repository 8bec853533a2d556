//! chromacal - chromatic aberration calibration for multi-channel microscopy
//!
//! Fits per-wavelength-pair polynomial warps from bead detections, stores
//! them, and corrects detected spot coordinates against a reference channel.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use chromacal::calibration::{BeadSet, CalibrationSession};
use chromacal::config::Config;
use chromacal::spots::{correct_spots_with_tolerance, SpotTable};
use chromacal::transform::Dimensionality;

/// chromacal - chromatic aberration calibration and correction
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Calibration folder (overrides the config file)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit and save a calibration from two bead detections
    Calibrate {
        /// Beads detected in the reference channel (JSON bead set)
        #[arg(long)]
        reference_beads: PathBuf,

        /// Beads detected in the channel to correct (JSON bead set)
        #[arg(long)]
        shifted_beads: PathBuf,

        /// Reference wavelength (nm)
        #[arg(long)]
        reference: u32,

        /// Wavelength of the channel to correct (nm)
        #[arg(long)]
        corrected: u32,

        /// Polynomial degree (defaults to the config value)
        #[arg(long)]
        degree: Option<u32>,

        /// Fit y and x only, passing z through
        #[arg(long)]
        planar: bool,

        /// Also save the swapped calibration (corrected as reference)
        #[arg(long)]
        both_directions: bool,

        /// Fit and report without saving
        #[arg(long)]
        dry_run: bool,
    },

    /// Correct spot coordinates of every non-reference channel
    CorrectSpots {
        /// Spot table (JSON with detections and spots)
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the corrected table
        #[arg(short, long)]
        output: PathBuf,

        /// Reference wavelength (nm)
        #[arg(long)]
        reference: u32,
    },

    /// List stored calibrations
    List,

    /// Print a stored calibration
    Show {
        #[arg(long)]
        reference: u32,
        #[arg(long)]
        corrected: u32,
    },

    /// Remove a calibration from the index
    Remove {
        #[arg(long)]
        reference: u32,
        #[arg(long)]
        corrected: u32,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("chromacal v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_or_create(&args.config)?;
    if let Some(folder) = args.store {
        config.store.folder = folder;
    }
    let store = config.store();
    info!("Calibration folder: {:?}", store.folder());

    match args.command {
        Command::Calibrate {
            reference_beads,
            shifted_beads,
            reference,
            corrected,
            degree,
            planar,
            both_directions,
            dry_run,
        } => {
            let mut settings = config.calibration.clone();
            if let Some(degree) = degree {
                settings.degree = degree;
            }
            if planar {
                settings.dimensionality = Dimensionality::Planar;
            }

            let reference_set: BeadSet = read_json(&reference_beads)?;
            let shifted_set: BeadSet = read_json(&shifted_beads)?;
            info!(
                "Calibrating {}nm against {}nm (degree {}, {:?})",
                corrected, reference, settings.degree, settings.dimensionality
            );

            let session = CalibrationSession::fit_bead_sets(&reference_set, &shifted_set, &settings)
                .with_context(|| {
                    format!("Calibration {}nm -> {}nm failed", reference, corrected)
                })?;
            let record = session.into_record(reference, corrected);

            if dry_run {
                info!("Dry run, calibration not saved");
                return Ok(());
            }

            store.save(&record)?;
            if both_directions {
                store.save(&record.reversed())?;
            }
        }

        Command::CorrectSpots {
            input,
            output,
            reference,
        } => {
            let mut table: SpotTable = read_json(&input)?;
            correct_spots_with_tolerance(
                &table.detections,
                &mut table.spots,
                reference,
                &store,
                config.correction.voxel_tolerance_nm,
            )?;

            let content = serde_json::to_string_pretty(&table)
                .context("Failed to serialize spot table")?;
            std::fs::write(&output, content)
                .with_context(|| format!("Failed to write spots to {:?}", output))?;
            info!("Corrected spots written to {:?}", output);
        }

        Command::List => {
            let entries = store.list()?;
            if entries.is_empty() {
                println!("No calibrations in {:?}", store.folder());
            }
            for (key, path) in entries {
                println!(
                    "{:>5}nm -> {:>5}nm  {}",
                    key.corrected_wavelength,
                    key.reference_wavelength,
                    path.display()
                );
            }
        }

        Command::Show {
            reference,
            corrected,
        } => {
            let record = store.load(reference, corrected)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&record).context("Failed to serialize calibration")?
            );
        }

        Command::Remove {
            reference,
            corrected,
        } => {
            if store.remove(reference, corrected)? {
                println!("Removed calibration {}nm -> {}nm", corrected, reference);
            } else {
                println!("No calibration {}nm -> {}nm", corrected, reference);
            }
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}
