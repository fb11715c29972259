// ----------------------------------- CLI -----------------------------------
use std::path::PathBuf;

use clap::Parser;

use retmap::registration::Overwrite;

/// Controller for the retinotopic mapping analysis pipeline.
///
/// Runs every stage in dependency order, skipping whatever has already been
/// computed. Requires a configured participants.json and the raw data
/// downloaded and unpacked in sourcedata/.
#[derive(Parser, Debug, Clone)]
#[command(name = "pipeline")]
pub struct Cli {

    /// Project directory holding participants.json and sourcedata/
    #[arg(short, long, default_value = "data")]
    pub project_dir: PathBuf,

    /// Restrict processing to these subjects (default: everyone in the
    /// roster)
    #[arg(short, long)]
    pub subject: Vec<String>,

    /// Recompute the named registration stages even when their outputs exist
    #[arg(long, value_enum)]
    pub overwrite: Vec<Overwrite>,

    /// Recompute ROI masks and surface maps even when they exist
    #[arg(long)]
    pub overwrite_rois: bool,

    /// Pause for the interactive segmentation quality check
    #[arg(long)]
    pub stop_for_checks: bool,

    /// Worker-count hint passed to the containerized tools
    #[arg(short, long)]
    pub num_procs: Option<usize>,
}

// --------------------------------------------------------------------------------

use std::error::Error;
use std::time::Instant;

use retmap::config::Config;
use retmap::utils::{seconds_to_text, timing};
use retmap::{bids, preprocess, prf, registration, rois, segmentation, surfaces};

fn main() -> Result<(), Box<dyn Error>> {

    let args = Cli::parse();
    let start = Instant::now();

    let mut config = Config::load(&args.project_dir)?;
    if let Some(n) = args.num_procs {
        config.settings.resources.nprocs = n;
    }
    let subjects = (!args.subject.is_empty()).then_some(args.subject.as_slice());

    let mut timer = timing::Progress::new();

    // initialise BIDS dataset
    timer.startln("Initialising BIDS dataset");
    bids::initialise_bids(&config)?;
    timer.done_with_message("BIDS initialisation");

    // preprocess data
    timer.startln("Preprocessing");
    preprocess::preprocess(&config)?;
    timer.done_with_message("Preprocessing");

    // check anatomical segmentation quality and fix errors
    if args.stop_for_checks {
        segmentation::check_segmentation(&config)?;
    }

    // perform registration
    timer.startln("Registration");
    registration::registration(&config, subjects, &args.overwrite)?;
    timer.done_with_message("Registration");

    // make ROIs
    timer.startln("ROI construction");
    rois::make_rois(&config, subjects, args.overwrite_rois)?;
    timer.done_with_message("ROI construction");

    // do prf mapping
    timer.startln("pRF estimation");
    prf::estimate_prfs(&config)?;
    timer.done_with_message("pRF estimation");

    // post-process the maps and convert to surfaces
    timer.startln("Surface maps");
    surfaces::make_surface_maps(&config, args.overwrite_rois)?;
    timer.done_with_message("Surface maps");

    // retinotopic area labels are then traced manually with `label_areas`

    println!("analysis took {} to complete", seconds_to_text(start.elapsed().as_secs_f64()));
    Ok(())
}
