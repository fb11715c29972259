// ----------------------------------- CLI -----------------------------------
use std::path::PathBuf;

use clap::Parser;

/// Export 2-D slice renders of an anatomical volume, for participant
/// hand-outs.
#[derive(Parser, Debug, Clone)]
#[command(name = "anat_slices")]
pub struct Cli {

    /// Anatomical volume to render
    pub t1: PathBuf,

    /// Output directory for the slice PNGs
    pub outdir: PathBuf,

    /// Render every Nth slice
    #[arg(short, long, default_value_t = 4)]
    pub interval: usize,
}

// --------------------------------------------------------------------------------

use std::error::Error;

use retmap::qa;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    qa::anat_slices(&args.t1, &args.outdir, args.interval)
}
