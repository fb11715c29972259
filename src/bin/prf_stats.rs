// ----------------------------------- CLI -----------------------------------
use std::ops::Range;
use std::path::PathBuf;

use clap::Parser;

use retmap::utils::parse_range;

/// Eccentricity / receptive-field-size statistics for completed pRF fits.
///
/// Fits an ordinary least-squares line of pRF size against eccentricity in
/// V1, prints FWHM estimates, and writes a scatter plot per session.
#[derive(Parser, Debug, Clone)]
#[command(name = "prf_stats")]
pub struct Cli {

    /// Project directory holding participants.json and derivatives/
    #[arg(short, long, default_value = "data")]
    pub project_dir: PathBuf,

    /// Restrict to these subjects (default: every session with a finished
    /// fit)
    #[arg(short, long)]
    pub subject: Vec<String>,

    /// Analyse a single eccentricity band instead of the configured
    /// paradigm and stimulus bounds, e.g. `0.5..4.5`
    #[arg(long, value_parser = parse_range::<f64>)]
    pub eccen: Option<Range<f64>>,
}

// --------------------------------------------------------------------------------

use std::error::Error;

use retmap::config::Config;
use retmap::stats;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    let config = Config::load(&args.project_dir)?;
    let subjects = (!args.subject.is_empty()).then_some(args.subject.as_slice());
    let bounds = args.eccen.map(|r| (r.start, r.end));
    stats::prf_stats(&config, subjects, bounds)
}
