// ----------------------------------- CLI -----------------------------------
use std::path::PathBuf;

use clap::Parser;

use retmap::labeling::Colormap;

/// Launch freeview for manually tracing retinotopic area boundaries.
///
/// Shows the chosen pRF overlay on the inflated surface under a custom
/// colour lookup table, restricted to the analysis mask, with the existing
/// area label outlined for refinement.
#[derive(Parser, Debug, Clone)]
#[command(name = "label_areas")]
pub struct Cli {

    /// Subject to label
    pub subject: String,

    /// Session whose maps to show, e.g. ses-7T1
    pub session: String,

    /// Hemisphere to label
    #[arg(long, default_value = "lh")]
    pub hemi: String,

    #[arg(long, value_enum, default_value_t = Colormap::Colorwheel)]
    pub colormap: Colormap,

    /// Parameter map shown as the overlay
    #[arg(long, default_value = "polar_angle")]
    pub overlay: String,

    /// Surface label (under the session ROI directory) masking the overlay
    #[arg(long, default_value = "mask_analyzed")]
    pub mask: String,

    /// Area whose existing label is outlined
    #[arg(long, default_value = "V1")]
    pub area: String,

    /// Project directory holding participants.json and derivatives/
    #[arg(short, long, default_value = "data")]
    pub project_dir: PathBuf,
}

// --------------------------------------------------------------------------------

use std::error::Error;

use retmap::config::Config;
use retmap::labeling::{self, Colormap::Colorwheel};
use retmap::shell;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    let config = Config::load(&args.project_dir)?;
    let layout = &config.layout;
    let (subject, session, hemi) = (&args.subject, &args.session, &args.hemi);

    let fs_subj_dir = layout.fs_subject_dir(subject);
    let surface = fs_subj_dir.join(format!("surf/{hemi}.inflated"));
    let overlay = layout.mean_prf_dir(subject, session)
        .join(format!("{}_{hemi}.mgh", args.overlay));
    let mask = layout.roi_session_dir(subject, session)
        .join(format!("{}_{hemi}.label", args.mask));
    let label = fs_subj_dir.join(format!(
        "label/{hemi}.{}.{}.label", config.settings.stats.label_set, args.area));

    for file in [&surface, &overlay, &mask, &label] {
        assert!(file.is_file(), "cannot find {}", file.display());
    }

    // the left hemisphere's data map was flipped, so flip the wheel back
    let reverse = args.colormap == Colorwheel && hemi == "lh";
    let lut = labeling::format_lut(&labeling::lut_rows(args.colormap, reverse));

    shell::run("freeview", &labeling::freeview_args(&surface, &overlay, &lut, &mask, &label))
}
