//! Probabilistic atlas of retinotopic regions from Wang et al. 2015,
//! obtained with Noah Benson's neuropythy package.
//!
//! Neuropythy runs inside Docker (a native install causes dependency
//! conflicts with other tooling), so the daemon must be allowed to write to
//! the FreeSurfer subjects directory. The atlas overlay is then converted to
//! one surface label and one ribbon-filled volume per region.

use std::fs;

use serde_json::json;

use crate::config::Config;
use crate::paths::sub;
use crate::shell::{self, glob_paths, s, Res};

/// Wang-2015 regions, in atlas id order (label id = index + 1)
pub const WANG_REGIONS: [&str; 25] = [
    "V1v", "V1d", "V2v", "V2d", "V3v", "V3d", "hV4", "VO1", "VO2",
    "PHC1", "PHC2", "TO2", "TO1", "LO2", "LO1", "V3B", "V3A",
    "IPS0", "IPS1", "IPS2", "IPS3", "IPS4", "IPS5", "SPL1", "FEF",
];

pub const HEMIS: [&str; 2] = ["lh", "rh"];

/// Fetch the atlas for one subject and derive per-region labels and volumes.
/// Automatically skips whatever is already present.
pub fn get_wang_atlas(config: &Config, subject: &str) -> Res<()> {
    let fs_dir = &config.layout.subjects_dir;
    let fs_subj = sub(subject);
    let subj_dir = config.layout.fs_subject_dir(subject);

    // neuropythy reads its runtime configuration from the mounted subjects
    // directory
    let npythyrc = fs_dir.join(".npythyrc");
    if !npythyrc.is_file() {
        let params = json!({
            "freesurfer_subject_paths": "/subjects",
            "data_cache_root": "~/Temp/npythy_cache",
        });
        fs::write(&npythyrc, serde_json::to_string(&params)?)?;
    }

    // atlas overlays, one mgz per hemisphere
    let overlays = glob_paths(&format!("{}/surf/??.wang15_mplbl.mgz", subj_dir.display()));
    if overlays.len() < 2 {
        shell::run("docker", &[
            "run".into(), "--rm".into(),
            "--mount".into(), format!("type=bind,src={},dst=/subjects", s(fs_dir)),
            "--env".into(), "NPYTHYRC=/subjects/.npythyrc".into(),
            config.settings.docker.neuropythy_image.clone(),
            "atlas".into(), "--verbose".into(), fs_subj.clone(),
        ])?;
    }

    for hemi in HEMIS {

        let mgz = subj_dir.join(format!("surf/{hemi}.wang15_mplbl.mgz"));

        // whole-atlas label
        let label = subj_dir.join(format!("label/{hemi}.wang15_mplbl.label"));
        if !label.is_file() {
            shell::run("mri_cor2label", &[
                "--i".into(), s(&mgz),
                "--stat".into(),
                "--l".into(), s(&label),
                "--surf".into(), fs_subj.clone(), hemi.into(),
            ])?;
        }

        // separate files for each region
        for (r, region) in WANG_REGIONS.iter().enumerate() {

            let label = subj_dir.join(format!("label/{hemi}.wang15_mplbl.{region}.label"));
            if !label.is_file() {
                shell::run("mri_cor2label", &[
                    "--i".into(), s(&mgz),
                    "--id".into(), (r + 1).to_string(),
                    "--l".into(), s(&label),
                    "--surf".into(), fs_subj.clone(), hemi.into(),
                ])?;
            }

            // volume with filled cortical ribbon
            let nifti = subj_dir.join(format!("mri/{hemi}.wang15_mplbl.{region}.nii.gz"));
            if !nifti.is_file() {
                let orig = subj_dir.join("mri/orig.mgz");
                shell::run("mri_label2vol", &[
                    "--label".into(), s(&label),
                    "--temp".into(), s(&orig),
                    "--o".into(), s(&nifti),
                    "--fill-ribbon".into(),
                    "--regheader".into(), s(&orig),
                    "--subject".into(), fs_subj.clone(),
                    "--hemi".into(), hemi.into(),
                ])?;
            }
        }
    }
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn region_table_matches_the_atlas() {
        assert_eq!(WANG_REGIONS.len(), 25);
        // label ids are 1-based positions in the table
        assert_eq!(WANG_REGIONS[0], "V1v");
        assert_eq!(WANG_REGIONS.iter().position(|r| *r == "FEF"), Some(24));
    }
}
