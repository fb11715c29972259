//! Post-processing of the fitted parameter maps: polar-angle wraparound
//! correction, header alignment, and projection onto the cortical surfaces.

use std::path::{Path, PathBuf};

use crate::atlas::HEMIS;
use crate::config::Config;
use crate::image;
use crate::registration::find_example_func;
use crate::shell::{self, glob_paths, s, Res};

/// One volume per estimated parameter, produced by the fitting engine
pub const PARAMETERS: [&str; 4] = ["polar_angle", "eccentricity_deg", "rfsize_sigma_deg", "r2"];

pub fn make_surface_maps(config: &Config, overwrite: bool) -> Res<()> {
    for prf_dir in completed_fits(config) {
        let (subject, session) = subject_session_of(&prf_dir);
        project_session(config, &prf_dir, &subject, &session, overwrite)?;
    }
    Ok(())
}

/// Fit output directories that actually contain a finished fit.
pub fn completed_fits(config: &Config) -> Vec<PathBuf> {
    let pattern = format!("{}/pRF/sub-*/*/mean_before_prf", config.layout.derivatives().display());
    let mut dirs: Vec<PathBuf> = glob_paths(&pattern)
        .into_iter()
        .filter(|d| d.join("r2.nii").is_file())
        .collect();
    dirs.sort();
    dirs
}

/// Subject and session encoded in a fit output path
/// (`derivatives/pRF/sub-F019/ses-7T1/mean_before_prf`).
pub fn subject_session_of(prf_dir: &Path) -> (String, String) {
    let mut parts = prf_dir.iter().rev().map(|p| p.to_string_lossy());
    assert_eq!(parts.next().as_deref(), Some("mean_before_prf"));
    let session = parts.next().unwrap().into_owned();
    let subject = parts.next().unwrap().trim_start_matches("sub-").to_string();
    (subject, session)
}

fn project_session(config: &Config, prf_dir: &Path, subject: &str, session: &str, overwrite: bool) -> Res<()> {
    let layout = &config.layout;
    let reg_dir = layout.reg_dir(subject, session);
    let reg = reg_dir.join("example_func2highres.lta");
    let roi = layout.roi_session_dir(subject, session).join("mask_analyzed.nii.gz");

    // For the left hemisphere, any smoothing of the polar angle map causes
    // artifacts where the map wraps around the 0/360 degree boundary. Flip
    // the map so the boundary moves to the left horizontal meridian.
    let ang_reverse = prf_dir.join("polar_angle_flip.nii.gz");
    if !ang_reverse.is_file() || overwrite {
        flip_polar_angle(&prf_dir.join("polar_angle.nii"), &roi, &ang_reverse)?;
    }

    // copy the header from the reference functional so all maps align
    // (surface projection requires identical voxel-to-world mappings)
    let example_func = find_example_func(&reg_dir)
        .unwrap_or_else(|| panic!("no reference functional in {}", reg_dir.display()));
    for &parameter in PARAMETERS.iter().chain(&["polar_angle_flip"]) {
        let nii = parameter_volume(prf_dir, parameter);
        shell::run("fslcpgeom", &[s(&example_func), s(&nii)])?;
    }

    // project to the surfaces, nearest-neighbour so angular values never
    // blend across the interpolation
    for parameter in PARAMETERS {
        for hemi in HEMIS {
            let nifti = if parameter == "polar_angle" && hemi == "lh" {
                ang_reverse.clone()
            } else {
                parameter_volume(prf_dir, parameter)
            };
            let surface = prf_dir.join(format!("{parameter}_{hemi}.mgh"));
            if !surface.is_file() || overwrite {
                shell::run("mri_vol2surf", &[
                    "--mov".into(), s(&nifti),
                    "--out".into(), s(&surface),
                    "--reg".into(), s(&reg),
                    "--hemi".into(), hemi.into(),
                    "--interp".into(), "nearest".into(),
                ])?;
            }
        }
    }
    Ok(())
}

fn parameter_volume(prf_dir: &Path, parameter: &str) -> PathBuf {
    glob_paths(&format!("{}/{parameter}.nii*", prf_dir.display()))
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("no {parameter} volume in {}", prf_dir.display()))
}

/// The wraparound correction: reflect an angle and rotate it by a half turn,
/// so the 0/360 discontinuity lands on the opposite meridian.
pub fn reflect_polar_angle(deg: f32) -> f32 {
    (-deg + 540.0).rem_euclid(360.0)
}

/// Apply [`reflect_polar_angle`] to a volume, masked to the analysed voxels.
pub fn flip_polar_angle(angle_nii: &Path, roi_nii: &Path, out: &Path) -> Res<()> {
    let angle = image::load(angle_nii)?;
    let roi = image::load(roi_nii)?;
    assert_eq!(angle.data.shape(), roi.data.shape(),
               "polar angle map and ROI mask are on different grids");
    let flipped = angle.data.mapv(reflect_polar_angle) * &roi.data;
    image::save(out, &angle.header, &flipped)
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};
    use float_eq::assert_float_eq;
    use rstest::rstest;

    #[rstest]
    #[case(  0.0, 180.0)]
    #[case( 10.0, 170.0)]
    #[case(350.0, 190.0)] // near the wrap boundary -> near 180
    #[case( 90.0,  90.0)] // right horizontal meridian is a fixed point
    #[case(180.0,   0.0)]
    #[case(270.0, 270.0)]
    fn reflects_angles(#[case] a: f32, #[case] expected: f32) {
        assert_float_eq!(reflect_polar_angle(a), expected, abs <= 1e-4);
    }

    // The correction is an involution, not idempotent: applying it twice
    // returns the original angle, which differs from applying it once.
    #[test]
    fn double_application_is_not_idempotent() {
        let a = 10.0;
        let once = reflect_polar_angle(a);
        let twice = reflect_polar_angle(once);
        assert_float_eq!(twice, a, abs <= 1e-4);
        assert_ne!(once, twice);
    }

    #[test]
    fn parses_fit_directories() {
        let dir = Path::new("derivatives/pRF/sub-F019/ses-7T1/mean_before_prf");
        assert_eq!(subject_session_of(dir), ("F019".to_string(), "ses-7T1".to_string()));
    }
}
