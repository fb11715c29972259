//! Eccentricity vs. receptive-field-size statistics within V1.
//!
//! The V1 surface labels (manually traced, or merged from their dorsal and
//! ventral halves) are brought into functional space, the fitted parameter
//! maps are restricted to well-fit voxels inside them, and an ordinary
//! least-squares line of pRF size against eccentricity is reported for two
//! eccentricity bounds: the mapping-paradigm extent and the physical
//! stimulus extent.

use std::path::{Path, PathBuf};

use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};

use crate::atlas::HEMIS;
use crate::config::Config;
use crate::image;
use crate::paths::sub;
use crate::plot;
use crate::registration::find_example_func;
use crate::shell::{self, s, Res};
use crate::surfaces::{completed_fits, subject_session_of};

/// sigma -> full width at half maximum
const FWHM: f64 = 2.355;

pub fn prf_stats(config: &Config, subjects: Option<&[String]>, eccen_bounds: Option<(f64, f64)>) -> Res<()> {
    for prf_dir in completed_fits(config) {
        let (subject, session) = subject_session_of(&prf_dir);
        if let Some(wanted) = subjects {
            if !wanted.iter().any(|w| w == &subject) {
                continue;
            }
        }
        session_stats(config, &prf_dir, &subject, &session, eccen_bounds)?;
    }
    Ok(())
}

fn session_stats(
    config: &Config,
    prf_dir: &Path,
    subject: &str,
    session: &str,
    eccen_bounds: Option<(f64, f64)>,
) -> Res<()> {
    let stats = &config.settings.stats;

    let v1 = v1_in_func_space(config, subject, session)?;
    let roi = image::load(&v1)?.data;
    let eccens_all = image::load(&prf_dir.join("eccentricity_deg.nii"))?.data;
    let sizes_all = image::load(&prf_dir.join("rfsize_sigma_deg.nii"))?.data;
    let r2s = image::load(&prf_dir.join("r2.nii"))?.data;

    let bounds = match eccen_bounds {
        Some((min, max)) => vec![(min, max)],
        None => vec![
            (stats.min_eccentricity, stats.prf_eccentricity),
            (stats.min_eccentricity, stats.stim_eccentricity),
        ],
    };

    for (min_eccen, max_eccen) in bounds {
        let (eccens, sizes) = select_voxels(
            roi.iter().copied(),
            r2s.iter().copied(),
            eccens_all.iter().copied(),
            sizes_all.iter().copied(),
            stats.r2_threshold,
            min_eccen,
            max_eccen,
        );
        let n_voxels = eccens.len();
        if n_voxels < 2 {
            eprintln!("{} {session}: only {n_voxels} voxels pass the thresholds, skipping fit",
                      sub(subject));
            continue;
        }

        let fit = fit_line(&eccens, &sizes)?;

        let png = prf_dir.join(format!("pRF_size_by_eccen_{max_eccen:.1}.png"));
        let points: Vec<(f64, f64)> = eccens.iter().copied().zip(sizes.iter().copied()).collect();
        plot::scatter_with_fit(&png, &plot::Scatter {
            title: format!(
                "V1 pRFs for {subject} {session}: intercept {:.3}, slope {:.3} \
                 (min r2 {:.2}, {n_voxels} voxels)",
                fit.intercept, fit.slope, stats.r2_threshold / 100.0,
            ),
            x_label: "Eccentricity (deg)",
            y_label: "RF SD (deg)",
            points: &points,
            line: Some([
                (0.0, fit.intercept),
                (max_eccen, fit.intercept + fit.slope * max_eccen),
            ]),
            x_range: (0.0, max_eccen),
        })?;

        println!("{subject} {session} estimated FWHM if line fitted to {max_eccen:.1} deg:");
        for eccen in 1..=4 {
            println!("\t{:.3} at {eccen}deg",
                     (fit.intercept + eccen as f64 * fit.slope) * FWHM);
        }
    }
    Ok(())
}

/// V1 mask in the session's functional space, built from the surface labels
/// on first use.
fn v1_in_func_space(config: &Config, subject: &str, session: &str) -> Res<PathBuf> {
    let layout = &config.layout;
    let roi_dir = layout.roi_session_dir(subject, session);
    let reg_dir = layout.reg_dir(subject, session);
    let reg = reg_dir.join("example_func2highres.lta");
    let ref_func = find_example_func(&reg_dir)
        .unwrap_or_else(|| panic!("no reference functional in {}", reg_dir.display()));
    let fs_subj_dir = layout.fs_subject_dir(subject);
    let label_set = &config.settings.stats.label_set;

    for hemi in HEMIS {

        // the merged label either exists or is built from dorsal + ventral
        let label = fs_subj_dir.join(format!("label/{hemi}.{label_set}.V1.label"));
        if !label.is_file() {
            shell::run("mri_mergelabels", &[
                "-i".into(), s(&fs_subj_dir.join(format!("label/{hemi}.{label_set}.V1d.label"))),
                "-i".into(), s(&fs_subj_dir.join(format!("label/{hemi}.{label_set}.V1v.label"))),
                "-o".into(), s(&label),
            ])?;
        }

        let outpath = roi_dir.join(format!("V1_{hemi}.nii.gz"));
        if !outpath.is_file() {
            shell::run("mri_label2vol", &[
                "--label".into(), s(&label),
                "--temp".into(), s(&ref_func),
                "--reg".into(), s(&reg),
                "--subject".into(), sub(subject),
                "--hemi".into(), hemi.into(),
                "--o".into(), s(&outpath),
            ])?;
        }
    }

    // combine across hemispheres
    let v1 = roi_dir.join("V1.nii.gz");
    if !v1.is_file() {
        shell::run("fslmaths", &[
            s(&roi_dir.join("V1_lh.nii.gz")),
            "-add".into(),
            s(&roi_dir.join("V1_rh.nii.gz")),
            "-bin".into(),
            s(&v1),
        ])?;
    }
    Ok(v1)
}

/// Voxels inside the ROI whose fit explains enough variance and whose
/// eccentricity lies inside the analysed band.
pub fn select_voxels(
    roi: impl Iterator<Item = f32>,
    r2: impl Iterator<Item = f32>,
    eccen: impl Iterator<Item = f32>,
    size: impl Iterator<Item = f32>,
    r2_threshold: f64,
    min_eccen: f64,
    max_eccen: f64,
) -> (Vec<f64>, Vec<f64>) {
    itertools::izip!(roi, r2, eccen, size)
        .filter(|&(roi, r2, eccen, _)| {
            roi > 0.0
                && r2 as f64 > r2_threshold
                && (eccen as f64) > min_eccen
                && (eccen as f64) < max_eccen
        })
        .map(|(_, _, eccen, size)| (eccen as f64, size as f64))
        .unzip()
}

pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

/// Ordinary least squares of size against eccentricity.
pub fn fit_line(eccens: &[f64], sizes: &[f64]) -> Res<LineFit> {
    let records = Array2::from_shape_vec((eccens.len(), 1), eccens.to_vec())?;
    let targets = Array1::from(sizes.to_vec());
    let dataset = Dataset::new(records, targets);
    let model = LinearRegression::default().fit(&dataset)?;
    Ok(LineFit {
        slope: model.params()[0],
        intercept: model.intercept(),
    })
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};
    use float_eq::assert_float_eq;

    #[test]
    fn recovers_the_generating_line() -> Res<()> {
        // synthetic size = 0.15 * eccen + 0.4, with small zero-mean noise
        let (slope, intercept) = (0.15, 0.4);
        let n = 2000;
        let eccens: Vec<f64> = (0..n).map(|i| 0.5 + 6.0 * i as f64 / n as f64).collect();
        let sizes: Vec<f64> = eccens.iter().enumerate()
            .map(|(i, &e)| {
                let noise = 0.05 * (if i % 2 == 0 { 1.0 } else { -1.0 });
                intercept + slope * e + noise
            })
            .collect();

        let fit = fit_line(&eccens, &sizes)?;
        assert_float_eq!(fit.slope, slope, abs <= 1e-3);
        assert_float_eq!(fit.intercept, intercept, abs <= 1e-2);
        Ok(())
    }

    #[test]
    fn selection_applies_all_thresholds() {
        let roi    = [1.0, 1.0, 0.0, 1.0, 1.0, 1.0];
        let r2     = [80.0, 40.0, 90.0, 75.0, 60.0, 99.0];
        let eccen  = [2.0, 2.0, 2.0, 0.2, 5.0, 3.5];
        let size   = [0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

        let (eccens, sizes) = select_voxels(
            roi.into_iter(), r2.into_iter(), eccen.into_iter(), size.into_iter(),
            50.0, 0.5, 4.5,
        );
        // kept: index 0 (all pass) and index 5; dropped: low r2, outside the
        // ROI, too foveal, beyond the stimulus extent
        assert_eq!(eccens, vec![2.0, 3.5]);
        assert_eq!(sizes, vec![0.5, 1.0]);
    }
}
