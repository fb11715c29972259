//! ROI construction: the set of posterior cortical voxels analysed in each
//! subject and session.
//!
//! A bilateral cortical-ribbon mask is built in anatomical space, moved into
//! each session's functional space, re-binarized (interpolation introduces
//! fractional values) and cropped to the posterior analysis window; the
//! result is projected to the cortical surface as one label per hemisphere.

use std::fs;
use std::path::Path;

use itertools::izip;

use crate::atlas::{self, HEMIS};
use crate::config::Config;
use crate::paths::sub;
use crate::qa;
use crate::registration::find_example_func;
use crate::shell::{self, link_if_absent, s, Res};

pub fn make_rois(config: &Config, subjects: Option<&[String]>, overwrite: bool) -> Res<()> {
    println!("Making ROIs...");
    for (subject, sessions) in &config.roster {
        if let Some(wanted) = subjects {
            if !wanted.iter().any(|w| w == subject) {
                continue;
            }
        }

        // retinotopy estimates from the public atlas (skips if done)
        atlas::get_wang_atlas(config, subject)?;

        let cortex_highres = cortical_ribbon(config, subject, overwrite)?;

        let mask_dir = config.layout.roi_dir(subject);
        let anat_dir = mask_dir.join("anat_space");
        fs::create_dir_all(&anat_dir)?;

        let cortex_anat = anat_dir.join("cortex.nii.gz");
        if !cortex_anat.is_file() {
            link_if_absent(&fs::canonicalize(&cortex_highres)?, &cortex_anat)?;
        }

        for session in sessions.keys() {
            session_masks(config, subject, session, &cortex_anat, overwrite)?;
        }
    }
    Ok(())
}

/// Bilateral cortical ribbon in the subject's native anatomical space.
fn cortical_ribbon(config: &Config, subject: &str, overwrite: bool) -> Res<std::path::PathBuf> {
    let fs_subj_dir = config.layout.fs_subject_dir(subject);

    for hemi in HEMIS {
        let mgz_fs = fs_subj_dir.join(format!("mri/{hemi}.ribbon.mgz"));
        let mgz_native = fs_subj_dir.join(format!("mri/orig/{hemi}.ribbon.mgz"));
        let ref_anat_mgz = fs_subj_dir.join("mri/orig/001.mgz");
        let nii = fs_subj_dir.join(format!("mri/orig/{hemi}.ribbon.nii.gz"));
        if !nii.exists() || overwrite {
            println!("Converting {hemi} cortex from fs to native space...");
            shell::run("mri_vol2vol", &[
                "--mov".into(), s(&mgz_fs),
                "--targ".into(), s(&ref_anat_mgz),
                "--regheader".into(),
                "--o".into(), s(&mgz_native),
                "--nearest".into(),
                "--no-save-reg".into(),
            ])?;
            println!("Converting {hemi} cortex from mgz to nifti...");
            shell::run("mri_convert", &[
                "--in_type".into(), "mgz".into(),
                "--out_type".into(), "nii".into(),
                "-rt".into(), "nearest".into(),
                s(&mgz_native), s(&nii),
            ])?;
        }
    }

    let cortex_highres = fs_subj_dir.join("mri/orig/bi.ribbon.nii.gz");
    if !cortex_highres.is_file() || overwrite {
        println!("Combining left and right hemispheres...");
        shell::run("fslmaths", &[
            s(&fs_subj_dir.join("mri/orig/lh.ribbon.nii.gz")),
            "-add".into(),
            s(&fs_subj_dir.join("mri/orig/rh.ribbon.nii.gz")),
            "-bin".into(),
            s(&cortex_highres),
        ])?;
    }
    Ok(cortex_highres)
}

fn session_masks(
    config: &Config,
    subject: &str,
    session: &str,
    cortex_anat: &Path,
    overwrite: bool,
) -> Res<()> {
    let layout = &config.layout;
    let reg_dir = layout.reg_dir(subject, session);
    let ref_anat = layout.ref_anat(subject);
    let ref_func = find_example_func(&reg_dir)
        .unwrap_or_else(|| panic!("no reference functional in {}: run registration first",
                                  reg_dir.display()));
    let reg = reg_dir.join("example_func2highres.lta");

    let func_dir = layout.roi_session_dir(subject, session);
    fs::create_dir_all(&func_dir)?;

    // cortex in functional space; re-binarize after the trilinear resampling
    let cortex_func = func_dir.join("cortex.nii.gz");
    if !cortex_func.is_file() || overwrite {
        println!("Transforming cortex mask to functional space...");
        let highres2example_func = reg_dir.join("highres2example_func.mat");
        shell::run("flirt", &[
            "-in".into(), s(cortex_anat),
            "-ref".into(), s(&ref_func),
            "-out".into(), s(&cortex_func),
            "-applyxfm".into(),
            "-init".into(), s(&highres2example_func),
        ])?;
        shell::run("fslmaths", &[s(&cortex_func), "-bin".into(), s(&cortex_func)])?;
    }

    // the analysed voxels: posterior cortex up to the y-axis cutoff
    let mask = func_dir.join("mask_analyzed.nii.gz");
    if !mask.exists() {
        let [y0, ylen] = config.settings.analysis.y_window;
        shell::run("fslmaths", &[
            s(&cortex_func),
            "-roi".into(),
            "0".into(), "-1".into(),
            y0.to_string(), ylen.to_string(),
            "0".into(), "-1".into(),
            "0".into(), "1".into(),
            s(&mask),
        ])?;
    }

    // surface labels
    for hemi in HEMIS {
        let surface = func_dir.join(format!("mask_analyzed_{hemi}.mgh"));
        if !surface.is_file() || overwrite {
            println!("Converting cortex mask to surface label...");
            shell::run("mri_vol2surf", &[
                "--mov".into(), s(&mask),
                "--out".into(), s(&surface),
                "--reg".into(), s(&reg),
                "--hemi".into(), hemi.into(),
                "--interp".into(), "nearest".into(),
            ])?;
        }
        let label = surface.with_extension("label");
        if !label.is_file() {
            shell::run("mri_cor2label", &[
                "--i".into(), s(&surface),
                "--surf".into(), sub(subject), hemi.into(),
                "--id".into(), "1".into(),
                "--l".into(), s(&label),
            ])?;
        }
    }

    // QA snapshots of the mask in each space
    let plot_dir = layout.roi_plots_dir();
    fs::create_dir_all(&plot_dir)?;
    for (space, reference, mask_path) in izip!(
        ["anat", "func", "mask"],
        [ref_anat.as_path(), ref_func.as_path(), ref_func.as_path()],
        [cortex_anat, cortex_func.as_path(), mask.as_path()],
    ) {
        let plot_file = plot_dir.join(format!("{}_{session}_{space}_cortex.png", sub(subject)));
        if !plot_file.is_file() || overwrite {
            qa::ortho_snapshot(&plot_file, reference, mask_path)?;
        }
    }

    // local links to the reference images
    let local_anat = layout.roi_dir(subject).join("anat_space/ref_anat.nii");
    refresh_link(&ref_anat, &local_anat, overwrite)?;
    let local_func = func_dir.join("ref_func.nii");
    refresh_link(&ref_func, &local_func, overwrite)?;

    // native-space functional brain mask
    let brain_mask = func_dir.join("brain_mask.nii.gz");
    if !brain_mask.exists() {
        shell::run("mri_synthstrip", &[
            "-i".into(), s(&ref_func),
            "-m".into(), s(&brain_mask),
        ])?;
    }

    Ok(())
}

fn refresh_link(target: &Path, link: &Path, overwrite: bool) -> Res<()> {
    if link.symlink_metadata().is_ok() && overwrite {
        fs::remove_file(link)?;
    }
    link_if_absent(&fs::canonicalize(target)?, link)
}
