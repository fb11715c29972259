//! Coordinate transforms.
//!
//! Two chained transforms per subject: anatomical<->standard space (affine +
//! non-linear warp, computed once per subject in the FreeSurfer directory)
//! and functional<->anatomical space (boundary-based, once per session).
//! Forward and inverse directions are both persisted; directionality is
//! fixed by the file names. Every output is gated on existence unless its
//! stage tag is in the overwrite set.

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;

use crate::config::{Config, RegMethod};
use crate::paths::sub;
use crate::qa;
use crate::shell::{self, glob_paths, link_if_absent, s, unless_exists, Res};

/// Stage tags that bypass the existence gates of one stage only
#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Overwrite {
    /// anatomical <-> standard transforms
    AnatStd,
    /// functional <-> anatomical transforms
    FuncAnat,
}

pub fn registration(config: &Config, subjects: Option<&[String]>, overwrite: &[Overwrite]) -> Res<()> {
    println!("Performing registration...");
    for (subject, sessions) in &config.roster {
        if let Some(wanted) = subjects {
            if !wanted.iter().any(|w| w == subject) {
                continue;
            }
        }
        anat_to_standard(config, subject, overwrite)?;
        for session in sessions.keys() {
            func_to_anat(config, subject, session, overwrite)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// transform 1: between standard space and anatomical space
// (all done in the subject's freesurfer directory)

fn anat_to_standard(config: &Config, subject: &str, overwrite: &[Overwrite]) -> Res<()> {
    let layout = &config.layout;
    let redo = overwrite.contains(&Overwrite::AnatStd);

    let fs_dir = layout.fs_subject_dir(subject);
    let xform_dir = fs_dir.join("mri/transforms");
    let fnirt_dir = layout.fnirt_dir(subject);
    fs::create_dir_all(&fnirt_dir)?;

    let ref_anat = layout.ref_anat(subject);
    let ref_anat_brain = layout.ref_anat_brain(subject);
    let ref_std = layout.mni_head();
    let ref_std_brain = layout.mni_brain();
    let ref_std_mask = layout.mni_brain_mask();

    // freesurfer method
    let standard2highres_lta = xform_dir.join("reg.mni152.2mm.lta");
    if !standard2highres_lta.is_file() {
        shell::run("mni152reg", &["--s".into(), sub(subject)])?;
    }

    // FSL method

    // links to the reference images
    for (in_path, label) in [
        (&ref_anat, "highres.nii.gz"),
        (&ref_std, "standard_head.nii.gz"),
        (&ref_std_brain, "standard.nii.gz"),
    ] {
        link_if_absent(in_path, &fnirt_dir.join(label))?;
    }

    // linear
    let highres2standard = fnirt_dir.join("highres2standard.mat");
    unless_exists(&highres2standard, redo, || shell::run("flirt", &[
        "-in".into(), s(&ref_anat),
        "-ref".into(), s(&ref_std),
        "-omat".into(), s(&highres2standard),
        "-cost".into(), "corratio".into(),
        "-dof".into(), "12".into(),
        "-searchrx".into(), "-90".into(), "90".into(),
        "-searchry".into(), "-90".into(), "90".into(),
        "-searchrz".into(), "-90".into(), "90".into(),
        "-interp".into(), "trilinear".into(),
    ]))?;

    let standard2highres = fnirt_dir.join("standard2highres.mat");
    unless_exists(&standard2highres, redo, || shell::run("convert_xfm", &[
        "-inverse".into(),
        "-omat".into(), s(&standard2highres),
        s(&highres2standard),
    ]))?;

    // non-linear
    let highres2standard_warp = fnirt_dir.join("highres2standard_warp.nii.gz");
    unless_exists(&highres2standard_warp, redo, || shell::run("fnirt", &[
        format!("--in={}", s(&ref_anat)),
        format!("--ref={}", s(&ref_std)),
        format!("--refmask={}", s(&ref_std_mask)),
        "--config=T1_2_MNI152_2mm".into(),
        format!("--aff={}", s(&highres2standard)),
        format!("--cout={}", s(&highres2standard_warp)),
        format!("--iout={}", s(&fnirt_dir.join("highres2standard_head"))),
        format!("--jout={}", s(&fnirt_dir.join("highres2highres_jac"))),
        "--warpres=10,10,10".into(),
    ]))?;

    let standard2highres_warp = fnirt_dir.join("standard2highres_warp.nii.gz");
    unless_exists(&standard2highres_warp, redo, || shell::run("invwarp", &[
        "-w".into(), s(&highres2standard_warp),
        "-o".into(), s(&standard2highres_warp),
        "-r".into(), s(&ref_anat),
    ]))?;

    // apply the warp to the brain-extracted anatomical
    let highres2standard_img = fnirt_dir.join("highres2standard.nii.gz");
    unless_exists(&highres2standard_img, redo, || shell::run("applywarp", &[
        "-i".into(), s(&ref_anat_brain),
        "-r".into(), s(&ref_std_brain),
        "-o".into(), s(&highres2standard_img),
        "-w".into(), s(&highres2standard_warp),
    ]))?;

    // QA mosaic
    let png = fnirt_dir.join("highres2standard.png");
    unless_exists(&png, redo, || qa::registration_mosaic(
        &fnirt_dir,
        &fnirt_dir.join("highres2standard"),
        &fnirt_dir.join("standard"),
        &png,
    ))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// transform 2: between anatomical space and functional space

fn func_to_anat(config: &Config, subject: &str, session: &str, overwrite: &[Overwrite]) -> Res<()> {
    let layout = &config.layout;
    let redo = overwrite.contains(&Overwrite::FuncAnat);

    let reg_dir = layout.reg_dir(subject, session);
    fs::create_dir_all(&reg_dir)?;

    // everything from the subject-level fnirt directory is visible locally
    let fnirt_dir = layout.fnirt_dir(subject);
    for path in glob_paths(&format!("{}/*", fnirt_dir.display())) {
        let name = path.file_name().unwrap().to_owned();
        link_if_absent(&path, &reg_dir.join(name))?;
    }

    let ref_anat = layout.ref_anat(subject);
    let ref_anat_brain = layout.ref_anat_brain(subject);
    let ref_func = example_func(config, subject, session, &reg_dir)?;

    // freesurfer registration for the surface maps
    let lta = reg_dir.join("example_func2highres.lta");
    unless_exists(&lta, redo, || shell::run("bbregister", &[
        "--s".into(), sub(subject),
        "--mov".into(), s(&ref_func),
        "--init-fsl".into(),
        "--lta".into(), s(&lta),
        "--bold".into(),
    ]))?;

    let example_func2highres = reg_dir.join("example_func2highres.mat");
    let highres2example_func = reg_dir.join("highres2example_func.mat");

    match config.settings.registration.method {

        RegMethod::Fsl => {
            unless_exists(&example_func2highres, redo, || shell::run("epi_reg", &[
                format!("--epi={}", s(&ref_func)),
                format!("--t1={}", s(&ref_anat)),
                format!("--t1brain={}", s(&ref_anat_brain)),
                format!("--out={}", s(&reg_dir.join("example_func2highres"))),
            ]))?;

            unless_exists(&highres2example_func, redo, || shell::run("convert_xfm", &[
                "-omat".into(), s(&highres2example_func),
                "-inverse".into(),
                s(&example_func2highres),
            ]))?;
        }

        RegMethod::Freesurfer => {
            unless_exists(&example_func2highres, redo, || shell::run("lta_convert", &[
                "--inlta".into(), s(&lta),
                "--outfsl".into(), s(&example_func2highres),
                "--src".into(), s(&ref_func),
                "--trg".into(), s(&ref_anat),
            ]))?;

            let lta_inv = reg_dir.join("highres2example_func.lta");
            unless_exists(&lta_inv, redo, || shell::run("lta_convert", &[
                "--inlta".into(), s(&lta),
                "--outlta".into(), s(&lta_inv),
                "--invert".into(),
            ]))?;

            unless_exists(&highres2example_func, redo, || shell::run("lta_convert", &[
                "--inlta".into(), s(&lta_inv),
                "--outfsl".into(), s(&highres2example_func),
                "--src".into(), s(&ref_anat),
                "--trg".into(), s(&ref_func),
            ]))?;
        }
    }

    // QA mosaic
    let png = reg_dir.join("example_func2highres.png");
    unless_exists(&png, redo, || qa::registration_mosaic(
        &reg_dir,
        &reg_dir.join("example_func2highres"),
        &reg_dir.join("highres"),
        &png,
    ))?;

    Ok(())
}

/// The session's reference functional volume, created on first use.
///
/// Preference order: the distortion-free funcNoEPI acquisition if the
/// session has one, else the temporal mean of the middle functional run.
pub fn example_func(config: &Config, subject: &str, session: &str, reg_dir: &Path) -> Res<PathBuf> {
    if let Some(existing) = find_example_func(reg_dir) {
        return Ok(existing);
    }

    let layout = &config.layout;
    let func_no_epi = layout.fmap_dir(subject, session)
        .join(format!("{}_{session}_acq-funcNoEPI_magnitude.nii", sub(subject)));

    if func_no_epi.is_file() {
        let out = reg_dir.join("example_func.nii");
        link_if_absent(&fs::canonicalize(&func_no_epi)?, &out)?;
        return Ok(out);
    }

    let pattern = format!("{}/fmriprep-*/{}/{session}/func/*bold.nii*",
                          layout.derivatives().display(), sub(subject));
    let mut func_scans = glob_paths(&pattern);
    func_scans.sort();
    assert!(
        !func_scans.is_empty(),
        "no preprocessed functional runs found for {} {session}: run preprocessing first",
        sub(subject),
    );
    let middle = &func_scans[func_scans.len() / 2];

    let out = reg_dir.join("example_func.nii.gz");
    shell::run("fslmaths", &[s(middle), "-Tmean".into(), s(&out)])?;
    Ok(out)
}

/// An existing reference functional, whichever compression it was created
/// with.
pub fn find_example_func(reg_dir: &Path) -> Option<PathBuf> {
    glob_paths(&format!("{}/example_func.nii*", reg_dir.display())).into_iter().next()
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn overwrite_tags_parse_from_cli_names() {
        assert_eq!(Overwrite::from_str("anat-std", true).unwrap(), Overwrite::AnatStd);
        assert_eq!(Overwrite::from_str("func-anat", true).unwrap(), Overwrite::FuncAnat);
    }

    #[test]
    fn example_func_prefers_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("example_func.nii.gz");
        fs::write(&existing, "").unwrap();
        assert_eq!(find_example_func(dir.path()), Some(existing));
    }
}
