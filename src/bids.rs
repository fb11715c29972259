//! BIDS initializer: move raw scanner exports into the standard layout.
//!
//! Raw files are located by scan index in `sourcedata/`, copied (or moved,
//! when freshly converted from DICOM) into BIDS names, and their JSON
//! sidecars completed with the fields the downstream tools require. Finding
//! anything other than exactly one matching raw file is a hard failure:
//! ambiguity in source data must not silently proceed.

use std::fs;
use std::path::{Path, PathBuf};

use glob::glob;
use ndarray::{Axis, Slice};
use nifti::NiftiHeader;
use serde_json::{json, Map, Value};

use crate::config::Config;
use crate::image;
use crate::paths::{relative_to_subject, sub};
use crate::qa;
use crate::shell::{self, glob_paths, s, Res};

/// Sidecar filetypes carried into the BIDS tree; anything else trips the
/// validator
const FILETYPES: [&str; 2] = ["nii", "json"];

/// Readout time consistently found in other experiments using the same scan
/// acquisition, used when the scanner export carries no estimate
const FALLBACK_READOUT_TIME: f64 = 0.030498;

pub type Sidecar = Map<String, Value>;

#[derive(Clone, Copy)]
enum Transfer {
    Copy,
    Move,
}

impl Transfer {
    fn apply(self, from: &Path, to: &Path) -> std::io::Result<()> {
        match self {
            Transfer::Copy => { fs::copy(from, to)?; }
            Transfer::Move => { fs::rename(from, to)?; }
        }
        Ok(())
    }
}

pub fn initialise_bids(config: &Config) -> Res<()> {
    println!("Initializing BIDS...");
    for (subject, sessions) in &config.roster {
        for (session, _) in sessions {
            init_session(config, subject, session)?;
        }
    }
    Ok(())
}

fn init_session(config: &Config, subject: &str, session: &str) -> Res<()> {
    let layout = &config.layout;
    let info = &config.roster[subject][session];
    let sourcedir = layout.raw_data(subject, session);
    let sess_id = &info.sess_id;

    // DICOM exports are converted in place and the converted files moved;
    // NIfTI exports are copied, leaving sourcedata untouched
    let dicoms = glob(&format!("{}/*.DCM", sourcedir.display()))
        .unwrap_or_else(|e| panic!("bad glob pattern: {e}"))
        .count();
    let transfer = if dicoms > 0 {
        shell::run("dcm2niix", &[s(&sourcedir)])?;
        Transfer::Move
    } else {
        Transfer::Copy
    };

    // ---- anat ------------------------------------------------------------

    let t1_nii = match info.anat {
        Some(scan) => {
            let anatdir = layout.anat_dir(subject, session);
            fs::create_dir_all(&anatdir)?;

            let inpath = find_raw(&sourcedir, sess_id, scan, "json");
            let outpath = anatdir.join(format!("{}_{session}_T1w.json", sub(subject)));
            if !outpath.is_file() {
                transfer.apply(&inpath, &outpath)?;
            }

            let inpath = find_raw(&sourcedir, sess_id, scan, "nii");
            let outpath = anatdir.join(format!("{}_{session}_T1w.nii", sub(subject)));
            if !outpath.is_file() {
                transfer.apply(&inpath, &outpath)?;
            }
            outpath
        }
        // no anatomical in this session: reuse the most recent one
        None => {
            let anatdir = layout.anat_dir(subject, "ses-anat");
            fs::create_dir_all(&anatdir)?;

            let sidecar_src = fallback_anat_sidecar(config, subject);
            let outpath = anatdir.join(format!("{}_ses-anat_T1w.json", sub(subject)));
            if !outpath.is_file() {
                fs::copy(&sidecar_src, &outpath)?;
            }

            let nii_src = sidecar_src.with_extension("nii");
            let outpath = anatdir.join(format!("{}_ses-anat_T1w.nii", sub(subject)));
            if !outpath.is_file() {
                fs::copy(&nii_src, &outpath)?;
            }
            outpath
        }
    };

    // 2-D slice renders handed to the participant
    if let Some(handout) = &config.settings.analysis.handout_dir {
        let slice_dir = handout.join(sub(subject)).join("2D");
        if !slice_dir.is_dir() {
            qa::anat_slices(&t1_nii, &slice_dir, config.settings.analysis.slice_interval)?;
        }
    }

    // ---- func ------------------------------------------------------------

    let funcdir = layout.func_dir(subject, session);
    fs::create_dir_all(&funcdir)?;
    let fmapdir = layout.fmap_dir(subject, session);
    fs::create_dir_all(&fmapdir)?;

    // BIDS dislikes task names in topup files, so give them a run number
    // that is unique across tasks
    let mut topup_counter = 1;

    for (task, runs) in &info.func {
        for (run, &scan) in runs.iter().enumerate() {

            let stem = format!("{}_{session}_task-{task}_dir-AP_run-{}_bold", sub(subject), run + 1);
            for ft in FILETYPES {
                let inpath = find_raw(&sourcedir, sess_id, scan, ft);
                let outpath = funcdir.join(format!("{stem}.{ft}"));
                if !outpath.is_file() {
                    transfer.apply(&inpath, &outpath)?;
                }
                if ft == "nii" {
                    normalise_orientation(&outpath)?;
                }
            }

            let nii = funcdir.join(format!("{stem}.nii"));
            let json_path = funcdir.join(format!("{stem}.json"));
            let mut sidecar = read_sidecar(&json_path)?;
            let timing = slice_timing_for(config, &nii, &sidecar, Some(task))?;
            complete_bold_sidecar(&mut sidecar, task, timing);
            write_sidecar(&json_path, &sidecar)?;

            // the scan following each 7T functional run is its top-up scan
            if session.contains("7T") {
                let out_stem = format!("{}_{session}_acq-topup_dir-PA_run-{topup_counter}_epi", sub(subject));
                for ft in FILETYPES {
                    let inpath = find_raw(&sourcedir, sess_id, scan + 1, ft);
                    assert!(
                        inpath.to_string_lossy().contains("TU"),
                        "scan {} after functional run {} of {} {session} is not a top-up acquisition: {}",
                        scan + 1, run + 1, sub(subject), inpath.display(),
                    );
                    let outpath = fmapdir.join(format!("{out_stem}.{ft}"));
                    if !outpath.is_file() {
                        transfer.apply(&inpath, &outpath)?;
                    }
                    if ft == "nii" {
                        normalise_orientation(&outpath)?;
                    }
                }
                topup_counter += 1;

                let topup_nii = fmapdir.join(format!("{out_stem}.nii"));
                let json_path = fmapdir.join(format!("{out_stem}.json"));
                let mut sidecar = read_sidecar(&json_path)?;
                let timing = slice_timing_for(config, &topup_nii, &sidecar, None)?;
                complete_topup_sidecar(&mut sidecar, timing, &relative_to_subject(&nii, subject));
                write_sidecar(&json_path, &sidecar)?;
            }
        }
    }

    // ---- fmap: B0 --------------------------------------------------------

    if let Some(b0) = info.fmap.b0 {
        for (echo, component) in ["magnitude", "fieldmap"].iter().enumerate() {
            for ft in FILETYPES {
                let inpath = find_raw_matching(
                    &sourcedir,
                    &format!("*{sess_id}.{b0:02}*B0_shimmed*e{}*.{ft}", echo + 1),
                );
                let outpath = fmapdir.join(format!("{}_{session}_acq-b0_{component}.{ft}", sub(subject)));
                if !outpath.is_file() {
                    transfer.apply(&inpath, &outpath)?;
                }
            }

            let json_path = fmapdir.join(format!("{}_{session}_acq-b0_{component}.json", sub(subject)));
            let mut sidecar = read_sidecar(&json_path)?;
            if !sidecar.contains_key("IntendedFor") {
                let mut intended = glob_paths(&format!("{}/*.nii", layout.anat_dir(subject, session).display()));
                if session.contains("3T") {
                    // no topup at 3T, so the functionals get b0 correction
                    intended.extend(glob_paths(&format!("{}/*.nii", funcdir.display())));
                }
                let mut intended: Vec<String> = intended.iter()
                    .map(|p| relative_to_subject(p, subject))
                    .collect();
                intended.sort();
                sidecar.insert("IntendedFor".into(), json!(intended));
            }
            if *component == "fieldmap" && !sidecar.contains_key("Units") {
                sidecar.insert("Units".into(), json!("Hz"));
            }
            write_sidecar(&json_path, &sidecar)?;
        }
    }

    // ---- fmap: funcNoEPI -------------------------------------------------

    if let Some(scan) = info.fmap.func_no_epi {
        for ft in FILETYPES {
            let inpath = find_raw(&sourcedir, sess_id, scan, ft);
            let outpath = fmapdir.join(format!("{}_{session}_acq-funcNoEPI_magnitude.{ft}", sub(subject)));
            if !outpath.is_file() {
                transfer.apply(&inpath, &outpath)?;
                if ft == "nii" {
                    if let Some(&[zmin, zsize]) = config.settings.quirks.func_no_epi_trim.get(subject) {
                        trim_slices(&outpath, zmin, zsize)?;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Sidecar of the anatomical to reuse for a session without one: a
/// configured per-subject path when the site has picked one manually, else
/// the most recent T1w sidecar under the configured search directories.
fn fallback_anat_sidecar(config: &Config, subject: &str) -> PathBuf {
    if let Some(path) = config.settings.quirks.anat_fallbacks.get(subject) {
        return path.clone();
    }
    for dir in &config.settings.quirks.anat_search_dirs {
        let pattern = format!("{}/{}/ses-*/anat/{}_ses-*_T1w.json",
                              dir.display(), sub(subject), sub(subject));
        let mut files = glob_paths(&pattern);
        files.sort();
        if let Some(latest) = files.pop() {
            return latest;
        }
    }
    panic!("no anatomical found for {}: session declares none and no fallback is configured",
           sub(subject));
}

/// Locate the single raw file for a scan index. Exactly one match is
/// required; anything else is a hard failure.
fn find_raw(sourcedir: &Path, sess_id: &str, scan: u32, ext: &str) -> PathBuf {
    find_raw_matching(sourcedir, &format!("*{sess_id}.{scan:02}*.{ext}"))
}

fn find_raw_matching(sourcedir: &Path, pattern: &str) -> PathBuf {
    let full = format!("{}/{pattern}", sourcedir.display());
    let files = glob_paths(&full);
    assert!(
        files.len() == 1,
        "expected exactly one file matching {full}, found {}", files.len(),
    );
    files.into_iter().next().unwrap()
}

/// Reorient a volume in place by a left-right flip if its header declares a
/// `Left-to-Right` acquisition.
///
/// Different sites deliver different orientations (Right-to-Left at 3T,
/// Left-to-Right at 7T). FSL tools read orientation from the header, but any
/// tool looking at raw voxel data needs it identical across acquisitions.
/// After `fslswapdim` the Left-to-Right signature remains in the header while
/// the stored data and orientation matrix are flipped, which at least keeps
/// the header accurate.
fn normalise_orientation(func: &Path) -> Res<()> {
    let header = shell::capture("fslhd", &[s(func)])?;
    let left_to_right = header.lines()
        .any(|l| l.starts_with("qform_xorient") && l.contains("Left-to-Right"));
    if left_to_right {
        shell::run("fslswapdim", &[s(func), "-x".into(), "y".into(), "z".into(), s(func)])?;
    }
    Ok(())
}

/// Drop slices outside `zmin..zmin+zsize`. `fslroi` handles the positional
/// shift but rescales the intensities, which affects registration: so take
/// the cropped header from fslroi and rewrite the original, unrescaled voxel
/// values under it.
fn trim_slices(nii: &Path, zmin: usize, zsize: usize) -> Res<()> {
    let original = image::load(nii)?;
    let trimmed = original.data
        .slice_axis(Axis(2), Slice::from(zmin..zmin + zsize))
        .to_owned();

    shell::run("fslroi", &[
        s(nii), s(nii),
        "0".into(), "-1".into(), "0".into(), "-1".into(),
        zmin.to_string(), zsize.to_string(),
    ])?;

    let gz = PathBuf::from(format!("{}.gz", nii.display()));
    let cropped_header = image::load(&gz)?.header;
    image::save(nii, &cropped_header, &trimmed)?;
    fs::remove_file(&gz)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// sidecar completion

fn read_sidecar(path: &Path) -> Res<Sidecar> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read sidecar {}: {e}", path.display()))?;
    match serde_json::from_str(&text)? {
        Value::Object(map) => Ok(map),
        other => Err(format!("sidecar {} is not a JSON object: {other}", path.display()).into()),
    }
}

fn write_sidecar(path: &Path, sidecar: &Sidecar) -> Res<()> {
    fs::write(path, serde_json::to_string_pretty(&Value::Object(sidecar.clone()))?)?;
    Ok(())
}

/// Required keys are filled only when absent; populated metadata is never
/// overwritten.
pub fn complete_bold_sidecar(sidecar: &mut Sidecar, task: &str, slice_timing: Option<Vec<f64>>) {
    if !sidecar.contains_key("TaskName") {
        sidecar.insert("TaskName".into(), json!(task));
    }
    if !sidecar.contains_key("PhaseEncodingDirection") {
        sidecar.insert("PhaseEncodingDirection".into(), json!("j-"));
    }
    complete_timing(sidecar, slice_timing);
}

pub fn complete_topup_sidecar(sidecar: &mut Sidecar, slice_timing: Option<Vec<f64>>, intended_for: &str) {
    if !sidecar.contains_key("PhaseEncodingDirection") {
        sidecar.insert("PhaseEncodingDirection".into(), json!("j"));
    }
    complete_timing(sidecar, slice_timing);
    if !sidecar.contains_key("IntendedFor") {
        sidecar.insert("IntendedFor".into(), json!(intended_for));
    }
}

fn complete_timing(sidecar: &mut Sidecar, slice_timing: Option<Vec<f64>>) {
    if !sidecar.contains_key("SliceTiming") {
        if let Some(timing) = slice_timing {
            sidecar.insert("SliceTiming".into(), json!(timing));
        }
    }
    if !sidecar.contains_key("TotalReadoutTime") {
        let readout = sidecar.get("EstimatedTotalReadoutTime")
            .and_then(Value::as_f64)
            .unwrap_or(FALLBACK_READOUT_TIME);
        sidecar.insert("TotalReadoutTime".into(), json!(readout));
    }
}

fn slice_timing_for(config: &Config, nii: &Path, sidecar: &Sidecar, task: Option<&str>) -> Res<Option<Vec<f64>>> {
    let tr = sidecar.get("RepetitionTime")
        .and_then(Value::as_f64)
        .or_else(|| task.and_then(|t| config.tr(t)));
    let Some(tr) = tr else { return Ok(None) };
    let header = NiftiHeader::from_file(nii)
        .map_err(|e| format!("cannot read header of {}: {e}", nii.display()))?;
    let n_slices = header.dim[3] as usize;
    Ok(Some(philips_slice_timing(n_slices, tr)))
}

/// Philips exports carry no slice-timing table; reconstruct it assuming the
/// scanner's single-package interleaved order (slice step = round(sqrt(n))).
pub fn philips_slice_timing(n_slices: usize, tr: f64) -> Vec<f64> {
    let step = (n_slices as f64).sqrt().round().max(1.0) as usize;
    let mut order = Vec::with_capacity(n_slices);
    for offset in 0..step {
        order.extend((offset..n_slices).step_by(step));
    }
    let mut timing = vec![0.0; n_slices];
    for (slot, slice) in order.into_iter().enumerate() {
        timing[slice] = slot as f64 * tr / n_slices as f64;
    }
    timing
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};
    use rstest::rstest;

    #[test]
    fn sidecar_completion_fills_missing_fields_only() {
        let mut sidecar: Sidecar = serde_json::from_str(r#"{
            "PhaseEncodingDirection": "i",
            "EstimatedTotalReadoutTime": 0.042
        }"#).unwrap();
        complete_bold_sidecar(&mut sidecar, "retinotopy", Some(vec![0.0, 1.0]));

        // absent keys filled
        assert_eq!(sidecar["TaskName"], json!("retinotopy"));
        assert_eq!(sidecar["SliceTiming"], json!([0.0, 1.0]));
        assert_eq!(sidecar["TotalReadoutTime"], json!(0.042));
        // populated keys untouched
        assert_eq!(sidecar["PhaseEncodingDirection"], json!("i"));
    }

    #[test]
    fn readout_time_falls_back_to_known_value() {
        let mut sidecar = Sidecar::new();
        complete_topup_sidecar(&mut sidecar, None, "ses-7T1/func/bold.nii");
        assert_eq!(sidecar["TotalReadoutTime"], json!(FALLBACK_READOUT_TIME));
        assert_eq!(sidecar["PhaseEncodingDirection"], json!("j"));
        assert_eq!(sidecar["IntendedFor"], json!("ses-7T1/func/bold.nii"));
    }

    #[rstest]
    #[case(36, 2.0)]
    #[case(46, 2.0)]
    #[case(1, 1.5)]
    #[case(33, 3.0)]
    fn slice_timing_covers_each_slice_once_within_tr(#[case] n: usize, #[case] tr: f64) {
        let timing = philips_slice_timing(n, tr);
        assert_eq!(timing.len(), n);
        // all acquisition slots distinct and inside one TR
        let mut slots: Vec<i64> = timing.iter()
            .map(|t| (t * n as f64 / tr).round() as i64)
            .collect();
        slots.sort();
        assert_eq!(slots, (0..n as i64).collect::<Vec<_>>());
        assert!(timing.iter().all(|&t| t >= 0.0 && t < tr));
    }

    #[test]
    fn finds_the_single_matching_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Tong_341844.05.01.13-25-23.WIP_T1_SENSE.01.nii");
        fs::write(&path, "").unwrap();
        fs::write(dir.path().join("Tong_341844.07.01.13-31-02.WIP_RETINO_SENSE.01.nii"), "").unwrap();
        assert_eq!(find_raw(dir.path(), "341844", 5, "nii"), path);
    }

    #[test]
    #[should_panic(expected = "expected exactly one file")]
    fn ambiguous_raw_files_are_a_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Tong_341844.05.01.13-25-23.WIP_T1_SENSE.01.nii"), "").unwrap();
        fs::write(dir.path().join("Copy_341844.05.01.13-25-23.WIP_T1_SENSE.01.nii"), "").unwrap();
        find_raw(dir.path(), "341844", 5, "nii");
    }
}
