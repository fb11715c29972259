//! pRF estimation: align and detrend the functional runs, average them, and
//! hand the averaged timeseries to the external model-fitting engine.

use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::config::{Config, Stimulus};
use crate::paths::sub;
use crate::registration::find_example_func;
use crate::shell::{self, glob_paths, s, Res};

pub fn estimate_prfs(config: &Config) -> Res<()> {
    println!("Estimating pRFs...");
    let tr = config.tr("retinotopy")
        .ok_or("no scan parameters for task retinotopy")?;
    for (subject, sessions) in &config.roster {
        for (session, info) in sessions {
            estimate_session(config, subject, session, tr, info.stim)?;
        }
    }
    Ok(())
}

fn estimate_session(config: &Config, subject: &str, session: &str, tr: f64, stim: Stimulus) -> Res<()> {
    let layout = &config.layout;

    let mask = layout.roi_session_dir(subject, session).join("mask_analyzed.nii.gz");
    let reg_dir = layout.reg_dir(subject, session);
    let ref_func = find_example_func(&reg_dir)
        .unwrap_or_else(|| panic!("no reference functional in {}: run registration first",
                                  reg_dir.display()));
    let sess_dir = layout.prf_session_dir(subject, session);
    fs::create_dir_all(&sess_dir)?;

    // timeseries: each run aligned to the reference functional, slow drift
    // removed
    let pattern = format!("{}/fmriprep-*/{}/{session}/func/*task-retinotopy*bold.nii*",
                          layout.derivatives().display(), sub(subject));
    let mut funcs = glob_paths(&pattern);
    funcs.sort();
    for func in &funcs {
        let run = run_entity(func);
        let func_local = sess_dir.join(format!("timeseries_{run}.nii.gz"));
        if func_local.is_file() {
            continue;
        }
        shell::run("mcflirt", &[
            "-in".into(), s(func),
            "-reffile".into(), s(&ref_func),
            "-out".into(), s(&func_local),
        ])?;
        // high-pass filter, re-adding the temporal mean so the DC term
        // survives
        let tmean = sess_dir.join(format!("timeseries_{run}_tmean.nii.gz"));
        shell::run("fslmaths", &[s(&func_local), "-Tmean".into(), s(&tmean)])?;
        shell::run("fslmaths", &[
            s(&func_local),
            "-bptf".into(), format!("{}", config.settings.analysis.highpass_sigma), "-1".into(),
            "-add".into(), s(&tmean),
            "-nan".into(),
            s(&func_local),
        ])?;
        fs::remove_file(&tmean)?;
    }

    // analyse the mean timeseries across all runs in the session
    let out_dir = layout.mean_prf_dir(subject, session);
    fs::create_dir_all(&out_dir)?;
    let mean_func = out_dir.join("timeseries.nii.gz");
    if !mean_func.is_file() {
        let runs = {
            let mut r = glob_paths(&format!("{}/timeseries_run-*.nii.gz", sess_dir.display()));
            r.sort();
            r
        };
        assert!(!runs.is_empty(), "no aligned timeseries in {}", sess_dir.display());
        shell::run("fslmaths", &average_args(&runs, &mean_func))?;
    }

    if !out_dir.join("prfs.mat").is_file() {
        fit(config, &[mean_func], &mask, &out_dir, tr, stim)?;
    }
    Ok(())
}

/// `fslmaths a -add b ... -div n out`
fn average_args(runs: &[PathBuf], out: &Path) -> Vec<String> {
    let mut args: Vec<String> =
        Itertools::intersperse(runs.iter().map(|r| s(r)), "-add".into()).collect();
    args.extend(["-div".into(), runs.len().to_string(), s(out)]);
    args
}

/// The `run-N` entity of a BIDS functional file name.
fn run_entity(func: &Path) -> &str {
    func.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('_').find(|part| part.starts_with("run-")))
        .unwrap_or_else(|| panic!("no run entity in {}", func.display()))
}

/// Invoke the external pRF fitting engine on one or more timeseries.
fn fit(config: &Config, funcs: &[PathBuf], mask: &Path, out_dir: &Path, tr: f64, stim: Stimulus) -> Res<()> {
    let prf = &config.settings.prf;
    let mut script = format!("addpath('{}'); ", s(&prf.call_path));
    for toolbox in &prf.toolbox_paths {
        script += &format!("addpath(genpath('{}')); ", s(toolbox));
    }
    let func_list = funcs.iter().map(|f| format!("'{}'", s(f))).join(", ");
    script += &format!(
        "analyzePRF_call({{{func_list}}}, '{}', '{}', {tr}, {}, '{stim}')",
        s(mask), s(out_dir),
        if prf.remove_outliers { 1 } else { 0 },
    );
    shell::run("matlab", &["-batch".to_string(), script])
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn run_entity_comes_from_the_file_name() {
        let f = PathBuf::from("derivatives/fmriprep-23.2.3/sub-F019/ses-7T1/func/\
                               sub-F019_ses-7T1_task-retinotopy_dir-AP_run-2_desc-preproc_bold.nii.gz");
        assert_eq!(run_entity(&f), "run-2");
    }

    #[test]
    fn averaging_divides_by_the_run_count() {
        let runs: Vec<PathBuf> = (1..=3)
            .map(|r| PathBuf::from(format!("sess/timeseries_run-{r}.nii.gz")))
            .collect();
        let args = average_args(&runs, Path::new("sess/mean_before_prf/timeseries.nii.gz"));
        assert_eq!(args, vec![
            "sess/timeseries_run-1.nii.gz", "-add",
            "sess/timeseries_run-2.nii.gz", "-add",
            "sess/timeseries_run-3.nii.gz",
            "-div", "3",
            "sess/mean_before_prf/timeseries.nii.gz",
        ]);
    }
}
