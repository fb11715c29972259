//! Containerized preprocessing: MRIQC quality metrics and fMRIPrep, one
//! subject at a time, then brain extraction of the anatomicals.
//!
//! Both tools are skipped per subject when their output directory already
//! exists; fMRIPrep does not check for itself which subjects are done.
// TODO: run subjects in parallel when more than 16 cores are available,
// with 8 cores per subject
// (https://fmriprep.org/en/stable/faq.html#running-subjects-in-parallel)

use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::paths::{sub, with_suffix};
use crate::shell::{self, s, Res};

pub fn preprocess(config: &Config) -> Res<()> {
    println!("Preprocessing data...");
    mriqc(config)?;
    fmriprep(config)?;
    extract_brains(config)?;
    Ok(())
}

fn mount(src: &Path, dst: &str) -> [String; 2] {
    ["--mount".into(), format!("type=bind,src={},dst={dst}", s(src))]
}

fn mriqc(config: &Config) -> Res<()> {
    let docker = &config.settings.docker;
    let indir = fs::canonicalize(&config.layout.project)?;
    let outdir = config.layout.mriqc_dir(&docker.mriqc_version);
    fs::create_dir_all(&outdir)?;

    let mut base: Vec<String> = vec!["run".into(), "--rm".into()];
    base.extend(mount(&indir, "/data"));
    base.extend(mount(&outdir, "/out"));
    base.push(format!("--memory={}g", docker.memory_gb));
    base.push(format!("--memory-swap={}g", docker.memory_gb));
    base.push(format!("nipreps/mriqc:{}", docker.mriqc_version));
    base.push("--nprocs".into());
    base.push(config.settings.resources.nprocs.to_string());
    base.push("--verbose-reports".into());
    base.extend(["/data".into(), "/out".into()]);

    let mut new_subjects = false;
    for subject in config.roster.keys() {
        if !outdir.join(sub(subject)).is_dir() {
            let mut args = base.clone();
            args.extend(["participant".into(), "--participant-label".into(), subject.clone()]);
            shell::run("docker", &args)?;
            new_subjects = true;
        }
    }

    if !outdir.join("group_bold.html").is_file() || new_subjects {
        let mut args = base;
        args.push("group".into());
        shell::run("docker", &args)?;
    }
    Ok(())
}

fn fmriprep(config: &Config) -> Res<()> {
    let docker = &config.settings.docker;
    let resources = &config.settings.resources;
    let indir = fs::canonicalize(&config.layout.project)?;
    let outdir = config.layout.fmriprep_dir(&docker.fmriprep_version);
    fs::create_dir_all(&outdir)?;
    let workdir = config.layout.fmriprep_work();
    fs::create_dir_all(&workdir)?;
    let fs_subjects = &config.layout.subjects_dir;

    for subject in config.roster.keys() {
        if outdir.join(sub(subject)).is_dir() {
            continue;
        }
        let mut args: Vec<String> = vec!["run".into(), "--rm".into()];
        args.extend(mount(&indir, "/data"));
        args.extend(mount(&outdir, "/out"));
        args.extend(mount(fs_subjects, "/fs_subjects"));
        args.extend(mount(&workdir, "/work"));
        args.push(format!("--memory={}g", docker.memory_gb));
        args.push(format!("--memory-swap={}g", docker.memory_swap_gb));
        args.push(format!("nipreps/fmriprep:{}", docker.fmriprep_version));
        args.extend([
            "/data".into(), "/out".into(), "participant".into(),
            "-w".into(), "/work".into(),
            "--clean-workdir".into(),
            "--nprocs".into(), resources.nprocs.to_string(),
            "--mem-mb".into(), resources.mem_mb.to_string(),
            "--fs-license-file".into(), "/fs_subjects/license.txt".into(),
            "--fs-subjects-dir".into(), "/fs_subjects".into(),
            "--output-spaces".into(), "func".into(),
            "--participant-label".into(), subject.clone(),
        ]);
        shell::run("docker", &args)?;
    }

    fs::remove_dir_all(&workdir)?;
    Ok(())
}

/// Convert the final and original anatomicals to NIfTI and extract their
/// brains.
fn extract_brains(config: &Config) -> Res<()> {
    for subject in config.roster.keys() {
        let fs_dir = config.layout.fs_subject_dir(subject);
        for mgz in [fs_dir.join("mri/T1.mgz"), fs_dir.join("mri/orig/001.mgz")] {

            let nii = mgz.with_extension("nii");
            if !nii.is_file() {
                shell::run("mri_convert", &[s(&mgz), s(&nii)])?;
            }

            let brain = with_suffix(&mgz, "_brain.nii.gz");
            if !brain.is_file() {
                shell::run("mri_synthstrip", &["-i".into(), s(&nii), "-o".into(), s(&brain)])?;
            }
        }
    }
    Ok(())
}
