//! Deterministic path construction.
//!
//! Every artifact in the pipeline is addressed by a path template keyed on
//! subject/session identifiers; existence of a file at its expected path is
//! the source of truth for "already computed". Session identifiers carry
//! their BIDS prefix (e.g. `ses-7T1`), subjects do not (`F019`).

use std::path::{Path, PathBuf};

/// BIDS subject label: `F019` -> `sub-F019`
pub fn sub(subject: &str) -> String {
    format!("sub-{subject}")
}

#[derive(Debug, Clone)]
pub struct Layout {
    /// Project root; all BIDS and derivative paths live below it
    pub project: PathBuf,
    /// FreeSurfer subjects directory ($SUBJECTS_DIR)
    pub subjects_dir: PathBuf,
    /// FSL installation root ($FSLDIR)
    pub fsl_dir: PathBuf,
}

impl Layout {

    // ----- raw data ------------------------------------------------------

    pub fn raw_data(&self, subject: &str, session: &str) -> PathBuf {
        self.project.join("sourcedata").join(sub(subject)).join(session).join("raw_data")
    }

    // ----- BIDS tree -----------------------------------------------------

    pub fn subject_dir(&self, subject: &str) -> PathBuf {
        self.project.join(sub(subject))
    }

    pub fn anat_dir(&self, subject: &str, session: &str) -> PathBuf {
        self.subject_dir(subject).join(session).join("anat")
    }

    pub fn func_dir(&self, subject: &str, session: &str) -> PathBuf {
        self.subject_dir(subject).join(session).join("func")
    }

    pub fn fmap_dir(&self, subject: &str, session: &str) -> PathBuf {
        self.subject_dir(subject).join(session).join("fmap")
    }

    // ----- derivatives ---------------------------------------------------

    pub fn derivatives(&self) -> PathBuf {
        self.project.join("derivatives")
    }

    pub fn mriqc_dir(&self, version: &str) -> PathBuf {
        self.derivatives().join(format!("mriqc-{version}"))
    }

    pub fn fmriprep_dir(&self, version: &str) -> PathBuf {
        self.derivatives().join(format!("fmriprep-{version}"))
    }

    pub fn fmriprep_work(&self) -> PathBuf {
        self.derivatives().join("fmriprep_work")
    }

    pub fn reg_dir(&self, subject: &str, session: &str) -> PathBuf {
        self.derivatives().join("registration").join(sub(subject)).join(session)
    }

    pub fn roi_dir(&self, subject: &str) -> PathBuf {
        self.derivatives().join("ROIs").join(sub(subject))
    }

    pub fn roi_session_dir(&self, subject: &str, session: &str) -> PathBuf {
        self.roi_dir(subject).join(session)
    }

    pub fn roi_plots_dir(&self) -> PathBuf {
        self.derivatives().join("ROIs").join("plots")
    }

    pub fn prf_session_dir(&self, subject: &str, session: &str) -> PathBuf {
        self.derivatives().join("pRF").join(sub(subject)).join(session)
    }

    /// Output directory of the fit on the run-averaged timeseries
    pub fn mean_prf_dir(&self, subject: &str, session: &str) -> PathBuf {
        self.prf_session_dir(subject, session).join("mean_before_prf")
    }

    // ----- FreeSurfer ----------------------------------------------------

    pub fn fs_subject_dir(&self, subject: &str) -> PathBuf {
        self.subjects_dir.join(sub(subject))
    }

    pub fn fnirt_dir(&self, subject: &str) -> PathBuf {
        self.fs_subject_dir(subject).join("mri/transforms/fnirt")
    }

    /// Fixed anatomical reference volume (conformed input to recon-all)
    pub fn ref_anat(&self, subject: &str) -> PathBuf {
        self.fs_subject_dir(subject).join("mri/orig/001.nii")
    }

    pub fn ref_anat_brain(&self, subject: &str) -> PathBuf {
        self.fs_subject_dir(subject).join("mri/orig/001_brain.nii.gz")
    }

    // ----- standard space ------------------------------------------------

    pub fn mni_head(&self) -> PathBuf {
        self.fsl_dir.join("data/standard/MNI152_T1_2mm.nii.gz")
    }

    pub fn mni_brain(&self) -> PathBuf {
        self.fsl_dir.join("data/standard/MNI152_T1_2mm_brain.nii.gz")
    }

    pub fn mni_brain_mask(&self) -> PathBuf {
        self.fsl_dir.join("data/standard/MNI152_T1_2mm_brain_mask_dil.nii.gz")
    }
}

/// Replace a path's extension(s) with a suffix string:
/// `with_suffix("mri/T1.mgz", "_brain.nii.gz")` -> `mri/T1_brain.nii.gz`
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{suffix}", path.with_extension("").display()))
}

/// A path relative to the subject directory, as required by the `IntendedFor`
/// sidecar field (`sub-F019/ses-7T1/func/x.nii` -> `ses-7T1/func/x.nii`).
pub fn relative_to_subject(path: &Path, subject: &str) -> String {
    let s = path.to_string_lossy();
    let prefix = format!("{}/", sub(subject));
    match s.find(&prefix) {
        Some(i) => s[i + prefix.len()..].to_string(),
        None    => s.into_owned(),
    }
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    fn layout() -> Layout {
        Layout {
            project: "/data".into(),
            subjects_dir: "/fs/subjects".into(),
            fsl_dir: "/usr/local/fsl".into(),
        }
    }

    #[test]
    fn path_templates() {
        let l = layout();
        assert_eq!(l.raw_data("F019", "ses-7T1"),
                   PathBuf::from("/data/sourcedata/sub-F019/ses-7T1/raw_data"));
        assert_eq!(l.reg_dir("F019", "ses-7T1"),
                   PathBuf::from("/data/derivatives/registration/sub-F019/ses-7T1"));
        assert_eq!(l.mean_prf_dir("M015", "ses-7T2"),
                   PathBuf::from("/data/derivatives/pRF/sub-M015/ses-7T2/mean_before_prf"));
        assert_eq!(l.ref_anat("F019"),
                   PathBuf::from("/fs/subjects/sub-F019/mri/orig/001.nii"));
    }

    #[test]
    fn intended_for_paths_are_subject_relative() {
        let p = PathBuf::from("/data/sub-F019/ses-7T1/func/sub-F019_ses-7T1_task-retinotopy_dir-AP_run-1_bold.nii");
        assert_eq!(relative_to_subject(&p, "F019"),
                   "ses-7T1/func/sub-F019_ses-7T1_task-retinotopy_dir-AP_run-1_bold.nii");
    }
}
