//! Run configuration: participant roster, scan parameters, pipeline settings.
//!
//! Everything is loaded once at startup into a [`Config`] which is passed by
//! reference to each stage. The roster and scan parameters are JSON records
//! next to the data; tool versions, resource limits and site quirks live in
//! an optional `retmap.toml`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::paths::Layout;
use crate::shell::Res;

/// Subject -> session -> scan declaration, as found in `participants.json`
pub type Roster = BTreeMap<String, BTreeMap<String, SessionInfo>>;

#[derive(Deserialize, Debug, Clone)]
pub struct SessionInfo {
    /// Scanner-assigned identifier embedded in raw file names
    #[serde(rename = "sessID")]
    pub sess_id: String,

    /// Scan index of the anatomical acquisition; absent when this session
    /// reuses an anatomical from elsewhere
    #[serde(default)]
    pub anat: Option<u32>,

    /// Task name -> scan indices, one per run
    #[serde(default)]
    pub func: BTreeMap<String, Vec<u32>>,

    #[serde(default)]
    pub fmap: FmapInfo,

    /// Stimulus protocol shown during the retinotopy runs
    #[serde(default)]
    pub stim: Stimulus,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct FmapInfo {
    /// Scan index of the B0 fieldmap acquisition (two echoes)
    #[serde(default)]
    pub b0: Option<u32>,

    /// Scan index of the distortion-free functional reference
    #[serde(default, rename = "funcNoEPI")]
    pub func_no_epi: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stimulus {
    #[default]
    WedgeRing,
    Multibar,
}

impl fmt::Display for Stimulus {
    // The label expected by the external fitter
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stimulus::WedgeRing => write!(f, "wedge_ring"),
            Stimulus::Multibar  => write!(f, "multibar"),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct ScanParams {
    /// Repetition time in seconds
    #[serde(rename = "TR")]
    pub tr: f64,
    /// Number of volumes per run
    pub dynamics: u32,
}

fn default_scan_params() -> BTreeMap<String, ScanParams> {
    BTreeMap::from([
        ("retinotopy".to_string(),   ScanParams { tr: 2.0, dynamics: 150 }),
        ("restingState".to_string(), ScanParams { tr: 2.0, dynamics: 60 }),
    ])
}

// ---------------------------------------------------------------------------
// retmap.toml

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)] pub docker: Docker,
    #[serde(default)] pub resources: Resources,
    #[serde(default)] pub registration: Registration,
    #[serde(default)] pub analysis: Analysis,
    #[serde(default)] pub prf: Prf,
    #[serde(default)] pub stats: Stats,
    #[serde(default)] pub quirks: Quirks,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Docker {
    #[serde(default = "default_mriqc_version")]
    pub mriqc_version: String,
    #[serde(default = "default_fmriprep_version")]
    pub fmriprep_version: String,
    #[serde(default = "default_neuropythy_image")]
    pub neuropythy_image: String,
    /// --memory for containerized tools, in GB
    #[serde(default = "default_memory_gb")]
    pub memory_gb: u32,
    /// --memory-swap for fMRIPrep, in GB
    #[serde(default = "default_memory_swap_gb")]
    pub memory_swap_gb: u32,
}

fn default_mriqc_version()    -> String { "22.0.6".into() }
fn default_fmriprep_version() -> String { "23.2.3".into() }
fn default_neuropythy_image() -> String { "nben/neuropythy".into() }
fn default_memory_gb()        -> u32 { 32 }
fn default_memory_swap_gb()   -> u32 { 64 }

impl Default for Docker {
    fn default() -> Self {
        Self {
            mriqc_version: default_mriqc_version(),
            fmriprep_version: default_fmriprep_version(),
            neuropythy_image: default_neuropythy_image(),
            memory_gb: default_memory_gb(),
            memory_swap_gb: default_memory_swap_gb(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    /// Worker-count hint passed to containerized batch tools
    #[serde(default = "default_nprocs")]
    pub nprocs: usize,
    #[serde(default = "default_mem_mb")]
    pub mem_mb: u32,
}

fn default_nprocs() -> usize { 16 }
fn default_mem_mb() -> u32 { 64000 }

impl Default for Resources {
    fn default() -> Self {
        Self { nprocs: default_nprocs(), mem_mb: default_mem_mb() }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Registration {
    /// Some subjects do better with the freesurfer method
    #[serde(default)]
    pub method: RegMethod,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegMethod {
    #[default]
    Fsl,
    Freesurfer,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Analysis {
    /// Anterior cutoff of the analysed volume: `[y0, ylen]` voxels kept
    #[serde(default = "default_y_window")]
    pub y_window: [i32; 2],
    /// High-pass filter sigma (volumes) for run detrending
    #[serde(default = "default_highpass_sigma")]
    pub highpass_sigma: f64,
    /// Export every Nth anatomical slice for participant hand-outs
    #[serde(default = "default_slice_interval")]
    pub slice_interval: usize,
    /// Where hand-out slice renders go; omit to skip the export
    #[serde(default)]
    pub handout_dir: Option<PathBuf>,
}

fn default_y_window()       -> [i32; 2] { [0, 33] }
fn default_highpass_sigma() -> f64 { 60.0 }
fn default_slice_interval() -> usize { 4 }

impl Default for Analysis {
    fn default() -> Self {
        Self {
            y_window: default_y_window(),
            highpass_sigma: default_highpass_sigma(),
            slice_interval: default_slice_interval(),
            handout_dir: None,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Prf {
    /// Directory containing the `analyzePRF_call` entry point
    #[serde(default = "default_call_path")]
    pub call_path: PathBuf,
    /// Toolbox roots added to the matlab path recursively
    #[serde(default)]
    pub toolbox_paths: Vec<PathBuf>,
    #[serde(default = "default_remove_outliers")]
    pub remove_outliers: bool,
}

fn default_call_path() -> PathBuf { "matlab/fMRI".into() }
fn default_remove_outliers() -> bool { true }

impl Default for Prf {
    fn default() -> Self {
        Self {
            call_path: default_call_path(),
            toolbox_paths: vec![],
            remove_outliers: default_remove_outliers(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Stats {
    /// Goodness-of-fit threshold, in percent variance explained
    #[serde(default = "default_r2_threshold")]
    pub r2_threshold: f64,
    #[serde(default = "default_min_eccentricity")]
    pub min_eccentricity: f64,
    /// Mapping-paradigm eccentricity extent, degrees
    #[serde(default = "default_prf_eccentricity")]
    pub prf_eccentricity: f64,
    /// Physical stimulus eccentricity extent, degrees
    #[serde(default = "default_stim_eccentricity")]
    pub stim_eccentricity: f64,
    /// Namespace of manually traced labels: `{hemi}.{set}.V1.label`
    #[serde(default = "default_label_set")]
    pub label_set: String,
}

fn default_r2_threshold()     -> f64 { 50.0 }
fn default_min_eccentricity() -> f64 { 0.5 }
fn default_prf_eccentricity() -> f64 { 7.0 }
fn default_stim_eccentricity()-> f64 { 4.5 }
fn default_label_set()        -> String { "manual".into() }

impl Default for Stats {
    fn default() -> Self {
        Self {
            r2_threshold: default_r2_threshold(),
            min_eccentricity: default_min_eccentricity(),
            prf_eccentricity: default_prf_eccentricity(),
            stim_eccentricity: default_stim_eccentricity(),
            label_set: default_label_set(),
        }
    }
}

/// Site-specific per-subject exceptions that the original scripts hard-coded
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Quirks {
    /// Subject -> anatomical sidecar to reuse when a session has no anat scan
    #[serde(default)]
    pub anat_fallbacks: BTreeMap<String, PathBuf>,
    /// Directories searched (most recent wins) for a reusable anatomical
    #[serde(default)]
    pub anat_search_dirs: Vec<PathBuf>,
    /// Subject -> `[zmin, zsize]` crop for oversized funcNoEPI acquisitions
    #[serde(default)]
    pub func_no_epi_trim: BTreeMap<String, [usize; 2]>,
}

// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Config {
    pub layout: Layout,
    pub roster: Roster,
    pub scan_params: BTreeMap<String, ScanParams>,
    pub settings: Settings,
}

impl Config {

    /// Load the full run configuration for a project directory.
    ///
    /// `participants.json` is required; `scan_params.json` and `retmap.toml`
    /// fall back to compiled-in defaults. `SUBJECTS_DIR` and `FSLDIR` must
    /// be set in the environment.
    pub fn load(project_dir: &Path) -> Res<Config> {
        let subjects_dir = env_dir("SUBJECTS_DIR")?;
        let fsl_dir = env_dir("FSLDIR")?;
        let layout = Layout {
            project: project_dir.to_path_buf(),
            subjects_dir,
            fsl_dir,
        };

        let participants = project_dir.join("participants.json");
        let roster: Roster = serde_json::from_str(
            &fs::read_to_string(&participants)
                .map_err(|e| format!("cannot read {}: {e}", participants.display()))?
        )?;

        let scan_params = match fs::read_to_string(project_dir.join("scan_params.json")) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(_)   => default_scan_params(),
        };

        let settings = match fs::read_to_string(project_dir.join("retmap.toml")) {
            Ok(text) => toml::from_str(&text)?,
            Err(_)   => Settings::default(),
        };

        Ok(Config { layout, roster, scan_params, settings })
    }

    /// Repetition time for a task, in seconds
    pub fn tr(&self, task: &str) -> Option<f64> {
        self.scan_params.get(task).map(|p| p.tr)
    }
}

fn env_dir(var: &str) -> Res<PathBuf> {
    std::env::var_os(var)
        .map(PathBuf::from)
        .ok_or_else(|| format!("environment variable {var} is not set").into())
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    const PARTICIPANTS: &str = r#"{
        "F019": {
            "ses-7T1": {
                "sessID": "341844.06.01",
                "anat": 3,
                "func": {"retinotopy": [5, 7, 9]},
                "fmap": {"funcNoEPI": 13},
                "stim": "multibar"
            }
        },
        "M015": {
            "ses-3T1": {
                "sessID": "352101.02.01",
                "anat": null,
                "func": {"retinotopy": [4, 6]},
                "fmap": {"b0": 11}
            }
        }
    }"#;

    #[test]
    fn parses_roster() {
        let roster: Roster = serde_json::from_str(PARTICIPANTS).unwrap();
        let f019 = &roster["F019"]["ses-7T1"];
        assert_eq!(f019.sess_id, "341844.06.01");
        assert_eq!(f019.anat, Some(3));
        assert_eq!(f019.func["retinotopy"], vec![5, 7, 9]);
        assert_eq!(f019.fmap.func_no_epi, Some(13));
        assert_eq!(f019.fmap.b0, None);
        assert_eq!(f019.stim, Stimulus::Multibar);

        let m015 = &roster["M015"]["ses-3T1"];
        assert_eq!(m015.anat, None);
        assert_eq!(m015.stim, Stimulus::WedgeRing);
        assert_eq!(m015.fmap.b0, Some(11));
    }

    #[test]
    fn scan_param_defaults() {
        let params = default_scan_params();
        assert_eq!(params["retinotopy"].dynamics, 150);
        assert_eq!(params["restingState"].dynamics, 60);
        float_eq::assert_float_eq!(params["retinotopy"].tr, 2.0, ulps <= 1);
    }

    #[test]
    fn settings_defaults_and_overrides() {
        let s: Settings = toml::from_str("").unwrap();
        assert_eq!(s.docker.mriqc_version, "22.0.6");
        assert_eq!(s.analysis.y_window, [0, 33]);
        assert_eq!(s.registration.method, RegMethod::Fsl);

        let s: Settings = toml::from_str(r#"
            [registration]
            method = "freesurfer"

            [quirks]
            anat_fallbacks = { F013 = "sourcedata/sub-F013/ses-anat/T1w.json" }
            func_no_epi_trim = { F019 = [4, 38] }
        "#).unwrap();
        assert_eq!(s.registration.method, RegMethod::Freesurfer);
        assert_eq!(s.quirks.func_no_epi_trim["F019"], [4, 38]);
        assert_eq!(s.quirks.anat_fallbacks["F013"],
                   PathBuf::from("sourcedata/sub-F013/ses-anat/T1w.json"));
    }
}
