//! Diagnostic renders: registration mosaics, anatomical slice exports and
//! ortho snapshots. Inspecting these images is the pipeline's error
//! diagnosis mechanism.

use std::fs;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use itertools::{iproduct, Itertools};

use crate::shell::{self, s, Res};

const SLICE_FRACTIONS: [f64; 4] = [0.35, 0.45, 0.55, 0.65];

/// Composite mosaic of two registered volumes: twelve orthogonal slice
/// renders per overlay order, the two orders stacked vertically.
pub fn registration_mosaic(dir: &Path, moved: &Path, target: &Path, out: &Path) -> Res<()> {
    let first = intermediate(out, 1);
    let second = intermediate(out, 2);

    mosaic_row(dir, moved, target, &first)?;
    mosaic_row(dir, target, moved, &second)?;
    shell::run("pngappend", &[s(&first), "-".into(), s(&second), s(out)])?;

    for scratch in [first, second] {
        fs::remove_file(scratch)?;
    }
    Ok(())
}

fn mosaic_row(dir: &Path, under: &Path, over: &Path, out: &Path) -> Res<()> {
    let slices = slice_pngs(dir);

    let mut args = vec![s(under), s(over), "-s".into(), "2".into()];
    for ((axis, frac), png) in iproduct!(["-x", "-y", "-z"], SLICE_FRACTIONS).zip(&slices) {
        args.push(axis.into());
        args.push(format!("{frac}"));
        args.push(s(png));
    }
    shell::run("slicer", &args)?;

    let mut args: Vec<String> = Itertools::intersperse(slices.iter().map(|p| s(p)), "+".into()).collect();
    args.push(s(out));
    shell::run("pngappend", &args)?;

    for scratch in slices {
        fs::remove_file(scratch)?;
    }
    Ok(())
}

fn slice_pngs(dir: &Path) -> Vec<PathBuf> {
    (b'a'..=b'l').map(|c| dir.join(format!("sl{}.png", c as char))).collect()
}

fn intermediate(out: &Path, n: usize) -> PathBuf {
    let stem = out.with_extension("");
    PathBuf::from(format!("{}{n}.png", stem.display()))
}

/// Export every `interval`th slice of an anatomical volume along each axis.
pub fn anat_slices(t1: &Path, outdir: &Path, interval: usize) -> Res<()> {
    println!("creating anatomical images from {}", t1.display());
    fs::create_dir_all(outdir)?;

    let header = nifti::NiftiHeader::from_file(t1)
        .map_err(|e| format!("cannot read header of {}: {e}", t1.display()))?;

    for (axis, label, extent) in [
        ("-x", "X", header.dim[1]),
        ("-y", "Y", header.dim[2]),
        ("-z", "Z", header.dim[3]),
    ] {
        println!("rendering {label} slices");
        let bar = ProgressBar::new(extent as u64);
        for i in 0..extent as usize {
            if i % interval == 0 {
                let png = outdir.join(format!("{label}_{i}.png"));
                // a negative index asks slicer for an absolute slice number
                shell::run("slicer", &[s(t1), axis.into(), format!("-{i}"), s(&png)])?;
            }
            bar.inc(1);
        }
        bar.finish();
    }
    Ok(())
}

/// Ortho-view snapshot of a mask over its reference volume, centred on the
/// mask's centre of gravity, display range taken from the reference.
pub fn ortho_snapshot(out: &Path, reference: &Path, mask: &Path) -> Res<()> {
    let range = shell::capture("fslstats", &[s(reference), "-R".into()])?;
    let ref_max = range.split_whitespace().nth(1)
        .ok_or("fslstats -R returned no range")?
        .to_string();

    let centre = shell::capture("fslstats", &[s(mask), "-C".into()])?;
    let coords: Vec<String> = centre.split_whitespace()
        .take(3)
        .map(|c| c.parse::<f64>().map(|v| (v as i64).to_string()))
        .collect::<Result<_, _>>()?;
    if coords.len() != 3 {
        return Err(format!("fslstats -C returned no coordinates for {}", mask.display()).into());
    }

    let mut args: Vec<String> = vec![
        "render".into(), "--outfile".into(), s(out),
        "--size".into(), "3200".into(), "600".into(),
        "--scene".into(), "ortho".into(), "--autoDisplay".into(),
        "-vl".into(),
    ];
    args.extend(coords);
    args.extend([
        s(reference), "-dr".into(), "0".into(), ref_max,
        s(mask), "-dr".into(), "0".into(), "1".into(), "-cm".into(), "greyscale".into(),
    ]);
    shell::run("fsleyes", &args)
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn twelve_scratch_slices_per_mosaic_row() {
        let pngs = slice_pngs(Path::new("/reg"));
        assert_eq!(pngs.len(), 12);
        assert_eq!(pngs[0], PathBuf::from("/reg/sla.png"));
        assert_eq!(pngs[11], PathBuf::from("/reg/sll.png"));
    }

    #[test]
    fn intermediate_names_follow_the_output_stem() {
        let out = Path::new("/reg/example_func2highres.png");
        assert_eq!(intermediate(out, 1), PathBuf::from("/reg/example_func2highres1.png"));
        assert_eq!(intermediate(out, 2), PathBuf::from("/reg/example_func2highres2.png"));
    }
}
