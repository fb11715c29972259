use std::error::Error;

use float_eq::assert_float_eq;
use ndarray::Array3;
use nifti::writer::WriterOptions;

use retmap::image;
use retmap::surfaces::{flip_polar_angle, reflect_polar_angle};

// The wraparound correction applied to volumes on disk: every analysed voxel
// ends up at (-a + 540) mod 360, everything outside the mask at zero.
#[test]
fn wraparound_correction_on_disk() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let angle_path = dir.path().join("polar_angle.nii");
    let roi_path = dir.path().join("mask_analyzed.nii.gz");
    let out = dir.path().join("polar_angle_flip.nii.gz");

    let angles = Array3::from_shape_fn((8, 8, 4), |(i, j, k)| ((i * 45 + j * 3 + k) % 360) as f32);
    WriterOptions::new(&angle_path).write_nifti(&angles)?;

    // anterior half of the volume masked out
    let roi = Array3::from_shape_fn((8, 8, 4), |(_, j, _)| if j < 4 { 1.0f32 } else { 0.0 });
    WriterOptions::new(&roi_path).write_nifti(&roi)?;

    flip_polar_angle(&angle_path, &roi_path, &out)?;

    let flipped = image::load(&out)?.data;
    assert_eq!(flipped.shape(), angles.shape());
    for ((&got, &a), &r) in flipped.iter().zip(angles.iter()).zip(roi.iter()) {
        assert_float_eq!(got, reflect_polar_angle(a) * r, abs <= 1e-3);
    }
    Ok(())
}
