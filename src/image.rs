//! NIfTI volume I/O.
//!
//! Most volume arithmetic in this pipeline happens in external FSL/FreeSurfer
//! tools; this module covers the few places where it is simpler to touch the
//! voxel data directly (funcNoEPI z-trim, polar-angle wraparound correction,
//! the regression loader).

use std::path::Path;

use ndarray::{ArrayBase, ArrayD, Data, Dimension, RemoveAxis};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::shell::Res;

pub struct Volume {
    pub header: NiftiHeader,
    pub data: ArrayD<f32>,
}

/// Read a `.nii` or `.nii.gz` volume into memory as `f32`.
pub fn load(path: &Path) -> Res<Volume> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let header = obj.header().clone();
    let data = obj.into_volume().into_ndarray::<f32>()?;
    Ok(Volume { header, data })
}

/// Write voxel data under the geometry of a reference header. The output
/// format follows the extension (`.nii` / `.nii.gz`).
pub fn save<S, D>(path: &Path, header: &NiftiHeader, data: &ArrayBase<S, D>) -> Res<()>
where
    S: Data<Elem = f32>,
    D: Dimension + RemoveAxis,
{
    WriterOptions::new(path)
        .reference_header(header)
        .write_nifti(data)
        .map_err(|e| format!("cannot write {}: {e}", path.display()))?;
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};
    use ndarray::Array3;

    #[test]
    fn volume_io_roundtrip() -> Res<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.nii");

        let original = Array3::from_shape_fn((4, 5, 6), |(i, j, k)| (i + 10 * j + 100 * k) as f32);
        WriterOptions::new(&path).write_nifti(&original)?;

        let reloaded = load(&path)?;
        assert_eq!(reloaded.data.shape(), &[4, 5, 6]);
        assert_eq!(reloaded.data.into_dimensionality::<ndarray::Ix3>()?, original);
        Ok(())
    }
}
