//! Single-slice DICOM reading on top of the dicom-rs ecosystem.
//!
//! Restoration datasets store one image per file. This crate reads such a
//! file and hands back the first frame as a `(height, width)` array of `f32`
//! values, leaving DICOM tag semantics to dicom-rs.

use anyhow::{ensure, Context as _, Result};
use dicom_object::open_file;
use dicom_pixeldata::PixelDecoder as _;
use ndarray::Array2;
use std::path::Path;

/// Read the first frame of a DICOM file as a `(height, width)` `f32` array.
///
/// Fails on unreadable files, undecodable pixel data, and non-monochrome
/// images.
pub fn read_slice(path: impl AsRef<Path>) -> Result<Array2<f32>> {
    let path = path.as_ref();

    let object = open_file(path)
        .with_context(|| format!("failed to read DICOM file '{}'", path.display()))?;
    let pixel_data = object
        .decode_pixel_data()
        .with_context(|| format!("failed to decode pixel data of '{}'", path.display()))?;

    let rows = pixel_data.rows() as usize;
    let columns = pixel_data.columns() as usize;
    ensure!(
        rows > 0 && columns > 0,
        "'{}' has an empty pixel matrix",
        path.display()
    );
    ensure!(
        pixel_data.samples_per_pixel() == 1,
        "'{}' is not monochrome: {} samples per pixel",
        path.display(),
        pixel_data.samples_per_pixel()
    );

    let values: Vec<f32> = pixel_data
        .to_vec()
        .with_context(|| format!("failed to convert pixel data of '{}'", path.display()))?;
    ensure!(
        values.len() >= rows * columns,
        "'{}' pixel buffer is too short: {} values for a {}x{} frame",
        path.display(),
        values.len(),
        rows,
        columns
    );

    // multi-frame files contribute their first frame only
    let frame = values[..rows * columns].to_vec();
    let slice = Array2::from_shape_vec((rows, columns), frame)?;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_error() {
        let err = read_slice("/nonexistent/slice.dcm").unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("/nonexistent/slice.dcm"), "got: {}", msg);
    }
}
