//! H&E color deconvolution (Ruifrok-Johnston optical-density separation).

use rayon::prelude::*;
use scipathj_types::{ColorDeconvolutionSettings, Dimensions, Image, OpticalDensityChannels};

use crate::error::CoreError;
use crate::stain_matrix::StainMatrix;

/// `deconvolve(Image, stain_matrix) -> OpticalDensityChannels`.
///
/// Requires a 3-channel (RGB), 8-bit-per-channel image. The per-pixel
/// path is six multiply-adds plus three logs; rows are processed in
/// parallel.
///
/// # Errors
/// Returns [`CoreError::WrongChannelCount`] if `image` does not have
/// exactly 3 channels, or [`CoreError::StainMatrixSingular`] if
/// `settings.stain_matrix` is ill-conditioned.
pub fn deconvolve(
    image: &Image,
    settings: &ColorDeconvolutionSettings,
) -> Result<OpticalDensityChannels, CoreError> {
    if image.channels() != 3 {
        return Err(CoreError::WrongChannelCount {
            found: image.channels(),
        });
    }

    let matrix = StainMatrix::from_settings(settings)?;
    let dims = image.dimensions();
    let width = dims.width as usize;
    let height = dims.height as usize;
    let pixel_count = width * height;

    let mut hematoxylin = vec![0.0_f32; pixel_count];
    let mut eosin = vec![0.0_f32; pixel_count];
    let mut background = vec![0.0_f32; pixel_count];

    let samples = image.samples();

    hematoxylin
        .par_chunks_mut(width)
        .zip(eosin.par_chunks_mut(width))
        .zip(background.par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, ((h_row, e_row), bg_row))| {
            let row_start = y * width * 3;
            for x in 0..width {
                let base = row_start + x * 3;
                let r = f64::from(samples[base]);
                let g = f64::from(samples[base + 1]);
                let b = f64::from(samples[base + 2]);
                let od = [optical_density(r), optical_density(g), optical_density(b)];
                let stains = matrix.apply(od);
                h_row[x] = stains[0] as f32;
                e_row[x] = stains[1] as f32;
                bg_row[x] = stains[2] as f32;
            }
        });

    Ok(OpticalDensityChannels::new(
        dims,
        hematoxylin,
        eosin,
        background,
    ))
}

/// `OD = -log10((channel + 1) / 256)`; the `+1` avoids `log(0)`.
fn optical_density(channel: f64) -> f64 {
    -((channel + 1.0) / 256.0).log10()
}

#[must_use]
pub fn output_dimensions(image: &Image) -> Dimensions {
    image.dimensions()
}
