//! Image pipeline: lossless recompression.

use std::io::Cursor;
use std::path::Path;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageFormat};

use crate::error::TransformError;
use crate::manifest::BuildMode;
use crate::transform::{read_source, OutputUnit, SourceUnit, Transform};

fn is_png(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("png"))
        .unwrap_or(false)
}

/// Re-encode a PNG at maximum compression; keeps whichever is smaller
pub fn recompress_png(bytes: &[u8], input: &Path) -> Result<Vec<u8>, TransformError> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png).map_err(|source| {
        TransformError::Image {
            input: input.to_path_buf(),
            source,
        }
    })?;

    let mut encoded = Vec::new();
    PngEncoder::new_with_quality(
        Cursor::new(&mut encoded),
        CompressionType::Best,
        FilterType::Adaptive,
    )
    .write_image(
        decoded.as_bytes(),
        decoded.width(),
        decoded.height(),
        decoded.color(),
    )
    .map_err(|source| TransformError::Image {
        input: input.to_path_buf(),
        source,
    })?;

    if encoded.len() < bytes.len() {
        Ok(encoded)
    } else {
        Ok(bytes.to_vec())
    }
}

/// Image adapter. Formats other than PNG are copied unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTransform;

impl Transform for ImageTransform {
    fn apply(&self, units: &[SourceUnit], _mode: BuildMode) -> Result<Vec<OutputUnit>, TransformError> {
        units
            .iter()
            .map(|unit| {
                let bytes = read_source(unit)?;
                let contents = if is_png(&unit.path) {
                    recompress_png(&bytes, &unit.path)?
                } else {
                    bytes
                };
                Ok(OutputUnit {
                    relative: unit.relative.clone(),
                    contents,
                })
            })
            .collect()
    }
}
