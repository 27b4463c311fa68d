//! Two-pass bounded image decoding.
//!
//! Pass one reads only the header to learn the original dimensions, pass
//! two decodes and downscales by a power-of-two subsample factor so a
//! thumbnail request never allocates a full-resolution buffer.

use std::io::Cursor;

use image::ImageReader;
use tracing::trace;

use crate::domain::entities::DecodedImage;
use crate::domain::errors::{LoadError, LoadResult};

/// Computes the power-of-two subsample factor for a decode.
///
/// Returns the largest power of two such that half the original dimensions
/// divided by the factor still cover the requested dimensions, i.e.
/// `(width / 2) / factor >= req_width && (height / 2) / factor >= req_height`.
/// A zero requested width or height disables downsampling entirely.
#[must_use]
pub fn subsample_factor(width: u32, height: u32, req_width: u32, req_height: u32) -> u32 {
    if req_width == 0 || req_height == 0 {
        return 1;
    }

    let mut factor = 1u32;
    if width > req_width || height > req_height {
        let half_width = width / 2;
        let half_height = height / 2;
        while half_width / (factor * 2) >= req_width && half_height / (factor * 2) >= req_height {
            factor *= 2;
        }
    }
    factor
}

/// Decodes raw bytes into an image bounded by the requested dimensions.
///
/// # Errors
/// Returns [`LoadError::DecodeFailed`] when the bytes are not a valid
/// image in a supported format.
pub fn decode_bounded(bytes: &[u8], req_width: u32, req_height: u32) -> LoadResult<DecodedImage> {
    // Pass 1: header only, no pixel allocation.
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| LoadError::decode(format!("unrecognized image format: {e}")))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| LoadError::decode(format!("failed to read dimensions: {e}")))?;

    let factor = subsample_factor(width, height, req_width, req_height);
    trace!(
        width = width,
        height = height,
        req_width = req_width,
        req_height = req_height,
        factor = factor,
        "Computed subsample factor"
    );

    // Pass 2: full decode, then downscale when a factor applies.
    let decoded = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| LoadError::decode(format!("unrecognized image format: {e}")))?
        .decode()
        .map_err(|e| LoadError::decode(format!("failed to decode image: {e}")))?;

    let bounded = if factor > 1 {
        decoded.resize_exact(
            width / factor,
            height / factor,
            image::imageops::FilterType::Triangle,
        )
    } else {
        decoded
    };

    Ok(DecodedImage::new(bounded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test_case(1000, 1000, 100, 100 => 4; "thumbnail of a large square")]
    #[test_case(1000, 1000, 0, 100 => 1; "zero requested width")]
    #[test_case(1000, 1000, 100, 0 => 1; "zero requested height")]
    #[test_case(100, 100, 200, 200 => 1; "original already small enough")]
    #[test_case(1000, 1000, 400, 400 => 1; "half dimension below request")]
    #[test_case(800, 600, 100, 100 => 2; "landscape limited by height")]
    #[test_case(4096, 4096, 64, 64 => 32; "deep downsample")]
    fn subsample(width: u32, height: u32, req_width: u32, req_height: u32) -> u32 {
        subsample_factor(width, height, req_width, req_height)
    }

    #[test]
    fn test_decode_applies_factor() {
        let bytes = png_bytes(1000, 1000);
        let img = decode_bounded(&bytes, 100, 100).unwrap();
        // Factor 4: 1000/4 on both axes.
        assert_eq!(img.width(), 250);
        assert_eq!(img.height(), 250);
    }

    #[test]
    fn test_decode_zero_request_keeps_full_size() {
        let bytes = png_bytes(64, 48);
        let img = decode_bounded(&bytes, 0, 0).unwrap();
        assert_eq!(img.width(), 64);
        assert_eq!(img.height(), 48);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = decode_bounded(b"definitely not an image", 10, 10);
        assert!(matches!(result, Err(LoadError::DecodeFailed { .. })));
    }
}
