use std::time::Instant;

use image::{ImageError, RgbImage, codecs::jpeg::JpegEncoder};

/// Encode an annotated frame as baseline JPEG.
pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let started = Instant::now();
    let mut buffer = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    metrics::histogram!("signsight_encode_ms").record(started.elapsed().as_secs_f64() * 1000.0);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn output_is_a_jpeg_that_decodes_to_the_same_size() {
        let image = RgbImage::from_pixel(32, 24, Rgb([40, 80, 120]));
        let jpeg = encode_jpeg(&image, 85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }
}
