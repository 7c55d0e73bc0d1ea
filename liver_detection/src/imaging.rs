use image::RgbImage;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageDecodeError {
    #[error("Error reading image: {0}")]
    Read(#[from] std::io::Error),
    #[error("Error decoding image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decodes uploaded bytes into an RGB image, guessing the format from content.
pub fn decode_rgb(image_data: &[u8]) -> Result<RgbImage, ImageDecodeError> {
    let image = image::ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()?
        .decode()?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
pub(crate) fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut image_data: Vec<u8> = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
        .unwrap();
    image_data
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_decode_png() {
        let img = RgbImage::from_pixel(100, 80, Rgb([255, 0, 0]));
        let decoded = decode_rgb(&encode_png(&img)).unwrap();

        assert_eq!(decoded.dimensions(), (100, 80));
        assert_eq!(decoded.get_pixel(3, 3), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_rgb(&[0u8; 100]).is_err());
    }
}
