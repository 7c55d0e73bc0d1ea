use crate::{config::AnnotationConfig, detection::DetectionInstance, species::Species};
use ab_glyph::{FontVec, PxScale};
use image::{codecs::jpeg::JpegEncoder, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use uuid::Uuid;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const TEXT_SCALE: f32 = 18.0;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("Failed to load font {path:?}: {reason}")]
    Font { path: PathBuf, reason: String },
    #[error("Failed to write annotated image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode annotated image: {0}")]
    Encode(#[from] image::ImageError),
}

pub struct Annotator {
    output_dir: PathBuf,
    font: Option<FontVec>,
    jpeg_quality: u8,
}

impl Annotator {
    pub fn new(config: &AnnotationConfig) -> Result<Self, AnnotateError> {
        let font = match &config.font_file {
            Some(path) => Some(load_font(path)?),
            None => {
                tracing::warn!("No annotation font configured, labels will not be drawn");
                None
            }
        };

        Ok(Self {
            output_dir: config.output_dir.clone(),
            font,
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        })
    }

    /// Draws every instance onto a copy of `image`, writes it as
    /// `{output_dir}/{species}/resultado_{uuid}.jpg` and returns the path.
    /// An existing file at that path is never overwritten.
    pub fn save(
        &self,
        image: &RgbImage,
        species: Species,
        instances: &[DetectionInstance],
    ) -> Result<PathBuf, AnnotateError> {
        let mut annotated = image.clone();
        self.annotate(&mut annotated, instances);

        let save_dir = self.output_dir.join(species.as_str());
        fs::create_dir_all(&save_dir)?;
        let path = save_dir.join(format!("resultado_{}.jpg", Uuid::new_v4()));
        self.write_jpeg(&annotated, &path)?;

        tracing::debug!("Saved annotated image to {:?}", path);
        Ok(path)
    }

    /// Encodes `image` to a new file at `path`. Fails if anything already exists there.
    pub fn write_jpeg(&self, image: &RgbImage, path: &Path) -> Result<(), AnnotateError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality).encode_image(image)?;
        writer.flush()?;
        Ok(())
    }

    pub fn annotate(&self, image: &mut RgbImage, instances: &[DetectionInstance]) {
        for instance in instances {
            let [x1, y1, x2, y2] = instance.pixel_bbox();

            for inset in 0..BOX_THICKNESS {
                let width = (x2 - x1 - 2 * inset).max(1) as u32;
                let height = (y2 - y1 - 2 * inset).max(1) as u32;
                draw_hollow_rect_mut(
                    image,
                    Rect::at(x1 + inset, y1 + inset).of_size(width, height),
                    BOX_COLOR,
                );
            }

            if let Some(font) = &self.font {
                let text_y = (y1 - 10 - TEXT_SCALE as i32).max(0);
                draw_text_mut(
                    image,
                    BOX_COLOR,
                    x1,
                    text_y,
                    PxScale::from(TEXT_SCALE),
                    font,
                    &instance.label(),
                );
            }
        }
    }
}

fn load_font(path: &Path) -> Result<FontVec, AnnotateError> {
    let bytes = fs::read(path).map_err(|e| AnnotateError::Font {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    FontVec::try_from_vec(bytes).map_err(|e| AnnotateError::Font {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotator(output_dir: &Path) -> Annotator {
        Annotator::new(&AnnotationConfig {
            output_dir: output_dir.to_path_buf(),
            font_file: None,
            jpeg_quality: 90,
        })
        .unwrap()
    }

    fn instance(bbox: [f32; 4]) -> DetectionInstance {
        DetectionInstance {
            class_id: 0,
            class_name: "figado_cao".into(),
            score: 0.8,
            bbox,
        }
    }

    #[test]
    fn test_annotate_draws_box_outline() {
        let dir = tempfile::tempdir().unwrap();
        let annotator = annotator(dir.path());
        let mut image = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));

        annotator.annotate(&mut image, &[instance([10., 10., 50., 50.])]);

        assert_eq!(image.get_pixel(10, 30), &BOX_COLOR);
        assert_eq!(image.get_pixel(11, 30), &BOX_COLOR);
        assert_eq!(image.get_pixel(30, 30), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_save_writes_unique_jpegs_per_species() {
        let dir = tempfile::tempdir().unwrap();
        let annotator = annotator(dir.path());
        let image = RgbImage::from_pixel(64, 64, Rgb([40, 40, 40]));
        let instances = [instance([10., 10., 50., 50.])];

        let first = annotator.save(&image, Species::Feline, &instances).unwrap();
        let second = annotator.save(&image, Species::Feline, &instances).unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with(dir.path().join("felino")));
        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("resultado_") && name.ends_with(".jpg"));

        let decoded = image::open(&first).unwrap();
        assert_eq!(decoded.width(), 64);
    }

    #[test]
    fn test_write_jpeg_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let annotator = annotator(dir.path());
        let path = dir.path().join("resultado_existente.jpg");
        fs::write(&path, b"previous result").unwrap();

        let result = annotator.write_jpeg(&RgbImage::new(8, 8), &path);

        match result {
            Err(AnnotateError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::AlreadyExists)
            }
            other => panic!("expected an I/O error, got {:?}", other),
        }
        assert_eq!(fs::read(&path).unwrap(), b"previous result");
    }

    #[test]
    fn test_missing_font_is_an_error() {
        let result = Annotator::new(&AnnotationConfig {
            output_dir: PathBuf::from("outputs"),
            font_file: Some(PathBuf::from("/nonexistent/font.ttf")),
            jpeg_quality: 90,
        });
        assert!(matches!(result, Err(AnnotateError::Font { .. })));
    }
}
