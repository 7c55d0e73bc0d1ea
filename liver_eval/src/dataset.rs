use liver_detection::species::SpeciesProfile;
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruthBox {
    pub class_id: usize,
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone)]
pub struct GroundTruthImage {
    pub path: PathBuf,
    pub boxes: Vec<GroundTruthBox>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, DatasetError> {
    let text = fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| DatasetError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn class_index(profile: &SpeciesProfile, name: &str) -> Option<usize> {
    profile.class_names().iter().position(|c| c == name)
}

#[derive(Deserialize)]
struct CocoFile {
    images: Vec<CocoImage>,
    #[serde(default)]
    annotations: Vec<CocoAnnotation>,
    categories: Vec<CocoCategory>,
}

#[derive(Deserialize)]
struct CocoImage {
    id: u64,
    file_name: String,
}

#[derive(Deserialize)]
struct CocoAnnotation {
    image_id: u64,
    category_id: u64,
    bbox: [f32; 4],
    #[serde(default)]
    iscrowd: u8,
}

#[derive(Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,
}

/// Reads `annotations.json` and `images/` from a COCO split. Categories are matched
/// to the species class table by name; unmatched categories and crowd regions are ignored.
pub fn load_coco(
    dataset_dir: &Path,
    profile: &SpeciesProfile,
) -> Result<Vec<GroundTruthImage>, DatasetError> {
    let coco: CocoFile = read_json(&dataset_dir.join("annotations.json"))?;
    let images_dir = dataset_dir.join("images");

    let categories: HashMap<u64, usize> = coco
        .categories
        .iter()
        .filter_map(|c| match class_index(profile, &c.name) {
            Some(index) => Some((c.id, index)),
            None => {
                tracing::warn!("Ignoring COCO category `{}` not in the class table", c.name);
                None
            }
        })
        .collect();

    let mut boxes: HashMap<u64, Vec<GroundTruthBox>> = HashMap::new();
    for annotation in coco.annotations.iter().filter(|a| a.iscrowd == 0) {
        let Some(&class_id) = categories.get(&annotation.category_id) else {
            continue;
        };
        let [x, y, w, h] = annotation.bbox;
        boxes
            .entry(annotation.image_id)
            .or_default()
            .push(GroundTruthBox {
                class_id,
                bbox: [x, y, x + w, y + h],
            });
    }

    Ok(coco
        .images
        .into_iter()
        .map(|image| GroundTruthImage {
            path: images_dir.join(&image.file_name),
            boxes: boxes.remove(&image.id).unwrap_or_default(),
        })
        .collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelmeFile {
    image_path: String,
    shapes: Vec<LabelmeShape>,
}

#[derive(Deserialize)]
struct LabelmeShape {
    label: String,
    points: Vec<[f32; 2]>,
}

/// Reads `annotations/*.json` and `images/` from a LabelMe split. Each shape becomes
/// the bounding box of its points; unknown labels are dropped, and images that end up
/// with no boxes or whose file is missing are skipped.
pub fn load_labelme(
    dataset_dir: &Path,
    profile: &SpeciesProfile,
) -> Result<Vec<GroundTruthImage>, DatasetError> {
    let images_dir = dataset_dir.join("images");
    let annotations_dir = dataset_dir.join("annotations");

    let entries = fs::read_dir(&annotations_dir).map_err(|source| DatasetError::Io {
        path: annotations_dir.clone(),
        source,
    })?;
    let mut annotation_files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    annotation_files.sort();

    let mut images = Vec::new();
    for annotation_file in annotation_files {
        let labelme: LabelmeFile = read_json(&annotation_file)?;

        // Only the file name is trusted; LabelMe stores paths relative to wherever it ran.
        let file_name = Path::new(&labelme.image_path.replace('\\', "/"))
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default();
        let image_path = images_dir.join(file_name);
        if !image_path.is_file() {
            tracing::warn!("Image not found: {:?}", image_path);
            continue;
        }

        let boxes: Vec<GroundTruthBox> = labelme
            .shapes
            .iter()
            .filter_map(|shape| {
                let class_id = class_index(profile, &shape.label)?;
                points_to_bbox(&shape.points).map(|bbox| GroundTruthBox { class_id, bbox })
            })
            .collect();

        if !boxes.is_empty() {
            images.push(GroundTruthImage {
                path: image_path,
                boxes,
            });
        }
    }

    Ok(images)
}

fn points_to_bbox(points: &[[f32; 2]]) -> Option<[f32; 4]> {
    let first = points.first()?;
    let init = [first[0], first[1], first[0], first[1]];
    Some(points.iter().fold(init, |[x1, y1, x2, y2], [x, y]| {
        [x1.min(*x), y1.min(*y), x2.max(*x), y2.max(*y)]
    }))
}
