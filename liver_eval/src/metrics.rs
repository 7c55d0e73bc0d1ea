use serde::Serialize;
use std::collections::BTreeMap;

/// IoU thresholds 0.50, 0.55, ..., 0.95.
pub const COCO_IOU_THRESHOLDS: [f32; 10] = [0.5, 0.55, 0.6, 0.65, 0.7, 0.75, 0.8, 0.85, 0.9, 0.95];

const RECALL_POINTS: usize = 101;

/// Intersection over union of two `[x1, y1, x2, y2]` boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let width = (a[2].min(b[2]) - a[0].max(b[0])).max(0.);
    let height = (a[3].min(b[3]) - a[1].max(b[1])).max(0.);
    let intersection = width * height;

    let area_a = (a[2] - a[0]).max(0.) * (a[3] - a[1]).max(0.);
    let area_b = (b[2] - b[0]).max(0.) * (b[3] - b[1]).max(0.);
    let union = area_a + area_b - intersection;

    if union <= 0. {
        0.
    } else {
        intersection / union
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredBox {
    pub image_index: usize,
    pub score: f32,
    pub bbox: [f32; 4],
}

/// Average precision of one class, COCO style: detections are matched greedily
/// by descending score to the best unmatched ground truth in the same image, and
/// the precision envelope is sampled at 101 recall points.
///
/// `ground_truth[i]` holds the boxes of image `i`. Returns `None` when the class
/// has no ground truth at all.
pub fn average_precision(
    detections: &[ScoredBox],
    ground_truth: &[Vec<[f32; 4]>],
    iou_threshold: f32,
) -> Option<f32> {
    let total_ground_truth: usize = ground_truth.iter().map(Vec::len).sum();
    if total_ground_truth == 0 {
        return None;
    }

    let mut ranked: Vec<&ScoredBox> = detections.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut matched: Vec<Vec<bool>> = ground_truth.iter().map(|g| vec![false; g.len()]).collect();
    let mut true_positives = 0usize;
    let mut precisions = Vec::with_capacity(ranked.len());
    let mut recalls = Vec::with_capacity(ranked.len());

    for (rank, detection) in ranked.iter().enumerate() {
        let image_boxes = ground_truth
            .get(detection.image_index)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let best = image_boxes
            .iter()
            .enumerate()
            .filter(|(j, _)| !matched[detection.image_index][*j])
            .map(|(j, gt)| (j, iou(&detection.bbox, gt)))
            .filter(|(_, overlap)| *overlap >= iou_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((j, _)) = best {
            matched[detection.image_index][j] = true;
            true_positives += 1;
        }

        precisions.push(true_positives as f32 / (rank + 1) as f32);
        recalls.push(true_positives as f32 / total_ground_truth as f32);
    }

    for i in (0..precisions.len().saturating_sub(1)).rev() {
        precisions[i] = precisions[i].max(precisions[i + 1]);
    }

    let sum: f32 = (0..RECALL_POINTS)
        .map(|i| {
            let recall_level = i as f32 / (RECALL_POINTS - 1) as f32;
            recalls
                .iter()
                .position(|r| *r >= recall_level)
                .map(|k| precisions[k])
                .unwrap_or(0.)
        })
        .sum();

    Some(sum / RECALL_POINTS as f32)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClassAp {
    pub class_name: String,
    pub num_ground_truth: usize,
    pub num_detections: usize,
    #[serde(rename = "AP50")]
    pub ap50: f32,
    #[serde(rename = "AP75")]
    pub ap75: f32,
    #[serde(rename = "AP")]
    pub ap: f32,
}

impl ClassAp {
    /// AP at 0.50, 0.75 and averaged over [`COCO_IOU_THRESHOLDS`], all in percent.
    pub fn evaluate(
        class_name: &str,
        detections: &[ScoredBox],
        ground_truth: &[Vec<[f32; 4]>],
    ) -> Option<Self> {
        let ap_at = |t: f32| average_precision(detections, ground_truth, t).map(|ap| ap * 100.);
        let ap50 = ap_at(0.5)?;
        let ap75 = ap_at(0.75)?;
        let ap = COCO_IOU_THRESHOLDS
            .iter()
            .filter_map(|t| ap_at(*t))
            .sum::<f32>()
            / COCO_IOU_THRESHOLDS.len() as f32;

        Some(Self {
            class_name: class_name.to_string(),
            num_ground_truth: ground_truth.iter().map(Vec::len).sum(),
            num_detections: detections.len(),
            ap50,
            ap75,
            ap,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub species: String,
    pub num_images: usize,
    #[serde(rename = "AP50")]
    pub ap50: f32,
    #[serde(rename = "AP75")]
    pub ap75: f32,
    #[serde(rename = "AP")]
    pub ap: f32,
    pub per_class: Vec<ClassAp>,
}

impl DetectionReport {
    /// Means over the classes that have ground truth; classes without any are left out.
    pub fn new(species: &str, num_images: usize, per_class: Vec<ClassAp>) -> Self {
        let mean = |f: fn(&ClassAp) -> f32| {
            if per_class.is_empty() {
                0.
            } else {
                per_class.iter().map(f).sum::<f32>() / per_class.len() as f32
            }
        };
        Self {
            species: species.to_string(),
            num_images,
            ap50: mean(|c| c.ap50),
            ap75: mean(|c| c.ap75),
            ap: mean(|c| c.ap),
            per_class,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LabelScores {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: usize,
}

/// Per-label precision/recall/F1 with accuracy and macro/weighted averages.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationReport {
    #[serde(flatten)]
    pub per_label: BTreeMap<String, LabelScores>,
    pub accuracy: f64,
    #[serde(rename = "macro avg")]
    pub macro_avg: LabelScores,
    #[serde(rename = "weighted avg")]
    pub weighted_avg: LabelScores,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ClassificationReport {
    /// `labels` are the reported classes; predictions outside them (such as an
    /// unknown label) still count as misses for accuracy and recall.
    pub fn new<S: AsRef<str>>(labels: &[&str], y_true: &[S], y_pred: &[S]) -> Self {
        let pairs: Vec<(&str, &str)> = y_true
            .iter()
            .zip(y_pred)
            .map(|(t, p)| (t.as_ref(), p.as_ref()))
            .collect();

        let per_label: BTreeMap<String, LabelScores> = labels
            .iter()
            .map(|label| {
                let tp = pairs.iter().filter(|(t, p)| t == label && p == label).count();
                let predicted = pairs.iter().filter(|(_, p)| p == label).count();
                let support = pairs.iter().filter(|(t, _)| t == label).count();
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1_score = if precision + recall > 0. {
                    2. * precision * recall / (precision + recall)
                } else {
                    0.
                };
                (
                    label.to_string(),
                    LabelScores {
                        precision,
                        recall,
                        f1_score,
                        support,
                    },
                )
            })
            .collect();

        let correct = pairs.iter().filter(|(t, p)| t == p).count();
        let total_support: usize = per_label.values().map(|s| s.support).sum();
        let n = per_label.len().max(1) as f64;

        let macro_avg = LabelScores {
            precision: per_label.values().map(|s| s.precision).sum::<f64>() / n,
            recall: per_label.values().map(|s| s.recall).sum::<f64>() / n,
            f1_score: per_label.values().map(|s| s.f1_score).sum::<f64>() / n,
            support: total_support,
        };
        let weighted = |f: fn(&LabelScores) -> f64| {
            if total_support == 0 {
                0.
            } else {
                per_label
                    .values()
                    .map(|s| f(s) * s.support as f64)
                    .sum::<f64>()
                    / total_support as f64
            }
        };
        let weighted_avg = LabelScores {
            precision: weighted(|s| s.precision),
            recall: weighted(|s| s.recall),
            f1_score: weighted(|s| s.f1_score),
            support: total_support,
        };

        Self {
            per_label,
            accuracy: ratio(correct, pairs.len()),
            macro_avg,
            weighted_avg,
        }
    }
}
