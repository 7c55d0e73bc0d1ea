use crate::species::SpeciesProfile;

/// Detector output before class ids are resolved to names.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: i64,
    pub score: f32,
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionInstance {
    pub class_id: i64,
    pub class_name: String,
    pub score: f32,
    /// `[x1, y1, x2, y2]` in pixel coordinates, always with `x1 <= x2` and `y1 <= y2`.
    pub bbox: [f32; 4],
}

impl DetectionInstance {
    pub fn from_raw(raw: &RawDetection, profile: &SpeciesProfile) -> Self {
        let [ax, ay, bx, by] = raw.bbox;
        Self {
            class_id: raw.class_id,
            class_name: profile.class_name(raw.class_id).to_string(),
            score: raw.score,
            bbox: [ax.min(bx), ay.min(by), ax.max(bx), ay.max(by)],
        }
    }

    pub fn label(&self) -> String {
        format!("{} {:.2}", self.class_name, self.score)
    }

    pub fn pixel_bbox(&self) -> [i32; 4] {
        self.bbox.map(|v| v as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_orders_corners_and_names_class() {
        let profile = SpeciesProfile::new(
            vec!["figado_felino".into(), "processo_papilar_felino".into()],
            vec!["figado_felino".to_string()],
        );
        let raw = RawDetection {
            class_id: 1,
            score: 0.61,
            bbox: [80.0, 12.5, 20.0, 4.0],
        };

        let instance = DetectionInstance::from_raw(&raw, &profile);

        assert_eq!(instance.class_name, "processo_papilar_felino");
        assert_eq!(instance.bbox, [20.0, 4.0, 80.0, 12.5]);
        assert_eq!(instance.pixel_bbox(), [20, 4, 80, 12]);
        assert_eq!(instance.label(), "processo_papilar_felino 0.61");
    }
}
