use crate::{detection::DetectionInstance, species::Species};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "rejeitado")]
    Rejected,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Ok => "ok",
            PredictionStatus::Rejected => "rejeitado",
        }
    }
}

/// Why a request stopped at a validation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    LowConfidence,
    NoInstances,
    NoLiverClass,
}

impl RejectionReason {
    pub fn message(&self) -> &'static str {
        match self {
            RejectionReason::LowConfidence => "Imagem não parece ser fígado de cão ou gato",
            RejectionReason::NoInstances => "Nenhuma estrutura hepática detectada",
            RejectionReason::NoLiverClass => "Imagem não contém fígado",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::LowConfidence => "low_confidence",
            RejectionReason::NoInstances => "no_instances",
            RejectionReason::NoLiverClass => "no_liver_class",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEntry {
    pub classe: String,
    pub score: f32,
    pub bbox: [i32; 4],
}

impl From<&DetectionInstance> for DetectionEntry {
    fn from(instance: &DetectionInstance) -> Self {
        Self {
            classe: instance.class_name.clone(),
            score: round3(instance.score),
            bbox: instance.pixel_bbox(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum PredictionResponse {
    #[serde(rename = "ok")]
    Accepted {
        especie: Species,
        confidence_especie: f32,
        num_instancias: usize,
        deteccoes: Vec<DetectionEntry>,
        imagem_anotada: String,
    },
    #[serde(rename = "rejeitado")]
    Rejected {
        motivo: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },
}

impl PredictionResponse {
    pub fn accepted(
        species: Species,
        confidence: f32,
        instances: &[DetectionInstance],
        annotated_image: String,
    ) -> Self {
        let deteccoes: Vec<DetectionEntry> = instances.iter().map(DetectionEntry::from).collect();
        PredictionResponse::Accepted {
            especie: species,
            confidence_especie: round3(confidence),
            num_instancias: deteccoes.len(),
            deteccoes,
            imagem_anotada: annotated_image,
        }
    }

    pub fn rejected(reason: RejectionReason, confidence: Option<f32>) -> Self {
        PredictionResponse::Rejected {
            motivo: reason.message().to_string(),
            confidence: confidence.map(round3),
        }
    }

    pub fn status(&self) -> PredictionStatus {
        match self {
            PredictionResponse::Accepted { .. } => PredictionStatus::Ok,
            PredictionResponse::Rejected { .. } => PredictionStatus::Rejected,
        }
    }
}

pub fn round3(value: f32) -> f32 {
    (value * 1000.).round() / 1000.
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepted_json_shape() {
        let instances = [DetectionInstance {
            class_id: 0,
            class_name: "figado_cao".into(),
            score: 0.81234,
            bbox: [10.7, 10.2, 50.9, 50.0],
        }];
        let response = PredictionResponse::accepted(
            Species::Canine,
            0.9,
            &instances,
            "outputs/canino/resultado_1.jpg".into(),
        );

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "ok",
                "especie": "canino",
                "confidence_especie": 0.9f32,
                "num_instancias": 1,
                "deteccoes": [{"classe": "figado_cao", "score": 0.812f32, "bbox": [10, 10, 50, 50]}],
                "imagem_anotada": "outputs/canino/resultado_1.jpg"
            })
        );
    }

    #[test]
    fn test_rejected_json_omits_missing_confidence() {
        let response = PredictionResponse::rejected(RejectionReason::NoInstances, None);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"status": "rejeitado", "motivo": "Nenhuma estrutura hepática detectada"})
        );

        let response = PredictionResponse::rejected(RejectionReason::LowConfidence, Some(0.51234));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["confidence"], json!(0.512f32));
        assert_eq!(response.status(), PredictionStatus::Rejected);
    }
}
