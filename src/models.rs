use serde::Serialize;
use std::path::{Path, PathBuf};

/// Severity grades reported by the model, in output-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    NoDr,
    Mild,
    Moderate,
    Severe,
    Proliferative,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::NoDr,
        Severity::Mild,
        Severity::Moderate,
        Severity::Severe,
        Severity::Proliferative,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Severity::NoDr => "No DR",
            Severity::Mild => "Mild",
            Severity::Moderate => "Moderate",
            Severity::Severe => "Severe",
            Severity::Proliferative => "Proliferative",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Severity::NoDr => "No signs of diabetic retinopathy detected",
            Severity::Mild => "Mild non-proliferative diabetic retinopathy",
            Severity::Moderate => "Moderate non-proliferative diabetic retinopathy",
            Severity::Severe => "Severe non-proliferative diabetic retinopathy",
            Severity::Proliferative => "Proliferative diabetic retinopathy",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.label() == label)
    }
}

pub const CLASS_LABELS: [&str; 5] = ["No DR", "Mild", "Moderate", "Severe", "Proliferative"];

/// Description for a class label, with a generic fallback for labels outside
/// the known severity set.
pub fn describe_class(label: &str) -> &'static str {
    Severity::from_label(label)
        .map(Severity::description)
        .unwrap_or("Diabetic retinopathy classification")
}

/// Outcome of one inference run, produced by the service layer.
///
/// `graph_path` is the on-disk location of the rendered probability chart.
/// It never reaches a response body as-is; handlers rewrite it into a
/// `/media/graphs/` URL.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    pub scores: Vec<(String, f32)>,
    pub graph_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ApiInfo {
    pub message: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub demo_mode: bool,
}

#[derive(Debug, Serialize)]
pub struct ClassInfo {
    pub name: String,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    pub model_type: &'static str,
    pub input_shape: [u32; 3],
    pub classes: Vec<ClassInfo>,
    pub model_loaded: bool,
    pub demo_mode: bool,
}

#[derive(Debug, Serialize)]
pub struct ClassScore {
    pub label: String,
    pub probability: f32,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    pub predicted_class: String,
    pub description: &'static str,
    pub confidence: f32,
    pub probabilities: Vec<ClassScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_url: Option<String>,
}

impl PredictResponse {
    pub fn from_prediction(prediction: Prediction) -> Self {
        let graph_url = prediction
            .graph_path
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| format!("/media/graphs/{}", name.to_string_lossy()));

        Self {
            success: true,
            description: describe_class(&prediction.label),
            predicted_class: prediction.label,
            confidence: prediction.confidence,
            probabilities: prediction
                .scores
                .into_iter()
                .map(|(label, probability)| ClassScore { label, probability })
                .collect(),
            graph_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_labels_resolve_to_fixed_descriptions() {
        assert_eq!(
            describe_class("No DR"),
            "No signs of diabetic retinopathy detected"
        );
        assert_eq!(
            describe_class("Proliferative"),
            "Proliferative diabetic retinopathy"
        );
    }

    #[test]
    fn unknown_label_falls_back_to_generic_description() {
        assert_eq!(
            describe_class("Glaucoma"),
            "Diabetic retinopathy classification"
        );
    }

    #[test]
    fn labels_and_severities_stay_in_sync() {
        for (severity, label) in Severity::ALL.iter().zip(CLASS_LABELS) {
            assert_eq!(severity.label(), label);
            assert_eq!(Severity::from_label(label), Some(*severity));
        }
    }

    #[test]
    fn graph_path_is_reduced_to_its_filename() {
        let prediction = Prediction {
            label: "Mild".to_string(),
            confidence: 0.8,
            scores: vec![("Mild".to_string(), 0.8)],
            graph_path: Some(PathBuf::from("/srv/app/media/graphs/graph123.png")),
        };
        let response = PredictResponse::from_prediction(prediction);
        assert_eq!(
            response.graph_url.as_deref(),
            Some("/media/graphs/graph123.png")
        );
    }
}
