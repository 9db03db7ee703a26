use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{ServingError, ServingResult};
use crate::ml::normalizer::normalize;
use crate::ml::registry::ModelRegistry;
use crate::types::Prediction;

pub const DECISION_THRESHOLD: f64 = 0.5;

pub struct Predictor {
    registry: Arc<ModelRegistry>,
}

impl Predictor {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Resolve, normalize, score. Errors from each stage propagate unchanged; nothing is retried.
    pub fn predict(
        &self,
        payload: &Map<String, Value>,
        model_name: Option<&str>,
    ) -> ServingResult<Prediction> {
        let model = self.registry.get_model(model_name)?;
        let features = normalize(payload, self.registry.get_feature_order()?)?;

        let raw = model.scorer().predict_proba(&features)?;
        if !raw.is_finite() {
            return Err(ServingError::inference(format!(
                "model {} returned a non-finite score",
                model.name
            )));
        }
        // The class is derived from the probability actually returned.
        let probability = round4(raw.clamp(0.0, 1.0));

        Ok(Prediction {
            prediction: u8::from(probability >= DECISION_THRESHOLD),
            probability,
            model_name: model.name.clone(),
            model_version: model.version().to_string(),
        })
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
