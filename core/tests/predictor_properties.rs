use std::path::PathBuf;
use std::sync::Arc;

use attrition_serving::ml::{ArtifactSource, BuiltinArtifacts, FsArtifacts, ModelRegistry, Predictor};
use attrition_serving::types::TravelFrequency;
use serde_json::{json, Map, Value};

fn shipped_artifacts() -> Arc<dyn ArtifactSource> {
    Arc::new(FsArtifacts::new(
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("artifacts"),
    ))
}

fn payload(age: i64, income: f64, tenure: i64, travel: TravelFrequency) -> Map<String, Value> {
    json!({
        "age": age,
        "revenu_mensuel": income,
        "annees_dans_l_entreprise": tenure,
        "frequence_deplacement": travel.as_str(),
    })
    .as_object()
    .cloned()
    .expect("object payload")
}

fn assert_properties_hold(predictor: &Predictor) {
    let registry = predictor.registry();
    for model in registry.available_models().expect("models") {
        for age in [18, 25, 34, 47, 70] {
            for income in [1009.0, 2900.0, 4100.0, 7500.0, 19999.0] {
                for tenure in [0, 2, 5, 12, 40] {
                    for travel in TravelFrequency::ALL {
                        let result = predictor
                            .predict(&payload(age, income, tenure, travel), Some(model.as_str()))
                            .expect("valid payload scores");
                        assert!(
                            (0.0..=1.0).contains(&result.probability),
                            "{model}: probability {} out of range",
                            result.probability
                        );
                        assert!(result.prediction <= 1);
                        assert_eq!(
                            result.prediction == 1,
                            result.probability >= 0.5,
                            "{model}: class {} disagrees with probability {}",
                            result.prediction,
                            result.probability
                        );
                        assert_eq!(result.model_name, model);
                        let decimals = result.probability * 10_000.0;
                        assert!((decimals - decimals.round()).abs() < 1e-6);
                    }
                }
            }
        }
    }
}

#[test]
fn shipped_models_respect_output_contract() {
    let registry = Arc::new(ModelRegistry::new(shipped_artifacts(), "random_forest_e04"));
    registry.warm_up().expect("shipped artifacts load");
    assert_properties_hold(&Predictor::new(registry));
}

#[test]
fn builtin_models_respect_output_contract() {
    let registry = Arc::new(ModelRegistry::new(
        Arc::new(BuiltinArtifacts),
        "random_forest_e04",
    ));
    assert_properties_hold(&Predictor::new(registry));
}

#[test]
fn shipped_and_builtin_catalogs_list_the_same_models() {
    let shipped = ModelRegistry::new(shipped_artifacts(), "random_forest_e04");
    let builtin = ModelRegistry::new(Arc::new(BuiltinArtifacts), "random_forest_e04");
    assert_eq!(
        shipped.available_models().expect("shipped"),
        builtin.available_models().expect("builtin")
    );
    assert_eq!(
        shipped.get_feature_order().expect("shipped"),
        builtin.get_feature_order().expect("builtin")
    );
}

#[test]
fn metadata_keeps_extra_fields() {
    let registry = ModelRegistry::new(shipped_artifacts(), "random_forest_e04");
    let metadata = registry.get_metadata().expect("metadata");
    assert_eq!(metadata.model_name, "random_forest_e04");
    assert_eq!(
        metadata.extra["travel_frequency_encoding"]["frequent"],
        json!(2)
    );
    let info = registry.model_info("logistic").expect("logistic");
    assert_eq!(info.version, "e03-logreg-v1");
}

#[test]
fn engineered_features_default_to_zero() {
    let registry = Arc::new(ModelRegistry::new(shipped_artifacts(), "random_forest_e04"));
    let predictor = Predictor::new(registry);
    let base = payload(30, 5000.0, 5, TravelFrequency::Frequent);
    let mut explicit = base.clone();
    explicit.insert("nombre_participation_pee".to_string(), json!(0));
    explicit.insert("nb_formations_suivies".to_string(), json!(null));

    for model in ["logistic", "random_forest", "random_forest_e04"] {
        let a = predictor.predict(&base, Some(model)).expect("base");
        let b = predictor.predict(&explicit, Some(model)).expect("explicit");
        assert_eq!(a, b);
    }
}
