use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use attrition_serving::error::{ServingError, ServingResult};
use attrition_serving::ml::artifacts::{ModelInfo, RegistryMetadata};
use attrition_serving::ml::{ArtifactSource, BuiltinArtifacts, ModelRegistry, Predictor, ScoringModel};
use serde_json::json;

#[derive(Default)]
struct CountingSource {
    metadata_reads: AtomicUsize,
    feature_reads: AtomicUsize,
    model_reads: AtomicUsize,
    scores: Arc<AtomicUsize>,
}

struct CountingScorer {
    inner: Arc<dyn ScoringModel>,
    scores: Arc<AtomicUsize>,
}

impl ScoringModel for CountingScorer {
    fn predict_proba(&self, features: &[f64]) -> ServingResult<f64> {
        self.scores.fetch_add(1, Ordering::SeqCst);
        self.inner.predict_proba(features)
    }

    fn check_features(&self, feature_count: usize) -> ServingResult<()> {
        self.inner.check_features(feature_count)
    }
}

impl ArtifactSource for CountingSource {
    fn load_metadata(&self) -> ServingResult<RegistryMetadata> {
        self.metadata_reads.fetch_add(1, Ordering::SeqCst);
        BuiltinArtifacts.load_metadata()
    }

    fn load_features(&self) -> ServingResult<Vec<String>> {
        self.feature_reads.fetch_add(1, Ordering::SeqCst);
        BuiltinArtifacts.load_features()
    }

    fn load_model(&self, name: &str, info: &ModelInfo) -> ServingResult<Arc<dyn ScoringModel>> {
        self.model_reads.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which concurrent first callers could race.
        std::thread::sleep(Duration::from_millis(50));
        Ok(Arc::new(CountingScorer {
            inner: BuiltinArtifacts.load_model(name, info)?,
            scores: Arc::clone(&self.scores),
        }))
    }
}

fn counting_registry() -> (Arc<CountingSource>, Arc<ModelRegistry>) {
    let source = Arc::new(CountingSource::default());
    let registry = Arc::new(ModelRegistry::new(source.clone(), "random_forest_e04"));
    (source, registry)
}

#[test]
fn repeated_calls_hit_the_backing_source_once() {
    let (source, registry) = counting_registry();

    for _ in 0..5 {
        registry.get_model(None).expect("default model");
        registry.get_model(Some("logistic")).expect("logistic");
        registry.get_feature_order().expect("features");
        registry.get_metadata().expect("metadata");
    }

    assert_eq!(source.metadata_reads.load(Ordering::SeqCst), 1);
    assert_eq!(source.feature_reads.load(Ordering::SeqCst), 1);
    assert_eq!(source.model_reads.load(Ordering::SeqCst), 2);
}

#[test]
fn concurrent_first_calls_load_once() {
    let (source, registry) = counting_registry();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            scope.spawn(move || {
                registry.get_model(Some("random_forest")).expect("model");
            });
        }
    });

    assert_eq!(source.model_reads.load(Ordering::SeqCst), 1);
    assert_eq!(source.metadata_reads.load(Ordering::SeqCst), 1);
}

#[test]
fn cached_values_are_identical_across_calls() {
    let (_source, registry) = counting_registry();
    let first = registry.get_feature_order().expect("features").as_ptr();
    let second = registry.get_feature_order().expect("features").as_ptr();
    assert_eq!(first, second);

    let a = registry.get_model(Some("dummy")).expect("dummy");
    let b = registry.get_model(Some("dummy")).expect("dummy");
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn unknown_models_never_reach_the_source() {
    let (source, registry) = counting_registry();
    for name in ["unknown_model_name", "", "RANDOM_FOREST", "xgboost"] {
        let err = registry.get_model(Some(name)).err().expect("must fail");
        assert!(matches!(err, ServingError::UnknownModel { .. }));
        assert!(err.to_string().contains("Unknown model"));
    }
    assert_eq!(source.model_reads.load(Ordering::SeqCst), 0);
}

#[test]
fn every_registered_model_scores_within_bounds() {
    let (_source, registry) = counting_registry();
    let features = registry.get_feature_order().expect("features").len();
    for name in registry.available_models().expect("models") {
        let model = registry.get_model(Some(name.as_str())).expect("registered model");
        let score = model
            .scorer()
            .predict_proba(&vec![0.0; features])
            .expect("score");
        assert!((0.0..=1.0).contains(&score), "{name} scored {score}");
    }
}

#[test]
fn invalid_category_never_invokes_a_scorer() {
    let (source, registry) = counting_registry();
    let predictor = Predictor::new(registry);

    for value in ["Rarement", "FREQUENT", "", "souvent"] {
        let payload = json!({
            "age": 30,
            "revenu_mensuel": 5000,
            "annees_dans_l_entreprise": 5,
            "frequence_deplacement": value
        });
        let err = predictor
            .predict(payload.as_object().expect("object"), None)
            .unwrap_err();
        assert!(matches!(err, ServingError::InvalidCategory { .. }));
    }
    assert_eq!(source.scores.load(Ordering::SeqCst), 0);

    let valid = json!({ "age": 30, "frequence_deplacement": "aucun" });
    predictor
        .predict(valid.as_object().expect("object"), None)
        .expect("valid payload");
    assert_eq!(source.scores.load(Ordering::SeqCst), 1);
}
