use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::ServingConfig;
use crate::error::{ServingError, ServingResult};
use crate::ml::artifacts::{
    ArtifactSource, BuiltinArtifacts, FsArtifacts, ModelInfo, RegistryMetadata, ScoringModel,
};

/// A resolved model: the scorer plus the catalog entry it was loaded from.
pub struct RegisteredModel {
    pub name: String,
    pub info: ModelInfo,
    scorer: Arc<dyn ScoringModel>,
}

impl RegisteredModel {
    pub fn version(&self) -> &str {
        &self.info.version
    }

    pub fn scorer(&self) -> Arc<dyn ScoringModel> {
        Arc::clone(&self.scorer)
    }
}

struct Catalog {
    metadata: RegistryMetadata,
    slots: BTreeMap<String, OnceCell<Arc<RegisteredModel>>>,
}

/// Name → model resolution with load-once semantics.
///
/// Metadata, the feature order and each model artifact are read from the source at most
/// once for the lifetime of the registry, however many threads race on first use. A failed
/// load is not cached; the next caller retries.
pub struct ModelRegistry {
    source: Arc<dyn ArtifactSource>,
    default_model: String,
    catalog: OnceCell<Catalog>,
    features: OnceCell<Vec<String>>,
}

impl ModelRegistry {
    pub fn new(source: Arc<dyn ArtifactSource>, default_model: impl Into<String>) -> Self {
        Self {
            source,
            default_model: default_model.into(),
            catalog: OnceCell::new(),
            features: OnceCell::new(),
        }
    }

    pub fn from_config(config: &ServingConfig) -> Self {
        let source: Arc<dyn ArtifactSource> = if config.builtin_models {
            log::info!("[REGISTRY] Using built-in model stand-ins");
            Arc::new(BuiltinArtifacts)
        } else {
            log::info!(
                "[REGISTRY] Using artifacts from {}",
                config.artifacts_dir.display()
            );
            Arc::new(FsArtifacts::new(&config.artifacts_dir))
        };
        Self::new(source, config.default_model.clone())
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn get_metadata(&self) -> ServingResult<&RegistryMetadata> {
        Ok(&self.catalog()?.metadata)
    }

    pub fn get_feature_order(&self) -> ServingResult<&[String]> {
        let features = self.features.get_or_try_init(|| {
            let features = self.source.load_features()?;
            log::info!("[REGISTRY] Loaded feature order ({} features)", features.len());
            Ok::<_, ServingError>(features)
        })?;
        Ok(features.as_slice())
    }

    pub fn available_models(&self) -> ServingResult<Vec<String>> {
        Ok(self.catalog()?.slots.keys().cloned().collect())
    }

    pub fn model_info(&self, name: &str) -> ServingResult<ModelInfo> {
        self.catalog()?
            .metadata
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| ServingError::unknown_model(name))
    }

    /// Resolves `name` (or the default model) to a loaded scorer.
    pub fn get_model(&self, name: Option<&str>) -> ServingResult<Arc<RegisteredModel>> {
        let name = name.unwrap_or(&self.default_model);
        let catalog = self.catalog()?;
        let slot = catalog
            .slots
            .get(name)
            .ok_or_else(|| ServingError::unknown_model(name))?;
        let model = slot.get_or_try_init(|| self.load(name, &catalog.metadata))?;
        Ok(Arc::clone(model))
    }

    /// Loads everything the default request path needs so boot fails instead of the first request.
    pub fn warm_up(&self) -> ServingResult<()> {
        self.catalog()?;
        self.get_feature_order()?;
        match self.get_model(None) {
            Ok(model) => {
                log::info!(
                    "[REGISTRY] Default model {} ({}) ready",
                    model.name,
                    model.version()
                );
                Ok(())
            }
            Err(ServingError::UnknownModel { name }) => Err(ServingError::config(format!(
                "default model {name} is not registered"
            ))),
            Err(other) => Err(other),
        }
    }

    fn catalog(&self) -> ServingResult<&Catalog> {
        self.catalog.get_or_try_init(|| {
            let metadata = self.source.load_metadata()?;
            let slots = metadata
                .models
                .keys()
                .map(|name| (name.clone(), OnceCell::new()))
                .collect::<BTreeMap<_, _>>();
            log::info!("[REGISTRY] Catalog lists {} model(s)", slots.len());
            Ok::<_, ServingError>(Catalog { metadata, slots })
        })
    }

    fn load(&self, name: &str, metadata: &RegistryMetadata) -> ServingResult<Arc<RegisteredModel>> {
        let info = metadata
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| ServingError::unknown_model(name))?;
        let feature_count = self.get_feature_order()?.len();
        let scorer = self.source.load_model(name, &info)?;
        scorer.check_features(feature_count)?;
        log::info!("[REGISTRY] Loaded model {} ({})", name, info.version);
        Ok(Arc::new(RegisteredModel {
            name: name.to_string(),
            info,
            scorer,
        }))
    }
}
