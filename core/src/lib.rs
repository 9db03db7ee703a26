pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod ml;
pub mod storage;
pub mod types;
pub mod worker;

use std::sync::Arc;

use crate::config::{ServingConfig, ServingMode};
use crate::error::ServingResult;
use crate::http::ApiState;
use crate::metrics::MetricsCatalog;
use crate::ml::{InferencePool, ModelRegistry, Predictor};
use crate::storage::Ledger;
use crate::worker::InferenceWorker;

/// Everything the binary runs: the HTTP state and, in deferred mode, the worker.
pub struct Services {
    pub config: ServingConfig,
    pub state: ApiState,
    pub worker: Option<Arc<InferenceWorker>>,
}

impl Services {
    /// Loads the registry, opens the ledger and wires the components together.
    pub async fn build(config: ServingConfig) -> ServingResult<Self> {
        let registry = Arc::new(ModelRegistry::from_config(&config));
        registry.warm_up()?;
        let ledger = storage::open_ledger(&config).await?;
        Ok(Self::assemble(config, registry, ledger))
    }

    pub fn assemble(
        config: ServingConfig,
        registry: Arc<ModelRegistry>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let predictor = Arc::new(Predictor::new(Arc::clone(&registry)));
        let pool = InferencePool::new(config.inference_concurrency, config.inference_timeout);
        let worker = match config.mode {
            ServingMode::Deferred => Some(Arc::new(InferenceWorker::from_config(
                &config,
                Arc::clone(&ledger),
                Arc::clone(&predictor),
                pool.clone(),
            ))),
            ServingMode::Inline => None,
        };
        let state = ApiState {
            mode: config.mode,
            registry,
            predictor,
            ledger,
            pool,
            metrics: Arc::new(MetricsCatalog::from_config(&config)),
        };
        Self {
            config,
            state,
            worker,
        }
    }

    pub fn router(&self) -> axum::Router {
        http::router(self.state.clone(), &self.config.cors_origin)
    }
}
