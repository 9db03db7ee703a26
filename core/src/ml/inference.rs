use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::error::{ServingError, ServingResult};
use crate::ml::predictor::Predictor;
use crate::types::Prediction;

/// Runs CPU-bound scoring on the blocking pool, bounded by a semaphore and a timeout.
///
/// The permit moves into the blocking closure, so a job that outlives its timeout keeps
/// counting against the bound until it actually returns.
#[derive(Clone)]
pub struct InferencePool {
    limiter: Arc<Semaphore>,
    timeout: Duration,
}

impl InferencePool {
    pub fn new(concurrency: usize, timeout: Duration) -> Self {
        Self {
            limiter: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Waits for a free slot, then runs `job` under the timeout. Queue time does not count
    /// against the timeout; a slot that stays busy for a whole timeout is `Unavailable`.
    pub async fn run<T, F>(&self, job: F) -> ServingResult<T>
    where
        F: FnOnce() -> ServingResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let millis = self.timeout.as_millis() as u64;
        let acquire = Arc::clone(&self.limiter).acquire_owned();
        let permit = match tokio::time::timeout(self.timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ServingError::inference("inference pool closed")),
            Err(_) => {
                return Err(ServingError::unavailable(format!(
                    "no inference slot freed up within {millis} ms"
                )))
            }
        };

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });
        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined
                .map_err(|err| ServingError::inference(format!("inference task failed: {err}")))?,
            Err(_) => Err(ServingError::Timeout { millis }),
        }
    }

    pub async fn predict(
        &self,
        predictor: Arc<Predictor>,
        payload: Map<String, Value>,
        model_name: Option<String>,
    ) -> ServingResult<Prediction> {
        self.run(move || predictor.predict(&payload, model_name.as_deref()))
            .await
    }
}
