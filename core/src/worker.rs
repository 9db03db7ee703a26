use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::config::ServingConfig;
use crate::error::ServingResult;
use crate::ml::{InferencePool, Predictor};
use crate::storage::Ledger;
use crate::types::{PredictionRequestRecord, PredictionResultRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Polls the ledger for pending requests and scores them off the request path.
pub struct InferenceWorker {
    ledger: Arc<dyn Ledger>,
    predictor: Arc<Predictor>,
    pool: InferencePool,
    poll_interval: Duration,
    batch_size: u64,
    running: AtomicBool,
    stop_requested: AtomicBool,
    wake: Notify,
}

impl InferenceWorker {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        predictor: Arc<Predictor>,
        pool: InferencePool,
        poll_interval: Duration,
        batch_size: u64,
    ) -> Self {
        Self {
            ledger,
            predictor,
            pool,
            poll_interval,
            batch_size: batch_size.max(1),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn from_config(
        config: &ServingConfig,
        ledger: Arc<dyn Ledger>,
        predictor: Arc<Predictor>,
        pool: InferencePool,
    ) -> Self {
        Self::new(ledger, predictor, pool, config.poll_interval, config.batch_size)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs until `stop` is called. A failing cycle is logged and retried on the next tick.
    /// A stopped worker can be started again; a `stop` issued before `start` runs cancels
    /// that run. Calling `start` while already running returns at once.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("[WORKER] Already running");
            return;
        }
        log::info!(
            "[WORKER] Started (poll every {} ms, batch {})",
            self.poll_interval.as_millis(),
            self.batch_size
        );

        while !self.stop_requested.load(Ordering::SeqCst) {
            match self.run_cycle().await {
                Ok(report) if report.processed > 0 => log::info!(
                    "[WORKER] Cycle done: processed={} completed={} failed={}",
                    report.processed,
                    report.completed,
                    report.failed
                ),
                Ok(_) => {}
                Err(error) => log::error!("[WORKER] Cycle failed: {}", error),
            }

            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        log::info!("[WORKER] Stopped");
    }

    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// One poll: fetch a batch and process it sequentially. Only the fetch can fail the
    /// cycle; per-request failures are recorded on the request and the batch continues.
    pub async fn run_cycle(&self) -> ServingResult<CycleReport> {
        let pending = self.ledger.fetch_pending(self.batch_size).await?;
        let mut report = CycleReport::default();

        for request in pending {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            report.processed += 1;
            match self.process(&request).await {
                Ok(()) => report.completed += 1,
                Err(error) => {
                    report.failed += 1;
                    let message = error.to_string();
                    if error.is_client_error() {
                        log::warn!("[WORKER] Request {} rejected: {}", request.request_id, message);
                    } else {
                        log::error!("[WORKER] Request {} failed: {}", request.request_id, message);
                    }
                    if let Err(fail_error) = self.ledger.fail(&request, &message).await {
                        log::error!(
                            "[WORKER] Could not mark {} as failed: {}",
                            request.request_id,
                            fail_error
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    async fn process(&self, request: &PredictionRequestRecord) -> ServingResult<()> {
        let started = Instant::now();
        let prediction = self
            .pool
            .predict(
                Arc::clone(&self.predictor),
                request.input.to_payload(),
                Some(request.model_name.clone()),
            )
            .await?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        log::debug!(
            "[WORKER] {} scored by {} in {:.2} ms",
            request.request_id,
            prediction.model_name,
            latency_ms
        );
        self.ledger
            .complete(
                request,
                PredictionResultRecord::from_prediction(prediction, Some(latency_ms)),
            )
            .await
    }
}
