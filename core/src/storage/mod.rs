//! Request/result ledger: every prediction request and its outcome, with traceability.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::ServingConfig;
use crate::error::{ServingError, ServingResult};
use crate::types::{
    HistoryEntry, NewPredictionRequest, PredictionRequestRecord, PredictionResultRecord,
    PredictionView, SubmitReceipt,
};

pub mod memory;
pub mod migration;
pub mod schema;
pub mod sql;

pub use memory::MemoryLedger;
pub use sql::SqlLedger;

pub const DEFAULT_HISTORY_LIMIT: u64 = 50;
pub const MAX_HISTORY_LIMIT: u64 = 500;

pub const REQUEST_NOT_FOUND: &str = "Prediction request not found";

/// Status only ever moves `pending → completed` or `pending → failed`, and a result row
/// exists exactly when the request is `completed`.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Validates and stores a new `pending` request.
    async fn submit(&self, request: NewPredictionRequest) -> ServingResult<SubmitReceipt>;

    async fn get_result(&self, request_id: Uuid) -> ServingResult<PredictionView>;

    /// Completed results, newest first.
    async fn list_recent(&self, limit: u64) -> ServingResult<Vec<HistoryEntry>>;

    /// Oldest pending requests first.
    async fn fetch_pending(&self, batch_size: u64) -> ServingResult<Vec<PredictionRequestRecord>>;

    /// Writes the result and flips the status in one transaction. A request that is no
    /// longer pending yields `Conflict` and nothing is written.
    async fn complete(
        &self,
        request: &PredictionRequestRecord,
        result: PredictionResultRecord,
    ) -> ServingResult<()>;

    async fn fail(&self, request: &PredictionRequestRecord, message: &str) -> ServingResult<()>;

    /// Inline path: stores an already-scored request as `completed` together with its result.
    async fn record_completed(
        &self,
        request: NewPredictionRequest,
        result: PredictionResultRecord,
    ) -> ServingResult<PredictionView>;
}

pub fn check_history_limit(limit: u64) -> ServingResult<u64> {
    if (1..=MAX_HISTORY_LIMIT).contains(&limit) {
        Ok(limit)
    } else {
        Err(ServingError::validation(format!(
            "limit must be between 1 and {MAX_HISTORY_LIMIT}, got {limit}"
        )))
    }
}

/// Picks the ledger backend: in-memory in test mode, SQL otherwise.
pub async fn open_ledger(config: &ServingConfig) -> ServingResult<Arc<dyn Ledger>> {
    if config.test_mode {
        log::info!("[LEDGER] Test mode, using in-memory ledger");
        return Ok(Arc::new(MemoryLedger::new()));
    }
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| ServingError::config("DATABASE_URL is required"))?;
    let ledger = SqlLedger::connect(url, config).await?;
    Ok(Arc::new(ledger))
}
