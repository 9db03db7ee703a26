use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ServingError, ServingResult};
use crate::storage::{check_history_limit, Ledger, REQUEST_NOT_FOUND};
use crate::types::{
    now_millis, HistoryEntry, NewPredictionRequest, PredictionRequestRecord,
    PredictionResultRecord, PredictionStatus, PredictionView, SubmitReceipt,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    requests: BTreeMap<i64, PredictionRequestRecord>,
    by_request_id: HashMap<Uuid, i64>,
    // request id → (insertion sequence, result)
    results: HashMap<i64, (u64, PredictionResultRecord)>,
    next_result_seq: u64,
}

impl Tables {
    fn insert_request(
        &mut self,
        request: NewPredictionRequest,
        status: PredictionStatus,
    ) -> ServingResult<PredictionRequestRecord> {
        if self.by_request_id.contains_key(&request.request_id) {
            return Err(ServingError::storage(format!(
                "duplicate request_id {}",
                request.request_id
            )));
        }
        self.next_id += 1;
        let record = PredictionRequestRecord {
            id: self.next_id,
            request_id: request.request_id,
            model_name: request.model_name,
            source: request.source,
            input: request.input,
            status,
            error_message: None,
            created_at: request.created_at,
            updated_at: None,
        };
        self.by_request_id.insert(record.request_id, record.id);
        self.requests.insert(record.id, record.clone());
        Ok(record)
    }

    fn insert_result(&mut self, id: i64, result: PredictionResultRecord) {
        self.next_result_seq += 1;
        self.results.insert(id, (self.next_result_seq, result));
    }

    fn pending_mut(&mut self, id: i64) -> ServingResult<&mut PredictionRequestRecord> {
        match self.requests.get_mut(&id) {
            Some(record) if record.status == PredictionStatus::Pending => Ok(record),
            Some(record) => Err(ServingError::conflict(format!(
                "request {} is already {}",
                record.request_id,
                record.status.as_str()
            ))),
            None => Err(ServingError::not_found(REQUEST_NOT_FOUND)),
        }
    }

    fn view(&self, record: &PredictionRequestRecord) -> PredictionView {
        PredictionView {
            request_id: record.request_id,
            status: record.status,
            error_message: record.error_message.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            result: self
                .results
                .get(&record.id)
                .map(|(_, result)| result.clone()),
        }
    }
}

/// Process-local ledger with the same contract as the SQL one. Used in test mode.
pub struct MemoryLedger {
    inner: RwLock<Tables>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn submit(&self, request: NewPredictionRequest) -> ServingResult<SubmitReceipt> {
        request.input.validate()?;
        let mut tables = self.inner.write().await;
        let record = tables.insert_request(request, PredictionStatus::Pending)?;
        Ok(SubmitReceipt {
            request_id: record.request_id,
            status: record.status,
            created_at: record.created_at,
        })
    }

    async fn get_result(&self, request_id: Uuid) -> ServingResult<PredictionView> {
        let tables = self.inner.read().await;
        let record = tables
            .by_request_id
            .get(&request_id)
            .and_then(|id| tables.requests.get(id))
            .ok_or_else(|| ServingError::not_found(REQUEST_NOT_FOUND))?;
        Ok(tables.view(record))
    }

    async fn list_recent(&self, limit: u64) -> ServingResult<Vec<HistoryEntry>> {
        let limit = check_history_limit(limit)?;
        let tables = self.inner.read().await;
        let mut rows = tables
            .results
            .iter()
            .filter_map(|(id, (seq, result))| {
                tables
                    .requests
                    .get(id)
                    .map(|request| (*seq, request.request_id, result))
            })
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| {
            b.2.created_at
                .cmp(&a.2.created_at)
                .then_with(|| b.0.cmp(&a.0))
        });
        Ok(rows
            .into_iter()
            .take(limit as usize)
            .map(|(_, request_id, result)| HistoryEntry {
                request_id,
                result: result.clone(),
            })
            .collect())
    }

    async fn fetch_pending(&self, batch_size: u64) -> ServingResult<Vec<PredictionRequestRecord>> {
        let tables = self.inner.read().await;
        let mut pending = tables
            .requests
            .values()
            .filter(|record| record.status == PredictionStatus::Pending)
            .cloned()
            .collect::<Vec<_>>();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(batch_size as usize);
        Ok(pending)
    }

    async fn complete(
        &self,
        request: &PredictionRequestRecord,
        result: PredictionResultRecord,
    ) -> ServingResult<()> {
        let mut tables = self.inner.write().await;
        let record = tables.pending_mut(request.id)?;
        record.status = PredictionStatus::Completed;
        record.updated_at = Some(now_millis());
        tables.insert_result(request.id, result);
        Ok(())
    }

    async fn fail(&self, request: &PredictionRequestRecord, message: &str) -> ServingResult<()> {
        let mut tables = self.inner.write().await;
        let record = tables.pending_mut(request.id)?;
        record.status = PredictionStatus::Failed;
        record.error_message = Some(message.to_string());
        record.updated_at = Some(now_millis());
        Ok(())
    }

    async fn record_completed(
        &self,
        request: NewPredictionRequest,
        result: PredictionResultRecord,
    ) -> ServingResult<PredictionView> {
        request.input.validate()?;
        let mut tables = self.inner.write().await;
        let mut record = tables.insert_request(request, PredictionStatus::Completed)?;
        record.updated_at = Some(result.created_at);
        if let Some(stored) = tables.requests.get_mut(&record.id) {
            stored.updated_at = record.updated_at;
        }
        tables.insert_result(record.id, result);
        Ok(tables.view(&record))
    }
}
