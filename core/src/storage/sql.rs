use async_trait::async_trait;
use sea_orm::sea_query::{Expr, Order, Query};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, QueryResult, StatementBuilder,
    TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use crate::config::ServingConfig;
use crate::error::{ServingError, ServingResult};
use crate::storage::migration::Migrator;
use crate::storage::schema::{col_name, PredictionRequests, PredictionResults};
use crate::storage::{check_history_limit, Ledger, REQUEST_NOT_FOUND};
use crate::types::{
    from_millis, now_millis, HistoryEntry, NewPredictionRequest, PredictionInput,
    PredictionRequestRecord, PredictionResultRecord, PredictionStatus, PredictionView,
    SubmitReceipt, TravelFrequency,
};

const REQUEST_COLUMNS: [PredictionRequests; 12] = [
    PredictionRequests::Id,
    PredictionRequests::RequestId,
    PredictionRequests::ModelName,
    PredictionRequests::Source,
    PredictionRequests::Age,
    PredictionRequests::RevenuMensuel,
    PredictionRequests::AnneesDansLEntreprise,
    PredictionRequests::FrequenceDeplacement,
    PredictionRequests::Status,
    PredictionRequests::ErrorMessage,
    PredictionRequests::CreatedAt,
    PredictionRequests::UpdatedAt,
];

const RESULT_COLUMNS: [PredictionResults; 6] = [
    PredictionResults::Prediction,
    PredictionResults::Probability,
    PredictionResults::ModelName,
    PredictionResults::ModelVersion,
    PredictionResults::LatencyMs,
    PredictionResults::CreatedAt,
];

/// Ledger backed by SQLite, PostgreSQL or MySQL, whichever the URL names.
pub struct SqlLedger {
    conn: DatabaseConnection,
}

impl SqlLedger {
    /// Opens the pool and applies pending migrations.
    pub async fn connect(url: &str, config: &ServingConfig) -> ServingResult<Self> {
        let mut options = ConnectOptions::new(url.to_string());
        options
            .max_connections(config.db_max_connections)
            .min_connections(config.db_min_connections)
            .acquire_timeout(config.db_acquire_timeout)
            .sqlx_logging_level(log::LevelFilter::Debug);
        let conn = Database::connect(options).await?;
        Migrator::up(&conn, None).await?;
        log::info!(
            "[LEDGER] Connected ({:?}, max {} connections)",
            conn.get_database_backend(),
            config.db_max_connections
        );
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    async fn insert_request<C: ConnectionTrait>(
        conn: &C,
        request: &NewPredictionRequest,
        status: PredictionStatus,
        updated_at: Option<i64>,
    ) -> ServingResult<i64> {
        let insert = Query::insert()
            .into_table(PredictionRequests::Table)
            .columns([
                PredictionRequests::RequestId,
                PredictionRequests::ModelName,
                PredictionRequests::Source,
                PredictionRequests::Age,
                PredictionRequests::RevenuMensuel,
                PredictionRequests::AnneesDansLEntreprise,
                PredictionRequests::FrequenceDeplacement,
                PredictionRequests::Status,
                PredictionRequests::CreatedAt,
                PredictionRequests::UpdatedAt,
            ])
            .values_panic([
                request.request_id.to_string().into(),
                request.model_name.clone().into(),
                request.source.clone().into(),
                request.input.age.into(),
                request.input.revenu_mensuel.into(),
                request.input.annees_dans_l_entreprise.into(),
                request.input.frequence_deplacement.as_str().into(),
                status.as_str().into(),
                request.created_at.timestamp_millis().into(),
                updated_at.into(),
            ])
            .to_owned();
        exec(conn, &insert).await?;

        // Looked up by the external id so the same code works on every backend.
        let select = Query::select()
            .from(PredictionRequests::Table)
            .column(PredictionRequests::Id)
            .and_where(
                Expr::col(PredictionRequests::RequestId).eq(request.request_id.to_string()),
            )
            .to_owned();
        let row = query_one(conn, &select)
            .await?
            .ok_or_else(|| ServingError::storage("inserted request not readable"))?;
        Ok(row.try_get("", &col_name(PredictionRequests::Id))?)
    }

    async fn insert_result<C: ConnectionTrait>(
        conn: &C,
        id: i64,
        result: &PredictionResultRecord,
    ) -> ServingResult<()> {
        let insert = Query::insert()
            .into_table(PredictionResults::Table)
            .columns([
                PredictionResults::RequestId,
                PredictionResults::Prediction,
                PredictionResults::Probability,
                PredictionResults::ModelName,
                PredictionResults::ModelVersion,
                PredictionResults::LatencyMs,
                PredictionResults::CreatedAt,
            ])
            .values_panic([
                id.into(),
                i16::from(result.prediction).into(),
                result.probability.into(),
                result.model_name.clone().into(),
                result.model_version.clone().into(),
                result.latency_ms.into(),
                result.created_at.timestamp_millis().into(),
            ])
            .to_owned();
        exec(conn, &insert).await?;
        Ok(())
    }

    async fn find_request<C: ConnectionTrait>(
        conn: &C,
        request_id: Uuid,
    ) -> ServingResult<Option<PredictionRequestRecord>> {
        let select = Query::select()
            .from(PredictionRequests::Table)
            .columns(REQUEST_COLUMNS)
            .and_where(Expr::col(PredictionRequests::RequestId).eq(request_id.to_string()))
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| read_request(&row))
            .transpose()
    }

    async fn find_result<C: ConnectionTrait>(
        conn: &C,
        id: i64,
    ) -> ServingResult<Option<PredictionResultRecord>> {
        let select = Query::select()
            .from(PredictionResults::Table)
            .columns(RESULT_COLUMNS)
            .and_where(Expr::col(PredictionResults::RequestId).eq(id))
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| read_result(&row))
            .transpose()
    }

    /// Flips a pending request to `status`; zero affected rows means someone else already did.
    async fn transition<C: ConnectionTrait>(
        conn: &C,
        request: &PredictionRequestRecord,
        status: PredictionStatus,
        error_message: Option<&str>,
    ) -> ServingResult<()> {
        let mut update = Query::update();
        update
            .table(PredictionRequests::Table)
            .values([
                (PredictionRequests::Status, status.as_str().into()),
                (
                    PredictionRequests::UpdatedAt,
                    now_millis().timestamp_millis().into(),
                ),
            ])
            .and_where(Expr::col(PredictionRequests::Id).eq(request.id))
            .and_where(Expr::col(PredictionRequests::Status).eq(PredictionStatus::Pending.as_str()));
        if let Some(message) = error_message {
            update.value(PredictionRequests::ErrorMessage, message);
        }
        let affected = exec(conn, &update).await?;
        if affected == 0 {
            return Err(ServingError::conflict(format!(
                "request {} is no longer pending",
                request.request_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for SqlLedger {
    async fn submit(&self, request: NewPredictionRequest) -> ServingResult<SubmitReceipt> {
        request.input.validate()?;
        let tx = self.conn.begin().await?;
        Self::insert_request(&tx, &request, PredictionStatus::Pending, None).await?;
        tx.commit().await?;
        Ok(SubmitReceipt {
            request_id: request.request_id,
            status: PredictionStatus::Pending,
            created_at: request.created_at,
        })
    }

    async fn get_result(&self, request_id: Uuid) -> ServingResult<PredictionView> {
        let record = Self::find_request(&self.conn, request_id)
            .await?
            .ok_or_else(|| ServingError::not_found(REQUEST_NOT_FOUND))?;
        let result = Self::find_result(&self.conn, record.id).await?;
        Ok(PredictionView {
            request_id: record.request_id,
            status: record.status,
            error_message: record.error_message,
            created_at: record.created_at,
            updated_at: record.updated_at,
            result,
        })
    }

    async fn list_recent(&self, limit: u64) -> ServingResult<Vec<HistoryEntry>> {
        let limit = check_history_limit(limit)?;
        let select = Query::select()
            .column((PredictionRequests::Table, PredictionRequests::RequestId))
            .columns(
                RESULT_COLUMNS
                    .iter()
                    .map(|column| (PredictionResults::Table, *column)),
            )
            .from(PredictionResults::Table)
            .inner_join(
                PredictionRequests::Table,
                Expr::col((PredictionResults::Table, PredictionResults::RequestId))
                    .equals((PredictionRequests::Table, PredictionRequests::Id)),
            )
            .order_by((PredictionResults::Table, PredictionResults::CreatedAt), Order::Desc)
            .order_by((PredictionResults::Table, PredictionResults::Id), Order::Desc)
            .limit(limit)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        rows.iter()
            .map(|row| {
                Ok(HistoryEntry {
                    request_id: read_uuid(row)?,
                    result: read_result(row)?,
                })
            })
            .collect()
    }

    async fn fetch_pending(&self, batch_size: u64) -> ServingResult<Vec<PredictionRequestRecord>> {
        let select = Query::select()
            .from(PredictionRequests::Table)
            .columns(REQUEST_COLUMNS)
            .and_where(Expr::col(PredictionRequests::Status).eq(PredictionStatus::Pending.as_str()))
            .order_by(PredictionRequests::CreatedAt, Order::Asc)
            .order_by(PredictionRequests::Id, Order::Asc)
            .limit(batch_size)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(read_request).collect()
    }

    async fn complete(
        &self,
        request: &PredictionRequestRecord,
        result: PredictionResultRecord,
    ) -> ServingResult<()> {
        let tx = self.conn.begin().await?;
        if let Err(err) =
            Self::transition(&tx, request, PredictionStatus::Completed, None).await
        {
            tx.rollback().await?;
            return Err(err);
        }
        Self::insert_result(&tx, request.id, &result).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fail(&self, request: &PredictionRequestRecord, message: &str) -> ServingResult<()> {
        let tx = self.conn.begin().await?;
        if let Err(err) =
            Self::transition(&tx, request, PredictionStatus::Failed, Some(message)).await
        {
            tx.rollback().await?;
            return Err(err);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_completed(
        &self,
        request: NewPredictionRequest,
        result: PredictionResultRecord,
    ) -> ServingResult<PredictionView> {
        request.input.validate()?;
        let updated_at = result.created_at.timestamp_millis();
        let tx = self.conn.begin().await?;
        let id = Self::insert_request(
            &tx,
            &request,
            PredictionStatus::Completed,
            Some(updated_at),
        )
        .await?;
        Self::insert_result(&tx, id, &result).await?;
        tx.commit().await?;
        Ok(PredictionView {
            request_id: request.request_id,
            status: PredictionStatus::Completed,
            error_message: None,
            created_at: request.created_at,
            updated_at: Some(from_millis(updated_at)),
            result: Some(result),
        })
    }
}

fn read_uuid(row: &QueryResult) -> ServingResult<Uuid> {
    let raw: String = row.try_get("", &col_name(PredictionRequests::RequestId))?;
    Uuid::parse_str(&raw).map_err(|err| ServingError::storage(format!("bad request_id {raw}: {err}")))
}

fn read_request(row: &QueryResult) -> ServingResult<PredictionRequestRecord> {
    let frequency: String = row.try_get("", &col_name(PredictionRequests::FrequenceDeplacement))?;
    let frequence_deplacement = frequency
        .parse::<TravelFrequency>()
        .map_err(|err| ServingError::storage(format!("stored request is corrupt: {err}")))?;
    let status: String = row.try_get("", &col_name(PredictionRequests::Status))?;
    let created_at: i64 = row.try_get("", &col_name(PredictionRequests::CreatedAt))?;
    let updated_at: Option<i64> = row.try_get("", &col_name(PredictionRequests::UpdatedAt))?;

    Ok(PredictionRequestRecord {
        id: row.try_get("", &col_name(PredictionRequests::Id))?,
        request_id: read_uuid(row)?,
        model_name: row.try_get("", &col_name(PredictionRequests::ModelName))?,
        source: row.try_get("", &col_name(PredictionRequests::Source))?,
        input: PredictionInput {
            age: row.try_get("", &col_name(PredictionRequests::Age))?,
            revenu_mensuel: row.try_get("", &col_name(PredictionRequests::RevenuMensuel))?,
            annees_dans_l_entreprise: row
                .try_get("", &col_name(PredictionRequests::AnneesDansLEntreprise))?,
            frequence_deplacement,
        },
        status: PredictionStatus::parse(&status)?,
        error_message: row.try_get("", &col_name(PredictionRequests::ErrorMessage))?,
        created_at: from_millis(created_at),
        updated_at: updated_at.map(from_millis),
    })
}

fn read_result(row: &QueryResult) -> ServingResult<PredictionResultRecord> {
    let prediction: i16 = row.try_get("", &col_name(PredictionResults::Prediction))?;
    let created_at: i64 = row.try_get("", &col_name(PredictionResults::CreatedAt))?;
    Ok(PredictionResultRecord {
        prediction: u8::try_from(prediction)
            .map_err(|_| ServingError::storage(format!("bad stored prediction {prediction}")))?,
        probability: row.try_get("", &col_name(PredictionResults::Probability))?,
        model_name: row.try_get("", &col_name(PredictionResults::ModelName))?,
        model_version: row.try_get("", &col_name(PredictionResults::ModelVersion))?,
        latency_ms: row.try_get("", &col_name(PredictionResults::LatencyMs))?,
        created_at: from_millis(created_at),
    })
}

async fn exec<C, S>(conn: &C, stmt: &S) -> ServingResult<u64>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    let result = conn.execute(backend.build(stmt)).await?;
    Ok(result.rows_affected())
}

async fn query_all<C, S>(conn: &C, stmt: &S) -> ServingResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    Ok(conn.query_all(backend.build(stmt)).await?)
}

async fn query_one<C, S>(conn: &C, stmt: &S) -> ServingResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    Ok(conn.query_one(backend.build(stmt)).await?)
}
