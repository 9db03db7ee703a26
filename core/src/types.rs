use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ServingError, ServingResult};

pub const FEATURE_AGE: &str = "age";
pub const FEATURE_MONTHLY_INCOME: &str = "revenu_mensuel";
pub const FEATURE_TENURE: &str = "annees_dans_l_entreprise";
pub const FEATURE_TRAVEL_FREQUENCY: &str = "frequence_deplacement";

pub const MIN_AGE: i64 = 18;
pub const MAX_AGE: i64 = 70;

// ============================================================================
// CATEGORICAL DOMAIN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelFrequency {
    Aucun,
    Occasionnel,
    Frequent,
}

impl TravelFrequency {
    pub const ALL: [TravelFrequency; 3] = [
        TravelFrequency::Aucun,
        TravelFrequency::Occasionnel,
        TravelFrequency::Frequent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TravelFrequency::Aucun => "aucun",
            TravelFrequency::Occasionnel => "occasionnel",
            TravelFrequency::Frequent => "frequent",
        }
    }

    // Must stay identical to the encoding the registered models were fitted with.
    pub fn code(&self) -> f64 {
        match self {
            TravelFrequency::Aucun => 0.0,
            TravelFrequency::Occasionnel => 1.0,
            TravelFrequency::Frequent => 2.0,
        }
    }
}

impl FromStr for TravelFrequency {
    type Err = ServingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TravelFrequency::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| ServingError::invalid_category(FEATURE_TRAVEL_FREQUENCY, value))
    }
}

impl fmt::Display for TravelFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Pending,
    Completed,
    Failed,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Pending => "pending",
            PredictionStatus::Completed => "completed",
            PredictionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> ServingResult<Self> {
        match value {
            "pending" => Ok(PredictionStatus::Pending),
            "completed" => Ok(PredictionStatus::Completed),
            "failed" => Ok(PredictionStatus::Failed),
            other => Err(ServingError::storage(format!(
                "unexpected prediction status: {other}"
            ))),
        }
    }
}

// ============================================================================
// REQUEST PAYLOAD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    pub age: i64,
    pub revenu_mensuel: f64,
    pub annees_dans_l_entreprise: i64,
    pub frequence_deplacement: TravelFrequency,
}

impl PredictionInput {
    pub fn validate(&self) -> ServingResult<()> {
        if !(MIN_AGE..=MAX_AGE).contains(&self.age) {
            return Err(ServingError::validation(format!(
                "age must be between {MIN_AGE} and {MAX_AGE}, got {}",
                self.age
            )));
        }
        if !self.revenu_mensuel.is_finite() || self.revenu_mensuel <= 0.0 {
            return Err(ServingError::validation(format!(
                "revenu_mensuel must be greater than 0, got {}",
                self.revenu_mensuel
            )));
        }
        if self.annees_dans_l_entreprise < 0 {
            return Err(ServingError::validation(format!(
                "annees_dans_l_entreprise must be at least 0, got {}",
                self.annees_dans_l_entreprise
            )));
        }
        Ok(())
    }

    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert(FEATURE_AGE.to_string(), Value::from(self.age));
        payload.insert(
            FEATURE_MONTHLY_INCOME.to_string(),
            Value::from(self.revenu_mensuel),
        );
        payload.insert(
            FEATURE_TENURE.to_string(),
            Value::from(self.annees_dans_l_entreprise),
        );
        payload.insert(
            FEATURE_TRAVEL_FREQUENCY.to_string(),
            Value::from(self.frequence_deplacement.as_str()),
        );
        payload
    }
}

// ============================================================================
// PREDICTIONS & LEDGER RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub prediction: u8,
    pub probability: f64,
    pub model_name: String,
    pub model_version: String,
}

#[derive(Debug, Clone)]
pub struct NewPredictionRequest {
    pub request_id: Uuid,
    pub model_name: String,
    pub source: String,
    pub input: PredictionInput,
    pub created_at: DateTime<Utc>,
}

impl NewPredictionRequest {
    pub fn new(input: PredictionInput, model_name: String, source: String) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            model_name,
            source,
            input,
            created_at: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequestRecord {
    pub id: i64,
    pub request_id: Uuid,
    pub model_name: String,
    pub source: String,
    pub input: PredictionInput,
    pub status: PredictionStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResultRecord {
    pub prediction: u8,
    pub probability: f64,
    pub model_name: String,
    pub model_version: String,
    pub latency_ms: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl PredictionResultRecord {
    pub fn from_prediction(prediction: Prediction, latency_ms: Option<f64>) -> Self {
        Self {
            prediction: prediction.prediction,
            probability: prediction.probability,
            model_name: prediction.model_name,
            model_version: prediction.model_version,
            latency_ms,
            created_at: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitReceipt {
    pub request_id: Uuid,
    pub status: PredictionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionView {
    pub request_id: Uuid,
    pub status: PredictionStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub result: Option<PredictionResultRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub request_id: Uuid,
    pub result: PredictionResultRecord,
}

// Storage keeps millisecond precision; truncating here keeps in-memory and SQL ledgers equal.
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
