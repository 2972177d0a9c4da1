use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One classified customer-feedback record. Sentiment, keywords, and topic
/// are produced upstream by the ingestion pipeline; this crate consumes them
/// read-only.
#[derive(Debug, Clone)]
pub struct FeedbackEvent {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub region: String,
    pub text: String,
    pub sentiment: Option<f64>,
    pub keywords: Vec<String>,
    pub topic: Option<String>,
}

/// Point-in-time network KPI sample for a region.
#[derive(Debug, Clone)]
pub struct NetworkSnapshot {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub region: String,
    pub download_mbps: f64,
    pub latency_ms: f64,
}

/// Explanation payload attached to every CHI row. Reproducible from the five
/// sub-signals that went into the composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drivers {
    pub top_keywords: Vec<String>,
    pub kpi_health: f64,
    pub topic_severity: f64,
    pub volume_z: f64,
    pub kudos: u32,
    pub sentiment: f64,
}

/// Composite health index row, append-only per region, ordered by `ts`.
#[derive(Debug, Clone)]
pub struct ChiRow {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub region: String,
    pub score: f64,
    pub drivers: Drivers,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub region: String,
    pub chi_before: Option<f64>,
    pub chi_after: f64,
    pub reason: String,
    pub recommendation: Vec<String>,
}

/// Ephemeral projection point; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    pub ts: DateTime<Utc>,
    pub score: f64,
}
