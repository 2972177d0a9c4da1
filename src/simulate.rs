use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::models::{FeedbackEvent, NetworkSnapshot};

const OUTAGE_TEMPLATES: &[&str] = &[
    "Massive outage in {region}! No service!",
    "Network down in {region}, can't make calls.",
    "Data is super slow in {region}, unusable.",
    "High latency and dropped calls in {region}.",
    "Terrible speeds in {region} after update.",
    "Anyone else having issues in {region}?",
];

/// Inject synthetic negative events and degraded KPI snapshots for a region.
/// Templates cycle round-robin so repeated runs are deterministic. Returns
/// the number of events created.
pub async fn simulate_outage(
    pool: &PgPool,
    region: &str,
    impact_percent: u32,
    duration_minutes: i64,
    event_rate_per_minute: u32,
) -> anyhow::Result<usize> {
    let now = Utc::now();
    let impact = impact_percent.min(100) as f64 / 100.0;
    let mut created = 0usize;
    let mut template_index = 0usize;

    for minute in 0..duration_minutes.max(1) {
        let ts = now + Duration::minutes(minute);
        for _ in 0..event_rate_per_minute {
            let text =
                OUTAGE_TEMPLATES[template_index % OUTAGE_TEMPLATES.len()].replace("{region}", region);
            template_index += 1;
            let event = FeedbackEvent {
                id: Uuid::new_v4(),
                ts,
                region: region.to_string(),
                text,
                sentiment: Some(-0.8),
                keywords: ["outage", "down", "slow", "latency"]
                    .iter()
                    .map(|k| k.to_string())
                    .collect(),
                topic: Some("outage".to_string()),
            };
            db::insert_event(pool, &event).await?;
            created += 1;
        }

        // Degrade KPIs off the latest snapshot, when one exists.
        if let Some(latest) = db::latest_snapshots(pool, region, 1).await?.into_iter().next() {
            let degraded = NetworkSnapshot {
                id: Uuid::new_v4(),
                ts,
                region: region.to_string(),
                download_mbps: (latest.download_mbps * (1.0 - impact)).max(0.1),
                latency_ms: latest.latency_ms * (1.0 + impact),
            };
            db::insert_snapshot(pool, &degraded).await?;
        }
    }

    Ok(created)
}
