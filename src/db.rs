use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Alert, ChiRow, Drivers, FeedbackEvent, NetworkSnapshot};

const SCHEMA_DDL: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS chi_engine",
    "CREATE TABLE IF NOT EXISTS chi_engine.events (
        id UUID PRIMARY KEY,
        ts TIMESTAMPTZ NOT NULL,
        region TEXT NOT NULL,
        body TEXT NOT NULL,
        sentiment DOUBLE PRECISION,
        keywords TEXT[] NOT NULL DEFAULT '{}',
        topic TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_region_ts ON chi_engine.events (region, ts)",
    "CREATE TABLE IF NOT EXISTS chi_engine.kpi_snapshots (
        id UUID PRIMARY KEY,
        ts TIMESTAMPTZ NOT NULL,
        region TEXT NOT NULL,
        download_mbps DOUBLE PRECISION NOT NULL,
        latency_ms DOUBLE PRECISION NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_kpi_region_ts ON chi_engine.kpi_snapshots (region, ts)",
    "CREATE TABLE IF NOT EXISTS chi_engine.chi_scores (
        id UUID PRIMARY KEY,
        ts TIMESTAMPTZ NOT NULL,
        region TEXT NOT NULL,
        score DOUBLE PRECISION NOT NULL,
        drivers JSONB NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_chi_region_ts ON chi_engine.chi_scores (region, ts)",
    "CREATE TABLE IF NOT EXISTS chi_engine.alerts (
        id UUID PRIMARY KEY,
        ts TIMESTAMPTZ NOT NULL,
        region TEXT NOT NULL,
        chi_before DOUBLE PRECISION,
        chi_after DOUBLE PRECISION NOT NULL,
        reason TEXT NOT NULL,
        recommendation TEXT[] NOT NULL DEFAULT '{}'
    )",
    "CREATE INDEX IF NOT EXISTS idx_alerts_region_ts ON chi_engine.alerts (region, ts)",
];

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    for statement in SCHEMA_DDL {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("schema statement failed")?;
    }
    Ok(())
}

/// Insert one feedback event; returns 1 when a new row landed, 0 when the id
/// already existed.
pub async fn insert_event(pool: &PgPool, event: &FeedbackEvent) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO chi_engine.events (id, ts, region, body, sentiment, keywords, topic)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(event.id)
    .bind(event.ts)
    .bind(&event.region)
    .bind(&event.text)
    .bind(event.sentiment)
    .bind(&event.keywords[..])
    .bind(event.topic.as_deref())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn insert_snapshot(pool: &PgPool, snapshot: &NetworkSnapshot) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO chi_engine.kpi_snapshots (id, ts, region, download_mbps, latency_ms)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(snapshot.id)
    .bind(snapshot.ts)
    .bind(&snapshot.region)
    .bind(snapshot.download_mbps)
    .bind(snapshot.latency_ms)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn fetch_events_window(
    pool: &PgPool,
    region: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> anyhow::Result<Vec<FeedbackEvent>> {
    let rows = sqlx::query(
        "SELECT id, ts, region, body, sentiment, keywords, topic
         FROM chi_engine.events
         WHERE region = $1 AND ts >= $2 AND ts <= $3
         ORDER BY ts",
    )
    .bind(region)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| FeedbackEvent {
            id: row.get("id"),
            ts: row.get("ts"),
            region: row.get("region"),
            text: row.get("body"),
            sentiment: row.get("sentiment"),
            keywords: row.get("keywords"),
            topic: row.get("topic"),
        })
        .collect())
}

/// Timestamps only, for volume baselining over the trailing day.
pub async fn fetch_event_timestamps(
    pool: &PgPool,
    region: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> anyhow::Result<Vec<DateTime<Utc>>> {
    let rows = sqlx::query(
        "SELECT ts FROM chi_engine.events
         WHERE region = $1 AND ts >= $2 AND ts <= $3
         ORDER BY ts",
    )
    .bind(region)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|row| row.get("ts")).collect())
}

/// Most recent snapshots for a region, newest first.
pub async fn latest_snapshots(
    pool: &PgPool,
    region: &str,
    limit: i64,
) -> anyhow::Result<Vec<NetworkSnapshot>> {
    let rows = sqlx::query(
        "SELECT id, ts, region, download_mbps, latency_ms
         FROM chi_engine.kpi_snapshots
         WHERE region = $1
         ORDER BY ts DESC
         LIMIT $2",
    )
    .bind(region)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| NetworkSnapshot {
            id: row.get("id"),
            ts: row.get("ts"),
            region: row.get("region"),
            download_mbps: row.get("download_mbps"),
            latency_ms: row.get("latency_ms"),
        })
        .collect())
}

/// Most recent CHI rows for a region, newest first.
pub async fn latest_chi_rows(pool: &PgPool, region: &str, limit: i64) -> anyhow::Result<Vec<ChiRow>> {
    let rows = sqlx::query(
        "SELECT id, ts, region, score, drivers
         FROM chi_engine.chi_scores
         WHERE region = $1
         ORDER BY ts DESC
         LIMIT $2",
    )
    .bind(region)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let Json(drivers) = row.get::<Json<Drivers>, _>("drivers");
            ChiRow {
                id: row.get("id"),
                ts: row.get("ts"),
                region: row.get("region"),
                score: row.get("score"),
                drivers,
            }
        })
        .collect())
}

/// Append CHI rows as one batch. All-or-nothing at the batch boundary.
pub async fn insert_chi_rows(pool: &PgPool, rows: &[ChiRow]) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO chi_engine.chi_scores (id, ts, region, score, drivers)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(row.id)
        .bind(row.ts)
        .bind(&row.region)
        .bind(row.score)
        .bind(Json(&row.drivers))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Append alerts as one batch, committed after every region was evaluated.
pub async fn insert_alerts(pool: &PgPool, alerts: &[Alert]) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    for alert in alerts {
        sqlx::query(
            r#"
            INSERT INTO chi_engine.alerts
            (id, ts, region, chi_before, chi_after, reason, recommendation)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(alert.id)
        .bind(alert.ts)
        .bind(&alert.region)
        .bind(alert.chi_before)
        .bind(alert.chi_after)
        .bind(&alert.reason)
        .bind(&alert.recommendation[..])
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Load a small fixed data set so the score, alert, and forecast commands
/// have something to chew on. Idempotent via fixed ids.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let now = Utc::now();

    let events = [
        (
            "f0a1c2d3-0001-4a61-9d1a-000000000001",
            "Dallas",
            "Massive outage near downtown, no service at all",
            -0.9,
            &["outage", "down", "no service"][..],
            Some("outage"),
            8,
        ),
        (
            "f0a1c2d3-0002-4a61-9d1a-000000000002",
            "Dallas",
            "Speeds crawling since this morning",
            -0.6,
            &["slow", "speed"][..],
            Some("speed"),
            6,
        ),
        (
            "f0a1c2d3-0003-4a61-9d1a-000000000003",
            "Austin",
            "Billing charged me twice this month",
            -0.4,
            &["billing", "charge"][..],
            Some("billing"),
            9,
        ),
        (
            "f0a1c2d3-0004-4a61-9d1a-000000000004",
            "Austin",
            "Great coverage on the new tower, super fast",
            0.8,
            &["fast", "coverage"][..],
            None,
            5,
        ),
        (
            "f0a1c2d3-0005-4a61-9d1a-000000000005",
            "Seattle",
            "Support agent sorted my ticket quickly, kudos",
            0.7,
            &["support", "kudos"][..],
            Some("support"),
            4,
        ),
        (
            "f0a1c2d3-0006-4a61-9d1a-000000000006",
            "Seattle",
            "Latency spikes every evening",
            -0.5,
            &["latency", "ping"][..],
            Some("speed"),
            7,
        ),
    ];

    for (id, region, body, sentiment, keywords, topic, minutes_ago) in events {
        let event = FeedbackEvent {
            id: Uuid::parse_str(id)?,
            ts: now - Duration::minutes(minutes_ago),
            region: region.to_string(),
            text: body.to_string(),
            sentiment: Some(sentiment),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            topic: topic.map(|t| t.to_string()),
        };
        insert_event(pool, &event).await?;
    }

    let snapshots = [
        ("a4b5c6d7-0001-4f2e-8c3b-000000000001", "Dallas", 95.0, 38.0, 20),
        ("a4b5c6d7-0002-4f2e-8c3b-000000000002", "Dallas", 62.0, 55.0, 5),
        ("a4b5c6d7-0003-4f2e-8c3b-000000000003", "Austin", 88.0, 42.0, 20),
        ("a4b5c6d7-0004-4f2e-8c3b-000000000004", "Austin", 90.0, 40.0, 5),
        ("a4b5c6d7-0005-4f2e-8c3b-000000000005", "Seattle", 75.0, 60.0, 20),
        ("a4b5c6d7-0006-4f2e-8c3b-000000000006", "Seattle", 72.0, 85.0, 5),
    ];

    for (id, region, download_mbps, latency_ms, minutes_ago) in snapshots {
        let snapshot = NetworkSnapshot {
            id: Uuid::parse_str(id)?,
            ts: now - Duration::minutes(minutes_ago),
            region: region.to_string(),
            download_mbps,
            latency_ms,
        };
        insert_snapshot(pool, &snapshot).await?;
    }

    Ok(())
}

/// Import pre-classified feedback events from CSV. Columns: ts (RFC 3339),
/// region, body, sentiment (optional), keywords (optional, ';'-separated),
/// topic (optional), id (optional; generated when absent).
pub async fn import_events_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        ts: DateTime<Utc>,
        region: String,
        body: String,
        sentiment: Option<f64>,
        keywords: Option<String>,
        topic: Option<String>,
        id: Option<Uuid>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let keywords = row
            .keywords
            .as_deref()
            .unwrap_or("")
            .split(';')
            .filter(|k| !k.is_empty())
            .map(|k| k.trim().to_string())
            .collect();
        let event = FeedbackEvent {
            id: row.id.unwrap_or_else(Uuid::new_v4),
            ts: row.ts,
            region: row.region,
            text: row.body,
            sentiment: row.sentiment,
            keywords,
            topic: row.topic,
        };
        inserted += insert_event(pool, &event).await? as usize;
    }

    Ok(inserted)
}

/// Import KPI snapshots from CSV. Columns: ts, region, download_mbps,
/// latency_ms, id (optional).
pub async fn import_kpis_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        ts: DateTime<Utc>,
        region: String,
        download_mbps: f64,
        latency_ms: f64,
        id: Option<Uuid>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let snapshot = NetworkSnapshot {
            id: row.id.unwrap_or_else(Uuid::new_v4),
            ts: row.ts,
            region: row.region,
            download_mbps: row.download_mbps,
            latency_ms: row.latency_ms,
        };
        inserted += insert_snapshot(pool, &snapshot).await? as usize;
    }

    Ok(inserted)
}
