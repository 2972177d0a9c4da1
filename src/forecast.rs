use chrono::Duration;
use sqlx::PgPool;

use crate::db;
use crate::models::{ChiRow, ForecastPoint};

const HISTORY_ROWS: i64 = 24;
const MIN_TREND_POINTS: usize = 4;

/// Ordinary least squares of `values` against the index 0..N-1. Returns
/// (slope, intercept).
pub fn fit_line(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (i, value) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxx += dx * dx;
        sxy += dx * (value - mean_y);
    }
    let slope = if sxx == 0.0 { 0.0 } else { sxy / sxx };
    (slope, mean_y - slope * mean_x)
}

/// Project the score forward from rows in ascending time order. Fewer than
/// four rows falls back to flat persistence of the latest score; no rows
/// yields an empty forecast. Indices are equal-spaced, not wall-clock: score
/// windows are assumed roughly uniform.
pub fn project(rows: &[ChiRow], horizon_minutes: i64, step_minutes: i64) -> Vec<ForecastPoint> {
    let last = match rows.last() {
        Some(row) => row,
        None => return Vec::new(),
    };
    let steps = horizon_minutes / step_minutes.max(1);

    if rows.len() < MIN_TREND_POINTS {
        return (1..=steps)
            .map(|i| ForecastPoint {
                ts: last.ts + Duration::minutes(step_minutes * i),
                score: last.score,
            })
            .collect();
    }

    let scores: Vec<f64> = rows.iter().map(|row| row.score).collect();
    let (slope, intercept) = fit_line(&scores);
    let base_index = rows.len() as i64 - 1;
    (1..=steps)
        .map(|i| {
            let predicted = slope * (base_index + i) as f64 + intercept;
            ForecastPoint {
                ts: last.ts + Duration::minutes(step_minutes * i),
                score: predicted.clamp(0.0, 100.0),
            }
        })
        .collect()
}

/// Forecast a region's CHI trajectory from its stored history. Read-only and
/// deterministic for a fixed history.
pub async fn forecast(
    pool: &PgPool,
    region: &str,
    horizon_minutes: i64,
    step_minutes: i64,
) -> anyhow::Result<Vec<ForecastPoint>> {
    let mut rows = db::latest_chi_rows(pool, region, HISTORY_ROWS).await?;
    rows.reverse();
    Ok(project(&rows, horizon_minutes, step_minutes))
}
