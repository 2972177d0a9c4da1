use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::db;

const BASELINE_HOURS: i64 = 24;

/// Event count inside the current window `[now - window, now]`.
pub fn current_count(timestamps: &[DateTime<Utc>], now: DateTime<Utc>, window: Duration) -> i64 {
    let start = now - window;
    timestamps
        .iter()
        .filter(|ts| **ts >= start && **ts <= now)
        .count() as i64
}

/// Partition the trailing 24 hours (excluding the current window) into
/// window-sized buckets and count events in each. Buckets start at
/// `now - 24h`; the loop stops once a bucket would start inside the current
/// window, so a trailing partial bucket is dropped when the window does not
/// divide the baseline span evenly.
pub fn bucket_counts(
    timestamps: &[DateTime<Utc>],
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<i64> {
    let mut counts = Vec::new();
    let mut start = now - Duration::hours(BASELINE_HOURS);
    while start < now - window {
        let end = start + window;
        counts.push(
            timestamps
                .iter()
                .filter(|ts| **ts >= start && **ts < end)
                .count() as i64,
        );
        start = end;
    }
    counts
}

/// Standard score of the current count against the baseline buckets. Zero
/// buckets or a zero-variance history both yield 0 (no signal, not a spike).
pub fn zscore(current: i64, buckets: &[i64]) -> f64 {
    if buckets.is_empty() {
        return 0.0;
    }
    let n = buckets.len() as f64;
    let mean = buckets.iter().sum::<i64>() as f64 / n;
    let variance = buckets
        .iter()
        .map(|count| {
            let diff = *count as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    let std = variance.sqrt();
    if std == 0.0 {
        return 0.0;
    }
    (current as f64 - mean) / std
}

/// Volume z-score for a region: one timestamp fetch covering the whole
/// baseline span, bucketed in memory.
pub async fn zscore_for_region(
    pool: &PgPool,
    region: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> anyhow::Result<f64> {
    let since = now - Duration::hours(BASELINE_HOURS);
    let timestamps = db::fetch_event_timestamps(pool, region, since, now).await?;
    let current = current_count(&timestamps, now, window);
    let buckets = bucket_counts(&timestamps, now, window);
    Ok(zscore(current, &buckets))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes_ago(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
        now - Duration::minutes(minutes)
    }

    #[test]
    fn no_history_gives_no_signal() {
        assert_eq!(zscore(7, &[]), 0.0);
    }

    #[test]
    fn flat_history_gives_no_signal() {
        assert_eq!(zscore(9, &[3, 3, 3, 3]), 0.0);
    }

    #[test]
    fn spike_scores_positive_and_quiet_scores_negative() {
        // mean 2, population std 1.
        let buckets = [1, 3];
        assert!((zscore(5, &buckets) - 3.0).abs() < 1e-9);
        assert!((zscore(0, &buckets) + 2.0).abs() < 1e-9);
    }

    #[test]
    fn buckets_cover_baseline_minus_current_window() {
        let now = Utc::now();
        // 15-minute windows tile the remaining 23h45m exactly: 95 buckets.
        let counts = bucket_counts(&[], now, Duration::minutes(15));
        assert_eq!(counts.len(), 95);
        assert!(counts.iter().all(|count| *count == 0));
    }

    #[test]
    fn events_land_in_their_bucket() {
        let now = Utc::now();
        let window = Duration::minutes(60);
        let timestamps = vec![
            minutes_ago(now, 23 * 60 + 30), // first bucket
            minutes_ago(now, 23 * 60 + 10), // first bucket
            minutes_ago(now, 90),           // last full bucket
            minutes_ago(now, 30),           // current window only
        ];
        let counts = bucket_counts(&timestamps, now, window);
        assert_eq!(counts.len(), 23);
        assert_eq!(counts[0], 2);
        assert_eq!(*counts.last().unwrap(), 1);
        assert_eq!(current_count(&timestamps, now, window), 1);
    }

    #[test]
    fn trailing_partial_bucket_is_dropped() {
        let now = Utc::now();
        // 7h windows: baseline span is 17h, so the last bucket starts at
        // now-10h and runs past the window boundary; nothing starts after it.
        let counts = bucket_counts(&[], now, Duration::hours(7));
        assert_eq!(counts.len(), 3);
    }
}
