use std::collections::HashMap;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::models::{ChiRow, Drivers, FeedbackEvent, NetworkSnapshot};
use crate::volume;

const DOWNLOAD_POOR_MBPS: f64 = 5.0;
const DOWNLOAD_GREAT_MBPS: f64 = 100.0;
const LATENCY_GREAT_MS: f64 = 30.0;
const LATENCY_POOR_MS: f64 = 200.0;

const TOP_KEYWORD_LIMIT: usize = 10;

/// Severity weight per feedback topic. Unknown or missing topics fall back
/// to the "other" weight rather than failing.
#[derive(Debug, Clone)]
pub struct SeverityTable {
    weights: HashMap<String, f64>,
    fallback: f64,
}

impl Default for SeverityTable {
    fn default() -> Self {
        let weights = [
            ("outage", 1.0),
            ("speed", 0.8),
            ("billing", 0.6),
            ("support", 0.4),
            ("other", 0.3),
        ]
        .into_iter()
        .map(|(topic, weight)| (topic.to_string(), weight))
        .collect();
        Self {
            weights,
            fallback: 0.3,
        }
    }
}

impl SeverityTable {
    pub fn weight(&self, topic: Option<&str>) -> f64 {
        topic
            .and_then(|name| self.weights.get(name).copied())
            .unwrap_or(self.fallback)
    }
}

/// Weighting policy for the composite score, injected so tuning never
/// touches the computation itself.
#[derive(Debug, Clone)]
pub struct ScorePolicy {
    pub sentiment_weight: f64,
    pub kpi_weight: f64,
    pub severity_weight: f64,
    /// Sentiment above this counts as a kudo (strongly positive, not merely
    /// positive).
    pub kudos_cutoff: f64,
    pub kudos_unit: f64,
    pub kudos_cap: f64,
    pub spike_unit: f64,
    pub spike_cap: f64,
    pub severity: SeverityTable,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self {
            sentiment_weight: 0.55,
            kpi_weight: 0.25,
            severity_weight: 0.20,
            kudos_cutoff: 0.6,
            kudos_unit: 5.0,
            kudos_cap: 10.0,
            spike_unit: 5.0,
            spike_cap: 15.0,
            severity: SeverityTable::default(),
        }
    }
}

/// KPI health K in [0,1], 0.5 neutral. Download maps 5..100 Mbps onto 0..1,
/// latency maps 200..30 ms onto 0..1; K is the average of the two.
pub fn kpi_health(download_mbps: f64, latency_ms: f64) -> f64 {
    let dl = ((download_mbps - DOWNLOAD_POOR_MBPS) / (DOWNLOAD_GREAT_MBPS - DOWNLOAD_POOR_MBPS))
        .clamp(0.0, 1.0);
    let lt = 1.0
        - ((latency_ms - LATENCY_GREAT_MS) / (LATENCY_POOR_MS - LATENCY_GREAT_MS)).clamp(0.0, 1.0);
    (dl + lt) / 2.0
}

/// Mean sentiment across events that carry one; neutral 0 when none do.
pub fn mean_sentiment(events: &[FeedbackEvent]) -> f64 {
    let sentiments: Vec<f64> = events.iter().filter_map(|event| event.sentiment).collect();
    if sentiments.is_empty() {
        return 0.0;
    }
    sentiments.iter().sum::<f64>() / sentiments.len() as f64
}

/// Mean topic severity over negative-sentiment events, clipped to [0,1].
/// No negative events means no severity signal, not a penalty.
pub fn topic_severity_signal(events: &[FeedbackEvent], table: &SeverityTable) -> f64 {
    let severities: Vec<f64> = events
        .iter()
        .filter(|event| event.sentiment.unwrap_or(0.0) < 0.0)
        .map(|event| table.weight(event.topic.as_deref()))
        .collect();
    if severities.is_empty() {
        return 0.0;
    }
    (severities.iter().sum::<f64>() / severities.len() as f64).clamp(0.0, 1.0)
}

pub fn kudos_count(events: &[FeedbackEvent], cutoff: f64) -> u32 {
    events
        .iter()
        .filter(|event| event.sentiment.unwrap_or(0.0) > cutoff)
        .count() as u32
}

/// Top keywords across the window, lower-cased, frequency-ranked, ties kept
/// in first-seen order.
pub fn top_keywords(events: &[FeedbackEvent]) -> Vec<String> {
    let mut freq: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for event in events {
        for keyword in &event.keywords {
            let key = keyword.to_lowercase();
            if !freq.contains_key(&key) {
                order.push(key.clone());
            }
            *freq.entry(key).or_insert(0) += 1;
        }
    }
    order.sort_by_key(|key| std::cmp::Reverse(freq[key]));
    order.truncate(TOP_KEYWORD_LIMIT);
    order
}

/// Composite formula. Sentiment dominates; KPI health is recentred around its
/// neutral midpoint; severity inverts so worse topics pull the score down;
/// kudos add a capped boost; volume spikes only ever penalize.
pub fn compose_score(
    sentiment: f64,
    kpi: f64,
    severity: f64,
    kudos: u32,
    volume_z: f64,
    policy: &ScorePolicy,
) -> f64 {
    let base = 50.0
        + 50.0
            * (policy.sentiment_weight * sentiment
                + policy.kpi_weight * (kpi - 0.5) * 2.0
                + policy.severity_weight * (1.0 - severity));
    let boost = (policy.kudos_unit * kudos as f64).min(policy.kudos_cap);
    let penalty = (volume_z.max(0.0) * policy.spike_unit).min(policy.spike_cap);
    (base + boost - penalty).clamp(0.0, 100.0)
}

/// Score one already-fetched window. Total over all inputs: missing snapshot
/// degrades to neutral K = 0.5, empty windows to neutral sentiment.
pub fn score_window(
    events: &[FeedbackEvent],
    latest_snapshot: Option<&NetworkSnapshot>,
    volume_z: f64,
    policy: &ScorePolicy,
) -> (f64, Drivers) {
    let sentiment = mean_sentiment(events);
    let kpi = latest_snapshot
        .map(|snapshot| kpi_health(snapshot.download_mbps, snapshot.latency_ms))
        .unwrap_or(0.5);
    let severity = topic_severity_signal(events, &policy.severity);
    let kudos = kudos_count(events, policy.kudos_cutoff);

    let score = compose_score(sentiment, kpi, severity, kudos, volume_z, policy);
    let drivers = Drivers {
        top_keywords: top_keywords(events),
        kpi_health: kpi,
        topic_severity: severity,
        volume_z,
        kudos,
        sentiment,
    };
    (score, drivers)
}

/// Compute CHI for one region over the trailing window. Read-only.
pub async fn compute_chi_for_region(
    pool: &PgPool,
    region: &str,
    window_minutes: i64,
    policy: &ScorePolicy,
) -> anyhow::Result<(f64, Drivers)> {
    let now = Utc::now();
    let window = Duration::minutes(window_minutes.max(1));
    let events = db::fetch_events_window(pool, region, now - window, now).await?;
    let snapshot = db::latest_snapshots(pool, region, 1)
        .await?
        .into_iter()
        .next();
    let volume_z = volume::zscore_for_region(pool, region, now, window).await?;
    Ok(score_window(&events, snapshot.as_ref(), volume_z, policy))
}

/// Recompute CHI for each region and append one row per region, committed as
/// a single batch.
pub async fn recompute_and_store(
    pool: &PgPool,
    regions: &[String],
    window_minutes: i64,
    policy: &ScorePolicy,
) -> anyhow::Result<Vec<ChiRow>> {
    let now = Utc::now();
    let mut created = Vec::with_capacity(regions.len());
    for region in regions {
        let (score, drivers) = compute_chi_for_region(pool, region, window_minutes, policy).await?;
        created.push(ChiRow {
            id: Uuid::new_v4(),
            ts: now,
            region: region.clone(),
            score,
            drivers,
        });
    }
    db::insert_chi_rows(pool, &created).await?;
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(sentiment: Option<f64>, keywords: &[&str], topic: Option<&str>) -> FeedbackEvent {
        FeedbackEvent {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            region: "Dallas".to_string(),
            text: "sample feedback".to_string(),
            sentiment,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            topic: topic.map(|t| t.to_string()),
        }
    }

    #[test]
    fn kpi_health_hits_anchor_points() {
        assert_eq!(kpi_health(5.0, 200.0), 0.0);
        assert_eq!(kpi_health(100.0, 30.0), 1.0);
        assert!((kpi_health(52.5, 115.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn kpi_health_clips_out_of_range_inputs() {
        assert_eq!(kpi_health(500.0, 1.0), 1.0);
        assert_eq!(kpi_health(0.0, 900.0), 0.0);
    }

    #[test]
    fn severity_table_falls_back_for_unknown_topics() {
        let table = SeverityTable::default();
        assert_eq!(table.weight(Some("outage")), 1.0);
        assert_eq!(table.weight(Some("roaming")), 0.3);
        assert_eq!(table.weight(None), 0.3);
    }

    #[test]
    fn empty_region_scores_exactly_neutral() {
        let policy = ScorePolicy::default();
        let (score, drivers) = score_window(&[], None, 0.0, &policy);
        // S=0, K=0.5, T=0, no boost, no penalty: 50 + 50*0.20 = 60.
        assert!((score - 60.0).abs() < 1e-9);
        assert_eq!(drivers.kpi_health, 0.5);
        assert_eq!(drivers.topic_severity, 0.0);
        assert_eq!(drivers.kudos, 0);
        assert!(drivers.top_keywords.is_empty());
    }

    #[test]
    fn score_is_strictly_monotonic_in_sentiment() {
        let policy = ScorePolicy::default();
        let low = compose_score(-0.2, 0.5, 0.0, 0, 0.0, &policy);
        let mid = compose_score(0.0, 0.5, 0.0, 0, 0.0, &policy);
        let high = compose_score(0.4, 0.5, 0.0, 0, 0.0, &policy);
        assert!(low < mid && mid < high);
    }

    #[test]
    fn score_stays_within_bounds() {
        let policy = ScorePolicy::default();
        assert_eq!(compose_score(1.0, 1.0, 0.0, 10, 0.0, &policy), 100.0);
        assert_eq!(compose_score(-1.0, 0.0, 1.0, 0, 100.0, &policy), 0.0);
    }

    #[test]
    fn kudos_boost_is_capped() {
        let policy = ScorePolicy::default();
        let two = compose_score(0.0, 0.5, 0.0, 2, 0.0, &policy);
        let five = compose_score(0.0, 0.5, 0.0, 5, 0.0, &policy);
        // 2 kudos already reach the 10-point cap.
        assert_eq!(two, five);
        assert!((two - 70.0).abs() < 1e-9);
    }

    #[test]
    fn quiet_periods_never_boost_the_score() {
        let policy = ScorePolicy::default();
        let calm = compose_score(0.0, 0.5, 0.0, 0, -3.0, &policy);
        let normal = compose_score(0.0, 0.5, 0.0, 0, 0.0, &policy);
        assert_eq!(calm, normal);
    }

    #[test]
    fn spike_penalty_is_capped() {
        let policy = ScorePolicy::default();
        let big = compose_score(0.0, 0.5, 0.0, 0, 3.0, &policy);
        let bigger = compose_score(0.0, 0.5, 0.0, 0, 30.0, &policy);
        assert_eq!(big, bigger);
        assert!((big - 45.0).abs() < 1e-9);
    }

    #[test]
    fn severity_ignores_non_negative_events() {
        let table = SeverityTable::default();
        let events = vec![
            sample_event(Some(-0.5), &[], Some("outage")),
            sample_event(Some(0.8), &[], Some("outage")),
            sample_event(None, &[], Some("outage")),
        ];
        assert_eq!(topic_severity_signal(&events, &table), 1.0);
    }

    #[test]
    fn sentiment_mean_skips_unset_values() {
        let events = vec![
            sample_event(Some(0.4), &[], None),
            sample_event(None, &[], None),
            sample_event(Some(-0.2), &[], None),
        ];
        assert!((mean_sentiment(&events) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn kudos_require_strongly_positive_sentiment() {
        let events = vec![
            sample_event(Some(0.9), &[], None),
            sample_event(Some(0.6), &[], None),
            sample_event(Some(0.61), &[], None),
            sample_event(None, &[], None),
        ];
        assert_eq!(kudos_count(&events, 0.6), 2);
    }

    #[test]
    fn top_keywords_rank_by_frequency_with_first_seen_ties() {
        let events = vec![
            sample_event(None, &["Slow", "outage"], None),
            sample_event(None, &["slow", "billing"], None),
            sample_event(None, &["outage"], None),
        ];
        let keywords = top_keywords(&events);
        // slow and outage tie at 2; slow was seen first. billing trails.
        assert_eq!(keywords, vec!["slow", "outage", "billing"]);
    }

    #[test]
    fn top_keywords_truncate_to_ten() {
        let many: Vec<String> = (0..15).map(|i| format!("kw{i}")).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        let events = vec![sample_event(None, &refs, None)];
        assert_eq!(top_keywords(&events).len(), 10);
    }
}
