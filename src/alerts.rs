use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::models::{Alert, ChiRow, NetworkSnapshot};

const REASON_CHI_DROP: &str = "CHI drop ≥10 and <60";
const REASON_VOLUME_SPIKE: &str = "Volume spike ≥2σ";
const REASON_KPI_DEGRADED: &str = "KPI degraded ≥25%";

/// Alert thresholds and the fixed fallback recommendation, injected so they
/// can be tuned without touching the rule evaluation.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    pub chi_floor: f64,
    pub min_drop: f64,
    pub volume_z_threshold: f64,
    pub download_drop_ratio: f64,
    pub latency_rise_ratio: f64,
    pub recommendation: Vec<String>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            chi_floor: 60.0,
            min_drop: 10.0,
            volume_z_threshold: 2.0,
            download_drop_ratio: 0.75,
            latency_rise_ratio: 1.25,
            recommendation: vec![
                "Investigate local towers".to_string(),
                "Notify customers via SMS".to_string(),
                "Escalate to NOC if persists".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertDraft {
    pub chi_before: Option<f64>,
    pub chi_after: f64,
    pub reason: String,
}

/// Compare the two most recent snapshots (newest first). Download falling
/// below 75% of the prior value or latency rising above 125% both count as
/// degradation. Fewer than two snapshots can never trigger.
fn kpi_degraded(snapshots: &[NetworkSnapshot], policy: &AlertPolicy) -> bool {
    let (latest, prev) = match (snapshots.first(), snapshots.get(1)) {
        (Some(latest), Some(prev)) => (latest, prev),
        _ => return false,
    };
    if prev.download_mbps > 0.0 && latest.download_mbps < policy.download_drop_ratio * prev.download_mbps {
        return true;
    }
    if prev.latency_ms > 0.0 && latest.latency_ms > policy.latency_rise_ratio * prev.latency_ms {
        return true;
    }
    false
}

/// Evaluate the three alert rules for one region against its two most recent
/// CHI rows and KPI snapshots. Returns None when nothing triggered; the
/// common case must stay silent.
pub fn evaluate_region(
    latest: &ChiRow,
    previous: Option<&ChiRow>,
    snapshots: &[NetworkSnapshot],
    policy: &AlertPolicy,
) -> Option<AlertDraft> {
    let chi_before = previous.map(|row| row.score);
    let chi_after = latest.score;
    // Without history the drop is 0, so rule A cannot fire on its own.
    let drop = chi_before.map(|before| before - chi_after).unwrap_or(0.0);

    let mut reasons: Vec<&str> = Vec::new();
    if chi_after < policy.chi_floor && drop >= policy.min_drop {
        reasons.push(REASON_CHI_DROP);
    }
    if latest.drivers.volume_z >= policy.volume_z_threshold {
        reasons.push(REASON_VOLUME_SPIKE);
    }
    if kpi_degraded(snapshots, policy) {
        reasons.push(REASON_KPI_DEGRADED);
    }
    if reasons.is_empty() {
        return None;
    }

    let mut reason = reasons.join(" + ");
    let topics: Vec<&str> = latest
        .drivers
        .top_keywords
        .iter()
        .take(3)
        .map(String::as_str)
        .collect();
    if !topics.is_empty() {
        reason.push_str(&format!(" | topics: {}", topics.join(", ")));
    }
    Some(AlertDraft {
        chi_before,
        chi_after,
        reason,
    })
}

/// Run the rules for every region and persist all created alerts in one
/// batch. Stateless per invocation: re-running against unchanged data
/// creates duplicate rows, so callers must avoid redundant invocation.
pub async fn generate_alerts(
    pool: &PgPool,
    regions: &[String],
    policy: &AlertPolicy,
) -> anyhow::Result<Vec<Alert>> {
    let now = Utc::now();
    let mut created = Vec::new();
    for region in regions {
        let rows = db::latest_chi_rows(pool, region, 2).await?;
        let latest = match rows.first() {
            Some(row) => row,
            None => continue,
        };
        let snapshots = db::latest_snapshots(pool, region, 2).await?;
        if let Some(draft) = evaluate_region(latest, rows.get(1), &snapshots, policy) {
            created.push(Alert {
                id: Uuid::new_v4(),
                ts: now,
                region: region.clone(),
                chi_before: draft.chi_before,
                chi_after: draft.chi_after,
                reason: draft.reason,
                recommendation: policy.recommendation.clone(),
            });
        }
    }
    if !created.is_empty() {
        db::insert_alerts(pool, &created).await?;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Drivers;
    use chrono::{Duration, Utc};

    fn chi_row(score: f64, volume_z: f64, keywords: &[&str]) -> ChiRow {
        ChiRow {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            region: "Dallas".to_string(),
            score,
            drivers: Drivers {
                top_keywords: keywords.iter().map(|k| k.to_string()).collect(),
                kpi_health: 0.5,
                topic_severity: 0.0,
                volume_z,
                kudos: 0,
                sentiment: 0.0,
            },
        }
    }

    fn snapshot(download_mbps: f64, latency_ms: f64, minutes_ago: i64) -> NetworkSnapshot {
        NetworkSnapshot {
            id: Uuid::new_v4(),
            ts: Utc::now() - Duration::minutes(minutes_ago),
            region: "Dallas".to_string(),
            download_mbps,
            latency_ms,
        }
    }

    #[test]
    fn moderate_drop_triggers_rule_a() {
        let policy = AlertPolicy::default();
        let latest = chi_row(55.0, 0.0, &[]);
        let previous = chi_row(70.0, 0.0, &[]);
        let draft = evaluate_region(&latest, Some(&previous), &[], &policy).unwrap();
        assert_eq!(draft.chi_before, Some(70.0));
        assert_eq!(draft.chi_after, 55.0);
        assert!(draft.reason.contains("CHI drop ≥10 and <60"));
    }

    #[test]
    fn low_score_without_drop_stays_silent() {
        let policy = AlertPolicy::default();
        let latest = chi_row(55.0, 0.0, &[]);
        let previous = chi_row(58.0, 0.0, &[]);
        assert!(evaluate_region(&latest, Some(&previous), &[], &policy).is_none());
    }

    #[test]
    fn missing_history_cannot_trigger_the_drop_rule() {
        let policy = AlertPolicy::default();
        let latest = chi_row(20.0, 0.0, &[]);
        assert!(evaluate_region(&latest, None, &[], &policy).is_none());
    }

    #[test]
    fn volume_spike_triggers_rule_b() {
        let policy = AlertPolicy::default();
        let latest = chi_row(80.0, 2.0, &[]);
        let draft = evaluate_region(&latest, None, &[], &policy).unwrap();
        assert!(draft.reason.contains("Volume spike ≥2σ"));
        assert_eq!(draft.chi_before, None);
    }

    #[test]
    fn download_collapse_triggers_rule_c() {
        let policy = AlertPolicy::default();
        let latest = chi_row(80.0, 0.0, &[]);
        // 70 < 0.75 * 100, independent of CHI values.
        let snapshots = vec![snapshot(70.0, 40.0, 0), snapshot(100.0, 40.0, 15)];
        let draft = evaluate_region(&latest, None, &snapshots, &policy).unwrap();
        assert_eq!(draft.reason, "KPI degraded ≥25%");
    }

    #[test]
    fn latency_rise_triggers_rule_c() {
        let policy = AlertPolicy::default();
        let latest = chi_row(80.0, 0.0, &[]);
        let snapshots = vec![snapshot(90.0, 130.0, 0), snapshot(90.0, 100.0, 15)];
        assert!(evaluate_region(&latest, None, &snapshots, &policy).is_some());
    }

    #[test]
    fn single_snapshot_cannot_trigger_rule_c() {
        let policy = AlertPolicy::default();
        let latest = chi_row(80.0, 0.0, &[]);
        let snapshots = vec![snapshot(1.0, 500.0, 0)];
        assert!(evaluate_region(&latest, None, &snapshots, &policy).is_none());
    }

    #[test]
    fn reasons_join_and_carry_top_topics() {
        let policy = AlertPolicy::default();
        let latest = chi_row(55.0, 3.1, &["outage", "slow", "billing", "support"]);
        let previous = chi_row(70.0, 0.0, &[]);
        let draft = evaluate_region(&latest, Some(&previous), &[], &policy).unwrap();
        assert_eq!(
            draft.reason,
            "CHI drop ≥10 and <60 + Volume spike ≥2σ | topics: outage, slow, billing"
        );
    }
}
