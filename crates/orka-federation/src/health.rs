use chrono::{DateTime, Utc};
use orka_core::config::FederationHealthThresholds;
use orka_types::{BreakerState, Cluster, ClusterStatus};

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// `breaker_state` stored on a cluster only flips `open -> half_open` when
/// something calls back into the cluster; routing needs the cooldown-aware
/// value without waiting for that, so this computes it from `opened_at` and
/// `now` instead of mutating anything.
pub fn effective_breaker_state(cluster: &Cluster, thresholds: &FederationHealthThresholds, now: DateTime<Utc>) -> BreakerState {
    match cluster.breaker_state {
        BreakerState::Open => match cluster.breaker_opened_at {
            Some(opened_at) if (now - opened_at).num_milliseconds() as u64 >= thresholds.breaker_cooldown_ms => {
                BreakerState::HalfOpen
            }
            _ => BreakerState::Open,
        },
        other => other,
    }
}

/// A cluster whose own `status` field goes stale the moment heartbeats stop
/// arriving: nothing else writes to it once the last heartbeat lands. This
/// recomputes the coarse status from heartbeat age the same way
/// `effective_breaker_state` recomputes the breaker, so a crashed cluster
/// that never heartbeats again is demoted to `degraded` past `stale_ms` and
/// `offline` past `dead_ms` without needing a background sweep.
pub fn effective_status(cluster: &Cluster, thresholds: &FederationHealthThresholds, now: DateTime<Utc>) -> ClusterStatus {
    let age_ms = (now - cluster.last_heartbeat).num_milliseconds().max(0) as u64;
    if age_ms >= thresholds.dead_ms {
        return ClusterStatus::Offline;
    }
    if age_ms >= thresholds.stale_ms {
        return ClusterStatus::Degraded;
    }
    if effective_breaker_state(cluster, thresholds, now) == BreakerState::Open {
        return ClusterStatus::Degraded;
    }
    ClusterStatus::Online
}

/// Weighted health score: connectivity 0.25, inverse latency 0.20, inverse
/// error rate 0.25, spare capacity 0.20, heartbeat freshness 0.10, each
/// normalized to [0,1]. Breaker state gates the connectivity term directly.
pub fn compute_health_score(cluster: &Cluster, thresholds: &FederationHealthThresholds, now: DateTime<Utc>) -> f64 {
    let breaker = effective_breaker_state(cluster, thresholds, now);
    let connectivity = match breaker {
        BreakerState::Open => 0.0,
        BreakerState::HalfOpen => clamp01(cluster.connectivity_success_rate) * 0.5,
        BreakerState::Closed => clamp01(cluster.connectivity_success_rate),
    };

    let inverse_latency = clamp01(1.0 / (1.0 + cluster.mean_latency_ms / 100.0));
    let inverse_error_rate = clamp01(1.0 - cluster.error_rate);
    let spare_capacity = clamp01(1.0 - cluster.capacity.load_factor);

    let age_ms = (now - cluster.last_heartbeat).num_milliseconds().max(0) as u64;
    let heartbeat_freshness = if age_ms >= thresholds.dead_ms {
        0.0
    } else if age_ms <= thresholds.stale_ms {
        1.0
    } else {
        let span = (thresholds.dead_ms - thresholds.stale_ms).max(1) as f64;
        clamp01(1.0 - (age_ms - thresholds.stale_ms) as f64 / span)
    };

    connectivity * 0.25
        + inverse_latency * 0.20
        + inverse_error_rate * 0.25
        + spare_capacity * 0.20
        + heartbeat_freshness * 0.10
}

#[cfg(test)]
mod tests {
    use super::*;
    use orka_types::{BreakerState, ClusterCapacity, ClusterStatus};
    use std::collections::HashSet;

    fn cluster(now: DateTime<Utc>) -> Cluster {
        Cluster {
            id: "c1".into(),
            endpoint: "https://c1".into(),
            region: "us-east".into(),
            status: ClusterStatus::Online,
            health_score: 0.0,
            capacity: ClusterCapacity {
                max_agents: 100,
                current_agents: 10,
                load_factor: 0.1,
            },
            last_heartbeat: now,
            capabilities: HashSet::new(),
            breaker_state: BreakerState::Closed,
            consecutive_failures: 0,
            breaker_opened_at: None,
            connectivity_success_rate: 0.99,
            mean_latency_ms: 20.0,
            error_rate: 0.01,
            version: 0,
        }
    }

    #[test]
    fn healthy_cluster_scores_near_one() {
        let now = Utc::now();
        let thresholds = FederationHealthThresholds::default();
        let score = compute_health_score(&cluster(now), &thresholds, now);
        assert!(score > 0.9, "expected high score, got {score}");
    }

    #[test]
    fn open_breaker_zeroes_connectivity_term() {
        let now = Utc::now();
        let thresholds = FederationHealthThresholds::default();
        let mut c = cluster(now);
        c.breaker_state = BreakerState::Open;
        c.breaker_opened_at = Some(now);
        let score = compute_health_score(&c, &thresholds, now);
        let mut without_breaker = cluster(now);
        without_breaker.connectivity_success_rate = 0.0;
        let baseline = compute_health_score(&without_breaker, &thresholds, now);
        assert!((score - baseline).abs() < 1e-9);
    }

    #[test]
    fn dead_heartbeat_demotes_status_to_offline_without_a_write() {
        let now = Utc::now();
        let thresholds = FederationHealthThresholds::default();
        let mut c = cluster(now);
        c.status = ClusterStatus::Online;
        c.last_heartbeat = now - chrono::Duration::milliseconds((thresholds.dead_ms + 1) as i64);
        assert_eq!(effective_status(&c, &thresholds, now), ClusterStatus::Offline);
    }

    #[test]
    fn stale_heartbeat_demotes_status_to_degraded() {
        let now = Utc::now();
        let thresholds = FederationHealthThresholds::default();
        let mut c = cluster(now);
        c.status = ClusterStatus::Online;
        c.last_heartbeat = now - chrono::Duration::milliseconds((thresholds.stale_ms + 1) as i64);
        assert_eq!(effective_status(&c, &thresholds, now), ClusterStatus::Degraded);
    }

    #[test]
    fn stale_heartbeat_decays_freshness_term() {
        let now = Utc::now();
        let thresholds = FederationHealthThresholds::default();
        let mut c = cluster(now);
        c.last_heartbeat = now - chrono::Duration::milliseconds((thresholds.dead_ms + 1) as i64);
        let score = compute_health_score(&c, &thresholds, now);
        let fresh = compute_health_score(&cluster(now), &thresholds, now);
        assert!(score < fresh);
    }
}
