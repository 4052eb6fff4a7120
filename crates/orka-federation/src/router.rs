use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use orka_core::config::FederationHealthThresholds;
use orka_core::storage::Collection;
use orka_core::stripe_lock::KeyedLocks;
use orka_types::{BreakerState, Cluster, ClusterStatus, OrkaError, OrkaResult, RoutingRequest};
use rand::Rng;
use tokio::sync::RwLock;

/// Cluster registry and request router. Session affinity lives only in
/// memory with a TTL; losing it on restart just means the next request for
/// that session re-routes, which is an accepted best-effort tradeoff.
#[derive(Clone)]
pub struct FederationRouter {
    clusters: Arc<Collection<Cluster>>,
    locks: KeyedLocks,
    thresholds: FederationHealthThresholds,
    affinity: Arc<RwLock<HashMap<String, (String, DateTime<Utc>)>>>,
    affinity_ttl: Duration,
}

impl FederationRouter {
    pub async fn open(base: &Path, thresholds: FederationHealthThresholds) -> anyhow::Result<Self> {
        Ok(FederationRouter {
            clusters: Arc::new(Collection::open(base, "clusters").await?),
            locks: KeyedLocks::new(),
            thresholds,
            affinity: Arc::new(RwLock::new(HashMap::new())),
            affinity_ttl: Duration::minutes(30),
        })
    }

    pub async fn register_cluster(&self, cluster: Cluster) -> OrkaResult<Cluster> {
        let id = cluster.id.clone();
        let row = self.clusters.insert(id, cluster).await?;
        Ok(row.data)
    }

    pub async fn get(&self, id: &str) -> OrkaResult<Cluster> {
        self.clusters
            .get(id)
            .await
            .map(|row| row.data)
            .ok_or_else(|| OrkaError::not_found("cluster", id))
    }

    pub async fn heartbeat(
        &self,
        id: &str,
        connectivity_success_rate: f64,
        mean_latency_ms: f64,
        error_rate: f64,
        current_agents: u32,
    ) -> OrkaResult<Cluster> {
        let _guard = self.locks.lock(id).await;
        let cluster = self.get(id).await?;
        let expected_version = cluster.version;
        let now = Utc::now();
        let row = self
            .clusters
            .update_with_optimistic_lock(id, expected_version, |c| {
                c.connectivity_success_rate = connectivity_success_rate;
                c.mean_latency_ms = mean_latency_ms;
                c.error_rate = error_rate;
                c.capacity.current_agents = current_agents;
                c.capacity.load_factor = if c.capacity.max_agents == 0 {
                    1.0
                } else {
                    current_agents as f64 / c.capacity.max_agents as f64
                };
                c.last_heartbeat = now;
                c.status = if crate::health::effective_breaker_state(c, &self.thresholds, now) == BreakerState::Open {
                    ClusterStatus::Degraded
                } else {
                    ClusterStatus::Online
                };
                c.health_score = crate::health::compute_health_score(c, &self.thresholds, now);
            })
            .await?;
        Ok(row.data)
    }

    /// Circuit breaker transition on a failed call to this cluster.
    /// `breaker_failure_count` consecutive failures opens it.
    pub async fn record_failure(&self, id: &str) -> OrkaResult<Cluster> {
        let _guard = self.locks.lock(id).await;
        let cluster = self.get(id).await?;
        let expected_version = cluster.version;
        let now = Utc::now();
        let threshold = self.thresholds.breaker_failure_count;
        let row = self
            .clusters
            .update_with_optimistic_lock(id, expected_version, |c| {
                c.consecutive_failures += 1;
                if c.breaker_state == BreakerState::HalfOpen || c.consecutive_failures >= threshold {
                    c.breaker_state = BreakerState::Open;
                    c.breaker_opened_at = Some(now);
                }
            })
            .await?;
        Ok(row.data)
    }

    /// One success in `half_open` closes the breaker; in `closed` it just
    /// resets the failure counter.
    pub async fn record_success(&self, id: &str) -> OrkaResult<Cluster> {
        let _guard = self.locks.lock(id).await;
        let cluster = self.get(id).await?;
        let expected_version = cluster.version;
        let row = self
            .clusters
            .update_with_optimistic_lock(id, expected_version, |c| {
                c.consecutive_failures = 0;
                c.breaker_state = BreakerState::Closed;
                c.breaker_opened_at = None;
            })
            .await?;
        Ok(row.data)
    }

    pub async fn route(&self, request: &RoutingRequest) -> OrkaResult<Cluster> {
        let now = Utc::now();
        if let Some(session_id) = &request.session_id {
            let affinity = self.affinity.read().await;
            if let Some((cluster_id, expires_at)) = affinity.get(session_id) {
                if *expires_at > now {
                    if let Ok(cluster) = self.get(cluster_id).await {
                        if self.is_eligible(&cluster, request, now) {
                            let cluster_id = cluster_id.clone();
                            drop(affinity);
                            self.record_affinity(session_id, &cluster_id, now).await;
                            return Ok(cluster);
                        }
                    }
                }
            }
        }

        let all = self.clusters.list().await;
        let eligible: Vec<Cluster> = all
            .into_iter()
            .map(|(_, row)| row.data)
            .filter(|c| self.is_eligible(c, request, now))
            .collect();
        if eligible.is_empty() {
            return Err(OrkaError::Validation("no eligible cluster for request".into()));
        }

        let scores: Vec<f64> = eligible
            .iter()
            .map(|c| crate::health::compute_health_score(c, &self.thresholds, now).max(0.001))
            .collect();
        let total: f64 = scores.iter().sum();
        let mut pick = rand::thread_rng().gen_range(0.0..total);
        let mut chosen = eligible.last().unwrap().clone();
        for (cluster, score) in eligible.iter().zip(scores.iter()) {
            if pick < *score {
                chosen = cluster.clone();
                break;
            }
            pick -= score;
        }

        if let Some(session_id) = &request.session_id {
            self.record_affinity(session_id, &chosen.id, now).await;
        }
        Ok(chosen)
    }

    async fn record_affinity(&self, session_id: &str, cluster_id: &str, now: DateTime<Utc>) {
        let mut affinity = self.affinity.write().await;
        affinity.insert(session_id.to_string(), (cluster_id.to_string(), now + self.affinity_ttl));
    }

    fn is_eligible(&self, cluster: &Cluster, request: &RoutingRequest, now: DateTime<Utc>) -> bool {
        if crate::health::effective_status(cluster, &self.thresholds, now) == ClusterStatus::Offline {
            return false;
        }
        if crate::health::effective_breaker_state(cluster, &self.thresholds, now) == BreakerState::Open {
            return false;
        }
        let reqs = &request.requirements;
        if !reqs.features.is_empty() && !reqs.features.is_subset(&cluster.capabilities) {
            return false;
        }
        if !reqs.models.is_empty() && !reqs.models.is_subset(&cluster.capabilities) {
            return false;
        }
        if let Some(region) = &reqs.region {
            if reqs.strict_region && &cluster.region != region {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orka_types::{ClusterCapacity, RoutingRequirements};
    use std::collections::HashSet;

    fn cluster(id: &str, region: &str) -> Cluster {
        let now = Utc::now();
        Cluster {
            id: id.to_string(),
            endpoint: format!("https://{id}"),
            region: region.to_string(),
            status: ClusterStatus::Online,
            health_score: 0.0,
            capacity: ClusterCapacity {
                max_agents: 100,
                current_agents: 0,
                load_factor: 0.0,
            },
            last_heartbeat: now,
            capabilities: HashSet::new(),
            breaker_state: BreakerState::Closed,
            consecutive_failures: 0,
            breaker_opened_at: None,
            connectivity_success_rate: 0.99,
            mean_latency_ms: 10.0,
            error_rate: 0.0,
            version: 0,
        }
    }

    async fn router() -> (FederationRouter, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("orka-federation-{}", uuid::Uuid::new_v4()));
        let router = FederationRouter::open(&dir, FederationHealthThresholds::default()).await.unwrap();
        (router, dir)
    }

    #[tokio::test]
    async fn routes_to_the_only_eligible_cluster() {
        let (router, dir) = router().await;
        router.register_cluster(cluster("c1", "us-east")).await.unwrap();
        let chosen = router.route(&RoutingRequest::default()).await.unwrap();
        assert_eq!(chosen.id, "c1");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn session_affinity_sticks_to_previous_cluster() {
        let (router, dir) = router().await;
        router.register_cluster(cluster("c1", "us-east")).await.unwrap();
        router.register_cluster(cluster("c2", "us-east")).await.unwrap();
        let request = RoutingRequest {
            session_id: Some("s1".into()),
            requirements: RoutingRequirements::default(),
        };
        let first = router.route(&request).await.unwrap();
        let second = router.route(&request).await.unwrap();
        assert_eq!(first.id, second.id);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn five_consecutive_failures_open_the_breaker() {
        let (router, dir) = router().await;
        router.register_cluster(cluster("c1", "us-east")).await.unwrap();
        for _ in 0..5 {
            router.record_failure("c1").await.unwrap();
        }
        let cluster = router.get("c1").await.unwrap();
        assert_eq!(cluster.breaker_state, BreakerState::Open);
        let err = router.route(&RoutingRequest::default()).await.unwrap_err();
        assert!(matches!(err, OrkaError::Validation(_)));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn stale_heartbeat_removes_cluster_from_routing_without_a_write() {
        let (router, dir) = router().await;
        let thresholds = FederationHealthThresholds::default();
        let mut stale = cluster("c1", "us-east");
        stale.last_heartbeat = Utc::now() - Duration::milliseconds((thresholds.dead_ms + 1) as i64);
        router.register_cluster(stale).await.unwrap();
        router.register_cluster(cluster("c2", "us-east")).await.unwrap();
        let chosen = router.route(&RoutingRequest::default()).await.unwrap();
        assert_eq!(chosen.id, "c2");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn strict_region_filters_out_mismatched_clusters() {
        let (router, dir) = router().await;
        router.register_cluster(cluster("c1", "us-east")).await.unwrap();
        router.register_cluster(cluster("c2", "eu-west")).await.unwrap();
        let request = RoutingRequest {
            session_id: None,
            requirements: RoutingRequirements {
                region: Some("eu-west".into()),
                strict_region: true,
                ..Default::default()
            },
        };
        let chosen = router.route(&request).await.unwrap();
        assert_eq!(chosen.id, "c2");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
