use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event journal on-wire format between control-plane nodes. Numeric fields
/// use 64-bit integers; payload stays opaque to the wire layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub payload: Value,
    pub metadata: Value,
}

impl From<orka_types::Event> for WireEvent {
    fn from(e: orka_types::Event) -> Self {
        WireEvent {
            id: e.id,
            event_type: e.event_type,
            sequence: e.sequence,
            timestamp: e.timestamp,
            source: e.source,
            payload: e.payload,
            metadata: serde_json::to_value(e.metadata).unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireCluster {
    pub id: String,
    pub endpoint: String,
    pub region: String,
    pub status: String,
    pub health_score: f64,
    pub capabilities: Vec<String>,
}

impl From<&orka_types::Cluster> for WireCluster {
    fn from(c: &orka_types::Cluster) -> Self {
        WireCluster {
            id: c.id.clone(),
            endpoint: c.endpoint.clone(),
            region: c.region.clone(),
            status: format!("{:?}", c.status).to_lowercase(),
            health_score: c.health_score,
            capabilities: c.capabilities.iter().cloned().collect(),
        }
    }
}

/// Federation RPC: route a session to a peer cluster, or heartbeat one's own
/// health snapshot into another node's registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationHeartbeat {
    pub cluster: WireCluster,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationRouteRequest {
    pub session_id: Option<String>,
    pub requirements: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationRouteResponse {
    pub cluster_id: String,
    pub endpoint: String,
}
