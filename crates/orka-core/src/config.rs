use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;
use tokio::sync::RwLock;

/// The configuration options recognized by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "defaults::max_agents_per_team")]
    pub max_agents_per_team: u32,
    #[serde(default = "defaults::default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "defaults::graceful_kill_timeout_ms")]
    pub graceful_kill_timeout_ms: u64,
    #[serde(default)]
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub transaction: TransactionConfig,
    #[serde(default = "defaults::workflow_default_max_concurrency")]
    pub workflow_default_max_concurrency: u32,
    #[serde(default)]
    pub federation: FederationConfig,
    #[serde(default = "defaults::supervisor_tick_ms")]
    pub supervisor_tick_ms: u64,
    #[serde(default)]
    pub budget: BudgetConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        serde_json::from_value(json!({})).expect("defaults must deserialize")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackpressurePolicy {
    DropOldest,
    DropNewest,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "defaults::event_bus_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "defaults::event_bus_backpressure_policy")]
    pub backpressure_policy: BackpressurePolicy,
    #[serde(default = "defaults::event_bus_stalled_timeout_ms")]
    pub stalled_timeout_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        EventBusConfig {
            buffer_size: defaults::event_bus_buffer_size(),
            backpressure_policy: defaults::event_bus_backpressure_policy(),
            stalled_timeout_ms: defaults::event_bus_stalled_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    #[serde(default = "defaults::transaction_default_isolation")]
    pub default_isolation: IsolationLevel,
    #[serde(default = "defaults::transaction_max_retries")]
    pub max_retries: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            default_isolation: defaults::transaction_default_isolation(),
            max_retries: defaults::transaction_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationHealthThresholds {
    #[serde(default = "defaults::federation_stale_ms")]
    pub stale_ms: u64,
    #[serde(default = "defaults::federation_dead_ms")]
    pub dead_ms: u64,
    #[serde(default = "defaults::breaker_failure_count")]
    pub breaker_failure_count: u32,
    #[serde(default = "defaults::breaker_cooldown_ms")]
    pub breaker_cooldown_ms: u64,
}

impl Default for FederationHealthThresholds {
    fn default() -> Self {
        FederationHealthThresholds {
            stale_ms: defaults::federation_stale_ms(),
            dead_ms: defaults::federation_dead_ms(),
            breaker_failure_count: defaults::breaker_failure_count(),
            breaker_cooldown_ms: defaults::breaker_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default)]
    pub health_thresholds: FederationHealthThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "defaults::budget_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default = "defaults::budget_critical_threshold")]
    pub critical_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        BudgetConfig {
            warning_threshold: defaults::budget_warning_threshold(),
            critical_threshold: defaults::budget_critical_threshold(),
        }
    }
}

mod defaults {
    use super::{BackpressurePolicy, IsolationLevel};

    pub fn max_agents_per_team() -> u32 {
        50
    }
    pub fn default_max_retries() -> u32 {
        3
    }
    pub fn graceful_kill_timeout_ms() -> u64 {
        10_000
    }
    pub fn event_bus_buffer_size() -> usize {
        2048
    }
    pub fn event_bus_backpressure_policy() -> BackpressurePolicy {
        BackpressurePolicy::DropOldest
    }
    pub fn event_bus_stalled_timeout_ms() -> u64 {
        30_000
    }
    pub fn transaction_default_isolation() -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }
    pub fn transaction_max_retries() -> u32 {
        3
    }
    pub fn workflow_default_max_concurrency() -> u32 {
        4
    }
    pub fn federation_stale_ms() -> u64 {
        15_000
    }
    pub fn federation_dead_ms() -> u64 {
        60_000
    }
    pub fn breaker_failure_count() -> u32 {
        5
    }
    pub fn breaker_cooldown_ms() -> u64 {
        60_000
    }
    pub fn supervisor_tick_ms() -> u64 {
        15_000
    }
    pub fn budget_warning_threshold() -> f64 {
        0.75
    }
    pub fn budget_critical_threshold() -> f64 {
        0.90
    }
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    file: Value,
    env: Value,
    cli: Value,
}

/// Layered configuration store: built-in defaults < on-disk file < environment
/// (`ORKA_*`) < explicit CLI overrides, deep-merged on every read.
#[derive(Clone)]
pub struct ConfigStore {
    file_path: PathBuf,
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn new(path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let file_path = path.as_ref().to_path_buf();
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = read_json_file(&file_path).await.unwrap_or_else(|_| empty_object());

        let layers = ConfigLayers {
            file,
            env: env_layer(),
            cli: cli_overrides.unwrap_or_else(empty_object),
        };

        let store = Self {
            file_path,
            layers: Arc::new(RwLock::new(layers)),
        };
        store.save_file().await?;
        Ok(store)
    }

    pub async fn get(&self) -> AppConfig {
        let merged = self.get_effective_value().await;
        serde_json::from_value(merged).unwrap_or_default()
    }

    pub async fn get_effective_value(&self) -> Value {
        let layers = self.layers.read().await.clone();
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.file);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.cli);
        merged
    }

    pub async fn patch_file(&self, patch: Value) -> anyhow::Result<Value> {
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.file, &patch);
        }
        self.save_file().await?;
        Ok(self.get_effective_value().await)
    }

    async fn save_file(&self) -> anyhow::Result<()> {
        let layers = self.layers.read().await;
        write_json_file(&self.file_path, &layers.file).await
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

async fn write_json_file(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).await?;
    Ok(())
}

/// Maps `ORKA_*` environment variables onto the same nested shape as the
/// config file, so both merge through the same `deep_merge`.
fn env_layer() -> Value {
    let mut root = empty_object();
    let Value::Object(map) = &mut root else {
        unreachable!()
    };

    if let Ok(v) = std::env::var("ORKA_MAX_AGENTS_PER_TEAM") {
        if let Ok(n) = v.parse::<u32>() {
            map.insert("max_agents_per_team".into(), json!(n));
        }
    }
    if let Ok(v) = std::env::var("ORKA_DEFAULT_MAX_RETRIES") {
        if let Ok(n) = v.parse::<u32>() {
            map.insert("default_max_retries".into(), json!(n));
        }
    }
    if let Ok(v) = std::env::var("ORKA_SUPERVISOR_TICK_MS") {
        if let Ok(n) = v.parse::<u64>() {
            map.insert("supervisor_tick_ms".into(), json!(n));
        }
    }

    root
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

pub fn resolve_global_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ORKA_STATE_DIR") {
        return PathBuf::from(path).join("config.json");
    }
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("orka").join("config.json");
    }
    PathBuf::from(".orka/config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_apply_when_file_is_empty() {
        let dir = std::env::temp_dir().join(format!("orka-config-{}", uuid::Uuid::new_v4()));
        let store = ConfigStore::new(dir.join("config.json"), None).await.unwrap();
        let cfg = store.get().await;
        assert_eq!(cfg.max_agents_per_team, 50);
        assert_eq!(cfg.budget.warning_threshold, 0.75);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn patch_overrides_default_and_persists() {
        let dir = std::env::temp_dir().join(format!("orka-config-{}", uuid::Uuid::new_v4()));
        let store = ConfigStore::new(dir.join("config.json"), None).await.unwrap();
        store
            .patch_file(json!({"max_agents_per_team": 10}))
            .await
            .unwrap();
        let cfg = store.get().await;
        assert_eq!(cfg.max_agents_per_team, 10);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn cli_overrides_win_over_file_and_env() {
        let dir = std::env::temp_dir().join(format!("orka-config-{}", uuid::Uuid::new_v4()));
        let store = ConfigStore::new(dir.join("config.json"), Some(json!({"default_max_retries": 7})))
            .await
            .unwrap();
        store
            .patch_file(json!({"default_max_retries": 2}))
            .await
            .unwrap();
        let cfg = store.get().await;
        assert_eq!(cfg.default_max_retries, 7);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
