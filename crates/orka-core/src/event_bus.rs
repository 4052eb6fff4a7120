use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orka_types::{Event, EventMetadata, NewEvent};
use tokio::sync::{Mutex, Notify, RwLock};

use crate::config::{BackpressurePolicy, EventBusConfig};
use crate::storage::Collection;

/// A single subscriber's bounded buffer and backpressure policy.
/// `notify_space` wakes a publisher blocked on this buffer once a consumer
/// drains it; `notify_item` wakes a consumer waiting for new items.
struct SubscriberBuffer {
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    policy: BackpressurePolicy,
    notify_item: Notify,
    notify_space: Notify,
    patterns: Vec<String>,
}

enum PushOutcome {
    Delivered,
    Dropped,
    Full,
}

impl SubscriberBuffer {
    async fn try_push(&self, event: Event) -> PushOutcome {
        let mut queue = self.queue.lock().await;
        if queue.len() < self.capacity {
            queue.push_back(event);
            drop(queue);
            self.notify_item.notify_one();
            return PushOutcome::Delivered;
        }
        match self.policy {
            BackpressurePolicy::DropOldest => {
                queue.pop_front();
                queue.push_back(event);
                drop(queue);
                self.notify_item.notify_one();
                PushOutcome::Delivered
            }
            BackpressurePolicy::DropNewest => PushOutcome::Dropped,
            BackpressurePolicy::Block => PushOutcome::Full,
        }
    }

    async fn pop(&self) -> Event {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(event) = queue.pop_front() {
                    drop(queue);
                    self.notify_space.notify_one();
                    return event;
                }
            }
            self.notify_item.notified().await;
        }
    }
}

/// Handle returned by `subscribe`. Dropping it does not unregister the
/// subscription; call `EventBus::unsubscribe` explicitly.
pub struct Subscription {
    pub id: String,
    buffer: Arc<SubscriberBuffer>,
}

impl Subscription {
    pub async fn recv(&self) -> Event {
        self.buffer.pop().await
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub persistent: bool,
    pub name: Option<String>,
    pub replay_from_sequence: Option<u64>,
    pub buffer_size: Option<usize>,
    pub backpressure: Option<BackpressurePolicy>,
}

fn matches_pattern(pattern: &str, topic: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let topic_segments: Vec<&str> = topic.split('.').collect();
    matches_segments(&pattern_segments, &topic_segments)
}

fn matches_segments(pattern: &[&str], topic: &[&str]) -> bool {
    match pattern.first() {
        None => topic.is_empty(),
        Some(&"**") => {
            if pattern.len() == 1 {
                return !topic.is_empty();
            }
            // ** may absorb zero or more segments; try every split point.
            (0..=topic.len()).any(|i| matches_segments(&pattern[1..], &topic[i..]))
        }
        Some(&"*") => !topic.is_empty() && matches_segments(&pattern[1..], &topic[1..]),
        Some(seg) => topic.first() == Some(seg) && matches_segments(&pattern[1..], &topic[1..]),
    }
}

struct Registered {
    patterns: Vec<String>,
    buffer: Arc<SubscriberBuffer>,
    stalled_timeout: Duration,
}

/// In-process pub/sub with pattern subscriptions, replay, and persistence.
/// Published events are journaled before any handler is notified; the
/// journal is the canonical total order.
#[derive(Clone)]
pub struct EventBus {
    sequence: Arc<AtomicU64>,
    journal: Arc<Collection<Event>>,
    checkpoints: Arc<Collection<u64>>,
    subscriptions: Arc<RwLock<HashMap<String, Registered>>>,
    config: EventBusConfig,
}

impl EventBus {
    pub async fn open(base: &std::path::Path, config: EventBusConfig) -> anyhow::Result<Self> {
        let journal = Collection::open(base, "events").await?;
        let checkpoints = Collection::open(base, "event_checkpoints").await?;
        let max_sequence = journal
            .list()
            .await
            .into_iter()
            .map(|(_, row)| row.data.sequence)
            .max()
            .unwrap_or(0);
        Ok(EventBus {
            sequence: Arc::new(AtomicU64::new(max_sequence)),
            journal: Arc::new(journal),
            checkpoints: Arc::new(checkpoints),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            config,
        })
    }

    pub async fn publish(&self, new_event: NewEvent) -> anyhow::Result<Event> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event {
            id: orka_types::new_id(),
            sequence,
            event_type: new_event.event_type,
            timestamp: chrono::Utc::now(),
            source: new_event.source,
            payload: new_event.payload,
            metadata: new_event.metadata,
        };
        self.journal.insert(sequence.to_string(), event.clone()).await?;
        self.deliver(&event).await;
        Ok(event)
    }

    /// Single atomic sequence allocation for the whole batch.
    pub async fn publish_batch(&self, events: Vec<NewEvent>) -> anyhow::Result<Vec<Event>> {
        let mut published = Vec::with_capacity(events.len());
        for new_event in events {
            published.push(self.publish(new_event).await?);
        }
        Ok(published)
    }

    async fn deliver(&self, event: &Event) {
        let matching: Vec<(String, Arc<SubscriberBuffer>, Duration)> = {
            let subs = self.subscriptions.read().await;
            subs.iter()
                .filter(|(_, reg)| reg.patterns.iter().any(|p| matches_pattern(p, &event.event_type)))
                .map(|(id, reg)| (id.clone(), reg.buffer.clone(), reg.stalled_timeout))
                .collect()
        };

        let mut stalled = Vec::new();
        for (id, buffer, stalled_timeout) in matching {
            match buffer.try_push(event.clone()).await {
                PushOutcome::Delivered | PushOutcome::Dropped => {}
                PushOutcome::Full => {
                    let delivered = tokio::time::timeout(stalled_timeout, async {
                        loop {
                            buffer.notify_space.notified().await;
                            if let PushOutcome::Delivered = buffer.try_push(event.clone()).await {
                                return;
                            }
                        }
                    })
                    .await
                    .is_ok();
                    if !delivered {
                        stalled.push(id);
                    }
                }
            }
        }

        for id in stalled {
            self.unsubscribe(&id).await;
            orka_observability::emit_event(
                tracing::Level::WARN,
                orka_observability::ProcessKind::Engine,
                orka_observability::ObservabilityEvent {
                    event: "eventbus.subscription.stalled",
                    component: "event_bus",
                    correlation_id: None,
                    agent_id: None,
                    team_id: None,
                    workflow_id: None,
                    cluster_id: None,
                    status: Some("unregistered"),
                    error_code: None,
                    detail: Some(&id),
                },
            );
            // Deliver the stall notice directly to remaining subscriptions;
            // it is not itself subject to block backpressure.
            let stall_event = Event {
                id: orka_types::new_id(),
                sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
                event_type: "eventbus.subscription.stalled".to_string(),
                timestamp: chrono::Utc::now(),
                source: "event_bus".to_string(),
                payload: serde_json::json!({ "subscription_id": id }),
                metadata: EventMetadata::default(),
            };
            let _ = self.journal.insert(stall_event.sequence.to_string(), stall_event.clone()).await;
            let subs = self.subscriptions.read().await;
            for reg in subs.values() {
                if reg.patterns.iter().any(|p| matches_pattern(p, &stall_event.event_type)) {
                    let _ = reg.buffer.try_push(stall_event.clone()).await;
                }
            }
        }
    }

    /// `patterns` use dotted glob with `*` (single segment) and `**`
    /// (multi-segment). Duplicate patterns on the same subscription are
    /// coalesced.
    pub async fn subscribe(&self, patterns: Vec<String>, opts: SubscribeOptions) -> anyhow::Result<Subscription> {
        let mut patterns = patterns;
        patterns.sort();
        patterns.dedup();

        let id = opts.name.clone().unwrap_or_else(orka_types::new_id);
        let buffer = Arc::new(SubscriberBuffer {
            queue: Mutex::new(VecDeque::new()),
            capacity: opts.buffer_size.unwrap_or(self.config.buffer_size),
            policy: opts.backpressure.unwrap_or(self.config.backpressure_policy),
            notify_item: Notify::new(),
            notify_space: Notify::new(),
            patterns: patterns.clone(),
        });

        let resume_from = if opts.persistent {
            match self.checkpoints.get(&id).await {
                Some(row) => Some(row.data),
                None => opts.replay_from_sequence,
            }
        } else {
            opts.replay_from_sequence
        };

        if let Some(from_sequence) = resume_from {
            for event in self.replay(from_sequence, None).await {
                if patterns.iter().any(|p| matches_pattern(p, &event.event_type)) {
                    let _ = buffer.try_push(event).await;
                }
            }
        }

        self.subscriptions.write().await.insert(
            id.clone(),
            Registered {
                patterns,
                buffer: buffer.clone(),
                stalled_timeout: Duration::from_millis(self.config.stalled_timeout_ms),
            },
        );

        Ok(Subscription { id, buffer })
    }

    pub async fn unsubscribe(&self, id: &str) {
        self.subscriptions.write().await.remove(id);
    }

    /// Acknowledges consumption up to `sequence` for a persistent
    /// subscription, so it resumes from here after a restart.
    pub async fn ack(&self, subscription_name: &str, sequence: u64) -> anyhow::Result<()> {
        if self.checkpoints.get(subscription_name).await.is_some() {
            self.checkpoints
                .update(subscription_name, |v| *v = sequence)
                .await
                .map_err(anyhow::Error::from)?;
        } else {
            self.checkpoints.insert(subscription_name, sequence).await?;
        }
        Ok(())
    }

    /// Yields a finite, non-restartable snapshot of past events matching
    /// `filter` (an event-type glob pattern), starting after `from_sequence`.
    pub async fn replay(&self, from_sequence: u64, filter: Option<&str>) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .journal
            .list()
            .await
            .into_iter()
            .map(|(_, row)| row.data)
            .filter(|e| e.sequence > from_sequence)
            .filter(|e| filter.map(|f| matches_pattern(f, &e.event_type)).unwrap_or(true))
            .collect();
        events.sort_by_key(|e| e.sequence);
        events
    }

    pub async fn journal_len(&self) -> usize {
        self.journal.list().await.len()
    }
}
