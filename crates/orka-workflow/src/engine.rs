use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use orka_core::event_bus::EventBus;
use orka_core::storage::Collection;
use orka_core::stripe_lock::KeyedLocks;
use orka_types::{
    NewEvent, OnErrorPolicy, OrkaError, OrkaResult, StepStatus, Workflow, WorkflowSpec,
    WorkflowStatus, WorkflowStepState,
};
use serde_json::Value;

use crate::dag;
use crate::when_eval;

fn step_is_terminal(status: StepStatus) -> bool {
    matches!(
        status,
        StepStatus::Completed | StepStatus::Skipped | StepStatus::Failed | StepStatus::Cancelled
    )
}

fn step_is_done_ish(status: StepStatus) -> bool {
    matches!(status, StepStatus::Completed | StepStatus::Skipped)
}

/// DAG workflow scheduler. `start`/`complete_step`/`fail_step` drive the
/// ready-set/in-progress/completed bookkeeping; the actual dispatch of a
/// step's `task` to an agent is the caller's responsibility, who reports
/// back via `complete_step`/`fail_step`.
#[derive(Clone)]
pub struct WorkflowEngine {
    workflows: Arc<Collection<Workflow>>,
    locks: KeyedLocks,
    events: EventBus,
}

impl WorkflowEngine {
    pub async fn open(base: &Path, events: EventBus) -> anyhow::Result<Self> {
        Ok(WorkflowEngine {
            workflows: Arc::new(Collection::open(base, "workflows").await?),
            locks: KeyedLocks::new(),
            events,
        })
    }

    pub async fn get(&self, id: &str) -> OrkaResult<Workflow> {
        self.workflows
            .get(id)
            .await
            .map(|row| row.data)
            .ok_or_else(|| OrkaError::not_found("workflow", id))
    }

    pub async fn create(&self, spec: WorkflowSpec) -> OrkaResult<Workflow> {
        dag::validate(&spec.steps, spec.max_concurrency)?;
        let now = Utc::now();
        let steps = spec
            .steps
            .iter()
            .cloned()
            .map(|s| (s.id.clone(), WorkflowStepState::new(s)))
            .collect();
        let workflow = Workflow {
            id: orka_types::new_id(),
            steps,
            status: WorkflowStatus::Pending,
            context: Default::default(),
            team_id: spec.team_id,
            max_concurrency: spec.max_concurrency,
            on_error: spec.on_error,
            timeout_ms: spec.timeout_ms,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let row = self.workflows.insert(workflow.id.clone(), workflow).await?;
        Ok(row.data)
    }

    pub async fn start(&self, id: &str) -> OrkaResult<Workflow> {
        let _guard = self.locks.lock(id).await;
        let mut workflow = self.get(id).await?;
        if workflow.status != WorkflowStatus::Pending {
            return Err(OrkaError::invalid_transition(
                "workflow",
                id,
                format!("{:?}", workflow.status),
                "start",
            ));
        }
        workflow.status = WorkflowStatus::Running;
        let (started, skipped) = schedule_ready(&mut workflow);
        self.persist_and_notify(id, workflow, "workflow.started", &started, &skipped)
            .await
    }

    pub async fn complete_step(&self, id: &str, step_id: &str, result: Value) -> OrkaResult<Workflow> {
        let _guard = self.locks.lock(id).await;
        let mut workflow = self.get(id).await?;
        let step = workflow
            .steps
            .get_mut(step_id)
            .ok_or_else(|| OrkaError::not_found("workflow_step", step_id))?;
        if step.status != StepStatus::Running {
            return Err(OrkaError::invalid_transition(
                "workflow_step",
                step_id,
                format!("{:?}", step.status),
                "complete",
            ));
        }
        step.status = StepStatus::Completed;
        step.result = Some(result.clone());
        step.finished_at = Some(Utc::now());
        workflow.context.insert(step_id.to_string(), result);

        let (started, skipped) = schedule_ready(&mut workflow);
        let terminal_event = finalize_if_terminal(&mut workflow);

        self.events
            .publish(
                NewEvent::new("workflow.step.completed", "workflow_engine").with_metadata(
                    orka_types::EventMetadata {
                        workflow_id: Some(id.to_string()),
                        ..Default::default()
                    },
                ),
            )
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        self.persist_and_notify(id, workflow, terminal_event.unwrap_or(""), &started, &skipped)
            .await
    }

    pub async fn fail_step(&self, id: &str, step_id: &str, error: impl Into<String>) -> OrkaResult<Workflow> {
        let error = error.into();
        let _guard = self.locks.lock(id).await;
        let mut workflow = self.get(id).await?;
        let on_error = workflow.on_error;
        let step = workflow
            .steps
            .get_mut(step_id)
            .ok_or_else(|| OrkaError::not_found("workflow_step", step_id))?;
        if step.status != StepStatus::Running {
            return Err(OrkaError::invalid_transition(
                "workflow_step",
                step_id,
                format!("{:?}", step.status),
                "fail",
            ));
        }

        let exhausted = step.retry_count >= step.spec.max_retries;
        step.error = Some(error);
        if exhausted {
            step.status = StepStatus::Failed;
            step.finished_at = Some(Utc::now());
        } else {
            step.retry_count += 1;
            step.status = StepStatus::Retrying;
        }

        let step_event = if exhausted {
            "workflow.step.failed"
        } else {
            "workflow.step.retrying"
        };
        self.events
            .publish(NewEvent::new(step_event, "workflow_engine").with_metadata(
                orka_types::EventMetadata {
                    workflow_id: Some(id.to_string()),
                    ..Default::default()
                },
            ))
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;

        if exhausted && on_error == OnErrorPolicy::Fail {
            for other in workflow.steps.values_mut() {
                if !step_is_terminal(other.status) {
                    other.status = StepStatus::Cancelled;
                }
            }
            workflow.status = WorkflowStatus::Failed;
            return self
                .persist_and_notify(id, workflow, "workflow.failed", &[], &[])
                .await;
        }

        let (started, skipped) = schedule_ready(&mut workflow);
        let terminal_event = finalize_if_terminal(&mut workflow);
        self.persist_and_notify(id, workflow, terminal_event.unwrap_or(""), &started, &skipped)
            .await
    }

    pub async fn cancel(&self, id: &str) -> OrkaResult<Workflow> {
        let _guard = self.locks.lock(id).await;
        let mut workflow = self.get(id).await?;
        for step in workflow.steps.values_mut() {
            if !step_is_terminal(step.status) {
                step.status = StepStatus::Cancelled;
            }
        }
        workflow.status = WorkflowStatus::Cancelled;
        self.persist_and_notify(id, workflow, "workflow.cancelled", &[], &[])
            .await
    }

    async fn persist_and_notify(
        &self,
        id: &str,
        workflow: Workflow,
        top_level_event: &str,
        started: &[String],
        skipped: &[String],
    ) -> OrkaResult<Workflow> {
        let expected_version = workflow.version;
        let row = self
            .workflows
            .update_with_optimistic_lock(id, expected_version, |w| *w = workflow.clone())
            .await?;

        for _ in skipped {
            // Skips fold into `ready` scheduling and don't need their own
            // event; dependents still see the step as satisfied.
        }
        for step_id in started {
            self.events
                .publish(NewEvent::new("workflow.step.ready", "workflow_engine").with_metadata(
                    orka_types::EventMetadata {
                        workflow_id: Some(id.to_string()),
                        ..Default::default()
                    },
                ))
                .await
                .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
            self.events
                .publish(
                    NewEvent::new("workflow.step.running", "workflow_engine")
                        .with_payload(serde_json::json!({ "step_id": step_id }))
                        .with_metadata(orka_types::EventMetadata {
                            workflow_id: Some(id.to_string()),
                            ..Default::default()
                        }),
                )
                .await
                .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        }
        if !top_level_event.is_empty() {
            self.events
                .publish(NewEvent::new(top_level_event, "workflow_engine").with_metadata(
                    orka_types::EventMetadata {
                        workflow_id: Some(id.to_string()),
                        ..Default::default()
                    },
                ))
                .await
                .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        }
        Ok(row.data)
    }
}

/// Repeatedly folds `when == false` steps into `skipped` and advances the
/// ready set until a fixpoint, then starts up to `max_concurrency -
/// |running|` ready steps in lexicographic order.
fn schedule_ready(workflow: &mut Workflow) -> (Vec<String>, Vec<String>) {
    let mut skipped = Vec::new();
    loop {
        let mut progressed = false;
        let ids: Vec<String> = workflow.steps.keys().cloned().collect();
        for id in ids {
            let deps_done = {
                let step = &workflow.steps[&id];
                if !matches!(step.status, StepStatus::Pending | StepStatus::Retrying) {
                    continue;
                }
                step.spec
                    .depends_on
                    .iter()
                    .all(|dep| workflow.steps.get(dep).map(|s| step_is_done_ish(s.status)).unwrap_or(false))
            };
            if !deps_done {
                continue;
            }
            let when_expr = workflow.steps[&id].spec.when.clone();
            if !when_eval::evaluate(when_expr.as_deref(), &workflow.context) {
                let step = workflow.steps.get_mut(&id).unwrap();
                step.status = StepStatus::Skipped;
                step.result = Some(Value::Null);
                step.finished_at = Some(Utc::now());
                skipped.push(id);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    let running_count = workflow
        .steps
        .values()
        .filter(|s| s.status == StepStatus::Running)
        .count();
    let capacity = (workflow.max_concurrency as usize).saturating_sub(running_count);

    let mut ready: Vec<String> = workflow
        .steps
        .iter()
        .filter(|(_, step)| matches!(step.status, StepStatus::Pending | StepStatus::Retrying))
        .filter(|(_, step)| {
            step.spec
                .depends_on
                .iter()
                .all(|dep| workflow.steps.get(dep).map(|s| step_is_done_ish(s.status)).unwrap_or(false))
        })
        .map(|(id, _)| id.clone())
        .collect();
    ready.sort();

    let started: Vec<String> = ready.into_iter().take(capacity).collect();
    for id in &started {
        let step = workflow.steps.get_mut(id).unwrap();
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
    }

    (started, skipped)
}

/// Checks whether the workflow has reached a terminal state, plus a
/// deadlock fixpoint: if no step can ever become ready again (ready and
/// in-progress both empty) but some steps remain unresolved, only reachable
/// under `onError: continue` when a failed step's dependents can never
/// satisfy their dependency, those steps are cancelled and the workflow
/// concludes failed.
fn finalize_if_terminal(workflow: &mut Workflow) -> Option<&'static str> {
    let running = workflow.steps.values().any(|s| s.status == StepStatus::Running);
    let all_terminal = workflow.steps.values().all(|s| step_is_terminal(s.status));

    if all_terminal {
        let any_failed = workflow.steps.values().any(|s| s.status == StepStatus::Failed);
        workflow.status = if any_failed {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        };
        return Some(if any_failed { "workflow.failed" } else { "workflow.completed" });
    }

    if !running {
        let pending_ids: Vec<String> = workflow
            .steps
            .iter()
            .filter(|(_, s)| !step_is_terminal(s.status))
            .map(|(id, _)| id.clone())
            .collect();
        if !pending_ids.is_empty() {
            for id in pending_ids {
                workflow.steps.get_mut(&id).unwrap().status = StepStatus::Cancelled;
            }
            workflow.status = WorkflowStatus::Failed;
            return Some("workflow.failed");
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use orka_core::config::EventBusConfig;
    use orka_types::WorkflowStepSpec;
    use std::collections::HashSet;

    async fn engine() -> (WorkflowEngine, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("orka-workflow-{}", uuid::Uuid::new_v4()));
        let events = EventBus::open(&dir, EventBusConfig::default()).await.unwrap();
        let engine = WorkflowEngine::open(&dir, events).await.unwrap();
        (engine, dir)
    }

    fn step(id: &str, deps: &[&str]) -> WorkflowStepSpec {
        WorkflowStepSpec {
            id: id.to_string(),
            task: "noop".to_string(),
            agent_selector: None,
            when: None,
            depends_on: deps.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            timeout_ms: None,
            max_retries: 1,
        }
    }

    #[tokio::test]
    async fn linear_chain_completes_in_order() {
        let (engine, dir) = engine().await;
        let spec = WorkflowSpec {
            steps: vec![step("a", &[]), step("b", &["a"])],
            max_concurrency: 4,
            on_error: OnErrorPolicy::Fail,
            timeout_ms: None,
            team_id: None,
        };
        let workflow = engine.create(spec).await.unwrap();
        let started = engine.start(&workflow.id).await.unwrap();
        assert_eq!(started.steps["a"].status, StepStatus::Running);
        assert_eq!(started.steps["b"].status, StepStatus::Pending);

        let after_a = engine.complete_step(&workflow.id, "a", serde_json::json!("ok")).await.unwrap();
        assert_eq!(after_a.steps["b"].status, StepStatus::Running);

        let after_b = engine.complete_step(&workflow.id, "b", serde_json::json!("ok")).await.unwrap();
        assert_eq!(after_b.status, WorkflowStatus::Completed);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn retry_then_exhaust_fails_workflow_under_fail_policy() {
        let (engine, dir) = engine().await;
        let spec = WorkflowSpec {
            steps: vec![step("a", &[])],
            max_concurrency: 4,
            on_error: OnErrorPolicy::Fail,
            timeout_ms: None,
            team_id: None,
        };
        let workflow = engine.create(spec).await.unwrap();
        engine.start(&workflow.id).await.unwrap();
        let retried = engine.fail_step(&workflow.id, "a", "boom").await.unwrap();
        assert_eq!(retried.steps["a"].status, StepStatus::Retrying);

        // schedule_ready only runs inside engine calls; re-fetch by
        // completing the scheduling pass via another start-equivalent call.
        let rescheduled = engine.get(&workflow.id).await.unwrap();
        assert!(matches!(
            rescheduled.steps["a"].status,
            StepStatus::Retrying | StepStatus::Running
        ));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn continue_policy_lets_independent_steps_finish() {
        let (engine, dir) = engine().await;
        let mut failing = step("a", &[]);
        failing.max_retries = 0;
        let spec = WorkflowSpec {
            steps: vec![failing, step("b", &[])],
            max_concurrency: 4,
            on_error: OnErrorPolicy::Continue,
            timeout_ms: None,
            team_id: None,
        };
        let workflow = engine.create(spec).await.unwrap();
        engine.start(&workflow.id).await.unwrap();
        engine.fail_step(&workflow.id, "a", "boom").await.unwrap();
        let after_b = engine.complete_step(&workflow.id, "b", serde_json::json!("ok")).await.unwrap();
        assert_eq!(after_b.steps["a"].status, StepStatus::Failed);
        assert_eq!(after_b.steps["b"].status, StepStatus::Completed);
        assert_eq!(after_b.status, WorkflowStatus::Completed);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn when_false_step_is_skipped_and_unblocks_dependents() {
        let (engine, dir) = engine().await;
        let mut conditional = step("a", &[]);
        conditional.when = Some("missing_flag".to_string());
        let spec = WorkflowSpec {
            steps: vec![conditional, step("b", &["a"])],
            max_concurrency: 4,
            on_error: OnErrorPolicy::Fail,
            timeout_ms: None,
            team_id: None,
        };
        let workflow = engine.create(spec).await.unwrap();
        let started = engine.start(&workflow.id).await.unwrap();
        assert_eq!(started.steps["a"].status, StepStatus::Skipped);
        assert_eq!(started.steps["b"].status, StepStatus::Running);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn dag_validation_rejects_cycles_at_create() {
        let (engine, dir) = engine().await;
        let spec = WorkflowSpec {
            steps: vec![step("a", &["b"]), step("b", &["a"])],
            max_concurrency: 4,
            on_error: OnErrorPolicy::Fail,
            timeout_ms: None,
            team_id: None,
        };
        let err = engine.create(spec).await.unwrap_err();
        assert!(matches!(err, OrkaError::Validation(_)));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
