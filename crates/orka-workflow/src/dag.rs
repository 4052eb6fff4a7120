use std::collections::{HashMap, HashSet};

use orka_types::{OrkaError, WorkflowStepSpec};

/// DAG validation: reject self-loops, unknown dependency ids, duplicate
/// step ids, and cycles (detected via DFS).
pub fn validate(steps: &[WorkflowStepSpec], max_concurrency: u32) -> Result<(), OrkaError> {
    if max_concurrency < 1 {
        return Err(OrkaError::Validation("max_concurrency must be >= 1".into()));
    }

    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.id.clone()) {
            return Err(OrkaError::Validation(format!("duplicate step id `{}`", step.id)));
        }
        if step.depends_on.contains(&step.id) {
            return Err(OrkaError::Validation(format!("step `{}` depends on itself", step.id)));
        }
    }

    let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    for step in steps {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(OrkaError::Validation(format!(
                    "step `{}` depends on unknown step `{}`",
                    step.id, dep
                )));
            }
        }
    }

    let adjacency: HashMap<&str, &HashSet<String>> =
        steps.iter().map(|s| (s.id.as_str(), &s.depends_on)).collect();

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, &'a HashSet<String>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<(), OrkaError> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(OrkaError::Validation(format!(
                    "dependency cycle detected at step `{node}`"
                )))
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        if let Some(deps) = adjacency.get(node) {
            for dep in deps.iter() {
                visit(dep.as_str(), adjacency, marks)?;
            }
        }
        marks.insert(node, Mark::Done);
        Ok(())
    }

    for step in steps {
        visit(step.id.as_str(), &adjacency, &mut marks)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> WorkflowStepSpec {
        WorkflowStepSpec {
            id: id.to_string(),
            task: "noop".to_string(),
            agent_selector: None,
            when: None,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            timeout_ms: None,
            max_retries: 0,
        }
    }

    #[test]
    fn accepts_a_valid_dag() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["a", "b"])];
        assert!(validate(&steps, 4).is_ok());
    }

    #[test]
    fn rejects_self_loop() {
        let steps = vec![step("a", &["a"])];
        assert!(validate(&steps, 4).is_err());
    }

    #[test]
    fn rejects_unknown_dependency() {
        let steps = vec![step("a", &["ghost"])];
        assert!(validate(&steps, 4).is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let steps = vec![step("a", &[]), step("a", &[])];
        assert!(validate(&steps, 4).is_err());
    }

    #[test]
    fn rejects_cycle() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        assert!(validate(&steps, 4).is_err());
    }

    #[test]
    fn rejects_zero_max_concurrency() {
        let steps = vec![step("a", &[])];
        assert!(validate(&steps, 0).is_err());
    }
}
