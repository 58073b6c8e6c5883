//! Task decomposition building blocks.
//!
//! Two ways of splitting one task into dependent subtasks:
//!
//! - **Rule-based**: three independent, cumulative pattern rules over the
//!   lower-cased description (split markers, research verbs, build verbs).
//! - **LLM-assisted**: a structured prompt for a [`TextGenerator`], whose
//!   response is parsed leniently (the first top-level JSON object wins).
//!
//! The recursion, thresholds and fallback policy live in
//! [`Planner`](crate::task::Planner).
//!
//! [`TextGenerator`]: crate::llm::TextGenerator

use crate::env::planning::MIN_SPLIT_FRAGMENT_LEN;
use crate::task::error::PlanningError;
use crate::task::graph::DependencyMap;
use crate::task::types::{Task, TaskId, TaskPriority};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::debug;

static SPLIT_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*(?:,|\band\b|\b(?:step|phase|stage)\s*\d*\s*[:.)-]?)\s*").unwrap()
});

static RESEARCH_VERBS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(research|analy[sz]e|investigate|study)").unwrap());

static BUILD_VERBS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(implement|create|build|develop)").unwrap());

/// Subtasks plus dependency mapping produced for one task
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decomposition {
    pub subtasks: Vec<Task>,
    pub dependencies: DependencyMap,
    pub total_effort: f64,
}

impl Decomposition {
    /// The task itself, with no dependencies
    pub fn atomic(task: Task, effort: f64) -> Self {
        Self {
            subtasks: vec![task],
            dependencies: DependencyMap::new(),
            total_effort: effort,
        }
    }

    pub fn is_atomic(&self) -> bool {
        self.subtasks.len() <= 1
    }
}

/// Apply the pattern rules to `task`.
///
/// Returns `None` when no rule fires. Subtask ids derive from the task id:
/// `{id}-research`, `{id}-1..n` for split fragments, `{id}-impl`, `{id}-test`.
pub fn decompose_by_rules(task: &Task) -> Option<(Vec<Task>, DependencyMap)> {
    let description = task.description.to_lowercase();
    let mut generated: Vec<Task> = Vec::new();
    let mut dependencies = DependencyMap::new();

    let fragments: Vec<&str> = SPLIT_MARKERS
        .split(&description)
        .map(str::trim)
        .filter(|part| part.chars().count() > MIN_SPLIT_FRAGMENT_LEN)
        .collect();
    if fragments.len() >= 2 {
        let mut previous: Option<TaskId> = None;
        for (i, fragment) in fragments.iter().enumerate() {
            let sub = task.derive(format!("{}-{}", task.id, i + 1), *fragment);
            if let Some(prev) = previous.take() {
                add_dependency(&mut dependencies, &sub.id, prev);
            }
            previous = Some(sub.id.clone());
            generated.push(sub);
        }
        debug!("Split task {} into {} fragments", task.id, fragments.len());
    }

    if BUILD_VERBS.is_match(&description) {
        let implementation = task.derive(
            format!("{}-impl", task.id),
            format!("Implement: {}", task.description),
        );
        let test = task.derive(
            format!("{}-test", task.id),
            format!("Test and verify: {}", task.description),
        );
        add_dependency(&mut dependencies, &test.id, implementation.id.clone());
        generated.push(implementation);
        generated.push(test);
    }

    if RESEARCH_VERBS.is_match(&description) {
        let research = task.derive(
            format!("{}-research", task.id),
            format!("Research and analyze requirements: {}", task.description),
        );
        if generated.is_empty() {
            // The research step needs something to feed into
            generated.push(task.clone());
        }
        for sub in &generated {
            add_dependency(&mut dependencies, &sub.id, research.id.clone());
        }
        generated.insert(0, research);
    }

    if generated.is_empty() {
        return None;
    }

    Some(dedup_subtasks(generated, dependencies))
}

fn add_dependency(dependencies: &mut DependencyMap, task_id: &str, depends_on: TaskId) {
    let deps = dependencies.entry(task_id.to_string()).or_default();
    if !deps.contains(&depends_on) {
        deps.push(depends_on);
    }
}

/// Keep the first occurrence of every id, merging dependency entries
pub fn dedup_subtasks(subtasks: Vec<Task>, mut dependencies: DependencyMap) -> (Vec<Task>, DependencyMap) {
    let mut seen = HashSet::new();
    let subtasks: Vec<Task> = subtasks
        .into_iter()
        .filter(|t| seen.insert(t.id.clone()))
        .collect();
    for deps in dependencies.values_mut() {
        let mut unique = HashSet::new();
        deps.retain(|d| unique.insert(d.clone()));
    }
    dependencies.retain(|_, deps| !deps.is_empty());
    (subtasks, dependencies)
}

/// Build the structured prompt sent to the text generator
pub fn build_decomposition_prompt(task: &Task) -> String {
    format!(
        r#"You are planning the execution of a task. Break it into a small number of concrete subtasks.

Task id: {id}
Priority: {priority}
Description:
{description}

Respond with a single JSON object and nothing else, using this shape:
{{
  "subtasks": [
    {{"id": "1", "description": "...", "priority": "urgent|high|medium|low", "estimatedEffort": 10, "dependsOn": []}}
  ],
  "dependencies": {{"2": ["1"]}}
}}

Rules:
- ids are short and unique within the response
- "dependsOn" and "dependencies" only reference ids from "subtasks"
- order subtasks the way they should run
"#,
        id = task.id,
        priority = task.priority,
        description = task.description
    )
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct LlmDecomposition {
    subtasks: Vec<LlmSubtask>,
    #[serde(default)]
    dependencies: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct LlmSubtask {
    id: serde_json::Value,
    description: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    estimated_effort: Option<f64>,
    #[serde(default)]
    depends_on: Vec<serde_json::Value>,
}

/// Return the first balanced top-level `{...}` in `text`, ignoring braces in strings
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a text generator response into subtasks of `task`.
///
/// Response ids are namespaced under the parent id. Any reference to an id
/// not listed in `subtasks` is a [`PlanningError::Parse`].
pub fn parse_llm_decomposition(
    task: &Task,
    response: &str,
) -> Result<(Vec<Task>, DependencyMap), PlanningError> {
    let json = extract_json_object(response)
        .ok_or_else(|| PlanningError::Parse("no JSON object in response".to_string()))?;
    let parsed: LlmDecomposition =
        serde_json::from_str(json).map_err(|e| PlanningError::Parse(e.to_string()))?;

    if parsed.subtasks.is_empty() {
        return Err(PlanningError::Parse("response lists no subtasks".to_string()));
    }

    let namespaced = |raw: &str| {
        if raw.starts_with(&format!("{}-", task.id)) {
            raw.to_string()
        } else {
            format!("{}-{}", task.id, raw)
        }
    };

    let mut id_map: HashMap<String, TaskId> = HashMap::new();
    for sub in &parsed.subtasks {
        let raw = id_string(&sub.id)
            .ok_or_else(|| PlanningError::Parse(format!("invalid subtask id {}", sub.id)))?;
        id_map.insert(raw.clone(), namespaced(&raw));
    }
    let resolve = |raw: &str| {
        id_map
            .get(raw)
            .cloned()
            .ok_or_else(|| PlanningError::Parse(format!("unknown subtask id {}", raw)))
    };

    let mut subtasks = Vec::with_capacity(parsed.subtasks.len());
    let mut dependencies = DependencyMap::new();

    for sub in &parsed.subtasks {
        let raw = id_string(&sub.id).unwrap_or_default();
        let id = resolve(&raw)?;
        let mut child = task.derive(id.clone(), sub.description.trim());
        if let Some(priority) = sub.priority.as_deref().and_then(TaskPriority::parse) {
            child.priority = priority;
        }
        if let Some(effort) = sub.estimated_effort {
            child = child.with_metadata("estimatedEffort", serde_json::json!(effort));
        }
        for dep in &sub.depends_on {
            let dep = id_string(dep)
                .ok_or_else(|| PlanningError::Parse(format!("invalid dependency {}", dep)))?;
            add_dependency(&mut dependencies, &id, resolve(&dep)?);
        }
        subtasks.push(child);
    }

    for (raw, deps) in &parsed.dependencies {
        let id = resolve(raw)?;
        for dep in deps {
            add_dependency(&mut dependencies, &id, resolve(dep)?);
        }
    }

    Ok(dedup_subtasks(subtasks, dependencies))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_build_rule_creates_impl_and_test() {
        let task = Task::new("t1", "Implement the authentication system");
        let (subtasks, deps) = decompose_by_rules(&task).unwrap();

        assert_eq!(ids(&subtasks), vec!["t1-impl", "t1-test"]);
        assert_eq!(
            deps,
            DependencyMap::from([("t1-test".to_string(), vec!["t1-impl".to_string()])])
        );
    }

    #[test]
    fn test_split_rule_chains_fragments() {
        let task = Task::new("t2", "Write the release notes, update the changelog and notify the team");
        let (subtasks, deps) = decompose_by_rules(&task).unwrap();

        assert_eq!(ids(&subtasks), vec!["t2-1", "t2-2", "t2-3"]);
        assert_eq!(subtasks[1].description, "update the changelog");
        assert_eq!(deps["t2-2"], vec!["t2-1"]);
        assert_eq!(deps["t2-3"], vec!["t2-2"]);
        assert!(!deps.contains_key("t2-1"));
    }

    #[test]
    fn test_split_rule_ignores_short_fragments() {
        let task = Task::new("t3", "Wash and dry the dishes");
        assert!(decompose_by_rules(&task).is_none());
    }

    #[test]
    fn test_research_rule_gates_everything() {
        let task = Task::new("t4", "Research caching options and build a prototype");
        let (subtasks, deps) = decompose_by_rules(&task).unwrap();

        assert_eq!(
            ids(&subtasks),
            vec!["t4-research", "t4-1", "t4-2", "t4-impl", "t4-test"]
        );
        for sub in &subtasks[1..] {
            assert!(deps[&sub.id].contains(&"t4-research".to_string()), "{}", sub.id);
        }
        assert!(deps["t4-test"].contains(&"t4-impl".to_string()));
        assert!(!deps.contains_key("t4-research"));
    }

    #[test]
    fn test_research_rule_alone_keeps_original_task() {
        let task = Task::new("t5", "Investigate the flaky login test");
        let (subtasks, deps) = decompose_by_rules(&task).unwrap();

        assert_eq!(ids(&subtasks), vec!["t5-research", "t5"]);
        assert_eq!(deps["t5"], vec!["t5-research"]);
    }

    #[test]
    fn test_no_rule_fires() {
        let task = Task::new("t6", "Rename the variable");
        assert!(decompose_by_rules(&task).is_none());
    }

    #[test]
    fn test_subtasks_inherit_priority() {
        let task = Task::new("t7", "Build the importer").with_priority(TaskPriority::Urgent);
        let (subtasks, _) = decompose_by_rules(&task).unwrap();
        assert!(subtasks.iter().all(|t| t.priority == TaskPriority::Urgent));
    }

    #[test]
    fn test_extract_json_object() {
        let text = r#"Sure! Here is the plan: {"a": {"b": "}"}, "c": [1]} trailing {"x": 1}"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"a": {"b": "}"}, "c": [1]}"#)
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{\"unterminated\": 1"), None);
    }

    #[test]
    fn test_parse_llm_decomposition() {
        let task = Task::new("root", "Ship the feature");
        let response = r#"```json
{"subtasks": [
  {"id": "1", "description": "Design schema", "priority": "high", "estimatedEffort": 20, "dependsOn": []},
  {"id": 2, "description": "Write migration", "priority": "medium", "dependsOn": ["1"]},
  {"id": "3", "description": "Deploy", "priority": "low"}
], "dependencies": {"3": ["2"]}}
```"#;
        let (subtasks, deps) = parse_llm_decomposition(&task, response).unwrap();

        assert_eq!(ids(&subtasks), vec!["root-1", "root-2", "root-3"]);
        assert_eq!(subtasks[0].priority, TaskPriority::High);
        assert_eq!(subtasks[2].priority, TaskPriority::Low);
        assert_eq!(deps["root-2"], vec!["root-1"]);
        assert_eq!(deps["root-3"], vec!["root-2"]);
    }

    #[test]
    fn test_parse_llm_rejects_unknown_references() {
        let task = Task::new("root", "Ship the feature");
        let response = r#"{"subtasks": [{"id": "1", "description": "a", "dependsOn": ["9"]}]}"#;
        let err = parse_llm_decomposition(&task, response).unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }

    #[test]
    fn test_parse_llm_rejects_garbage() {
        let task = Task::new("root", "Ship the feature");
        assert!(parse_llm_decomposition(&task, "I cannot help with that").is_err());
        assert!(parse_llm_decomposition(&task, r#"{"subtasks": []}"#).is_err());
    }
}
