use crate::task::types::{Task, TaskResult};
use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Deferred unit of work handed to an [`OperationExecutor`]
pub type Operation = BoxFuture<'static, Result<serde_json::Value>>;

/// Runs the generic operation for a task that does not name a tool.
///
/// Errors are converted into a `failed` lifecycle transition. Any timeout
/// policy belongs here; the orchestrator enforces none.
#[async_trait::async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, description: &str, operation: Operation) -> Result<serde_json::Value>;
}

/// Short-term context notes, written once before and once after every task run
#[async_trait::async_trait]
pub trait ContextRecorder: Send + Sync {
    async fn update_short_term(&self, text: &str) -> Result<()>;
}

/// Description of a tool known to the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Raw tool output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub content: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
}

/// Lookup of tools available for direct invocation
pub trait ToolCatalog: Send + Sync {
    fn get(&self, name: &str) -> Option<ToolDescriptor>;
}

/// Invokes tools found in the [`ToolCatalog`]
#[async_trait::async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke_tool(&self, name: &str, parameters: serde_json::Value) -> Result<ToolOutput>;
}

/// Awaits the operation in place, optionally bounded by a timeout
#[derive(Debug, Clone, Default)]
pub struct DirectOperationExecutor {
    timeout: Option<Duration>,
}

impl DirectOperationExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait::async_trait]
impl OperationExecutor for DirectOperationExecutor {
    async fn execute(&self, description: &str, operation: Operation) -> Result<serde_json::Value> {
        debug!("Executing operation: {}", description);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| anyhow!("Operation timed out after {:?}", limit))?,
            None => operation.await,
        }
    }
}

/// Bounded in-memory window of recent context notes
#[derive(Debug)]
pub struct InMemoryContextRecorder {
    capacity: usize,
    notes: Mutex<VecDeque<String>>,
}

impl InMemoryContextRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            notes: Mutex::new(VecDeque::new()),
        }
    }

    /// Snapshot of the retained notes, oldest first
    pub fn notes(&self) -> Vec<String> {
        self.notes
            .lock()
            .map(|notes| notes.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryContextRecorder {
    fn default() -> Self {
        Self::new(50)
    }
}

#[async_trait::async_trait]
impl ContextRecorder for InMemoryContextRecorder {
    async fn update_short_term(&self, text: &str) -> Result<()> {
        let mut notes = self
            .notes
            .lock()
            .map_err(|_| anyhow!("context notes lock poisoned"))?;
        notes.push_back(text.to_string());
        while notes.len() > self.capacity {
            notes.pop_front();
        }
        Ok(())
    }
}

/// Fixed set of tools
#[derive(Debug, Clone, Default)]
pub struct InMemoryToolCatalog {
    tools: HashMap<String, ToolDescriptor>,
}

impl InMemoryToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, name: impl Into<String>, description: Option<String>) -> Self {
        let name = name.into();
        self.tools.insert(
            name.clone(),
            ToolDescriptor {
                name,
                description,
            },
        );
        self
    }
}

impl ToolCatalog for InMemoryToolCatalog {
    fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).cloned()
    }
}

/// Invoker for setups without any tool transport
#[derive(Debug, Clone, Default)]
pub struct UnavailableToolInvoker;

#[async_trait::async_trait]
impl ToolInvoker for UnavailableToolInvoker {
    async fn invoke_tool(&self, name: &str, _parameters: serde_json::Value) -> Result<ToolOutput> {
        Err(anyhow!("No tool invoker configured for tool '{}'", name))
    }
}

/// Collaborators used by a task run
#[derive(Clone)]
pub struct ExecutionServices {
    pub operation_executor: Arc<dyn OperationExecutor>,
    pub context_recorder: Arc<dyn ContextRecorder>,
    pub tool_catalog: Arc<dyn ToolCatalog>,
    pub tool_invoker: Arc<dyn ToolInvoker>,
}

impl Default for ExecutionServices {
    fn default() -> Self {
        Self {
            operation_executor: Arc::new(DirectOperationExecutor::new()),
            context_recorder: Arc::new(InMemoryContextRecorder::default()),
            tool_catalog: Arc::new(InMemoryToolCatalog::new()),
            tool_invoker: Arc::new(UnavailableToolInvoker),
        }
    }
}

impl ExecutionServices {
    pub fn with_operation_executor(mut self, executor: Arc<dyn OperationExecutor>) -> Self {
        self.operation_executor = executor;
        self
    }

    pub fn with_context_recorder(mut self, recorder: Arc<dyn ContextRecorder>) -> Self {
        self.context_recorder = recorder;
        self
    }

    pub fn with_tools(mut self, catalog: Arc<dyn ToolCatalog>, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.tool_catalog = catalog;
        self.tool_invoker = invoker;
        self
    }
}

/// Performs the `running` action of a task lifecycle
#[derive(Clone)]
pub struct TaskExecutor {
    services: ExecutionServices,
}

impl TaskExecutor {
    pub fn new(services: ExecutionServices) -> Self {
        Self { services }
    }

    /// Run `task` once through its tool or the operation executor.
    ///
    /// Context notes are written before and after; an `Err` means the run
    /// failed and the lifecycle should move to `failed`.
    pub async fn execute_task(&self, task: &Task) -> Result<TaskResult> {
        let started = Instant::now();
        self.record(&format!("Started task {}: {}", task.id, task.description))
            .await;

        info!("Starting execution of task {}", task.id);
        let outcome = match self.catalog_tool(task) {
            Some(tool) => self.invoke_tool(task, &tool).await,
            None => self.run_operation(task).await,
        };

        match outcome {
            Ok(result) => {
                let result = result.with_duration(started.elapsed());
                self.record(&format!("Completed task {}", task.id)).await;
                info!(
                    "Completed execution of task {} in {:?}",
                    task.id,
                    started.elapsed()
                );
                Ok(result)
            }
            Err(err) => {
                self.record(&format!("Task {} failed: {}", task.id, err))
                    .await;
                error!("Task {} execution failed: {}", task.id, err);
                Err(err)
            }
        }
    }

    fn catalog_tool(&self, task: &Task) -> Option<ToolDescriptor> {
        task.tool
            .as_deref()
            .and_then(|name| self.services.tool_catalog.get(name))
    }

    async fn invoke_tool(&self, task: &Task, tool: &ToolDescriptor) -> Result<TaskResult> {
        let parameters = task
            .parameters
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));
        debug!("Invoking tool {} for task {}", tool.name, task.id);
        let output = self
            .services
            .tool_invoker
            .invoke_tool(&tool.name, parameters)
            .await?;

        let mut result = TaskResult {
            task_id: task.id.clone(),
            success: !output.is_error,
            data: Some(output.content.clone()),
            error: None,
            metadata: Some(HashMap::from([(
                "tool".to_string(),
                serde_json::Value::String(tool.name.clone()),
            )])),
            duration: None,
        };
        if output.is_error {
            result.error = Some(match output.content {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            });
        }
        Ok(result)
    }

    async fn run_operation(&self, task: &Task) -> Result<TaskResult> {
        let description = describe_task(task);
        let payload = serde_json::json!({
            "taskId": task.id,
            "description": task.description,
            "priority": task.priority,
            "parameters": task.parameters,
        });
        let operation: Operation = Box::pin(async move { Ok(payload) });

        let data = self
            .services
            .operation_executor
            .execute(&description, operation)
            .await?;
        Ok(TaskResult::success(task.id.clone(), Some(data)))
    }

    async fn record(&self, note: &str) {
        if let Err(e) = self.services.context_recorder.update_short_term(note).await {
            error!("Failed to record context note: {}", e);
        }
    }
}

/// Human-readable description of a task for the operation executor
pub fn describe_task(task: &Task) -> String {
    let mut text = format!(
        "Task {} [{} priority]: {}",
        task.id, task.priority, task.description
    );
    if let Some(tool) = &task.tool {
        text.push_str(&format!(" (tool: {})", tool));
    }
    if let Some(parameters) = &task.parameters {
        text.push_str(&format!(" with parameters {}", parameters));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoInvoker;

    #[async_trait::async_trait]
    impl ToolInvoker for EchoInvoker {
        async fn invoke_tool(&self, name: &str, parameters: serde_json::Value) -> Result<ToolOutput> {
            Ok(ToolOutput {
                content: serde_json::json!({ "tool": name, "echo": parameters }),
                is_error: name == "broken",
            })
        }
    }

    fn services_with_tools(recorder: Arc<InMemoryContextRecorder>) -> ExecutionServices {
        let catalog = InMemoryToolCatalog::new()
            .with_tool("echo", None)
            .with_tool("broken", None);
        ExecutionServices::default()
            .with_context_recorder(recorder)
            .with_tools(Arc::new(catalog), Arc::new(EchoInvoker))
    }

    #[tokio::test]
    async fn test_operation_path_records_notes() {
        let recorder = Arc::new(InMemoryContextRecorder::default());
        let executor = TaskExecutor::new(services_with_tools(recorder.clone()));

        let result = executor.execute_task(&Task::new("t1", "write docs")).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data.unwrap()["taskId"], "t1");
        assert!(result.duration.is_some());

        let notes = recorder.notes();
        assert_eq!(notes.len(), 2);
        assert!(notes[0].starts_with("Started task t1"));
        assert_eq!(notes[1], "Completed task t1");
    }

    #[tokio::test]
    async fn test_catalog_tool_is_invoked() {
        let recorder = Arc::new(InMemoryContextRecorder::default());
        let executor = TaskExecutor::new(services_with_tools(recorder));

        let task = Task::new("t2", "echo").with_tool("echo", serde_json::json!({"x": 1}));
        let result = executor.execute_task(&task).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data.unwrap()["echo"]["x"], 1);
    }

    #[tokio::test]
    async fn test_tool_error_flag_marks_result_unsuccessful() {
        let recorder = Arc::new(InMemoryContextRecorder::default());
        let executor = TaskExecutor::new(services_with_tools(recorder));

        let task = Task::new("t3", "broken").with_tool("broken", serde_json::json!({}));
        let result = executor.execute_task(&task).await.unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_unknown_tool_falls_back_to_operation() {
        let recorder = Arc::new(InMemoryContextRecorder::default());
        let executor = TaskExecutor::new(services_with_tools(recorder));

        let task = Task::new("t4", "uses ghost").with_tool("ghost", serde_json::json!({}));
        let result = executor.execute_task(&task).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data.unwrap()["taskId"], "t4");
    }

    #[tokio::test]
    async fn test_executor_timeout() {
        let executor = DirectOperationExecutor::new().with_timeout(Duration::from_millis(10));
        let slow: Operation = Box::pin(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(serde_json::Value::Null)
        });
        assert!(executor.execute("slow", slow).await.is_err());
    }

    #[tokio::test]
    async fn test_context_window_is_bounded() {
        let recorder = InMemoryContextRecorder::new(2);
        for note in ["a", "b", "c"] {
            recorder.update_short_term(note).await.unwrap();
        }
        assert_eq!(recorder.notes(), vec!["b", "c"]);
    }
}
