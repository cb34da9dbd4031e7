//! Reminder/chore bookkeeping.
//!
//! A collaborator, not part of the orchestration core: it registers three
//! tools and one message producer with the core and keeps its own state.
//! The board is an explicitly constructed service object injected where
//! needed; there is no global task list.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::message::Message;
use crate::scheduler::MessageProducer;
use crate::tools::{Tool, ToolOutput, ToolSet};

#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub due: Option<DateTime<Utc>>,
    pub completed: bool,
    /// A due task is announced as a reminder message exactly once.
    pub announced: bool,
}

impl Task {
    /// Delimited record; the free-text description goes last so it may
    /// contain the delimiter.
    fn to_record(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.id,
            self.due.map(|d| d.to_rfc3339()).unwrap_or_else(|| "-".to_string()),
            u8::from(self.completed),
            u8::from(self.announced),
            self.description,
        )
    }

    fn parse(record: &str) -> Option<Self> {
        let mut fields = record.splitn(5, ',');
        let id = fields.next()?.trim().parse().ok()?;
        let due_field = fields.next()?.trim();
        let due = if due_field == "-" {
            None
        } else {
            Some(
                DateTime::parse_from_rfc3339(due_field)
                    .ok()?
                    .with_timezone(&Utc),
            )
        };
        let completed = fields.next()?.trim() == "1";
        let announced = fields.next()?.trim() == "1";
        let description = fields.next()?.to_string();
        Some(Self {
            id,
            description,
            due,
            completed,
            announced,
        })
    }
}

pub struct TaskBoard {
    tasks: Mutex<Vec<Task>>,
    path: PathBuf,
}

impl TaskBoard {
    pub fn load_or_default(path: PathBuf) -> Result<Arc<Self>> {
        let mut tasks = Vec::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read task board {:?}", path))?;
            for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                match Task::parse(line) {
                    Some(task) => tasks.push(task),
                    None => tracing::warn!("Skipping unreadable task record: {}", line),
                }
            }
            tracing::info!("Loaded {} task(s) from {:?}", tasks.len(), path);
        }
        Ok(Arc::new(Self {
            tasks: Mutex::new(tasks),
            path,
        }))
    }

    pub fn add(&self, description: String, due: Option<DateTime<Utc>>) -> Result<Task> {
        let task = Task {
            id: Uuid::new_v4(),
            description,
            due,
            completed: false,
            announced: false,
        };
        let snapshot = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push(task.clone());
            tasks.clone()
        };
        self.persist(&snapshot)?;
        Ok(task)
    }

    pub fn open_tasks(&self) -> Vec<Task> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.completed)
            .cloned()
            .collect()
    }

    /// Complete the nth open task (1-based, matching the listing shown to
    /// the model). Returns the completed task, if any.
    pub fn complete(&self, number: usize) -> Result<Option<Task>> {
        if number == 0 {
            return Ok(None);
        }
        let (completed, snapshot) = {
            let mut tasks = self.tasks.lock().unwrap();
            let target = tasks
                .iter_mut()
                .filter(|t| !t.completed)
                .nth(number - 1);
            let completed = match target {
                Some(task) => {
                    task.completed = true;
                    Some(task.clone())
                }
                None => None,
            };
            (completed, tasks.clone())
        };
        if completed.is_some() {
            self.persist(&snapshot)?;
        }
        Ok(completed)
    }

    /// Tasks that have come due and not yet been announced. Marks them
    /// announced so each reminder fires exactly once.
    pub fn due_unannounced(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let (due, snapshot) = {
            let mut tasks = self.tasks.lock().unwrap();
            let mut due = Vec::new();
            for task in tasks.iter_mut() {
                if task.completed || task.announced {
                    continue;
                }
                if task.due.map(|d| d <= now).unwrap_or(false) {
                    task.announced = true;
                    due.push(task.clone());
                }
            }
            (due, tasks.clone())
        };
        if !due.is_empty() {
            self.persist(&snapshot)?;
        }
        Ok(due)
    }

    fn persist(&self, tasks: &[Task]) -> Result<()> {
        let body = tasks
            .iter()
            .map(Task::to_record)
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&self.path, body)
            .with_context(|| format!("failed to persist task board {:?}", self.path))
    }

    /// The tool set this collaborator contributes to a scene.
    pub fn tool_set(self: &Arc<Self>) -> ToolSet {
        ToolSet::new(vec![
            Arc::new(AddTaskTool { board: self.clone() }),
            Arc::new(ListTasksTool { board: self.clone() }),
            Arc::new(CompleteTaskTool { board: self.clone() }),
        ])
    }
}

struct AddTaskTool {
    board: Arc<TaskBoard>,
}

#[async_trait]
impl Tool for AddTaskTool {
    fn name(&self) -> &str {
        "add_task"
    }

    fn description(&self) -> &str {
        "File a task or reminder, optionally due in a number of minutes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "What needs doing"
                },
                "due_in_minutes": {
                    "type": "number",
                    "description": "Optional: remind about this task after this many minutes"
                }
            },
            "required": ["description"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput> {
        let description = args["description"]
            .as_str()
            .context("'description' must be a string")?
            .to_string();
        let due = args["due_in_minutes"]
            .as_f64()
            .map(|minutes| Utc::now() + Duration::seconds((minutes * 60.0) as i64));

        let task = self.board.add(description, due)?;
        let when = match task.due {
            Some(due) => format!(" (reminder at {})", due.format("%H:%M UTC")),
            None => String::new(),
        };
        Ok(ToolOutput::text(format!(
            "Task filed: {}{}",
            task.description, when
        )))
    }
}

struct ListTasksTool {
    board: Arc<TaskBoard>,
}

#[async_trait]
impl Tool for ListTasksTool {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "List the currently open tasks."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<ToolOutput> {
        let open = self.board.open_tasks();
        if open.is_empty() {
            return Ok(ToolOutput::text("No open tasks."));
        }
        let listing = open
            .iter()
            .enumerate()
            .map(|(i, task)| format!("{}. {}", i + 1, task.description))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolOutput::text(listing))
    }
}

struct CompleteTaskTool {
    board: Arc<TaskBoard>,
}

#[async_trait]
impl Tool for CompleteTaskTool {
    fn name(&self) -> &str {
        "complete_task"
    }

    fn description(&self) -> &str {
        "Mark an open task as done, by its number in the task listing."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "number": {
                    "type": "integer",
                    "description": "1-based task number from list_tasks"
                }
            },
            "required": ["number"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput> {
        let number = args["number"].as_u64().context("'number' must be an integer")? as usize;
        match self.board.complete(number)? {
            Some(task) => Ok(ToolOutput::text(format!("Done: {}", task.description))),
            None => Ok(ToolOutput::text(format!("There is no open task {}.", number))),
        }
    }
}

/// Surfaces due reminders into the conversation. The messages carry the
/// follow-up flag so the engine responds even in wake-word mode.
pub struct DueTaskProducer {
    board: Arc<TaskBoard>,
}

impl DueTaskProducer {
    pub fn new(board: Arc<TaskBoard>) -> Arc<Self> {
        Arc::new(Self { board })
    }
}

#[async_trait]
impl MessageProducer for DueTaskProducer {
    fn name(&self) -> &str {
        "due-tasks"
    }

    async fn get_new_messages(&self) -> Result<Vec<Message>> {
        let due = self.board.due_unannounced(Utc::now())?;
        Ok(due
            .into_iter()
            .map(|task| {
                Message::user(format!("[reminder] {}", task.description)).with_follow_up()
            })
            .collect())
    }
}
