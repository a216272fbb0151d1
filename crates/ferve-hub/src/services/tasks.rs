use chrono::Local;
use ferve_core::{
    protocol::{ActionResult, TaskAdded},
    Task,
};
use tokio::sync::Mutex;

/// In-memory task list. Ids start at 1 and are never reused; tasks are never removed.
#[derive(Debug, Default)]
pub struct TaskBoard {
    tasks: Mutex<Vec<Task>>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, text: impl Into<String>) -> TaskAdded {
        let mut tasks = self.tasks.lock().await;
        let id = tasks.len() as u64 + 1;
        tasks.push(Task {
            id,
            text: text.into(),
            completed: false,
            created_at: Local::now().to_rfc3339(),
        });
        TaskAdded {
            success: true,
            task_id: id,
        }
    }

    pub async fn toggle(&self, task_id: u64) -> ActionResult {
        let mut tasks = self.tasks.lock().await;
        match tasks.iter_mut().find(|task| task.id == task_id) {
            Some(task) => {
                task.completed = !task.completed;
                ActionResult::done()
            }
            None => ActionResult::error("Task not found"),
        }
    }

    pub async fn list(&self) -> Vec<Task> {
        self.tasks.lock().await.clone()
    }
}
