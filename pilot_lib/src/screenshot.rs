use chrono::prelude::*;
use serde::{Deserialize, Serialize};

/// A single screenshot taken while a task was running.
///
/// Screenshots are append-only per task. Their `index` is handed out by the task itself and
/// is never reused, not even across restarts.
#[derive(PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Screenshot {
    pub task_id: String,
    pub index: usize,
    pub label: String,
    pub taken_at: DateTime<Local>,
    pub image: Vec<u8>,
}

impl Screenshot {
    pub fn new(task_id: &str, index: usize, label: &str, image: Vec<u8>) -> Self {
        Screenshot {
            task_id: task_id.to_string(),
            index,
            label: label.to_string(),
            taken_at: Local::now(),
            image,
        }
    }
}

/// Image bytes are way too large for the log output.
impl std::fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screenshot")
            .field("task_id", &self.task_id)
            .field("index", &self.index)
            .field("label", &self.label)
            .field("taken_at", &self.taken_at)
            .field("image", &format!("{} bytes", self.image.len()))
            .finish()
    }
}
