use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::task::Task;

/// This is the serializable snapshot of all tasks known to the pilot daemon.
///
/// It is what the daemon sends to clients on a `List` request.
/// The daemon itself keeps its live tasks in its own internal state, which additionally
/// tracks the browsers that are attributed to running tasks.
#[derive(PartialEq, Eq, Clone, Debug, Default, Deserialize, Serialize)]
pub struct State {
    /// All tasks currently known to the daemon, keyed by their id.
    pub tasks: BTreeMap<String, Task>,
}

/// A little helper struct that's returned by the state's task filter functions.
/// Contains all task ids of tasks that matched and didn't match a given condition.
#[derive(Debug, Default)]
pub struct FilteredTasks {
    pub matching_ids: Vec<String>,
    pub non_matching_ids: Vec<String>,
}

impl State {
    pub fn new() -> State {
        State::default()
    }

    /// This checks, whether some tasks match the expected filter criteria. \
    /// By default, this checks all tasks in the current state. If a list of task ids is
    /// provided, only those tasks will be checked. Unknown ids never match.
    pub fn filter_tasks<F>(&self, condition: F, task_ids: Option<Vec<String>>) -> FilteredTasks
    where
        F: Fn(&Task) -> bool,
    {
        let task_ids = match task_ids {
            Some(ids) => ids,
            None => self.tasks.keys().cloned().collect(),
        };

        let mut filtered = FilteredTasks::default();
        for task_id in task_ids {
            match self.tasks.get(&task_id) {
                Some(task) if condition(task) => filtered.matching_ids.push(task_id),
                _ => filtered.non_matching_ids.push(task_id),
            }
        }

        filtered
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::task::TaskInput;

    #[test]
    fn filter_unknown_ids_never_match() {
        let mut state = State::new();
        let mut task = Task::new("export", TaskInput::default());
        task.start();
        let id = task.id.clone();
        state.tasks.insert(id.clone(), task);

        let filtered = state.filter_tasks(Task::is_running, Some(vec![id.clone(), "nope".into()]));
        assert_eq!(filtered.matching_ids, vec![id]);
        assert_eq!(filtered.non_matching_ids, vec!["nope".to_string()]);
    }
}
