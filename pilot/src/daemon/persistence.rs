//! Durable storage of tasks and their screenshots.
//!
//! The daemon only talks to the [Persistence] trait. All writes are durable once the call
//! returned.
use std::collections::BTreeMap;
use std::fs::{create_dir_all, read_dir, remove_dir_all, remove_file, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};
use pilot_lib::{Error, Screenshot, Task};
use serde::{Deserialize, Serialize};

use crate::internal_prelude::*;

pub trait Persistence: Send + Sync {
    fn save_task(&self, task: &Task) -> Result<(), Error>;

    fn load_task(&self, task_id: &str) -> Result<Option<Task>, Error>;

    /// Remove a task and all of its screenshots.
    fn delete_task(&self, task_id: &str) -> Result<(), Error>;

    fn list_tasks(&self) -> Result<Vec<Task>, Error>;

    fn save_screenshot(&self, screenshot: &Screenshot) -> Result<(), Error>;

    /// All screenshots of a task, ordered by their index.
    fn load_screenshots(&self, task_id: &str) -> Result<Vec<Screenshot>, Error>;
}

/// Task ids end up in file names. Anything that could escape the directory is refused.
fn check_id(task_id: &str) -> Result<(), Error> {
    let valid = !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPath(format!("invalid task id '{task_id}'")))
    }
}

/// Write a file to a temporary location first and move it into place afterwards.
/// That way a crash never leaves a half-written file behind.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), Error> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".partial");
    let temp = PathBuf::from(temp);

    let mut file = File::create(&temp)
        .map_err(|err| Error::IoPathError(temp.clone(), "creating temporary file", err))?;
    file.write_all(content)
        .map_err(|err| Error::IoPathError(temp.clone(), "writing temporary file", err))?;
    file.sync_all()
        .map_err(|err| Error::IoPathError(temp.clone(), "syncing temporary file", err))?;

    std::fs::rename(&temp, path)
        .map_err(|err| Error::IoPathError(path.to_path_buf(), "moving file into place", err))
}

/// Screenshot metadata, stored next to the image itself.
#[derive(Deserialize, Serialize)]
struct ScreenshotMeta {
    task_id: String,
    index: usize,
    label: String,
    taken_at: DateTime<Local>,
}

/// Stores every task as a JSON file and every screenshot as a png with a JSON sidecar.
pub struct FileStore {
    tasks_directory: PathBuf,
    screenshots_directory: PathBuf,
}

impl FileStore {
    pub fn new(tasks_directory: PathBuf, screenshots_directory: PathBuf) -> Result<Self, Error> {
        for directory in [&tasks_directory, &screenshots_directory] {
            if !directory.exists() {
                create_dir_all(directory).map_err(|err| {
                    Error::IoPathError(directory.clone(), "creating storage directory", err)
                })?;
            }
        }

        Ok(FileStore {
            tasks_directory,
            screenshots_directory,
        })
    }

    fn task_path(&self, task_id: &str) -> Result<PathBuf, Error> {
        check_id(task_id)?;
        Ok(self.tasks_directory.join(format!("{task_id}.json")))
    }

    fn screenshot_directory(&self, task_id: &str) -> Result<PathBuf, Error> {
        check_id(task_id)?;
        Ok(self.screenshots_directory.join(task_id))
    }

    fn read_task(path: &Path) -> Result<Task, Error> {
        let file = File::open(path)
            .map_err(|err| Error::IoPathError(path.to_path_buf(), "opening task", err))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|err| Error::TaskSerialization(path.display().to_string(), err.to_string()))
    }
}

impl Persistence for FileStore {
    fn save_task(&self, task: &Task) -> Result<(), Error> {
        let path = self.task_path(&task.id)?;
        let serialized = serde_json::to_vec_pretty(task)
            .map_err(|err| Error::TaskSerialization(task.id.clone(), err.to_string()))?;
        write_atomic(&path, &serialized)?;
        trace!("Task {} saved at {path:?}", task.id);

        Ok(())
    }

    fn load_task(&self, task_id: &str) -> Result<Option<Task>, Error> {
        let path = self.task_path(task_id)?;
        if !path.exists() {
            return Ok(None);
        }

        Self::read_task(&path).map(Some)
    }

    fn delete_task(&self, task_id: &str) -> Result<(), Error> {
        let path = self.task_path(task_id)?;
        if path.exists() {
            remove_file(&path).map_err(|err| Error::IoPathError(path, "removing task", err))?;
        }

        let screenshots = self.screenshot_directory(task_id)?;
        if screenshots.exists() {
            remove_dir_all(&screenshots)
                .map_err(|err| Error::IoPathError(screenshots, "removing screenshots", err))?;
        }

        Ok(())
    }

    fn list_tasks(&self) -> Result<Vec<Task>, Error> {
        let entries = read_dir(&self.tasks_directory).map_err(|err| {
            Error::IoPathError(self.tasks_directory.clone(), "listing tasks", err)
        })?;

        let mut tasks = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            // A single broken file shouldn't hide all other tasks.
            match Self::read_task(&path) {
                Ok(task) => tasks.push(task),
                Err(error) => warn!("Skipping unreadable task file: {error}"),
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(tasks)
    }

    fn save_screenshot(&self, screenshot: &Screenshot) -> Result<(), Error> {
        let directory = self.screenshot_directory(&screenshot.task_id)?;
        if !directory.exists() {
            create_dir_all(&directory).map_err(|err| {
                Error::IoPathError(directory.clone(), "creating screenshot directory", err)
            })?;
        }

        let stem = format!("{:05}", screenshot.index);
        write_atomic(&directory.join(format!("{stem}.png")), &screenshot.image)?;

        let meta = ScreenshotMeta {
            task_id: screenshot.task_id.clone(),
            index: screenshot.index,
            label: screenshot.label.clone(),
            taken_at: screenshot.taken_at,
        };
        let meta = serde_json::to_vec(&meta)
            .map_err(|err| Error::TaskSerialization(screenshot.task_id.clone(), err.to_string()))?;
        write_atomic(&directory.join(format!("{stem}.json")), &meta)
    }

    fn load_screenshots(&self, task_id: &str) -> Result<Vec<Screenshot>, Error> {
        let directory = self.screenshot_directory(task_id)?;
        if !directory.exists() {
            return Ok(Vec::new());
        }

        let entries = read_dir(&directory)
            .map_err(|err| Error::IoPathError(directory.clone(), "listing screenshots", err))?;
        let mut screenshots = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let file = File::open(&path)
                .map_err(|err| Error::IoPathError(path.clone(), "opening screenshot", err))?;
            let meta: ScreenshotMeta = serde_json::from_reader(BufReader::new(file))
                .map_err(|err| Error::TaskSerialization(task_id.to_string(), err.to_string()))?;
            let image_path = path.with_extension("png");
            let image = std::fs::read(&image_path)
                .map_err(|err| Error::IoPathError(image_path, "reading screenshot", err))?;

            screenshots.push(Screenshot {
                task_id: meta.task_id,
                index: meta.index,
                label: meta.label,
                taken_at: meta.taken_at,
                image,
            });
        }
        screenshots.sort_by_key(|screenshot| screenshot.index);

        Ok(screenshots)
    }
}

/// Keeps everything in memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    tasks: Mutex<BTreeMap<String, Task>>,
    screenshots: Mutex<BTreeMap<String, Vec<Screenshot>>>,
}

impl Persistence for MemoryStore {
    fn save_task(&self, task: &Task) -> Result<(), Error> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn load_task(&self, task_id: &str) -> Result<Option<Task>, Error> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tasks.get(task_id).cloned())
    }

    fn delete_task(&self, task_id: &str) -> Result<(), Error> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
        self.screenshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
        Ok(())
    }

    fn list_tasks(&self) -> Result<Vec<Task>, Error> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tasks.values().cloned().collect())
    }

    fn save_screenshot(&self, screenshot: &Screenshot) -> Result<(), Error> {
        let mut screenshots = self.screenshots.lock().unwrap_or_else(PoisonError::into_inner);
        let list = screenshots.entry(screenshot.task_id.clone()).or_default();
        list.retain(|existing| existing.index != screenshot.index);
        list.push(screenshot.clone());
        list.sort_by_key(|screenshot| screenshot.index);
        Ok(())
    }

    fn load_screenshots(&self, task_id: &str) -> Result<Vec<Screenshot>, Error> {
        let screenshots = self.screenshots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(screenshots.get(task_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use pilot_lib::TaskInput;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn file_store() -> (FileStore, TempDir) {
        let tempdir = TempDir::new().unwrap();
        let store = FileStore::new(
            tempdir.path().join("tasks"),
            tempdir.path().join("screenshots"),
        )
        .unwrap();
        (store, tempdir)
    }

    #[test]
    fn save_load_and_delete() {
        let (store, _tempdir) = file_store();
        let mut task = Task::new("snapshot", TaskInput::default());
        task.start();
        store.save_task(&task).unwrap();
        store
            .save_screenshot(&Screenshot::new(&task.id, 0, "loaded", vec![1, 2, 3]))
            .unwrap();

        assert_eq!(store.load_task(&task.id).unwrap(), Some(task.clone()));
        assert_eq!(store.list_tasks().unwrap(), vec![task.clone()]);

        let screenshots = store.load_screenshots(&task.id).unwrap();
        assert_eq!(screenshots.len(), 1);
        assert_eq!(screenshots[0].image, vec![1, 2, 3]);
        assert_eq!(screenshots[0].label, "loaded");

        store.delete_task(&task.id).unwrap();
        assert_eq!(store.load_task(&task.id).unwrap(), None);
        assert!(store.load_screenshots(&task.id).unwrap().is_empty());
    }

    #[test]
    fn no_partial_files_are_left_behind() {
        let (store, tempdir) = file_store();
        let task = Task::new("snapshot", TaskInput::default());
        store.save_task(&task).unwrap();
        store.save_task(&task).unwrap();

        let files: Vec<_> = read_dir(tempdir.path().join("tasks"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![std::ffi::OsString::from(format!("{}.json", task.id))]);
    }

    #[test]
    fn path_escaping_ids_are_refused() {
        let (store, _tempdir) = file_store();
        assert!(matches!(
            store.load_task("../secret"),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn memory_store_screenshots_are_ordered() {
        let store = MemoryStore::default();
        store
            .save_screenshot(&Screenshot::new("a", 1, "second", Vec::new()))
            .unwrap();
        store
            .save_screenshot(&Screenshot::new("a", 0, "first", Vec::new()))
            .unwrap();

        let labels: Vec<_> = store
            .load_screenshots("a")
            .unwrap()
            .into_iter()
            .map(|screenshot| screenshot.label)
            .collect();
        assert_eq!(labels, vec!["first", "second"]);
    }
}
