//! Tracks background jobs and collects their results.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{error, info};

use crate::backup;
use crate::collection::Collection;
use crate::error::{Result, StoreError};

use super::{BackgroundTask, TaskCompletionInfo, TaskId, TaskProgress, TaskState, TaskType, TaskUpdate};

pub struct BackgroundTaskManager {
    tasks: HashMap<TaskId, BackgroundTask>,
    /// Registration order, for display.
    task_order: Vec<TaskId>,
}

impl BackgroundTaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            task_order: Vec::new(),
        }
    }

    /// Register a task and return the sender its worker reports through.
    pub fn register_task(&mut self, task_type: TaskType) -> (TaskId, mpsc::Sender<TaskUpdate>) {
        let (tx, rx) = mpsc::channel();
        let task = BackgroundTask::new(task_type, rx);
        let id = task.id;

        self.tasks.insert(id, task);
        self.task_order.push(id);

        (id, tx)
    }

    /// Run `job` on a worker thread. Its result becomes the final update.
    pub fn spawn<F>(&mut self, task_type: TaskType, job: F) -> TaskId
    where
        F: FnOnce(&mpsc::Sender<TaskUpdate>) -> Result<String> + Send + 'static,
    {
        let (id, tx) = self.register_task(task_type);
        thread::spawn(move || {
            let update = match job(&tx) {
                Ok(message) => {
                    info!("{} finished: {}", task_type.display_name(), message);
                    TaskUpdate::Completed { message }
                }
                Err(e) => {
                    error!("{} failed: {}", task_type.display_name(), e);
                    TaskUpdate::Failed {
                        dirty: e.is_dirty(),
                        error: e.to_string(),
                    }
                }
            };
            // The manager may be gone already; nobody is left to tell.
            let _ = tx.send(update);
        });
        id
    }

    pub fn spawn_backup(&mut self, collection: Arc<Mutex<Collection>>, target: PathBuf) -> TaskId {
        self.spawn(TaskType::Backup, move |tx| {
            let _ = tx.send(TaskUpdate::Started { total: 1 });
            let collection = lock(&collection)?;
            backup::backup_to_file(collection.db(), &target)?;
            Ok(format!("Backup written to {}", target.display()))
        })
    }

    pub fn spawn_restore(&mut self, collection: Arc<Mutex<Collection>>, source: PathBuf) -> TaskId {
        self.spawn(TaskType::Restore, move |tx| {
            let _ = tx.send(TaskUpdate::Started { total: 1 });
            let mut collection = lock(&collection)?;
            collection.restore_from_file(&source)?;
            Ok(format!("Restored from {}", source.display()))
        })
    }

    pub fn spawn_auto_save(&mut self, collection: Arc<Mutex<Collection>>, limit: usize) -> TaskId {
        self.spawn(TaskType::AutoSave, move |tx| {
            let _ = tx.send(TaskUpdate::Started { total: 1 });
            let collection = lock(&collection)?;
            let path = backup::auto_save(collection.db(), limit)?;
            let _ = tx.send(TaskUpdate::Progress(
                TaskProgress::new(1, 1).with_message(path.display().to_string()),
            ));
            Ok(format!("Auto-saved to {}", path.display()))
        })
    }

    pub fn is_running(&self, task_type: TaskType) -> bool {
        self.tasks
            .values()
            .any(|t| t.task_type == task_type && t.is_running())
    }

    /// Drain all task channels. Returns the tasks that finished since the
    /// last poll; they are no longer tracked afterwards.
    pub fn poll_updates(&mut self) -> Vec<TaskCompletionInfo> {
        let mut completed = Vec::new();

        for (&id, task) in self.tasks.iter_mut() {
            loop {
                let update = match task.receiver.try_recv() {
                    Ok(update) => update,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if !task.is_running() {
                            break;
                        }
                        TaskUpdate::Failed {
                            error: "worker exited without reporting".to_string(),
                            dirty: true,
                        }
                    }
                };

                match update {
                    TaskUpdate::Started { total } => {
                        task.progress = Some(TaskProgress::new(0, total));
                    }
                    TaskUpdate::Progress(progress) => {
                        task.progress = Some(progress);
                    }
                    TaskUpdate::Completed { message } => {
                        info!(
                            "{} finished in {:.1?}",
                            task.task_type.display_name(),
                            task.elapsed()
                        );
                        task.state = TaskState::Completed;
                        completed.push(TaskCompletionInfo {
                            id,
                            task_type: task.task_type,
                            message,
                            success: true,
                            dirty: false,
                        });
                    }
                    TaskUpdate::Failed { error, dirty } => {
                        info!(
                            "{} failed after {:.1?}",
                            task.task_type.display_name(),
                            task.elapsed()
                        );
                        task.state = TaskState::Failed {
                            error: error.clone(),
                            dirty,
                        };
                        completed.push(TaskCompletionInfo {
                            id,
                            task_type: task.task_type,
                            message: error,
                            success: false,
                            dirty,
                        });
                    }
                }
            }
        }

        for info in &completed {
            self.tasks.remove(&info.id);
            self.task_order.retain(|id| *id != info.id);
        }

        completed
    }

    /// Block until every tracked task has finished.
    pub fn wait_all(&mut self) -> Vec<TaskCompletionInfo> {
        let mut finished = Vec::new();
        loop {
            finished.extend(self.poll_updates());
            if !self.has_running_tasks() {
                return finished;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    pub fn running_tasks(&self) -> Vec<&BackgroundTask> {
        self.task_order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.is_running())
            .collect()
    }

    pub fn has_running_tasks(&self) -> bool {
        self.tasks.values().any(|t| t.is_running())
    }
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(collection: &Mutex<Collection>) -> Result<MutexGuard<'_, Collection>> {
    collection
        .lock()
        .map_err(|_| StoreError::Connection("collection lock poisoned".to_string()))
}
