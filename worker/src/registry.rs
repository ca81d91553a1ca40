use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::task::{lock, SharedTask, TaskStatus, WorkerTask};

/// Pool de tareas del nodo y registro de lo ya aceptado.
/// La clave es el nombre de la tarea, que incluye el tipo de recurso.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, SharedTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, SharedTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ¿Ya se aceptó una tarea con este nombre?
    pub fn lookup(&self, name: &str) -> Option<SharedTask> {
        self.tasks().get(name).cloned()
    }

    pub fn receive(&self, task: WorkerTask) -> SharedTask {
        let name = task.name();
        let shared = Arc::new(Mutex::new(task));
        self.tasks().insert(name, shared.clone());
        shared
    }

    pub fn eliminate(&self, name: &str) -> Option<SharedTask> {
        self.tasks().remove(name)
    }

    /// Cantidad de tareas registradas, en cualquier estado.
    pub fn tracked(&self) -> usize {
        self.tasks().len()
    }

    pub fn with_status(&self, status: TaskStatus) -> Vec<SharedTask> {
        self.tasks()
            .values()
            .filter(|t| lock(t).status() == status)
            .cloned()
            .collect()
    }

    pub fn in_progress(&self) -> usize {
        self.with_status(TaskStatus::InProgress).len()
    }

    /// Tareas terminadas cuyo reporte no fue confirmado.
    pub fn pending_reports(&self) -> Vec<SharedTask> {
        self.tasks()
            .values()
            .filter(|t| lock(t).pending_report().is_some())
            .cloned()
            .collect()
    }
}
