//! Scheduling collaborators
//!
//! The engine does not evaluate cron expressions. At registration it hands
//! every enabled [`Schedule`] to a [`TriggerScheduler`] together with a task
//! that runs the pipeline; when the schedule carries lock attributes and a
//! [`LockProvider`] is configured, the task is wrapped so that only one
//! holder of the lock runs it at a time.

use crate::core::{LockSpec, Schedule};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Future of one scheduled pipeline invocation
pub type ScheduledRun = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Work handed to a scheduler; each call starts one scheduled pipeline invocation
pub type ScheduledTask = Arc<dyn Fn() -> ScheduledRun + Send + Sync>;

/// Cron-style trigger collaborator
pub trait TriggerScheduler: Send + Sync {
    fn schedule(&self, pipeline_key: &str, schedule: &Schedule, task: ScheduledTask) -> Result<(), String>;
}

/// Distributed mutual-exclusion collaborator
pub trait LockProvider: Send + Sync {
    /// Try to take `name` for at most `at_most`; false when someone holds it
    fn try_lock(&self, name: &str, at_most: Duration) -> bool;

    /// Release `name`, keeping it taken until `hold_until` when that is later
    fn unlock(&self, name: &str, hold_until: Instant);
}

/// Wrap a task so that it only runs while holding the schedule's lock
///
/// The lock is held for at least `lockAtLeastFor` even when the task
/// finishes sooner, and expires after `lockAtMostFor` if it is never
/// released.
pub fn with_lock(task: ScheduledTask, lock: LockSpec, provider: Arc<dyn LockProvider>) -> ScheduledTask {
    Arc::new(move || -> ScheduledRun {
        let task = Arc::clone(&task);
        let lock = lock.clone();
        let provider = Arc::clone(&provider);
        Box::pin(async move {
            let started = Instant::now();
            if !provider.try_lock(&lock.lock_name, lock.at_most()) {
                info!(lock = %lock.lock_name, "Lock is held elsewhere, skipping scheduled run");
                return;
            }
            debug!(lock = %lock.lock_name, "Lock acquired");
            task().await;
            provider.unlock(&lock.lock_name, started + lock.at_least());
        })
    })
}

/// Process-local [`LockProvider`]
#[derive(Default)]
pub struct InMemoryLockProvider {
    held_until: Mutex<HashMap<String, Instant>>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockProvider for InMemoryLockProvider {
    fn try_lock(&self, name: &str, at_most: Duration) -> bool {
        let mut held = self.held_until.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        match held.get(name) {
            Some(until) if *until > now => false,
            _ => {
                held.insert(name.to_string(), now + at_most);
                true
            }
        }
    }

    fn unlock(&self, name: &str, hold_until: Instant) {
        let mut held = self.held_until.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if hold_until > Instant::now() {
            held.insert(name.to_string(), hold_until);
        } else {
            held.remove(name);
        }
    }
}

/// Scheduler that only remembers what it was given
///
/// Used where no real cron trigger is wired in; tasks can be fired by hand
/// with [`ManualScheduler::fire`].
#[derive(Default)]
pub struct ManualScheduler {
    entries: Mutex<Vec<(String, Schedule, ScheduledTask)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(pipeline key, schedule name)` of every registered schedule
    pub fn scheduled(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(key, schedule, _)| (key.clone(), schedule.schedule_name.clone()))
            .collect()
    }

    /// Run the task registered under `schedule_name` to completion; false if there is none
    pub async fn fire(&self, schedule_name: &str) -> bool {
        let task = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|(_, schedule, _)| schedule.schedule_name == schedule_name)
            .map(|(_, _, task)| task.clone());

        match task {
            Some(task) => {
                task().await;
                true
            }
            None => false,
        }
    }
}

impl TriggerScheduler for ManualScheduler {
    fn schedule(&self, pipeline_key: &str, schedule: &Schedule, task: ScheduledTask) -> Result<(), String> {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // re-registering a pipeline replaces its schedules of the same name
        entries.retain(|(key, s, _)| !(key == pipeline_key && s.schedule_name == schedule.schedule_name));
        entries.push((pipeline_key.to_string(), schedule.clone(), task));
        Ok(())
    }
}
