//! In-memory restore progress, keyed by a generated token

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use uuid::Uuid;

/// Finished entries linger this long so clients can read the outcome.
pub const RETENTION: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressState {
    Starting,
    ValidatingFile,
    ExtractingData,
    RestoringDatabase,
    VerifyingRestore,
    Completed,
    Failed,
}

impl ProgressState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreProgress {
    pub state: ProgressState,
    pub step: String,
    pub percent: u8,
    pub details: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ProgressRegistry {
    entries: RwLock<HashMap<Uuid, RestoreProgress>>,
}

static REGISTRY: Lazy<ProgressRegistry> = Lazy::new(ProgressRegistry::default);

/// The process-wide registry.
pub fn registry() -> &'static ProgressRegistry {
    &REGISTRY
}

impl ProgressRegistry {
    /// Register a new restore and return its token.
    pub fn start(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.write(id, ProgressState::Starting, "Starting restore", 0, None);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<RestoreProgress> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn remove(&self, id: Uuid) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self, id: Uuid, state: ProgressState, step: &str, percent: u8, details: Option<String>) {
        let entry = RestoreProgress {
            state,
            step: step.to_owned(),
            percent: percent.min(100),
            details,
            updated_at: Utc::now(),
        };
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, entry);
    }

    /// Record a step. A finished state schedules removal after [`RETENTION`].
    pub fn report(&'static self, id: Uuid, state: ProgressState, step: &str, percent: u8, details: Option<String>) {
        tracing::debug!(progress_id = %id, ?state, percent, step, "restore progress");
        self.write(id, state, step, percent, details);
        if state.is_finished() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    tokio::time::sleep(RETENTION).await;
                    self.remove(id);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaked() -> &'static ProgressRegistry {
        Box::leak(Box::new(ProgressRegistry::default()))
    }

    #[test]
    fn start_then_report() {
        let reg = leaked();
        let id = reg.start();
        assert_eq!(reg.get(id).unwrap().state, ProgressState::Starting);

        reg.report(id, ProgressState::RestoringDatabase, "Restoring findings", 140, None);
        let p = reg.get(id).unwrap();
        assert_eq!(p.state, ProgressState::RestoringDatabase);
        assert_eq!(p.percent, 100);
        assert!(reg.get(Uuid::new_v4()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_entries_expire() {
        let reg = leaked();
        let id = reg.start();
        reg.report(id, ProgressState::Completed, "Done", 100, None);
        assert!(reg.get(id).is_some());

        tokio::time::sleep(RETENTION + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(reg.get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn running_entries_do_not_expire() {
        let reg = leaked();
        let id = reg.start();
        reg.report(id, ProgressState::ExtractingData, "Reading", 30, None);
        tokio::time::sleep(RETENTION * 2).await;
        assert!(reg.get(id).is_some());
    }
}
