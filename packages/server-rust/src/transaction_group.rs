//! Named set of transaction coordinators driven together.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::TransactionError;
use crate::transaction::{TransactionCoordinator, TransactionHandle, TransactionState};

/// Starts, commits and aborts several transactions as one unit.
///
/// Members are visited in name order. Commits are not atomic across
/// members: a failing commit leaves earlier members committed.
#[derive(Default)]
pub struct TransactionGroup {
    members: BTreeMap<String, Arc<TransactionCoordinator>>,
}

impl TransactionGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `coordinator` under `name`, replacing any previous member.
    pub fn insert(&mut self, name: impl Into<String>, coordinator: Arc<TransactionCoordinator>) {
        self.members.insert(name.into(), coordinator);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<TransactionCoordinator>> {
        self.members.get(name)
    }

    /// Handle of the started transaction of member `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::NotStarted`] if the member's transaction
    /// is not started or no such member exists.
    pub fn handle(&self, name: &str) -> Result<TransactionHandle, TransactionError> {
        match self.members.get(name) {
            Some(coordinator) => coordinator.handle(),
            None => Err(TransactionError::NotStarted {
                state: TransactionState::Idle,
            }),
        }
    }

    /// Starts every member. If one fails, members started before it are
    /// aborted and the failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first start failure.
    pub async fn start_all(&self) -> Result<(), TransactionError> {
        let mut started: Vec<&str> = Vec::new();
        for (name, coordinator) in &self.members {
            if let Err(e) = coordinator.start().await {
                for done in started {
                    if let Some(member) = self.members.get(done) {
                        if let Err(abort) = member.abort().await {
                            warn!(member = done, error = %abort, "abort after failed start failed");
                        }
                    }
                }
                return Err(e);
            }
            started.push(name);
        }
        Ok(())
    }

    /// Commits every member in name order.
    ///
    /// # Errors
    ///
    /// Returns the first commit failure; later members are left started.
    pub async fn commit_all(&self) -> Result<(), TransactionError> {
        for coordinator in self.members.values() {
            coordinator.commit().await?;
        }
        Ok(())
    }

    /// Aborts every started member, continuing past failures.
    ///
    /// # Errors
    ///
    /// Returns the first abort failure after visiting every member.
    pub async fn abort_all(&self) -> Result<(), TransactionError> {
        let mut first_error = None;
        for (name, coordinator) in &self.members {
            if !coordinator.is_started() {
                continue;
            }
            if let Err(e) = coordinator.abort().await {
                warn!(member = %name, error = %e, "abort failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
