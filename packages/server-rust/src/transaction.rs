//! Transaction coordinator.
//!
//! Owns one backing-store session and drives it through
//! `idle -> started -> {committed, aborted}`. Operations run inside the
//! transaction receive a [`TransactionHandle`] naming the session to scope
//! their reads and writes to.
//!
//! Two retry loops live here:
//!
//! - [`TransactionCoordinator::commit`] retries while the driver reports an
//!   `UnknownTransactionCommitResult`-labelled error.
//! - [`TransactionCoordinator::run`] re-runs an operation while it fails with
//!   a `TransientTransactionError`-labelled error.
//!
//! Both loops are unbounded and reuse the coordinator's session. Callers that
//! need a ceiling wrap the call in their own timeout.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ErrorLabel, Labeled, TransactionError};
use crate::storage::engine::{SessionDriver, SessionId};
use crate::telemetry::{record_transaction_retry, RetryKind};

// ---------------------------------------------------------------------------
// State and handle
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`TransactionCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    Started,
    Committed,
    Aborted,
}

impl TransactionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Started => "started",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token passed to operations running inside a started transaction.
///
/// A handle is bound to the transaction it was issued for. Once that
/// transaction commits or aborts, or the coordinator starts another one,
/// [`active_session`](Self::active_session) refuses it.
#[derive(Debug, Clone)]
pub struct TransactionHandle {
    session: SessionId,
    generation: u64,
    owner: Arc<Mutex<Inner>>,
}

impl TransactionHandle {
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Session to scope an operation to, if the handle's transaction is
    /// still the coordinator's started one.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::StaleHandle`] otherwise.
    pub fn active_session(&self) -> Result<SessionId, TransactionError> {
        let inner = self.owner.lock();
        if inner.state == TransactionState::Started && inner.generation == self.generation {
            Ok(self.session)
        } else {
            Err(TransactionError::StaleHandle { state: inner.state })
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionCoordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    state: TransactionState,
    session: Option<SessionId>,
    /// Bumped on every start.
    generation: u64,
}

/// Single-transaction coordinator over one backing-store session.
///
/// Not meant to be shared by concurrent transactions: callers needing
/// independent transactions create one coordinator each.
pub struct TransactionCoordinator {
    driver: Arc<dyn SessionDriver>,
    inner: Arc<Mutex<Inner>>,
}

impl TransactionCoordinator {
    /// Creates an idle coordinator. The session is opened lazily by the
    /// first [`start`](Self::start).
    #[must_use]
    pub fn new(driver: Arc<dyn SessionDriver>) -> Self {
        Self {
            driver,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Whether a transaction is currently started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state() == TransactionState::Started
    }

    /// Handle of the started transaction.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::NotStarted`] unless the state is `started`.
    pub fn handle(&self) -> Result<TransactionHandle, TransactionError> {
        let inner = self.inner.lock();
        match (inner.state, inner.session) {
            (TransactionState::Started, Some(session)) => Ok(TransactionHandle {
                session,
                generation: inner.generation,
                owner: Arc::clone(&self.inner),
            }),
            (state, _) => Err(TransactionError::NotStarted { state }),
        }
    }

    /// Starts a transaction, opening the session on first use. A coordinator
    /// may be started again once its previous transaction has ended.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::AlreadyStarted`] if a transaction is in
    /// progress, or the driver's error.
    pub async fn start(&self) -> Result<TransactionHandle, TransactionError> {
        let existing = {
            let inner = self.inner.lock();
            if inner.state == TransactionState::Started {
                return Err(TransactionError::AlreadyStarted);
            }
            inner.session
        };

        let session = match existing {
            Some(session) => session,
            None => {
                let session = self.driver.start_session().await?;
                self.inner.lock().session = Some(session);
                session
            }
        };

        self.driver.start_transaction(session).await?;
        self.inner.lock().generation += 1;
        self.transition(TransactionState::Started);
        self.handle()
    }

    /// Commits the started transaction, retrying while the outcome is
    /// unknown. Any other failure leaves the transaction aborted.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::NotStarted`] or the driver's error.
    pub async fn commit(&self) -> Result<(), TransactionError> {
        let handle = self.handle()?;
        let mut attempt: u64 = 1;
        loop {
            match self.driver.commit_transaction(handle.session).await {
                Ok(()) => break,
                Err(e) if e.has_label(ErrorLabel::UnknownTransactionCommitResult) => {
                    warn!(
                        attempt,
                        label = ?ErrorLabel::UnknownTransactionCommitResult,
                        error = %e,
                        "commit result unknown, retrying"
                    );
                    record_transaction_retry(RetryKind::Commit);
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    self.transition(TransactionState::Aborted);
                    return Err(e.into());
                }
            }
        }
        self.transition(TransactionState::Committed);
        Ok(())
    }

    /// Aborts the started transaction, discarding its writes.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::NotStarted`] or the driver's error.
    pub async fn abort(&self) -> Result<(), TransactionError> {
        let handle = self.handle()?;
        self.driver.abort_transaction(handle.session).await?;
        self.transition(TransactionState::Aborted);
        Ok(())
    }

    /// Runs `operation` inside the started transaction, re-running it on
    /// the same session while it fails with a transient transaction error.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::NotStarted`] (converted into `E`) if no
    /// transaction is started, or the first non-transient error of
    /// `operation`.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(TransactionHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TransactionError> + Labeled + fmt::Display,
    {
        let handle = self.handle()?;
        let mut attempt: u64 = 1;
        loop {
            match operation(handle.clone()).await {
                Err(e) if e.has_label(ErrorLabel::TransientTransactionError) => {
                    warn!(
                        attempt,
                        label = ?ErrorLabel::TransientTransactionError,
                        error = %e,
                        "transient transaction error, retrying operation"
                    );
                    record_transaction_retry(RetryKind::Operation);
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                result => return result,
            }
        }
    }

    /// Ends the session, aborting any transaction still in progress, and
    /// returns the coordinator to `idle`.
    ///
    /// # Errors
    ///
    /// Returns the driver's error.
    pub async fn end(&self) -> Result<(), TransactionError> {
        let session = self.inner.lock().session.take();
        if let Some(session) = session {
            self.driver.end_session(session).await?;
        }
        self.transition(TransactionState::Idle);
        Ok(())
    }

    fn transition(&self, to: TransactionState) {
        let mut inner = self.inner.lock();
        debug!(from = %inner.state, to = %to, session = ?inner.session, "transaction state");
        inner.state = to;
    }
}
