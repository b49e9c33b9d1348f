use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::domain::RunKey;
use super::journal::{Journal, JournalError, JournalEvent, StepRecord};
use super::mailbox::{DecisionSignal, MailboxGuard};

/// Cooperative cancellation shared between the engine and one run.
#[derive(Clone, Default)]
pub struct Cancellation {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        {
            let mut guard = self.reason.lock().expect("cancellation mutex poisoned");
            if guard.is_none() {
                *guard = Some(reason.into());
            }
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason
            .lock()
            .expect("cancellation mutex poisoned")
            .clone()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("{template} notification failed: {message}")]
    Notification {
        template: &'static str,
        message: String,
    },
    #[error("identity validation failed: {0}")]
    IdentityValidation(String),
    #[error("run was cancelled")]
    Cancelled,
    #[error("recorded step {key} does not match this workflow: {source}")]
    Replay {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Execution context of one run: replays journaled steps and records new ones.
///
/// Every externally visible effect goes through a keyed step. A key that is
/// already in the history returns its recorded outcome without running again.
pub(crate) struct WorkflowContext {
    key: RunKey,
    journal: Arc<dyn Journal>,
    history: HashMap<String, StepRecord>,
    cancellation: Cancellation,
}

impl WorkflowContext {
    pub(crate) fn new(
        key: RunKey,
        journal: Arc<dyn Journal>,
        history: HashMap<String, StepRecord>,
        cancellation: Cancellation,
    ) -> Self {
        Self {
            key,
            journal,
            history,
            cancellation,
        }
    }

    pub(crate) fn key(&self) -> &RunKey {
        &self.key
    }

    pub(crate) fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Completed output recorded under `key`, if any.
    pub(crate) fn recorded<T>(&self, key: &str) -> Result<Option<T>, WorkflowError>
    where
        T: DeserializeOwned,
    {
        match self.replayed::<T>(key)? {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(_)) | None => Ok(None),
        }
    }

    pub(crate) fn append(&self, event: JournalEvent) -> Result<(), JournalError> {
        self.journal.append(&self.key, &event)
    }

    /// Records a nondeterministic value once and returns it on every replay.
    pub(crate) fn side_effect<T, F>(&self, key: &str, produce: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.replayed::<T>(key)? {
            return value.map_err(|error| WorkflowError::Replay {
                key: key.to_string(),
                source: serde::de::Error::custom(error),
            });
        }

        let value = produce();
        self.record(key, Ok(&value))?;
        Ok(value)
    }

    /// Runs `operation` unless `key` was already recorded. The inner result is
    /// the operation's own outcome; the outer one is a workflow failure.
    pub(crate) async fn activity<T, E, Fut>(
        &self,
        key: &str,
        operation: Fut,
    ) -> Result<Result<T, String>, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(outcome) = self.replayed::<T>(key)? {
            debug!(run = %self.key, step = key, "replayed step");
            return Ok(outcome);
        }

        let outcome = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return Err(WorkflowError::Cancelled),
            outcome = operation => outcome.map_err(|err| err.to_string()),
        };

        self.record(key, outcome.as_ref().map_err(String::as_str))?;
        Ok(outcome)
    }

    /// Waits for the single signal of `mailbox` or for `grace` to elapse since
    /// the wait first began, whichever comes first. A signal that is ready
    /// when the timer fires still wins.
    pub(crate) async fn await_signal(
        &self,
        key: &str,
        grace: Duration,
        mailbox: &MailboxGuard,
        receiver: &mut oneshot::Receiver<DecisionSignal>,
    ) -> Result<Option<DecisionSignal>, WorkflowError> {
        let deadline: DateTime<Utc> =
            self.side_effect(&format!("{key}/deadline"), || deadline_after(grace))?;
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        let sleep = tokio::time::sleep(remaining);
        tokio::pin!(sleep);

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(WorkflowError::Cancelled),
            Ok(signal) = &mut *receiver => Ok(Some(signal)),
            _ = &mut sleep => {
                mailbox.close();
                Ok(receiver.try_recv().ok())
            }
        }
    }

    fn replayed<T>(&self, key: &str) -> Result<Option<Result<T, String>>, WorkflowError>
    where
        T: DeserializeOwned,
    {
        match self.history.get(key) {
            None => Ok(None),
            Some(StepRecord::Completed { output }) => serde_json::from_value(output.clone())
                .map(|value| Some(Ok(value)))
                .map_err(|source| WorkflowError::Replay {
                    key: key.to_string(),
                    source,
                }),
            Some(StepRecord::Failed { error }) => Ok(Some(Err(error.clone()))),
        }
    }

    fn record<T: Serialize>(&self, key: &str, outcome: Result<&T, &str>) -> Result<(), WorkflowError> {
        let record = match outcome {
            Ok(value) => StepRecord::Completed {
                output: serde_json::to_value(value).map_err(JournalError::Encode)?,
            },
            Err(error) => StepRecord::Failed {
                error: error.to_string(),
            },
        };
        self.append(JournalEvent::Step {
            key: key.to_string(),
            record,
            recorded_at: Utc::now(),
        })?;
        Ok(())
    }
}

fn deadline_after(grace: Duration) -> DateTime<Utc> {
    let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(grace)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
