use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use super::domain::{
    AcceptSubmission, CandidateDetails, EmploymentVerificationSubmission, InstanceId, RunKey,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionKind {
    Accept,
    EmploymentVerification,
}

impl DecisionKind {
    pub const ALL: [DecisionKind; 2] = [DecisionKind::Accept, DecisionKind::EmploymentVerification];

    /// Prefix of the journal steps a sub-process of this kind records.
    pub fn step(self) -> &'static str {
        match self {
            DecisionKind::Accept => "accept",
            DecisionKind::EmploymentVerification => "employment_verification",
        }
    }

    pub fn instance_id(self, email: &str) -> InstanceId {
        match self {
            DecisionKind::Accept => InstanceId::accept(email),
            DecisionKind::EmploymentVerification => InstanceId::employment_verification(email),
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionKind::Accept => f.write_str("accept"),
            DecisionKind::EmploymentVerification => f.write_str("employment verification"),
        }
    }
}

/// External decision routed to a waiting sub-process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionSignal {
    Accept(AcceptSubmission),
    EmploymentVerification(EmploymentVerificationSubmission),
}

impl DecisionSignal {
    pub fn kind(&self) -> DecisionKind {
        match self {
            DecisionSignal::Accept(_) => DecisionKind::Accept,
            DecisionSignal::EmploymentVerification(_) => DecisionKind::EmploymentVerification,
        }
    }

    /// The submission as its sub-process records it.
    pub fn to_record(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            DecisionSignal::Accept(submission) => serde_json::to_value(submission),
            DecisionSignal::EmploymentVerification(submission) => serde_json::to_value(submission),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("no decision is pending for this token")]
    Unknown,
    #[error("the decision for this token has already been made")]
    Closed,
    #[error("this token expects an {expected} decision")]
    WrongKind { expected: DecisionKind },
}

struct OpenMailbox {
    kind: DecisionKind,
    parent: RunKey,
    details: CandidateDetails,
    sender: oneshot::Sender<DecisionSignal>,
}

struct ClosedMailbox {
    kind: DecisionKind,
    parent: RunKey,
}

#[derive(Default)]
struct MailboxTable {
    open: HashMap<RunKey, OpenMailbox>,
    closed: HashMap<RunKey, ClosedMailbox>,
    /// Receivers of mailboxes restored from a journal, held until the resumed
    /// run claims them in `open`.
    reserved: HashMap<RunKey, oneshot::Receiver<DecisionSignal>>,
}

/// Routes decision signals to sub-process runs. A mailbox accepts exactly one
/// signal; afterwards, or once its owner stops waiting, it reports `Closed`.
#[derive(Default)]
pub struct Mailboxes {
    table: Mutex<MailboxTable>,
}

impl Mailboxes {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(
        self: &Arc<Self>,
        key: RunKey,
        kind: DecisionKind,
        parent: RunKey,
        details: CandidateDetails,
    ) -> (MailboxGuard, oneshot::Receiver<DecisionSignal>) {
        let mut table = self.table.lock().expect("mailbox mutex poisoned");
        let receiver = match table.reserved.remove(&key) {
            Some(receiver) => {
                if let Some(mailbox) = table.open.get_mut(&key) {
                    mailbox.details = details;
                }
                receiver
            }
            // A mailbox restored as closed stays closed; its receiver never
            // yields, so the waiter runs into its deadline.
            None if table.closed.contains_key(&key) => oneshot::channel().1,
            None => {
                let (sender, receiver) = oneshot::channel();
                table.open.insert(
                    key.clone(),
                    OpenMailbox {
                        kind,
                        parent,
                        details,
                        sender,
                    },
                );
                receiver
            }
        };

        let guard = MailboxGuard {
            mailboxes: Arc::clone(self),
            key,
        };
        (guard, receiver)
    }

    /// Opens a mailbox for a sub-process whose run is about to resume. Signals
    /// delivered before the run reaches `open` are kept for it.
    pub(crate) fn reserve(
        &self,
        key: RunKey,
        kind: DecisionKind,
        parent: RunKey,
        details: CandidateDetails,
    ) {
        let (sender, receiver) = oneshot::channel();
        let mut table = self.table.lock().expect("mailbox mutex poisoned");
        table.closed.remove(&key);
        table.reserved.insert(key.clone(), receiver);
        table.open.insert(
            key,
            OpenMailbox {
                kind,
                parent,
                details,
                sender,
            },
        );
    }

    /// Registers a sub-process that already has its decision.
    pub(crate) fn restore_closed(&self, key: RunKey, kind: DecisionKind, parent: RunKey) {
        let mut table = self.table.lock().expect("mailbox mutex poisoned");
        if !table.open.contains_key(&key) {
            table.closed.insert(key, ClosedMailbox { kind, parent });
        }
    }

    pub fn deliver(&self, key: &RunKey, signal: DecisionSignal) -> Result<(), DeliveryError> {
        self.deliver_with(key, signal, |_, _| Ok(()))
    }

    /// Delivers `signal` after `persist` has accepted it for the parent run.
    /// A failed `persist` leaves the mailbox open.
    pub(crate) fn deliver_with<E>(
        &self,
        key: &RunKey,
        signal: DecisionSignal,
        persist: impl FnOnce(&RunKey, &DecisionSignal) -> Result<(), E>,
    ) -> Result<(), E>
    where
        E: From<DeliveryError>,
    {
        let mut table = self.table.lock().expect("mailbox mutex poisoned");

        match table.open.get(key) {
            Some(mailbox) if mailbox.kind != signal.kind() => {
                return Err(DeliveryError::WrongKind {
                    expected: mailbox.kind,
                }
                .into())
            }
            Some(mailbox) => persist(&mailbox.parent, &signal)?,
            None if table.closed.contains_key(key) => return Err(DeliveryError::Closed.into()),
            None => return Err(DeliveryError::Unknown.into()),
        }

        let Some(mailbox) = table.open.remove(key) else {
            return Err(DeliveryError::Unknown.into());
        };
        table.closed.insert(
            key.clone(),
            ClosedMailbox {
                kind: mailbox.kind,
                parent: mailbox.parent,
            },
        );
        mailbox
            .sender
            .send(signal)
            .map_err(|_| DeliveryError::Closed.into())
    }

    /// Candidate details attached to a still-open mailbox of `kind`.
    pub fn details(&self, key: &RunKey, kind: DecisionKind) -> Result<CandidateDetails, DeliveryError> {
        let table = self.table.lock().expect("mailbox mutex poisoned");
        match (table.open.get(key), table.closed.get(key)) {
            (Some(mailbox), _) if mailbox.kind == kind => Ok(mailbox.details.clone()),
            (Some(mailbox), _) => Err(DeliveryError::WrongKind {
                expected: mailbox.kind,
            }),
            (None, Some(closed)) if closed.kind != kind => Err(DeliveryError::WrongKind {
                expected: closed.kind,
            }),
            (None, Some(_)) => Err(DeliveryError::Closed),
            (None, None) => Err(DeliveryError::Unknown),
        }
    }

    /// Background-check run that owns the sub-process `key`.
    pub fn parent_of(&self, key: &RunKey) -> Option<RunKey> {
        let table = self.table.lock().expect("mailbox mutex poisoned");
        table
            .open
            .get(key)
            .map(|mailbox| mailbox.parent.clone())
            .or_else(|| table.closed.get(key).map(|closed| closed.parent.clone()))
    }

    pub fn is_open(&self, key: &RunKey) -> bool {
        let table = self.table.lock().expect("mailbox mutex poisoned");
        table.open.contains_key(key)
    }

    /// Closes every mailbox still open on behalf of `parent`.
    pub(crate) fn release(&self, parent: &RunKey) {
        let mut table = self.table.lock().expect("mailbox mutex poisoned");
        let owned: Vec<RunKey> = table
            .open
            .iter()
            .filter(|(_, mailbox)| mailbox.parent == *parent)
            .map(|(key, _)| key.clone())
            .collect();
        for key in owned {
            table.reserved.remove(&key);
            if let Some(mailbox) = table.open.remove(&key) {
                table.closed.insert(
                    key,
                    ClosedMailbox {
                        kind: mailbox.kind,
                        parent: mailbox.parent,
                    },
                );
            }
        }
    }

    fn close(&self, key: &RunKey) {
        let mut table = self.table.lock().expect("mailbox mutex poisoned");
        if let Some(mailbox) = table.open.remove(key) {
            table.closed.insert(
                key.clone(),
                ClosedMailbox {
                    kind: mailbox.kind,
                    parent: mailbox.parent,
                },
            );
        }
    }
}

/// Closes its mailbox when the waiting sub-process stops, however it stops.
pub(crate) struct MailboxGuard {
    mailboxes: Arc<Mailboxes>,
    key: RunKey,
}

impl MailboxGuard {
    pub(crate) fn close(&self) {
        self.mailboxes.close(&self.key);
    }
}

impl Drop for MailboxGuard {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::background_check::domain::{InstanceId, RunId};

    fn keys() -> (RunKey, RunKey) {
        (
            RunKey::new(InstanceId::accept("a@x.com"), RunId("child".to_string())),
            RunKey::new(
                InstanceId::background_check("a@x.com"),
                RunId("parent".to_string()),
            ),
        )
    }

    #[test]
    fn first_signal_wins_and_later_ones_conflict() {
        let mailboxes = Arc::new(Mailboxes::new());
        let (child, parent) = keys();
        let (_guard, mut receiver) = mailboxes.open(
            child.clone(),
            DecisionKind::Accept,
            parent.clone(),
            CandidateDetails::default(),
        );

        mailboxes
            .deliver(&child, DecisionSignal::Accept(AcceptSubmission::declined()))
            .expect("first signal delivered");
        assert_eq!(
            mailboxes.deliver(&child, DecisionSignal::Accept(AcceptSubmission::declined())),
            Err(DeliveryError::Closed)
        );
        assert_eq!(
            receiver.try_recv().expect("signal queued"),
            DecisionSignal::Accept(AcceptSubmission::declined())
        );
        assert_eq!(mailboxes.parent_of(&child), Some(parent));
    }

    #[test]
    fn wrong_kind_leaves_mailbox_open() {
        let mailboxes = Arc::new(Mailboxes::new());
        let (child, parent) = keys();
        let (_guard, _receiver) = mailboxes.open(
            child.clone(),
            DecisionKind::Accept,
            parent,
            CandidateDetails::default(),
        );

        let signal = DecisionSignal::EmploymentVerification(EmploymentVerificationSubmission {
            employment_verification_complete: true,
            employer_verified: true,
        });
        assert_eq!(
            mailboxes.deliver(&child, signal),
            Err(DeliveryError::WrongKind {
                expected: DecisionKind::Accept
            })
        );
        assert!(mailboxes.is_open(&child));
    }

    #[test]
    fn dropping_the_guard_closes_the_mailbox() {
        let mailboxes = Arc::new(Mailboxes::new());
        let (child, parent) = keys();
        let details = CandidateDetails {
            full_name: "John Smith".to_string(),
            employer: "Acme".to_string(),
            ..CandidateDetails::default()
        };
        let (guard, _receiver) = mailboxes.open(
            child.clone(),
            DecisionKind::EmploymentVerification,
            parent,
            details.clone(),
        );
        assert_eq!(
            mailboxes.details(&child, DecisionKind::EmploymentVerification),
            Ok(details)
        );

        drop(guard);
        assert_eq!(
            mailboxes.deliver(&child, DecisionSignal::Accept(AcceptSubmission::declined())),
            Err(DeliveryError::Closed)
        );
        assert_eq!(
            mailboxes.details(&child, DecisionKind::EmploymentVerification),
            Err(DeliveryError::Closed)
        );
    }

    #[test]
    fn reserved_mailboxes_keep_early_signals_for_the_resumed_run() {
        let mailboxes = Arc::new(Mailboxes::new());
        let (child, parent) = keys();
        mailboxes.reserve(
            child.clone(),
            DecisionKind::Accept,
            parent.clone(),
            CandidateDetails::default(),
        );
        assert_eq!(mailboxes.parent_of(&child), Some(parent.clone()));

        mailboxes
            .deliver(&child, DecisionSignal::Accept(AcceptSubmission::declined()))
            .expect("signal delivered before the run resumed");
        let (_guard, mut receiver) = mailboxes.open(
            child.clone(),
            DecisionKind::Accept,
            parent,
            CandidateDetails::default(),
        );
        assert_eq!(
            receiver.try_recv().expect("signal kept"),
            DecisionSignal::Accept(AcceptSubmission::declined())
        );
        assert_eq!(
            mailboxes.deliver(&child, DecisionSignal::Accept(AcceptSubmission::declined())),
            Err(DeliveryError::Closed)
        );
    }

    #[test]
    fn restored_decisions_conflict_and_keep_their_parent() {
        let mailboxes = Mailboxes::new();
        let (child, parent) = keys();
        mailboxes.restore_closed(child.clone(), DecisionKind::Accept, parent.clone());

        assert_eq!(
            mailboxes.deliver(&child, DecisionSignal::Accept(AcceptSubmission::declined())),
            Err(DeliveryError::Closed)
        );
        assert_eq!(mailboxes.parent_of(&child), Some(parent));
    }

    #[test]
    fn restored_closed_mailboxes_are_not_reopened() {
        let mailboxes = Arc::new(Mailboxes::new());
        let (child, parent) = keys();
        mailboxes.restore_closed(child.clone(), DecisionKind::Accept, parent.clone());

        let (_guard, mut receiver) = mailboxes.open(
            child.clone(),
            DecisionKind::Accept,
            parent,
            CandidateDetails::default(),
        );
        assert!(!mailboxes.is_open(&child));
        assert_eq!(
            mailboxes.deliver(&child, DecisionSignal::Accept(AcceptSubmission::declined())),
            Err(DeliveryError::Closed)
        );
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn failed_persist_leaves_the_mailbox_open() {
        let mailboxes = Arc::new(Mailboxes::new());
        let (child, parent) = keys();
        let (_guard, mut receiver) = mailboxes.open(
            child.clone(),
            DecisionKind::Accept,
            parent.clone(),
            CandidateDetails::default(),
        );

        let refused = mailboxes.deliver_with(
            &child,
            DecisionSignal::Accept(AcceptSubmission::declined()),
            |_, _| Err(DeliveryError::Unknown),
        );
        assert_eq!(refused, Err(DeliveryError::Unknown));
        assert!(mailboxes.is_open(&child));
        assert!(receiver.try_recv().is_err());

        let mut persisted = None;
        mailboxes
            .deliver_with(
                &child,
                DecisionSignal::Accept(AcceptSubmission::declined()),
                |owner, signal| {
                    persisted = Some((owner.clone(), signal.kind()));
                    Ok::<(), DeliveryError>(())
                },
            )
            .expect("persisted signal delivered");
        assert_eq!(persisted, Some((parent, DecisionKind::Accept)));
        assert!(receiver.try_recv().is_ok());
    }

    #[test]
    fn releasing_a_run_closes_its_reserved_mailboxes() {
        let mailboxes = Mailboxes::new();
        let (child, parent) = keys();
        mailboxes.reserve(
            child.clone(),
            DecisionKind::Accept,
            parent.clone(),
            CandidateDetails::default(),
        );

        mailboxes.release(&parent);
        assert!(!mailboxes.is_open(&child));
        assert_eq!(
            mailboxes.deliver(&child, DecisionSignal::Accept(AcceptSubmission::declined())),
            Err(DeliveryError::Closed)
        );
    }

    #[test]
    fn unknown_runs_are_reported() {
        let mailboxes = Mailboxes::new();
        let (child, _) = keys();
        assert_eq!(
            mailboxes.deliver(&child, DecisionSignal::Accept(AcceptSubmission::declined())),
            Err(DeliveryError::Unknown)
        );
        assert!(mailboxes.parent_of(&child).is_none());
    }
}
