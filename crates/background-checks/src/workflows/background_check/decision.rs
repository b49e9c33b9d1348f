//! Notify, then wait for one external decision or the grace period.

use std::time::Duration;

use rand::seq::IndexedRandom;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use super::context::{WorkflowContext, WorkflowError};
use super::domain::{
    AcceptSubmission, CandidateDetails, EmploymentVerificationSubmission, InstanceId, RunId,
    RunKey,
};
use super::mailbox::{DecisionKind, DecisionSignal};
use super::notify::{Notification, TemplateKind};
use super::orchestrator::WorkflowDeps;
use super::token::{self, DecisionToken};

pub(crate) trait Decision: Serialize + DeserializeOwned + Clone + Send {
    const KIND: DecisionKind;

    /// Outcome recorded when the grace period passes without a signal.
    fn timed_out() -> Self;

    fn from_signal(signal: DecisionSignal) -> Option<Self>;
}

impl Decision for AcceptSubmission {
    const KIND: DecisionKind = DecisionKind::Accept;

    fn timed_out() -> Self {
        AcceptSubmission::declined()
    }

    fn from_signal(signal: DecisionSignal) -> Option<Self> {
        match signal {
            DecisionSignal::Accept(submission) => Some(submission),
            DecisionSignal::EmploymentVerification(_) => None,
        }
    }
}

impl Decision for EmploymentVerificationSubmission {
    const KIND: DecisionKind = DecisionKind::EmploymentVerification;

    fn timed_out() -> Self {
        EmploymentVerificationSubmission::default()
    }

    fn from_signal(signal: DecisionSignal) -> Option<Self> {
        match signal {
            DecisionSignal::EmploymentVerification(submission) => Some(submission),
            DecisionSignal::Accept(_) => None,
        }
    }
}

struct SubProcess {
    instance_id: InstanceId,
    grace: Duration,
    details: CandidateDetails,
}

async fn run_decision<D, N>(
    ctx: &WorkflowContext,
    deps: &WorkflowDeps,
    sub: SubProcess,
    notification: N,
) -> Result<D, WorkflowError>
where
    D: Decision,
    N: FnOnce(&DecisionToken) -> Notification,
{
    let step = D::KIND.step();
    let run_id: RunId = ctx.side_effect(&format!("{step}/run"), RunId::generate)?;
    let key = RunKey::new(sub.instance_id, run_id);

    let decision_key = format!("{step}/decision");
    if let Some(decision) = ctx.recorded::<D>(&decision_key)? {
        return Ok(decision);
    }

    let (mailbox, mut receiver) =
        deps.mailboxes
            .open(key.clone(), D::KIND, ctx.key().clone(), sub.details);
    let token = token::issue_for(&key);
    let notification = notification(&token);
    let template = notification.template.name();

    ctx.activity(&format!("{step}/notify"), deps.notifier.send(&notification))
        .await?
        .map_err(|message| WorkflowError::Notification { template, message })?;
    info!(run = %key, template, recipient = %notification.recipient, "awaiting decision");

    let signal = ctx
        .await_signal(step, sub.grace, &mailbox, &mut receiver)
        .await?;
    let decision = match signal.and_then(D::from_signal) {
        Some(decision) => decision,
        None => {
            info!(run = %key, grace = ?sub.grace, "grace period elapsed without a decision");
            D::timed_out()
        }
    };

    ctx.side_effect(&decision_key, || decision.clone())?;
    drop(mailbox);
    Ok(decision)
}

/// Asks the candidate to accept the check. Silence counts as a decline.
pub(crate) async fn accept(
    ctx: &WorkflowContext,
    deps: &WorkflowDeps,
    email: &str,
) -> Result<AcceptSubmission, WorkflowError> {
    let sub = SubProcess {
        instance_id: DecisionKind::Accept.instance_id(email),
        grace: deps.settings.accept_grace_period,
        details: CandidateDetails::default(),
    };
    run_decision(ctx, deps, sub, |token| {
        Notification::accept_request(email, token)
    })
    .await
}

/// Asks a researcher to confirm the candidate's employer.
pub(crate) async fn employment_verification(
    ctx: &WorkflowContext,
    deps: &WorkflowDeps,
    email: &str,
    candidate: &CandidateDetails,
) -> Result<EmploymentVerificationSubmission, WorkflowError> {
    let researcher: Option<String> = ctx.side_effect(
        &format!("{}/researcher", DecisionKind::EmploymentVerification.step()),
        || {
            deps.settings
                .researchers
                .choose(&mut rand::rng())
                .cloned()
        },
    )?;
    let Some(researcher) = researcher else {
        return Err(WorkflowError::Notification {
            template: TemplateKind::EmploymentVerificationRequest.name(),
            message: "no researchers are configured".to_string(),
        });
    };

    let sub = SubProcess {
        instance_id: DecisionKind::EmploymentVerification.instance_id(email),
        grace: deps.settings.research_deadline,
        details: candidate.clone(),
    };
    run_decision(ctx, deps, sub, |token| {
        Notification::employment_verification_request(&researcher, email, candidate, token)
    })
    .await
}
