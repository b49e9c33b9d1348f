use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::context::{WorkflowContext, WorkflowError};
use super::decision;
use super::domain::{
    BackgroundCheckState, BackgroundCheckStatus, CandidateDetails, CheckTier,
    FederalCriminalSearchInput, MotorVehicleIncidentSearchInput, SearchKind, SearchResult,
    SsnTraceInput, SsnTraceResult, StateCriminalSearchInput,
};
use super::journal::JournalEvent;
use super::mailbox::Mailboxes;
use super::notify::{Notification, Notifier};
use super::search::SearchRunner;
use super::token;
use super::WorkflowSettings;

const SSN_TRACE_STEP: &str = "ssn_trace";
const DECLINE_NOTICE_STEP: &str = "decline_notice/notify";
const REPORT_STEP: &str = "report/notify";

/// Collaborators shared by every run of one engine.
pub(crate) struct WorkflowDeps {
    pub(crate) settings: WorkflowSettings,
    pub(crate) searches: SearchRunner,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) mailboxes: Arc<Mailboxes>,
}

type SearchOutcome = (SearchKind, Result<Result<SearchResult, String>, WorkflowError>);

/// Drives one background-check run and publishes its state after every change.
pub(crate) struct BackgroundCheckWorkflow {
    deps: Arc<WorkflowDeps>,
    ctx: WorkflowContext,
    state: BackgroundCheckState,
    status: watch::Sender<BackgroundCheckState>,
}

impl BackgroundCheckWorkflow {
    pub(crate) fn new(
        deps: Arc<WorkflowDeps>,
        ctx: WorkflowContext,
        state: BackgroundCheckState,
        status: watch::Sender<BackgroundCheckState>,
    ) -> Self {
        Self {
            deps,
            ctx,
            state,
            status,
        }
    }

    /// Runs to a terminal status, journals it and returns the final state.
    pub(crate) async fn run(mut self) -> BackgroundCheckState {
        if let Err(err) = self.execute().await {
            let abandoned = match err {
                WorkflowError::Cancelled => {
                    let reason = self.ctx.cancellation().reason();
                    info!(reason = reason.as_deref().unwrap_or_default(), "background check cancelled");
                    self.state.status = BackgroundCheckStatus::Cancelled;
                    self.state.cancellation_reason = reason;
                    "cancelled before completion"
                }
                other => {
                    error!(error = %other, "background check failed");
                    self.state.status = BackgroundCheckStatus::Failed;
                    self.state.failure = Some(other.to_string());
                    "abandoned after a fatal error"
                }
            };

            let outstanding: Vec<String> = self
                .state
                .outstanding_searches()
                .into_iter()
                .map(str::to_string)
                .collect();
            for name in outstanding {
                self.state.record_search(&name, Err(abandoned.to_string()));
            }
        }

        publish(&self.status, &mut self.state);
        let finished = JournalEvent::Finished {
            state: Box::new(self.state.clone()),
        };
        if let Err(err) = self.ctx.append(finished) {
            error!(error = %err, "could not journal terminal state");
        }
        self.deps.mailboxes.release(self.ctx.key());
        self.state
    }

    async fn execute(&mut self) -> Result<(), WorkflowError> {
        self.set_status(BackgroundCheckStatus::PendingAccept);
        let email = self.state.email.clone();

        let decision = decision::accept(&self.ctx, &self.deps, &email).await?;
        self.state.accept = Some(decision.clone());

        if !decision.accepted {
            self.set_status(BackgroundCheckStatus::Declined);
            info!(candidate = %email, "candidate declined the background check");
            let notice =
                Notification::decline_notice(&self.deps.settings.hiring_manager_email, &email);
            self.notify(DECLINE_NOTICE_STEP, notice).await?;
            return Ok(());
        }

        self.set_status(BackgroundCheckStatus::Running);
        let candidate = decision.candidate;

        let trace_input = SsnTraceInput {
            full_name: candidate.full_name.clone(),
            ssn: candidate.ssn.clone(),
        };
        let trace = self
            .ctx
            .activity(SSN_TRACE_STEP, self.deps.searches.ssn_trace(&trace_input))
            .await?
            .map_err(WorkflowError::IdentityValidation)?;
        self.state.ssn_trace = Some(trace.clone());

        if !trace.ssn_is_valid {
            info!(candidate = %email, "ssn trace found no valid identity, skipping searches");
            self.set_status(BackgroundCheckStatus::Completed);
            self.send_report().await?;
            return Ok(());
        }

        let searches = planned_searches(&self.state.tier, &candidate);
        self.state
            .requested_searches
            .extend(searches.iter().map(|kind| kind.name().to_string()));
        publish(&self.status, &mut self.state);

        let ctx = &self.ctx;
        let deps = self.deps.as_ref();
        let mut pending: FuturesUnordered<BoxFuture<'_, SearchOutcome>> = searches
            .into_iter()
            .map(|kind| search_task(ctx, deps, kind, &email, &candidate, &trace))
            .collect();

        while let Some((kind, outcome)) = pending.next().await {
            let outcome = outcome?;
            match &outcome {
                Ok(_) => info!(search = %kind.task_id(&email), "search completed"),
                Err(message) => warn!(search = %kind.task_id(&email), error = %message, "search failed"),
            }
            self.state.record_search(kind.name(), outcome);
            publish(&self.status, &mut self.state);
        }
        drop(pending);

        self.set_status(BackgroundCheckStatus::Completed);
        self.send_report().await?;
        Ok(())
    }

    fn set_status(&mut self, status: BackgroundCheckStatus) {
        self.state.status = status;
        publish(&self.status, &mut self.state);
    }

    async fn notify(
        &self,
        step: &str,
        notification: Notification,
    ) -> Result<(), WorkflowError> {
        let template = notification.template.name();
        self.ctx
            .activity(step, self.deps.notifier.send(&notification))
            .await?
            .map_err(|message| WorkflowError::Notification { template, message })
    }

    /// The check is already complete; a failed report is logged, not fatal.
    async fn send_report(&self) -> Result<(), WorkflowError> {
        let report_token = token::issue_for(self.ctx.key());
        let report = Notification::final_report(
            &self.deps.settings.hiring_manager_email,
            &self.state,
            &report_token,
        );
        match self.notify(REPORT_STEP, report).await {
            Ok(()) => Ok(()),
            Err(err @ (WorkflowError::Journal(_) | WorkflowError::Replay { .. })) => Err(err),
            Err(err) => {
                warn!(error = %err, "final report was not delivered");
                Ok(())
            }
        }
    }
}

fn publish(status: &watch::Sender<BackgroundCheckState>, state: &mut BackgroundCheckState) {
    state.updated_at = Utc::now();
    status.send_replace(state.clone());
}

/// Federal search always runs. The full tier adds state and motor-vehicle
/// searches, plus employment verification when an employer was given.
pub(crate) fn planned_searches(tier: &CheckTier, candidate: &CandidateDetails) -> Vec<SearchKind> {
    let mut searches = vec![SearchKind::FederalCriminalSearch];
    if *tier == CheckTier::Full {
        searches.push(SearchKind::StateCriminalSearch);
        searches.push(SearchKind::MotorVehicleIncidentSearch);
        if !candidate.employer.trim().is_empty() {
            searches.push(SearchKind::EmploymentVerification);
        }
    }
    searches
}

fn search_task<'a>(
    ctx: &'a WorkflowContext,
    deps: &'a WorkflowDeps,
    kind: SearchKind,
    email: &'a str,
    candidate: &'a CandidateDetails,
    trace: &'a SsnTraceResult,
) -> BoxFuture<'a, SearchOutcome> {
    let step = format!("search/{}", kind.name());
    let full_name = candidate.full_name.clone();
    let address = trace.primary_address();

    async move {
        let outcome = match kind {
            SearchKind::FederalCriminalSearch => {
                let input = FederalCriminalSearchInput { full_name, address };
                ctx.activity(&step, async {
                    deps.searches
                        .federal_criminal_search(&input)
                        .await
                        .map(SearchResult::FederalCriminalSearch)
                })
                .await
            }
            SearchKind::StateCriminalSearch => {
                let input = StateCriminalSearchInput {
                    full_name,
                    known_addresses: trace.known_addresses.clone(),
                };
                ctx.activity(&step, async {
                    deps.searches
                        .state_criminal_search(&input)
                        .await
                        .map(SearchResult::StateCriminalSearch)
                })
                .await
            }
            SearchKind::MotorVehicleIncidentSearch => {
                let input = MotorVehicleIncidentSearchInput { full_name, address };
                ctx.activity(&step, async {
                    deps.searches
                        .motor_vehicle_incident_search(&input)
                        .await
                        .map(SearchResult::MotorVehicleIncidentSearch)
                })
                .await
            }
            SearchKind::EmploymentVerification => {
                match decision::employment_verification(ctx, deps, email, candidate).await {
                    Ok(result) => Ok(Ok(SearchResult::EmploymentVerification(result))),
                    Err(
                        err @ (WorkflowError::Cancelled
                        | WorkflowError::Journal(_)
                        | WorkflowError::Replay { .. }),
                    ) => Err(err),
                    Err(err) => Ok(Err(err.to_string())),
                }
            }
        };
        (kind, outcome)
    }
    .boxed()
}
