use background_checks::error::AppError;
use background_checks::workflows::background_check::{
    BackgroundCheckState, CandidateDetails, CheckEngine, CheckTier, EmploymentVerificationSubmission,
    EngineError, InMemoryJournal, InstanceId, InMemoryNotifier, Notification, StubSearchBackend,
    TemplateKind, WorkflowSettings,
};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEMO_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Args, Debug, Clone)]
pub(crate) struct DemoArgs {
    /// Package to run: `standard`, `full` or any other label
    #[arg(long, default_value = "full")]
    pub(crate) tier: String,
    /// Candidate email address
    #[arg(long, default_value = "candidate@example.com")]
    pub(crate) email: String,
    /// Decline the check instead of accepting it
    #[arg(long)]
    pub(crate) decline: bool,
    /// Social security number supplied on acceptance
    #[arg(long, default_value = "111-22-3333")]
    pub(crate) ssn: String,
    /// Current employer; full-tier checks verify it through a researcher
    #[arg(long)]
    pub(crate) employer: Option<String>,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            tier: "full".to_string(),
            email: "candidate@example.com".to_string(),
            decline: false,
            ssn: "111-22-3333".to_string(),
            employer: None,
        }
    }
}

pub(crate) struct DemoOutcome {
    pub(crate) state: BackgroundCheckState,
    pub(crate) report: Option<Notification>,
    pub(crate) sent: Vec<Notification>,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    println!("Background check demo");
    println!("  candidate: {}", args.email);
    println!("  tier:      {}", CheckTier::from(args.tier.as_str()).label());

    let outcome = run_check(&args).await?;

    println!("\nNotifications sent");
    for notification in &outcome.sent {
        println!(
            "  - {:<32} -> {}",
            notification.template.name(),
            notification.recipient
        );
    }

    println!("\nFinal status: {}", outcome.state.status.label());
    match &outcome.report {
        Some(report) => {
            println!("\n{}", report.subject());
            println!("{}", report.render_body());
        }
        None => println!("No final report was produced."),
    }

    let snapshot = serde_json::to_string_pretty(&outcome.state)
        .map_err(|err| EngineError::Unavailable(format!("unable to render state: {err}")))?;
    println!("\nState\n{snapshot}");
    Ok(())
}

/// Drives one check in process, answering as candidate and researcher.
pub(crate) async fn run_check(args: &DemoArgs) -> Result<DemoOutcome, AppError> {
    let notifier = Arc::new(InMemoryNotifier::new());
    let engine = CheckEngine::new(
        WorkflowSettings::default(),
        Arc::new(StubSearchBackend::new()),
        notifier.clone(),
        Arc::new(InMemoryJournal::new()),
    );

    let created = engine.create(&args.email, CheckTier::from(args.tier.as_str()))?;
    let result = tokio::time::timeout(
        DEMO_DEADLINE,
        drive(&engine, &notifier, args, &created.id),
    )
    .await;
    engine.shutdown().await;

    let state = match result {
        Ok(state) => state?,
        Err(_) => {
            return Err(EngineError::Unavailable(format!(
                "check {} did not finish within {}s",
                created.id,
                DEMO_DEADLINE.as_secs()
            ))
            .into())
        }
    };

    Ok(DemoOutcome {
        state,
        report: notifier.latest_of(TemplateKind::FinalReport),
        sent: notifier.sent(),
    })
}

async fn drive(
    engine: &CheckEngine,
    notifier: &InMemoryNotifier,
    args: &DemoArgs,
    instance_id: &InstanceId,
) -> Result<BackgroundCheckState, EngineError> {
    let request = loop {
        if let Some(request) = notifier.latest(TemplateKind::AcceptRequest, &args.email) {
            break request;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    let token = request
        .token()
        .ok_or_else(|| EngineError::Unavailable("accept request carried no token".to_string()))?
        .to_string();

    if args.decline {
        engine.decline(&token)?;
    } else {
        engine.accept(&token, candidate(args))?;
    }

    let mut researched = false;
    loop {
        let state = engine.status(instance_id)?;
        if state.is_terminal() {
            return engine.wait(instance_id).await;
        }
        if !researched {
            if let Some(research) = notifier.latest_of(TemplateKind::EmploymentVerificationRequest) {
                if let Some(research_token) = research.token() {
                    engine.verify_employment(
                        research_token,
                        EmploymentVerificationSubmission {
                            employment_verification_complete: true,
                            employer_verified: true,
                        },
                    )?;
                    researched = true;
                }
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn candidate(args: &DemoArgs) -> CandidateDetails {
    CandidateDetails {
        full_name: "John Smith".to_string(),
        address: "1 Chestnut Avenue, Springfield".to_string(),
        ssn: args.ssn.clone(),
        dob: "1980-01-01".to_string(),
        employer: args.employer.clone().unwrap_or_default(),
    }
}
