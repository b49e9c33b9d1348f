use std::sync::Arc;
use std::time::Duration;

use background_checks::workflows::background_check::{
    token, BackgroundCheckStatus, CandidateDetails, CheckEngine, CheckTier,
    EmploymentVerificationSubmission, InMemoryJournal, InMemoryNotifier, InstanceId, Notification,
    StubSearchBackend, TemplateKind, WorkflowSettings,
};

const EMAIL: &str = "a@x.com";

fn engine() -> (CheckEngine, Arc<InMemoryNotifier>) {
    let notifier = Arc::new(InMemoryNotifier::new());
    let engine = CheckEngine::new(
        WorkflowSettings::default(),
        Arc::new(StubSearchBackend::new()),
        notifier.clone(),
        Arc::new(InMemoryJournal::new()),
    );
    (engine, notifier)
}

fn john_smith(ssn: &str, employer: &str) -> CandidateDetails {
    CandidateDetails {
        full_name: "John Smith".to_string(),
        ssn: ssn.to_string(),
        employer: employer.to_string(),
        ..CandidateDetails::default()
    }
}

async fn await_notification(notifier: &InMemoryNotifier, template: TemplateKind) -> Notification {
    for _ in 0..500 {
        if let Some(notification) = notifier.latest_of(template) {
            return notification;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no {} notification was sent", template.name());
}

async fn token_from(notifier: &InMemoryNotifier, template: TemplateKind) -> String {
    await_notification(notifier, template)
        .await
        .token()
        .expect("notification carries a token")
        .to_string()
}

#[tokio::test]
async fn standard_check_runs_a_single_federal_search() {
    let (engine, notifier) = engine();
    let created = engine.create(EMAIL, CheckTier::Standard).expect("check created");
    assert_eq!(created.status, "pending_accept");

    let accept = token_from(&notifier, TemplateKind::AcceptRequest).await;
    engine
        .accept(&accept, john_smith("111-11-1111", ""))
        .expect("accept delivered");
    let state = engine.wait(&created.id).await.expect("check finishes");

    assert_eq!(state.status, BackgroundCheckStatus::Completed);
    assert_eq!(
        state.requested_searches.iter().collect::<Vec<_>>(),
        vec!["FederalCriminalSearch"]
    );
    assert_eq!(state.search_results.len(), 1);
    assert!(state.search_errors.is_empty());

    let report = await_notification(&notifier, TemplateKind::FinalReport).await;
    assert_eq!(report.recipient, WorkflowSettings::default().hiring_manager_email);
    assert!(report.render_body().contains("SSN trace: valid"));
}

#[tokio::test]
async fn full_check_with_an_employer_runs_four_searches() {
    let (engine, notifier) = engine();
    let created = engine.create(EMAIL, CheckTier::Full).expect("check created");

    let accept = token_from(&notifier, TemplateKind::AcceptRequest).await;
    engine
        .accept(&accept, john_smith("111-11-1111", "Acme"))
        .expect("accept delivered");

    let research = token_from(&notifier, TemplateKind::EmploymentVerificationRequest).await;
    let details = engine
        .employment_verification_details(&research)
        .expect("researcher sees the candidate");
    assert_eq!(details.employer, "Acme");
    engine
        .verify_employment(
            &research,
            EmploymentVerificationSubmission {
                employment_verification_complete: true,
                employer_verified: true,
            },
        )
        .expect("verification delivered");

    let state = engine.wait(&created.id).await.expect("check finishes");
    assert_eq!(state.status, BackgroundCheckStatus::Completed);
    assert_eq!(state.requested_searches.len(), 4);
    assert_eq!(state.search_results.len() + state.search_errors.len(), 4);
    for name in &state.requested_searches {
        assert_ne!(
            state.search_results.contains_key(name),
            state.search_errors.contains_key(name),
            "{name} recorded in exactly one map"
        );
    }
}

#[tokio::test]
async fn declined_check_never_starts_a_search() {
    let (engine, notifier) = engine();
    let created = engine.create(EMAIL, CheckTier::Full).expect("check created");

    let accept = token_from(&notifier, TemplateKind::AcceptRequest).await;
    engine.decline(&accept).expect("decline delivered");
    let state = engine.wait(&created.id).await.expect("check finishes");

    assert_eq!(state.status, BackgroundCheckStatus::Declined);
    assert!(state.requested_searches.is_empty());
    assert_eq!(notifier.count(TemplateKind::DeclineNotice), 1);
    assert_eq!(notifier.count(TemplateKind::FinalReport), 0);
}

#[tokio::test]
async fn invalid_ssn_completes_without_searches() {
    let (engine, notifier) = engine();
    let created = engine.create(EMAIL, CheckTier::Full).expect("check created");

    let accept = token_from(&notifier, TemplateKind::AcceptRequest).await;
    engine
        .accept(&accept, john_smith("000-00-0000", "Acme"))
        .expect("accept delivered");
    let state = engine.wait(&created.id).await.expect("check finishes");

    assert_eq!(state.status, BackgroundCheckStatus::Completed);
    assert!(state.requested_searches.is_empty());
    assert!(state.search_results.is_empty());
    assert_eq!(notifier.count(TemplateKind::EmploymentVerificationRequest), 0);
}

#[tokio::test]
async fn report_token_addresses_the_run_it_was_issued_for() {
    let (engine, notifier) = engine();
    let created = engine.create(EMAIL, CheckTier::Standard).expect("check created");

    let (instance, run) = token::resolve(created.report_token.as_str()).expect("token decodes");
    assert_eq!(instance, InstanceId::background_check(EMAIL));
    assert_eq!(run, created.run_id);

    let accept = token_from(&notifier, TemplateKind::AcceptRequest).await;
    engine.decline(&accept).expect("decline delivered");
    engine.wait(&created.id).await.expect("check finishes");

    let state = engine
        .status_by_token(created.report_token.as_str())
        .expect("report readable");
    assert_eq!(state.status, BackgroundCheckStatus::Declined);
}
