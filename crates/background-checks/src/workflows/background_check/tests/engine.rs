use super::common::*;

use crate::workflows::background_check::token;
use crate::workflows::background_check::{
    BackgroundCheckStatus, CheckFilter, CheckTier, EmploymentVerificationSubmission, EngineError,
    InstanceId, RunId, TemplateKind, TokenError,
};

#[tokio::test]
async fn create_rejects_malformed_email() {
    let h = harness();
    for email in ["", "   ", "not-an-email"] {
        let err = h.engine.create(email, CheckTier::Standard).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)), "{email:?}");
    }
}

#[tokio::test]
async fn unknown_tiers_are_accepted_literally() {
    let h = harness();
    let created = h
        .engine
        .create(EMAIL, CheckTier::from("premium"))
        .unwrap();
    assert_eq!(created.status, "pending_accept");
    assert_eq!(created.id, check_id());

    let state = h.engine.status(&check_id()).unwrap();
    assert_eq!(state.tier, CheckTier::Other("premium".to_string()));
}

#[tokio::test]
async fn one_live_run_per_candidate() {
    let h = harness();
    let first = h.engine.create(EMAIL, CheckTier::Standard).unwrap();
    let err = h.engine.create(EMAIL, CheckTier::Full).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let token = accept_token(&h.notifier).await;
    h.engine.decline(&token).unwrap();
    h.engine.wait(&check_id()).await.unwrap();

    let second = h.engine.create(EMAIL, CheckTier::Full).unwrap();
    assert_ne!(first.run_id, second.run_id);

    let latest = h.engine.status(&check_id()).unwrap();
    assert_eq!(latest.run_id, second.run_id);
    assert_eq!(latest.tier, CheckTier::Full);

    let previous = h
        .engine
        .status_by_token(first.report_token.as_str())
        .unwrap();
    assert_eq!(previous.run_id, first.run_id);
    assert_eq!(previous.status, BackgroundCheckStatus::Declined);
    assert_eq!(
        h.engine.report_token(&check_id()).unwrap(),
        second.report_token
    );
}

#[tokio::test]
async fn decision_tokens_resolve_to_the_owning_check() {
    let h = harness();
    let created = h.engine.create(EMAIL, CheckTier::Standard).unwrap();
    let token = accept_token(&h.notifier).await;

    let (instance, _) = token::resolve(&token).unwrap();
    assert_eq!(instance, InstanceId::accept(EMAIL));

    let state = h.engine.status_by_token(&token).unwrap();
    assert_eq!(state.run_id, created.run_id);
    assert_eq!(state.status, BackgroundCheckStatus::PendingAccept);
}

#[tokio::test]
async fn malformed_and_unknown_tokens_are_client_errors() {
    let h = harness();

    let err = h.engine.accept("garbage!", candidate("")).unwrap_err();
    assert!(matches!(err, EngineError::Token(TokenError::Encoding)));
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);

    let stranger = token::issue(
        &InstanceId::accept("b@x.com"),
        &RunId("nope".to_string()),
    );
    let err = h.engine.accept(stranger.as_str(), candidate("")).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(matches!(
        h.engine.status_by_token(stranger.as_str()),
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn signals_of_the_wrong_kind_are_rejected() {
    let h = harness();
    h.engine.create(EMAIL, CheckTier::Standard).unwrap();
    let token = accept_token(&h.notifier).await;

    let err = h
        .engine
        .verify_employment(&token, EmploymentVerificationSubmission::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
    assert!(matches!(
        h.engine.employment_verification_details(&token),
        Err(EngineError::InvalidRequest(_))
    ));

    h.engine.decline(&token).unwrap();
    let err = h.engine.decline(&token).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn researchers_read_candidate_details_through_their_token() {
    let h = harness();
    h.engine.create(EMAIL, CheckTier::Full).unwrap();
    let token = accept_token(&h.notifier).await;
    h.engine.accept(&token, candidate("Acme")).unwrap();

    let research_token = verification_token(&h.notifier).await;
    let details = h
        .engine
        .employment_verification_details(&research_token)
        .unwrap();
    assert_eq!(details, candidate("Acme"));

    h.engine
        .verify_employment(
            &research_token,
            EmploymentVerificationSubmission {
                employment_verification_complete: true,
                employer_verified: false,
            },
        )
        .unwrap();
    h.engine.wait(&check_id()).await.unwrap();

    assert!(matches!(
        h.engine.employment_verification_details(&research_token),
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn list_filters_by_email_and_status() {
    let h = harness();
    h.engine.create(EMAIL, CheckTier::Standard).unwrap();
    h.engine.create("b@x.com", CheckTier::Full).unwrap();

    let request = eventually(|| h.notifier.latest(TemplateKind::AcceptRequest, EMAIL)).await;
    h.engine.decline(request.token().unwrap()).unwrap();
    h.engine.wait(&check_id()).await.unwrap();

    let all = h.engine.list(&CheckFilter::default()).unwrap();
    assert_eq!(all.len(), 2);

    let declined = h
        .engine
        .list(&CheckFilter {
            email: None,
            status: Some("declined".to_string()),
        })
        .unwrap();
    assert_eq!(declined.len(), 1);
    assert_eq!(declined[0].email, EMAIL);

    let by_email = h
        .engine
        .list(&CheckFilter {
            email: Some("b@x.com".to_string()),
            status: None,
        })
        .unwrap();
    assert_eq!(by_email.len(), 1);
    assert_eq!(by_email[0].id, InstanceId::background_check("b@x.com"));

    let err = h
        .engine
        .list(&CheckFilter {
            email: None,
            status: Some("paused".to_string()),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn cancelling_finished_or_unknown_checks_fails() {
    let h = harness();
    assert!(matches!(
        h.engine.cancel(&check_id(), "typo"),
        Err(EngineError::NotFound(_))
    ));

    h.engine.create(EMAIL, CheckTier::Standard).unwrap();
    let token = accept_token(&h.notifier).await;
    h.engine.decline(&token).unwrap();
    h.engine.wait(&check_id()).await.unwrap();

    let err = h.engine.cancel(&check_id(), "too late").unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancelling_a_pending_accept_closes_the_token() {
    let h = harness();
    h.engine.create(EMAIL, CheckTier::Standard).unwrap();
    let token = accept_token(&h.notifier).await;

    h.engine.cancel(&check_id(), "").unwrap();
    let state = h.engine.wait(&check_id()).await.unwrap();
    assert_eq!(state.status, BackgroundCheckStatus::Cancelled);
    assert_eq!(
        state.cancellation_reason.as_deref(),
        Some("cancelled by operator")
    );
    assert!(state.accept.is_none());

    assert!(matches!(
        h.engine.accept(&token, candidate("")),
        Err(EngineError::Conflict(_))
    ));
}
