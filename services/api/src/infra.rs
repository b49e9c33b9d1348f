use background_checks::config::ChecksConfig;
use background_checks::error::AppError;
use background_checks::workflows::background_check::{
    CheckEngine, FileJournal, HttpSearchBackend, InMemoryJournal, Journal, Notifier,
    SearchBackend, StubSearchBackend,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Third-party record providers when a base URL is configured, the stub otherwise.
pub(crate) fn search_backend(config: &ChecksConfig) -> Result<Arc<dyn SearchBackend>, AppError> {
    match &config.thirdparty_url {
        Some(url) => {
            info!(%url, "using third-party search backends");
            let backend = HttpSearchBackend::new(url.clone(), config.thirdparty_timeout)?;
            Ok(Arc::new(backend))
        }
        None => {
            warn!("BGC_THIRDPARTY_URL not set, searches run against the built-in stub");
            Ok(Arc::new(StubSearchBackend::new()))
        }
    }
}

pub(crate) fn journal(config: &ChecksConfig) -> Result<Arc<dyn Journal>, AppError> {
    match &config.journal_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "journaling background checks to disk");
            Ok(Arc::new(FileJournal::open(dir.clone())?))
        }
        None => {
            warn!("BGC_JOURNAL_DIR not set, background checks will not survive a restart");
            Ok(Arc::new(InMemoryJournal::new()))
        }
    }
}

pub(crate) fn build_engine(
    config: &ChecksConfig,
    notifier: Arc<dyn Notifier>,
) -> Result<CheckEngine, AppError> {
    Ok(CheckEngine::new(
        config.workflow_settings(),
        search_backend(config)?,
        notifier,
        journal(config)?,
    ))
}
