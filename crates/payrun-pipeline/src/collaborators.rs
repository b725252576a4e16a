//! External collaborators consumed by the pipeline, with built-in
//! implementations for logging-only use and for tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use payrun_types::{Result, TargetPage};

use crate::registry::StepDefinition;

// ---------------------------------------------------------------------------
// StepWorker: the externally-timed calculation work for a step
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StepWorker: Send + Sync {
    async fn process(&self, step_index: usize, step: &StepDefinition) -> Result<()>;
}

/// Stands in for the statutory calculation services by sleeping for a fixed
/// delay per step.
pub struct SimulatedWorker {
    delay: Duration,
}

impl SimulatedWorker {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl StepWorker for SimulatedWorker {
    async fn process(&self, step_index: usize, step: &StepDefinition) -> Result<()> {
        tracing::debug!(step = %step.id, index = step_index, delay_ms = %self.delay.as_millis(), "Processing step");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Navigator
// ---------------------------------------------------------------------------

pub trait Navigator: Send + Sync {
    fn navigate(&self, page: TargetPage);
}

pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn navigate(&self, page: TargetPage) {
        tracing::info!(%page, "Navigate");
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pages: Mutex<Vec<TargetPage>>,
}

impl RecordingNavigator {
    pub fn pages(&self) -> Vec<TargetPage> {
        self.pages.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, page: TargetPage) {
        if let Ok(mut pages) = self.pages.lock() {
            pages.push(page);
        }
    }
}

// ---------------------------------------------------------------------------
// Notifier: fire-and-forget user notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify(&self, n: Notification) {
        match n.kind {
            NotificationKind::Warning => tracing::warn!(title = %n.title, "{}", n.message),
            _ => tracing::info!(title = %n.title, "{}", n.message),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
    }
}

// ---------------------------------------------------------------------------
// ApprovalHub: terminal hand-off for confirmation steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub run_id: Uuid,
    pub step_id: String,
    pub step_name: String,
    pub requested_at: DateTime<Utc>,
}

pub trait ApprovalHub: Send + Sync {
    /// Hand the run over for external approval. The hub re-enters the run
    /// later through the session, if at all.
    fn hand_off(&self, request: ApprovalRequest);
}

pub struct LoggingApprovalHub;

impl ApprovalHub for LoggingApprovalHub {
    fn hand_off(&self, request: ApprovalRequest) {
        tracing::info!(run = %request.run_id, step = %request.step_id, "Handed off for approval");
    }
}

#[derive(Default)]
pub struct RecordingApprovalHub {
    requests: Mutex<Vec<ApprovalRequest>>,
}

impl RecordingApprovalHub {
    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ApprovalHub for RecordingApprovalHub {
    fn hand_off(&self, request: ApprovalRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
    }
}

// ---------------------------------------------------------------------------
// ReportArtifactProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportDelivery {
    Download,
    View,
}

/// Report content for a completed step. Owned by the caller and valid
/// independently of the run that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub step_id: String,
    pub title: String,
    pub delivery: ReportDelivery,
    pub content_type: String,
    pub body: String,
    pub generated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReportArtifactProvider: Send + Sync {
    async fn fetch(&self, step_id: &str, title: &str, delivery: ReportDelivery)
        -> Result<ReportArtifact>;
}

/// Produces a plain-text placeholder keyed by report title.
pub struct PlaceholderReports;

#[async_trait]
impl ReportArtifactProvider for PlaceholderReports {
    async fn fetch(
        &self,
        step_id: &str,
        title: &str,
        delivery: ReportDelivery,
    ) -> Result<ReportArtifact> {
        Ok(ReportArtifact {
            step_id: step_id.to_string(),
            title: title.to_string(),
            delivery,
            content_type: "text/plain".into(),
            body: format!("{title}\n\nGenerated for step '{step_id}'.\n"),
            generated_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Collaborators bundle
// ---------------------------------------------------------------------------

/// The session-side collaborators, defaulting to logging implementations.
#[derive(Clone)]
pub struct Collaborators {
    pub navigator: Arc<dyn Navigator>,
    pub approvals: Arc<dyn ApprovalHub>,
    pub reports: Arc<dyn ReportArtifactProvider>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            navigator: Arc::new(LoggingNavigator),
            approvals: Arc::new(LoggingApprovalHub),
            reports: Arc::new(PlaceholderReports),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_worker_waits_for_delay() {
        tokio::time::pause();
        let worker = SimulatedWorker::new(Duration::from_secs(2));
        let step = StepDefinition::new("a", "A");
        let start = tokio::time::Instant::now();
        worker.process(0, &step).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn recording_navigator_keeps_order() {
        let nav = RecordingNavigator::default();
        nav.navigate(TargetPage::Employees);
        nav.navigate(TargetPage::Timesheets);
        assert_eq!(nav.pages(), vec![TargetPage::Employees, TargetPage::Timesheets]);
    }

    #[test]
    fn recording_notifier_records() {
        let notifier = RecordingNotifier::default();
        notifier.notify(Notification::new(NotificationKind::Warning, "Issues", "2 issues"));
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Warning);
    }

    #[tokio::test]
    async fn placeholder_report_uses_title() {
        let report = PlaceholderReports
            .fetch("gross_to_net", "Payroll Summary Report", ReportDelivery::View)
            .await
            .unwrap();
        assert_eq!(report.title, "Payroll Summary Report");
        assert_eq!(report.delivery, ReportDelivery::View);
        assert!(report.body.starts_with("Payroll Summary Report"));
    }
}
