//! Payroll run pipeline: step catalogue, sequential engine, checkpoint gate,
//! validation flagging, and progress.
//!
//! A [`PipelineSession`] owns one [`PipelineRun`] and exposes the human
//! actions (continue, override, remediate, confirm) that move it through a
//! [`StepRegistry`]. Step work is driven by a [`PipelineEngine`] shared
//! between sessions.

pub mod collaborators;
pub mod engine;
pub mod events;
pub mod flagger;
pub mod gate;
pub mod progress;
pub mod registry;
pub mod roster;
pub mod run;
pub mod session;
pub mod validation;

pub use collaborators::{
    ApprovalHub, ApprovalRequest, Collaborators, LoggingApprovalHub, LoggingNavigator,
    LoggingNotifier, Navigator, Notification, NotificationKind, Notifier, PlaceholderReports,
    RecordingApprovalHub, RecordingNavigator, RecordingNotifier, ReportArtifact,
    ReportArtifactProvider, ReportDelivery, SimulatedWorker, StepWorker,
};
pub use engine::{PipelineConfig, PipelineEngine, RemediationPolicy};
pub use events::{EventEmitter, PipelineEvent};
pub use flagger::{NoFlags, RosterFlagger, ScriptedFlagger, ValidationFlagger};
pub use gate::ApprovalDecision;
pub use progress::{overall_progress, ProgressSummary};
pub use registry::{StepDefinition, StepRegistry, ValidationKind};
pub use roster::{
    EmployeeSummary, InMemoryRoster, RosterSource, TimesheetSummary, VariablePayItem,
    VoluntaryDeduction,
};
pub use run::{PipelineRun, Resolution, RunSnapshot, SharedRun, StepState};
pub use session::PipelineSession;
pub use validation::{validate, validate_or_raise, Diagnostic, DiagnosticLevel, LintRule};
