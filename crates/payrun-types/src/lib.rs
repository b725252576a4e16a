//! Shared types, errors, and validation flags for the payroll run pipeline.
//!
//! This crate provides the foundational types used across the other payrun crates:
//! - `PayrunError`: unified error taxonomy
//! - `StepStatus`: per-step lifecycle status
//! - `ValidationFlag`: an attributable data-quality issue raised on a step
//! - `TargetPage`: where a remediation shortcut sends the user

use serde::{Deserialize, Serialize};

/// Unified error type for all payrun subsystems.
#[derive(Debug, thiserror::Error)]
pub enum PayrunError {
    // === Transition Errors ===
    #[error("Cannot {action}: {reason}")]
    InvalidTransition {
        action: &'static str,
        reason: String,
    },

    #[error("Step '{step}' is still processing")]
    StepInFlight { step: String },

    #[error("Payroll run has been closed")]
    RunClosed,

    // === Lookup Errors ===
    #[error("Unknown step '{id}'")]
    UnknownStep { id: String },

    #[error("Step index {index} is out of range")]
    StepOutOfRange { index: usize },

    #[error("Report for step '{step}' is unavailable: {reason}")]
    ReportUnavailable { step: String, reason: String },

    #[error("Step '{step}' has no remediation target")]
    NoRemediationTarget { step: String },

    // === Collaborator Errors ===
    #[error("Step catalogue invalid: {0}")]
    Catalogue(String),

    #[error("Roster unavailable: {0}")]
    Roster(String),

    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    StepTimeout { step: String, timeout_ms: u64 },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl PayrunError {
    /// Returns `true` if the error is a rejected user action. Rejections
    /// never mutate the run and the caller may simply try a different action.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PayrunError::InvalidTransition { .. }
                | PayrunError::StepInFlight { .. }
                | PayrunError::NoRemediationTarget { .. }
                | PayrunError::ReportUnavailable { .. }
        )
    }
}

/// Shorthand for building a [`PayrunError::InvalidTransition`].
pub fn invalid_transition(action: &'static str, reason: impl Into<String>) -> PayrunError {
    PayrunError::InvalidTransition {
        action,
        reason: reason.into(),
    }
}

/// A convenience alias for `Result<T, PayrunError>`.
pub type Result<T> = std::result::Result<T, PayrunError>;

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Done,
    Flagged,
}

impl StepStatus {
    /// `true` for the per-step terminal states (`done` or `flagged`).
    pub fn is_resolved(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Flagged)
    }

    /// `true` for the states that occupy the run's single active slot.
    pub fn is_active(self) -> bool {
        matches!(self, StepStatus::InProgress | StepStatus::Flagged)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Done => "done",
            StepStatus::Flagged => "flagged",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// TargetPage
// ---------------------------------------------------------------------------

/// Dashboard area a remediation shortcut navigates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPage {
    Employees,
    Timesheets,
    Payroll,
    Settings,
    Dashboard,
}

impl std::fmt::Display for TargetPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetPage::Employees => "employees",
            TargetPage::Timesheets => "timesheets",
            TargetPage::Payroll => "payroll",
            TargetPage::Settings => "settings",
            TargetPage::Dashboard => "dashboard",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TargetPage {
    type Err = PayrunError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "employees" => Ok(TargetPage::Employees),
            "timesheets" => Ok(TargetPage::Timesheets),
            "payroll" => Ok(TargetPage::Payroll),
            "settings" => Ok(TargetPage::Settings),
            "dashboard" => Ok(TargetPage::Dashboard),
            other => Err(PayrunError::Other(format!("unknown target page '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationFlag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    MissingTaxCode,
    MissingNiNumber,
    MissingBankDetails,
    UnapprovedTimesheet,
    UnapprovedVariablePay,
    ExpiredDeduction,
    MissingDeductionReference,
    ProcessingTimeout,
    ProcessingError,
}

/// Employee id used by flags that concern the whole run rather than one person.
pub const RUN_WIDE_EMPLOYEE_ID: &str = "*";

/// An attributable data-quality issue discovered while processing a step.
///
/// Flags are immutable once attached. An override reclassifies the owning
/// step; it never edits the flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFlag {
    pub id: String,
    pub employee_id: String,
    pub employee_name: String,
    pub flag_type: FlagType,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub target_page: Option<TargetPage>,
}

impl ValidationFlag {
    /// A flag raised against a single employee.
    pub fn employee(
        id: impl Into<String>,
        employee_id: impl Into<String>,
        employee_name: impl Into<String>,
        flag_type: FlagType,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            employee_id: employee_id.into(),
            employee_name: employee_name.into(),
            flag_type,
            description: description.into(),
            severity,
            target_page: None,
        }
    }

    /// A flag that concerns the run as a whole (timeouts, collaborator failures).
    pub fn run_wide(
        id: impl Into<String>,
        flag_type: FlagType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            employee_id: RUN_WIDE_EMPLOYEE_ID.to_string(),
            employee_name: "All employees".to_string(),
            flag_type,
            description: description.into(),
            severity: Severity::Warning,
            target_page: None,
        }
    }

    pub fn with_target(mut self, page: TargetPage) -> Self {
        self.target_page = Some(page);
        self
    }

    pub fn is_run_wide(&self) -> bool {
        self.employee_id == RUN_WIDE_EMPLOYEE_ID
    }
}
