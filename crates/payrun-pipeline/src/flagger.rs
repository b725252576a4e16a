//! Validation flagging: per-step detection of data-quality issues.
//!
//! The engine only consults the flagger for steps whose definition names a
//! [`ValidationKind`]; every other step is clean by construction. Any flag
//! returned here halts the run.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use payrun_types::{FlagType, Result, Severity, TargetPage, ValidationFlag};

use crate::registry::{StepDefinition, ValidationKind};
use crate::roster::{EmployeeSummary, RosterSource};

#[async_trait]
pub trait ValidationFlagger: Send + Sync {
    /// Issues found on the step at `step_index`. Empty means clean.
    async fn flag(&self, step_index: usize, step: &StepDefinition) -> Result<Vec<ValidationFlag>>;
}

// ---------------------------------------------------------------------------
// NoFlags
// ---------------------------------------------------------------------------

/// Every step is clean.
pub struct NoFlags;

#[async_trait]
impl ValidationFlagger for NoFlags {
    async fn flag(&self, _step_index: usize, _step: &StepDefinition) -> Result<Vec<ValidationFlag>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// ScriptedFlagger
// ---------------------------------------------------------------------------

/// Returns fixed flag sets per step index.
///
/// Each step holds a sequence of rounds: every call consumes one round, and
/// the last round repeats forever. A step with no rounds is clean.
#[derive(Default)]
pub struct ScriptedFlagger {
    rounds: Mutex<HashMap<usize, VecDeque<Vec<ValidationFlag>>>>,
    calls: Mutex<Vec<usize>>,
}

impl ScriptedFlagger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The step always returns `flags`.
    pub fn with_flags(self, step_index: usize, flags: Vec<ValidationFlag>) -> Self {
        self.with_rounds(step_index, vec![flags])
    }

    /// The step returns each round in turn, then repeats the last.
    pub fn with_rounds(self, step_index: usize, rounds: Vec<Vec<ValidationFlag>>) -> Self {
        if let Ok(mut map) = self.rounds.lock() {
            map.insert(step_index, rounds.into());
        }
        self
    }

    /// Step indices the flagger has been asked about, in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ValidationFlagger for ScriptedFlagger {
    async fn flag(&self, step_index: usize, _step: &StepDefinition) -> Result<Vec<ValidationFlag>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(step_index);
        }
        let mut map = self
            .rounds
            .lock()
            .map_err(|_| payrun_types::PayrunError::Other("scripted flagger poisoned".into()))?;
        let flags = match map.get_mut(&step_index) {
            Some(rounds) if rounds.len() > 1 => rounds.pop_front().unwrap_or_default(),
            Some(rounds) => rounds.front().cloned().unwrap_or_default(),
            None => Vec::new(),
        };
        Ok(flags)
    }
}

// ---------------------------------------------------------------------------
// RosterFlagger
// ---------------------------------------------------------------------------

/// Derives flags from the employee roster according to the step's
/// [`ValidationKind`].
pub struct RosterFlagger {
    roster: Arc<dyn RosterSource>,
}

impl RosterFlagger {
    pub fn new(roster: Arc<dyn RosterSource>) -> Self {
        Self { roster }
    }
}

struct FlagBuilder<'a> {
    step: &'a StepDefinition,
    flags: Vec<ValidationFlag>,
}

impl FlagBuilder<'_> {
    fn push(
        &mut self,
        employee: &EmployeeSummary,
        flag_type: FlagType,
        description: String,
        severity: Severity,
        target: Option<TargetPage>,
    ) {
        let id = format!("{}-{}-{}", self.step.id, employee.id, self.flags.len() + 1);
        let mut flag = ValidationFlag::employee(
            id,
            &employee.id,
            &employee.name,
            flag_type,
            description,
            severity,
        );
        flag.target_page = target.or(self.step.target_page);
        self.flags.push(flag);
    }
}

fn check_pre_processing(b: &mut FlagBuilder<'_>, e: &EmployeeSummary) {
    if e.tax_code.as_deref().map_or(true, |c| c.trim().is_empty()) {
        b.push(
            e,
            FlagType::MissingTaxCode,
            format!("{} has no tax code; emergency code would apply", e.name),
            Severity::Warning,
            Some(TargetPage::Employees),
        );
    }
    if e.ni_number.is_none() {
        b.push(
            e,
            FlagType::MissingNiNumber,
            format!("{} has no National Insurance number", e.name),
            Severity::Info,
            Some(TargetPage::Employees),
        );
    }
    if !e.has_bank_details {
        b.push(
            e,
            FlagType::MissingBankDetails,
            format!("{} has no bank details; payment cannot be made by BACS", e.name),
            Severity::Warning,
            Some(TargetPage::Employees),
        );
    }
}

fn check_variable_pay(b: &mut FlagBuilder<'_>, e: &EmployeeSummary) {
    if let Some(ts) = &e.timesheet {
        if !ts.approved {
            b.push(
                e,
                FlagType::UnapprovedTimesheet,
                format!("{} has an unapproved timesheet ({}h)", e.name, ts.hours),
                Severity::Warning,
                Some(TargetPage::Timesheets),
            );
        }
    }
    for item in e.variable_pay.iter().filter(|i| !i.approved) {
        b.push(
            e,
            FlagType::UnapprovedVariablePay,
            format!("{}: '{}' awaits approval", e.name, item.description),
            Severity::Warning,
            Some(TargetPage::Timesheets),
        );
    }
}

fn check_deductions(b: &mut FlagBuilder<'_>, e: &EmployeeSummary, pay_date: chrono::NaiveDate) {
    for d in &e.deductions {
        if d.end_date.is_some_and(|end| end < pay_date) {
            b.push(
                e,
                FlagType::ExpiredDeduction,
                format!("{}: '{}' ended before the pay date", e.name, d.description),
                Severity::Info,
                Some(TargetPage::Employees),
            );
        }
        if d.provider_reference.is_none() {
            b.push(
                e,
                FlagType::MissingDeductionReference,
                format!("{}: '{}' has no provider reference", e.name, d.description),
                Severity::Warning,
                Some(TargetPage::Employees),
            );
        }
    }
}

#[async_trait]
impl ValidationFlagger for RosterFlagger {
    async fn flag(&self, step_index: usize, step: &StepDefinition) -> Result<Vec<ValidationFlag>> {
        let Some(kind) = step.validation else {
            return Ok(Vec::new());
        };
        let employees = self.roster.employees().await?;
        let pay_date = self.roster.pay_date();
        let mut builder = FlagBuilder {
            step,
            flags: Vec::new(),
        };
        for e in &employees {
            match kind {
                ValidationKind::PreProcessing => check_pre_processing(&mut builder, e),
                ValidationKind::VariablePay => check_variable_pay(&mut builder, e),
                ValidationKind::VoluntaryDeductions => check_deductions(&mut builder, e, pay_date),
            }
        }
        tracing::debug!(
            step = %step.id,
            index = step_index,
            employees = employees.len(),
            flags = builder.flags.len(),
            "Roster validation finished"
        );
        Ok(builder.flags)
    }
}
