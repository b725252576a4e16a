//! Checkpoint gate: the human actions that unblock a paused run.
//!
//! Every action checks its preconditions before touching the run. A rejected
//! action returns an error and leaves the run exactly as it was.

use serde::{Deserialize, Serialize};

use payrun_types::{invalid_transition, PayrunError, Result, StepStatus, TargetPage};

use crate::run::{PipelineRun, Resolution};

/// Outcome reported by the external approval hub when it re-enters the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum ApprovalDecision {
    Approved { reference: String },
    Rejected { reason: String },
}

/// Reject actions on a discarded or completed run, or while step work is
/// in flight.
///
/// A started run that is neither paused nor complete has a driver working
/// on it, even between one step resolving and the next beginning.
fn ensure_resolvable(run: &PipelineRun, action: &'static str) -> Result<()> {
    if run.discarded {
        return Err(PayrunError::RunClosed);
    }
    if run.is_complete {
        return Err(invalid_transition(action, "run is already complete"));
    }
    let step = run.current_step();
    if step.status == StepStatus::InProgress || (run.started && !run.is_paused) {
        return Err(PayrunError::StepInFlight {
            step: step.id.clone(),
        });
    }
    if !run.started {
        return Err(invalid_transition(action, "run has not started"));
    }
    Ok(())
}

/// Leave a checkpoint pause and advance to the next step.
pub(crate) fn continue_processing(run: &mut PipelineRun) -> Result<Resolution> {
    const ACTION: &str = "continue processing";
    ensure_resolvable(run, ACTION)?;
    if !run.is_paused {
        return Err(invalid_transition(ACTION, "run is not paused"));
    }
    let step = run.current_step();
    if step.status != StepStatus::Done {
        return Err(invalid_transition(
            ACTION,
            format!("step '{}' is {}, not done", step.id, step.status),
        ));
    }
    if step.requires_confirmation {
        return Err(invalid_transition(
            ACTION,
            format!("step '{}' requires external confirmation", step.id),
        ));
    }
    run.is_paused = false;
    Ok(run.advance())
}

/// Accept a flagged step's issues. The flags stay attached for audit.
pub(crate) fn override_and_continue(run: &mut PipelineRun) -> Result<Resolution> {
    const ACTION: &str = "override";
    ensure_resolvable(run, ACTION)?;
    let index = run.current_step_index;
    let step = &mut run.steps[index];
    if step.status != StepStatus::Flagged {
        return Err(invalid_transition(
            ACTION,
            format!("step '{}' is {}, not flagged", step.id, step.status),
        ));
    }
    step.status = StepStatus::Done;
    step.overridden = true;
    Ok(run.settle_done())
}

/// Resolve where a remediation shortcut should navigate. Does not mutate the run.
pub(crate) fn remediation_target(
    run: &PipelineRun,
    requested: Option<TargetPage>,
) -> Result<TargetPage> {
    ensure_resolvable(run, "request remediation")?;
    let step = run.current_step();
    requested
        .or(step.target_page)
        .ok_or_else(|| PayrunError::NoRemediationTarget {
            step: step.id.clone(),
        })
}

/// Mark the run as handed off to the external approval hub.
pub(crate) fn request_confirmation(run: &mut PipelineRun) -> Result<()> {
    const ACTION: &str = "request confirmation";
    ensure_resolvable(run, ACTION)?;
    let step = run.current_step();
    if !step.requires_confirmation {
        return Err(invalid_transition(
            ACTION,
            format!("step '{}' does not require confirmation", step.id),
        ));
    }
    if step.status != StepStatus::Done || !run.is_paused {
        return Err(invalid_transition(
            ACTION,
            format!("step '{}' has not finished processing", step.id),
        ));
    }
    if run.awaiting_approval {
        return Err(invalid_transition(ACTION, "confirmation already requested"));
    }
    run.awaiting_approval = true;
    Ok(())
}

/// Apply the approval hub's decision. `None` means the run stays paused.
pub(crate) fn apply_approval(
    run: &mut PipelineRun,
    decision: &ApprovalDecision,
) -> Result<Option<Resolution>> {
    if !run.awaiting_approval {
        return Err(invalid_transition(
            "apply approval",
            "no confirmation has been requested",
        ));
    }
    run.awaiting_approval = false;
    match decision {
        ApprovalDecision::Approved { .. } => {
            run.is_paused = false;
            Ok(Some(run.advance()))
        }
        ApprovalDecision::Rejected { .. } => Ok(None),
    }
}

/// Put a flagged step back in flight for re-validation. Its current flags are
/// moved to `superseded_flags`.
pub(crate) fn begin_revalidation(run: &mut PipelineRun) -> Result<usize> {
    const ACTION: &str = "re-validate";
    ensure_resolvable(run, ACTION)?;
    let index = run.current_step_index;
    let step = &mut run.steps[index];
    if step.status != StepStatus::Flagged {
        return Err(invalid_transition(
            ACTION,
            format!("step '{}' is {}, not flagged", step.id, step.status),
        ));
    }
    let superseded = std::mem::take(&mut step.flags);
    step.superseded_flags.extend(superseded);
    step.status = StepStatus::InProgress;
    run.is_paused = false;
    Ok(index)
}
