//! The single explicit state object for one payroll run.
//!
//! A [`PipelineRun`] is mutated only through the transition functions in this
//! module (driven by the engine) and in [`crate::gate`]. Everything a view
//! needs is available as a pure projection via [`PipelineRun::snapshot`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use payrun_types::{invalid_transition, PayrunError, Result, StepStatus, TargetPage, ValidationFlag};

use crate::progress::overall_progress;
use crate::registry::{StepDefinition, StepRegistry};

/// Handle to a run shared between its session, the driver task, and readers.
pub type SharedRun = Arc<RwLock<PipelineRun>>;

/// Mutable per-run state of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: StepStatus,
    pub is_checkpoint: bool,
    pub downloadable: bool,
    pub report_title: Option<String>,
    pub requires_confirmation: bool,
    pub target_page: Option<TargetPage>,
    pub flags: Vec<ValidationFlag>,
    /// The step was accepted by a human despite its flags.
    pub overridden: bool,
    /// Flags replaced by a later re-validation, oldest first.
    pub superseded_flags: Vec<ValidationFlag>,
}

impl StepState {
    pub fn from_definition(def: &StepDefinition) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            status: StepStatus::Pending,
            is_checkpoint: def.checkpoint,
            downloadable: def.downloadable,
            report_title: def.report_title.clone(),
            requires_confirmation: def.requires_confirmation,
            target_page: def.target_page,
            flags: Vec::new(),
            overridden: false,
            superseded_flags: Vec::new(),
        }
    }
}

/// What happened to the run when a step reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The step was flagged and the run halted.
    Flagged,
    /// The step is done and is a checkpoint; the run halted for review.
    CheckpointPause,
    /// The step is done and the run moved on to the next pending step.
    Advanced,
    /// The final step is done and the run is complete.
    Completed,
}

/// Read-only projection of a run for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSnapshot {
    pub id: Uuid,
    pub steps: Vec<StepState>,
    pub current_step_index: usize,
    pub overall_progress: u8,
    pub is_paused: bool,
    pub is_complete: bool,
    pub started: bool,
    pub awaiting_approval: bool,
    pub created_at: DateTime<Utc>,
}

impl RunSnapshot {
    pub fn current_step(&self) -> &StepState {
        &self.steps[self.current_step_index]
    }
}

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub(crate) id: Uuid,
    pub(crate) steps: Vec<StepState>,
    pub(crate) current_step_index: usize,
    pub(crate) is_paused: bool,
    pub(crate) is_complete: bool,
    pub(crate) started: bool,
    pub(crate) awaiting_approval: bool,
    pub(crate) created_at: DateTime<Utc>,
    /// Set when the owning session closes. A discarded run accepts no
    /// further step transitions.
    pub(crate) discarded: bool,
}

impl PipelineRun {
    /// Create a fresh run with every step `pending`.
    pub fn new(registry: &StepRegistry) -> Self {
        Self {
            id: Uuid::new_v4(),
            steps: registry.iter().map(StepState::from_definition).collect(),
            current_step_index: 0,
            is_paused: false,
            is_complete: false,
            started: false,
            awaiting_approval: false,
            created_at: Utc::now(),
            discarded: false,
        }
    }

    pub fn shared(self) -> SharedRun {
        Arc::new(RwLock::new(self))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn steps(&self) -> &[StepState] {
        &self.steps
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    pub fn current_step(&self) -> &StepState {
        &self.steps[self.current_step_index]
    }

    pub fn step(&self, id: &str) -> Option<&StepState> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    pub fn awaiting_approval(&self) -> bool {
        self.awaiting_approval
    }

    /// Always recomputed from step statuses; never stored.
    pub fn overall_progress(&self) -> u8 {
        overall_progress(&self.steps, self.is_complete)
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.id,
            steps: self.steps.clone(),
            current_step_index: self.current_step_index,
            overall_progress: self.overall_progress(),
            is_paused: self.is_paused,
            is_complete: self.is_complete,
            started: self.started,
            awaiting_approval: self.awaiting_approval,
            created_at: self.created_at,
        }
    }

    /// Check the run-level invariants, returning a description of the first
    /// violation found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let active = self.steps.iter().filter(|s| s.status.is_active()).count();
        if active > 1 {
            return Err(format!("{active} steps are in_progress or flagged"));
        }
        if self.current_step_index >= self.steps.len() {
            return Err(format!(
                "current_step_index {} out of range",
                self.current_step_index
            ));
        }
        if let Some((i, s)) = self.steps[..self.current_step_index]
            .iter()
            .enumerate()
            .find(|(_, s)| s.status != StepStatus::Done)
        {
            return Err(format!("step {i} ('{}') is {} before the cursor", s.id, s.status));
        }
        if let Some((i, s)) = self.steps[self.current_step_index + 1..]
            .iter()
            .enumerate()
            .find(|(_, s)| s.status != StepStatus::Pending)
        {
            let i = i + self.current_step_index + 1;
            return Err(format!("step {i} ('{}') is {} after the cursor", s.id, s.status));
        }
        for s in &self.steps {
            if !s.flags.is_empty() && s.status != StepStatus::Flagged && !s.overridden {
                return Err(format!("step '{}' has flags but is {}", s.id, s.status));
            }
        }
        let current = self.current_step();
        if current.status == StepStatus::Flagged && !self.is_paused {
            return Err(format!("step '{}' is flagged but the run is not paused", current.id));
        }
        if self.is_complete {
            if self.is_paused || self.steps.iter().any(|s| s.status != StepStatus::Done) {
                return Err("complete run has unfinished steps or is paused".into());
            }
        } else if self.overall_progress() >= 100 {
            return Err("incomplete run reports 100% progress".into());
        }
        if self.awaiting_approval && !(self.is_paused && current.requires_confirmation) {
            return Err("awaiting approval outside a confirmation pause".into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Engine transitions
    // -----------------------------------------------------------------------

    /// Mark the run started. Returns `false` if it already was.
    pub(crate) fn mark_started(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        true
    }

    /// Move the current step from `pending` to `in_progress`.
    ///
    /// Returns `None` (no-op) when the run is not started, paused, complete,
    /// or the current step is not `pending`.
    pub(crate) fn begin_step(&mut self) -> Option<usize> {
        if self.discarded || !self.started || self.is_paused || self.is_complete {
            return None;
        }
        let index = self.current_step_index;
        let step = &mut self.steps[index];
        if step.status != StepStatus::Pending {
            return None;
        }
        step.status = StepStatus::InProgress;
        Some(index)
    }

    /// Record the result of the in-flight step at `index`.
    pub(crate) fn resolve_step(
        &mut self,
        index: usize,
        flags: Vec<ValidationFlag>,
    ) -> Result<Resolution> {
        if self.discarded {
            return Err(PayrunError::RunClosed);
        }
        if index != self.current_step_index
            || self.steps[index].status != StepStatus::InProgress
        {
            return Err(invalid_transition(
                "resolve step",
                format!("step {index} is not the in-flight step"),
            ));
        }
        if !flags.is_empty() {
            let step = &mut self.steps[index];
            step.status = StepStatus::Flagged;
            step.flags = flags;
            self.is_paused = true;
            return Ok(Resolution::Flagged);
        }
        self.steps[index].status = StepStatus::Done;
        Ok(self.settle_done())
    }

    /// Apply the post-`done` rule for the current step: checkpoints pause for
    /// review, everything else advances.
    pub(crate) fn settle_done(&mut self) -> Resolution {
        if self.current_step().is_checkpoint {
            self.is_paused = true;
            return Resolution::CheckpointPause;
        }
        self.is_paused = false;
        self.advance()
    }

    /// Mark the run discarded. Returns the id of the step that was in
    /// flight, if any.
    pub(crate) fn discard(&mut self) -> Option<String> {
        self.discarded = true;
        let current = self.current_step();
        (current.status == StepStatus::InProgress).then(|| current.id.clone())
    }

    /// Move the cursor one step forward, or complete the run past the last step.
    pub(crate) fn advance(&mut self) -> Resolution {
        if self.current_step_index + 1 >= self.steps.len() {
            self.is_complete = true;
            self.is_paused = false;
            Resolution::Completed
        } else {
            self.current_step_index += 1;
            Resolution::Advanced
        }
    }
}
