//! A pipeline session: the one owner of a payroll run.
//!
//! The session holds the run, the handle of the task driving it, and the
//! collaborators its actions call out to. Step work always runs on a spawned
//! driver task so actions return immediately; [`PipelineSession::settled`]
//! waits for the driver to reach a pause or the end of the run. Closing the
//! session aborts the driver and discards the run; a driver that outlives the
//! abort finds the run discarded and stops at its next transition.

use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::RwLockWriteGuard;
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

use payrun_types::{PayrunError, Result, StepStatus, TargetPage};

use crate::collaborators::{
    ApprovalRequest, Collaborators, Notification, NotificationKind, ReportArtifact, ReportDelivery,
};
use crate::engine::{PipelineEngine, RemediationPolicy};
use crate::events::PipelineEvent;
use crate::gate::{self, ApprovalDecision};
use crate::run::{PipelineRun, Resolution, RunSnapshot, SharedRun};

/// Driver tasks spawned for the run, and whether the session has closed.
///
/// `settled` takes the join handles to wait on them; the abort handles stay
/// here so `close` can always reach every live driver.
#[derive(Default)]
struct Drivers {
    closed: bool,
    joins: Vec<JoinHandle<()>>,
    aborts: Vec<AbortHandle>,
}

pub struct PipelineSession {
    engine: Arc<PipelineEngine>,
    run: SharedRun,
    run_id: Uuid,
    collaborators: Collaborators,
    drivers: Mutex<Drivers>,
}

impl PipelineSession {
    /// Open a session over a fresh run.
    pub fn open(engine: Arc<PipelineEngine>, collaborators: Collaborators) -> Self {
        let run = engine.new_run();
        let run_id = run.id();
        tracing::debug!(run = %run_id, "Session opened");
        Self {
            engine,
            run: run.shared(),
            run_id,
            collaborators,
            drivers: Mutex::new(Drivers::default()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn engine(&self) -> &PipelineEngine {
        &self.engine
    }

    pub fn is_closed(&self) -> bool {
        self.drivers.lock().map(|d| d.closed).unwrap_or(true)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(PayrunError::RunClosed);
        }
        Ok(())
    }

    /// Write access to a run that is still open. `close` may land while the
    /// lock is awaited, so openness is checked again once it is held.
    async fn write_open(&self) -> Result<RwLockWriteGuard<'_, PipelineRun>> {
        self.ensure_open()?;
        let run = self.run.write().await;
        self.ensure_open()?;
        Ok(run)
    }

    /// Read-only projection of the run for rendering.
    pub async fn snapshot(&self) -> Result<RunSnapshot> {
        self.ensure_open()?;
        Ok(self.run.read().await.snapshot())
    }

    // -----------------------------------------------------------------------
    // Driver task management
    // -----------------------------------------------------------------------

    /// Spawn step work for the run. Refused once the session has closed; the
    /// check and the registration happen under one lock with `close`.
    fn spawn_driver<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut drivers = self
            .drivers
            .lock()
            .map_err(|_| PayrunError::Other("driver registry poisoned".into()))?;
        if drivers.closed {
            tracing::debug!(run = %self.run_id, "Driver not spawned; session closed");
            return Err(PayrunError::RunClosed);
        }
        let run_id = self.run_id;
        let handle = tokio::spawn(async move {
            match work.await {
                Ok(()) => {}
                Err(PayrunError::RunClosed) => {
                    tracing::debug!(run = %run_id, "Driver stopped on discarded run");
                }
                Err(e) => tracing::error!(run = %run_id, error = %e, "Pipeline driver stopped"),
            }
        });
        drivers.aborts.retain(|h| !h.is_finished());
        drivers.aborts.push(handle.abort_handle());
        drivers.joins.retain(|h| !h.is_finished());
        drivers.joins.push(handle);
        Ok(())
    }

    fn spawn_processing(&self) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let run = Arc::clone(&self.run);
        self.spawn_driver(async move { engine.process_current_step(&run).await })
    }

    fn take_joins(&self) -> Vec<JoinHandle<()>> {
        self.drivers
            .lock()
            .map(|mut d| std::mem::take(&mut d.joins))
            .unwrap_or_default()
    }

    /// Wait until in-flight step work has resolved and the run has paused,
    /// completed, or stopped.
    pub async fn settled(&self) -> Result<()> {
        for handle in self.take_joins() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    return Err(PayrunError::Other(format!("pipeline driver panicked: {e}")));
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Begin processing at the first step. No-op if already started.
    pub async fn start(&self) -> Result<()> {
        self.ensure_open()?;
        if self.run.read().await.is_started() {
            tracing::debug!(run = %self.run_id, "Start ignored; run already started");
            return Ok(());
        }
        let engine = Arc::clone(&self.engine);
        let run = Arc::clone(&self.run);
        self.spawn_driver(async move { engine.start(&run).await })
    }

    /// Leave a checkpoint pause and carry on with the next step.
    pub async fn continue_processing(&self) -> Result<()> {
        let mut run = self.write_open().await?;
        let index = run.current_step_index();
        let resolution = gate::continue_processing(&mut run)?;
        tracing::info!(run = %self.run_id, step = %run.steps()[index].id, "Continuing after review");
        self.engine.announce(&run, index, resolution);
        drop(run);
        if resolution == Resolution::Advanced {
            self.spawn_processing()?;
        }
        Ok(())
    }

    /// Accept the current step's flags and proceed as if it had succeeded.
    pub async fn override_and_continue(&self) -> Result<()> {
        let mut run = self.write_open().await?;
        let index = run.current_step_index();
        let resolution = gate::override_and_continue(&mut run)?;
        let step = &run.steps()[index];
        tracing::info!(run = %self.run_id, step = %step.id, flags = step.flags.len(), "Flags overridden");
        self.engine.events().emit(PipelineEvent::StepOverridden {
            step_id: step.id.clone(),
            flag_count: step.flags.len(),
        });
        self.engine.announce(&run, index, resolution);
        drop(run);
        if resolution == Resolution::Advanced {
            self.spawn_processing()?;
        }
        Ok(())
    }

    /// Send the user to the page where the current step's issues can be
    /// fixed. Uses `page` if given, else the step's own target. The run is
    /// left untouched.
    pub async fn request_remediation(&self, page: Option<TargetPage>) -> Result<TargetPage> {
        self.ensure_open()?;
        let run = self.run.read().await;
        let target = gate::remediation_target(&run, page)?;
        let step_id = run.current_step().id.clone();
        drop(run);

        tracing::info!(run = %self.run_id, step = %step_id, page = %target, "Remediation requested");
        self.collaborators.navigator.navigate(target);
        self.engine
            .events()
            .emit(PipelineEvent::RemediationRequested { step_id, page: target });
        Ok(target)
    }

    /// The user is back from remediation. Under
    /// [`RemediationPolicy::Revalidate`] the flagged step is processed again;
    /// returns `false` when the policy leaves the step for an explicit override.
    pub async fn return_from_remediation(&self) -> Result<bool> {
        self.ensure_open()?;
        if self.engine.config().remediation_policy == RemediationPolicy::RequireOverride {
            tracing::debug!(run = %self.run_id, "Re-validation disabled; override required");
            return Ok(false);
        }
        let index = gate::begin_revalidation(&mut *self.write_open().await?)?;
        tracing::info!(run = %self.run_id, index, "Re-validating after remediation");
        let engine = Arc::clone(&self.engine);
        let run = Arc::clone(&self.run);
        self.spawn_driver(async move { engine.revalidate(&run, index).await })?;
        Ok(true)
    }

    /// Hand the run off to the approval hub. The pipeline does not resume on
    /// its own afterwards; see [`PipelineSession::resume_from_approval`].
    pub async fn request_confirmation(&self) -> Result<ApprovalRequest> {
        let mut run = self.write_open().await?;
        gate::request_confirmation(&mut run)?;
        let step = run.current_step();
        let request = ApprovalRequest {
            run_id: self.run_id,
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            requested_at: Utc::now(),
        };
        drop(run);

        tracing::info!(run = %self.run_id, step = %request.step_id, "Confirmation requested");
        self.engine.events().emit(PipelineEvent::ConfirmationRequested {
            step_id: request.step_id.clone(),
        });
        self.collaborators.approvals.hand_off(request.clone());
        Ok(request)
    }

    /// Entry point for the approval hub re-entering the run.
    pub async fn resume_from_approval(&self, decision: ApprovalDecision) -> Result<()> {
        let mut run = self.write_open().await?;
        let index = run.current_step_index();
        let outcome = gate::apply_approval(&mut run, &decision)?;
        let step = &run.steps()[index];
        let approved = matches!(decision, ApprovalDecision::Approved { .. });
        tracing::info!(run = %self.run_id, step = %step.id, approved, "Approval received");
        self.engine.events().emit(PipelineEvent::ApprovalReceived {
            step_id: step.id.clone(),
            approved,
        });
        match outcome {
            Some(resolution) => {
                self.engine.announce(&run, index, resolution);
                drop(run);
                if resolution == Resolution::Advanced {
                    self.spawn_processing()?;
                }
            }
            None => {
                if let ApprovalDecision::Rejected { reason } = &decision {
                    self.engine.notify(Notification::new(
                        NotificationKind::Warning,
                        format!("Approval rejected: {}", step.name),
                        reason.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub async fn download_report(&self, step_id: &str) -> Result<ReportArtifact> {
        self.fetch_report(step_id, ReportDelivery::Download).await
    }

    pub async fn view_report(&self, step_id: &str) -> Result<ReportArtifact> {
        self.fetch_report(step_id, ReportDelivery::View).await
    }

    async fn fetch_report(&self, step_id: &str, delivery: ReportDelivery) -> Result<ReportArtifact> {
        self.ensure_open()?;
        let title = {
            let run = self.run.read().await;
            let step = run.step(step_id).ok_or_else(|| PayrunError::UnknownStep {
                id: step_id.to_string(),
            })?;
            let unavailable = |reason: &str| PayrunError::ReportUnavailable {
                step: step_id.to_string(),
                reason: reason.to_string(),
            };
            let title = match (&step.report_title, step.downloadable) {
                (Some(title), true) => title.clone(),
                _ => return Err(unavailable("step has no report")),
            };
            if step.status != StepStatus::Done {
                return Err(unavailable("step has not completed"));
            }
            title
        };
        tracing::debug!(run = %self.run_id, step = step_id, ?delivery, "Fetching report");
        self.collaborators.reports.fetch(step_id, &title, delivery).await
    }

    /// Discard the run, stopping any in-flight step work. Reports already
    /// fetched stay valid. Closing twice is a no-op.
    pub async fn close(&self) {
        let (joins, aborts) = {
            let Ok(mut drivers) = self.drivers.lock() else {
                return;
            };
            if drivers.closed {
                return;
            }
            drivers.closed = true;
            (
                std::mem::take(&mut drivers.joins),
                std::mem::take(&mut drivers.aborts),
            )
        };
        for handle in &aborts {
            handle.abort();
        }
        for handle in joins {
            let _ = handle.await;
        }
        let step_in_flight = self.run.write().await.discard();
        tracing::info!(run = %self.run_id, in_flight = ?step_in_flight, "Payroll run discarded");
        self.engine.events().emit(PipelineEvent::RunDiscarded {
            run_id: self.run_id,
            step_in_flight,
        });
    }
}

impl Drop for PipelineSession {
    fn drop(&mut self) {
        if let Ok(drivers) = self.drivers.get_mut() {
            drivers.closed = true;
            for handle in &drivers.aborts {
                handle.abort();
            }
        }
    }
}
